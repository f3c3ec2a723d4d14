use serde_json::{json, Value};
use std::fmt;

/// One logical collection kept both locally and as a sheet on the remote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dataset {
  Users,
  Stock,
  Sales,
  RepairJobs,
  WarrantyJobs,
  CustomerCredits,
  VendorCredits,
  Expenses,
  Vendors,
  VendorPurchases,
  DailyCash,
}

impl Dataset {
  pub const ALL: [Dataset; 11] = [
    Dataset::Users,
    Dataset::Stock,
    Dataset::Sales,
    Dataset::RepairJobs,
    Dataset::WarrantyJobs,
    Dataset::CustomerCredits,
    Dataset::VendorCredits,
    Dataset::Expenses,
    Dataset::Vendors,
    Dataset::VendorPurchases,
    Dataset::DailyCash,
  ];

  /// Storage key the application reads and writes
  pub fn key(self) -> &'static str {
    match self {
      Dataset::Users => "starcity_users",
      Dataset::Stock => "starcity_stock",
      Dataset::Sales => "starcity_sales",
      Dataset::RepairJobs => "starcity_repairs",
      Dataset::WarrantyJobs => "starcity_warranty",
      Dataset::CustomerCredits => "starcity_customer_credits",
      Dataset::VendorCredits => "starcity_vendor_credits",
      Dataset::Expenses => "starcity_expenses",
      Dataset::Vendors => "starcity_vendors",
      Dataset::VendorPurchases => "starcity_purchases",
      Dataset::DailyCash => "starcity_dailyCash",
    }
  }

  /// Sheet name on the remote
  pub fn resource(self) -> &'static str {
    match self {
      Dataset::Users => "Users",
      Dataset::Stock => "Stock",
      Dataset::Sales => "Sales",
      Dataset::RepairJobs => "RepairJobs",
      Dataset::WarrantyJobs => "WarrantyJobs",
      Dataset::CustomerCredits => "CustomerCredits",
      Dataset::VendorCredits => "VendorCredits",
      Dataset::Expenses => "Expenses",
      Dataset::Vendors => "Vendors",
      Dataset::VendorPurchases => "VendorPurchases",
      Dataset::DailyCash => "DailyCash",
    }
  }

  /// Remote procedure returning the full sheet
  pub fn fetch_function(self) -> &'static str {
    match self {
      Dataset::Users => "getUsers",
      Dataset::Stock => "getStock",
      Dataset::Sales => "getSales",
      Dataset::RepairJobs => "getRepairJobs",
      Dataset::WarrantyJobs => "getWarrantyJobs",
      Dataset::CustomerCredits => "getCustomerCredits",
      Dataset::VendorCredits => "getVendorCredits",
      Dataset::Expenses => "getExpenses",
      Dataset::Vendors => "getVendors",
      Dataset::VendorPurchases => "getVendorPurchases",
      Dataset::DailyCash => "getDailyCash",
    }
  }

  pub fn from_key(key: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|d| d.key() == key)
  }
}

impl fmt::Display for Dataset {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.key())
  }
}

/// Procedures exposed by the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOp {
  /// Read every row of a dataset's sheet
  Fetch(Dataset),
  /// Replace every row of a dataset's sheet
  SyncSheet { dataset: Dataset, rows: Value },
}

impl RemoteOp {
  pub fn function_name(&self) -> &'static str {
    match self {
      RemoteOp::Fetch(dataset) => dataset.fetch_function(),
      RemoteOp::SyncSheet { .. } => "syncSheetData",
    }
  }

  /// Positional arguments as sent on the wire
  pub fn arguments(&self) -> Value {
    match self {
      RemoteOp::Fetch(_) => json!([]),
      RemoteOp::SyncSheet { dataset, rows } => json!([dataset.resource(), rows]),
    }
  }

  pub fn dataset(&self) -> Dataset {
    match self {
      RemoteOp::Fetch(dataset) | RemoteOp::SyncSheet { dataset, .. } => *dataset,
    }
  }
}
