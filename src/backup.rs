//! Whole-shop backup files.
//!
//! A backup carries every dataset plus the settings key as parsed JSON, with a
//! SHA-256 checksum over the serialized datasets so a truncated or hand-edited
//! file is refused on import.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::remote::Dataset;
use crate::store::KeyValueStore;
use crate::sync::Confirm;

const BACKUP_VERSION: &str = "1.2.0";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Backup {
  pub version: String,
  pub exported_at: DateTime<Utc>,
  pub checksum: String,
  pub datasets: BTreeMap<String, Value>,
}

impl Backup {
  fn new(datasets: BTreeMap<String, Value>) -> Result<Self> {
    Ok(Self {
      version: BACKUP_VERSION.to_string(),
      exported_at: Utc::now(),
      checksum: checksum(&datasets)?,
      datasets,
    })
  }

  pub fn verify(&self) -> Result<()> {
    let actual = checksum(&self.datasets)?;
    if actual != self.checksum {
      return Err(eyre!(
        "Backup checksum mismatch (expected {}, got {})",
        self.checksum,
        actual
      ));
    }
    Ok(())
  }
}

fn checksum(datasets: &BTreeMap<String, Value>) -> Result<String> {
  let bytes =
    serde_json::to_vec(datasets).map_err(|e| eyre!("Failed to serialize datasets: {}", e))?;
  Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Collect the settings key and every dataset currently in `storage`.
pub fn export<S: KeyValueStore + ?Sized>(storage: &S, settings_key: &str) -> Result<Backup> {
  let keys = std::iter::once(settings_key).chain(Dataset::ALL.iter().map(|d| d.key()));

  let mut datasets = BTreeMap::new();
  for key in keys {
    let Some(raw) = storage.get_item(key)? else {
      continue;
    };
    let value = serde_json::from_str(&raw).unwrap_or_else(|_| {
      warn!(key, "Stored value is not JSON, exported as text");
      Value::String(raw)
    });
    datasets.insert(key.to_string(), value);
  }

  info!(entries = datasets.len(), "Backup exported");
  Backup::new(datasets)
}

/// Write every entry of `backup` through `storage`, overwriting current data.
///
/// Returns the number of entries written, or 0 when the user declines.
pub fn import<S: KeyValueStore + ?Sized>(
  storage: &S,
  backup: &Backup,
  settings_key: &str,
  confirm: &dyn Confirm,
) -> Result<usize> {
  backup.verify()?;

  let required = [settings_key, Dataset::Stock.key(), Dataset::Users.key()];
  if let Some(missing) = required
    .iter()
    .find(|k| !backup.datasets.contains_key(**k))
  {
    return Err(eyre!("Incompatible backup file: missing {}", missing));
  }

  if !confirm.confirm("Importing will overwrite all current data. Proceed?") {
    info!("Import declined");
    return Ok(0);
  }

  for (key, value) in &backup.datasets {
    // Text that was not JSON on export goes back verbatim.
    let raw = match value {
      Value::String(text) => text.clone(),
      other => other.to_string(),
    };
    storage.set_item(key, &raw)?;
  }

  info!(entries = backup.datasets.len(), "Backup restored");
  Ok(backup.datasets.len())
}
