//! Offline-first sync: pending-write queue, connectivity tracking, the
//! process-wide manager and the storage interceptor built on top of them.

mod connectivity;
mod interceptor;
mod manager;
mod queue;

pub use interceptor::{Confirm, KeyPolicy, SyncedStorage};
pub use manager::{ManagerSettings, SyncManager};
pub use queue::{DrainReport, OpKind, PendingOp, QueueJournal};
