use tokio::sync::broadcast;

use crate::sync::DrainReport;

/// Lifecycle events emitted by the sync layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// Show a loading indicator with this message
  Loading(String),
  /// Hide the loading indicator
  LoadingFinished,
  /// Startup preload finished; already-rendered views should re-read
  DataLoaded { datasets: usize },
  /// Platform connectivity flipped
  ConnectivityChanged(bool),
  /// A replay pass over the pending queue finished
  Drained(DrainReport),
}

/// Fan-out of [`SyncEvent`]s to any number of listeners.
#[derive(Debug, Clone)]
pub struct EventHub {
  tx: broadcast::Sender<SyncEvent>,
}

impl EventHub {
  pub fn new(capacity: usize) -> Self {
    let (tx, _rx) = broadcast::channel(capacity);
    Self { tx }
  }

  /// Emit an event; nobody listening is fine.
  pub fn emit(&self, event: SyncEvent) {
    let _ = self.tx.send(event);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.tx.subscribe()
  }
}

impl Default for EventHub {
  fn default() -> Self {
    Self::new(64)
  }
}
