use tokio::sync::watch;
use tracing::info;

/// Process-wide online/offline flag fed by the platform's connectivity signal.
///
/// Nothing here probes the network; a wrong signal just means calls fail and
/// writes end up queued.
#[derive(Debug)]
pub struct ConnectivityMonitor {
  tx: watch::Sender<bool>,
}

impl ConnectivityMonitor {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record a platform signal. Returns true on an offline to online transition.
  ///
  /// Subscribers are only notified when the state actually changes.
  pub fn set_online(&self, online: bool) -> bool {
    let mut was_online = online;
    let changed = self.tx.send_if_modified(|state| {
      was_online = *state;
      if *state == online {
        return false;
      }
      *state = online;
      true
    });

    if changed {
      info!(online, "Connectivity changed");
    }
    changed && !was_online
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_transition_detection() {
    let monitor = ConnectivityMonitor::new(true);
    assert!(!monitor.set_online(true));
    assert!(!monitor.set_online(false));
    assert!(!monitor.is_online());
    assert!(!monitor.set_online(false));
    assert!(monitor.set_online(true));
    assert!(monitor.is_online());
  }

  #[tokio::test]
  async fn test_subscribers_see_only_changes() {
    let monitor = ConnectivityMonitor::new(false);
    let mut rx = monitor.subscribe();

    monitor.set_online(false);
    assert!(!rx.has_changed().unwrap());

    monitor.set_online(true);
    rx.changed().await.unwrap();
    assert!(*rx.borrow_and_update());
  }
}
