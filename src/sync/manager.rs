//! Process-wide sync service.
//!
//! Owns the cache, the pending queue and the connectivity flag, and talks to
//! the remote through the bridge. Constructed once at startup, shared as
//! `Arc<SyncManager>`, started with [`SyncManager::init`] and stopped with
//! [`SyncManager::shutdown`].
//!
//! Writes for one dataset reach the remote in write order: every write has a
//! sequence number, submissions for a dataset hold that dataset's gate, and a
//! submission older than the last acknowledged one is skipped as superseded.

use color_eyre::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::event::{EventHub, SyncEvent};
use crate::remote::{Bridge, BridgeError, Dataset, RemoteOp};
use crate::store::{KeyValueStore, LocalCache};

use super::connectivity::ConnectivityMonitor;
use super::queue::{DrainReport, PendingOp, PendingQueue, QueueJournal};

/// Tunables for [`SyncManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
  /// Period of the background replay
  pub sync_interval: Duration,
  /// Upper bound on each shutdown step
  pub shutdown_grace: Duration,
  /// Initial connectivity state
  pub start_online: bool,
}

impl ManagerSettings {
  pub fn from_config(config: &Config, start_online: bool) -> Self {
    Self {
      sync_interval: config.sync_interval(),
      shutdown_grace: config.shutdown_grace(),
      start_online,
    }
  }
}

/// Snapshot of the manager's state for status displays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
  pub online: bool,
  pub queued: usize,
  pub cached: usize,
  pub in_flight: usize,
}

/// Per-dataset submission gate holding the last acknowledged sequence number.
type Gate = Arc<tokio::sync::Mutex<u64>>;

pub struct SyncManager {
  bridge: Bridge,
  cache: LocalCache,
  queue: PendingQueue,
  connectivity: ConnectivityMonitor,
  events: EventHub,
  settings: ManagerSettings,
  gates: Mutex<HashMap<Dataset, Gate>>,
  drain_lock: tokio::sync::Mutex<()>,
  /// Writes handed to a background submission and not yet settled
  unsettled: Mutex<BTreeMap<u64, PendingOp>>,
  writers: Mutex<JoinSet<()>>,
  tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncManager {
  pub fn new(bridge: Bridge, settings: ManagerSettings) -> Self {
    Self {
      bridge,
      cache: LocalCache::new(),
      queue: PendingQueue::new(),
      connectivity: ConnectivityMonitor::new(settings.start_online),
      events: EventHub::default(),
      settings,
      gates: Mutex::new(HashMap::new()),
      drain_lock: tokio::sync::Mutex::new(()),
      unsettled: Mutex::new(BTreeMap::new()),
      writers: Mutex::new(JoinSet::new()),
      tasks: Mutex::new(Vec::new()),
    }
  }

  pub fn cache(&self) -> &LocalCache {
    &self.cache
  }

  pub fn queue(&self) -> &PendingQueue {
    &self.queue
  }

  pub fn connectivity(&self) -> &ConnectivityMonitor {
    &self.connectivity
  }

  pub fn events(&self) -> &EventHub {
    &self.events
  }

  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  pub fn status(&self) -> SyncStatus {
    SyncStatus {
      online: self.is_online(),
      queued: self.queue.len(),
      cached: self.cache.len(),
      in_flight: self.bridge.in_flight(),
    }
  }

  /// Start the manager: drop stale cache entries, restore journaled writes
  /// and spawn the connectivity watcher and the periodic replay.
  pub fn init(self: &Arc<Self>, journal: &dyn QueueJournal) -> Result<()> {
    self.cache.clear();

    let restored = journal.load_pending()?;
    if !restored.is_empty() {
      info!(count = restored.len(), "Restored pending operations");
      // The queue owns these now; shutdown journals whatever is left.
      journal.save_pending(&[])?;
    }
    self.queue.restore(restored);

    // Subscribe before spawning so a flip right after init is not missed.
    let connectivity = self.connectivity.subscribe();
    let mut tasks = lock(&self.tasks);
    tasks.push(tokio::spawn(
      Arc::clone(self).watch_connectivity(connectivity),
    ));
    tasks.push(tokio::spawn(Arc::clone(self).replay_periodically()));
    Ok(())
  }

  /// Stop background work, make a last replay attempt and journal whatever
  /// is still unacknowledged. The replay is best effort and bounded by the
  /// shutdown grace period.
  pub async fn shutdown(&self, journal: &dyn QueueJournal) -> Result<()> {
    let tasks = std::mem::take(&mut *lock(&self.tasks));
    for task in tasks {
      task.abort();
      let _ = task.await;
    }

    let grace = self.settings.shutdown_grace;
    let mut writers = std::mem::take(&mut *lock(&self.writers));
    if tokio::time::timeout(grace, async { while writers.join_next().await.is_some() {} })
      .await
      .is_err()
    {
      warn!("Background writes still running at shutdown");
    }
    drop(writers);

    if self.is_online() && !self.queue.is_empty() {
      if tokio::time::timeout(grace, self.drain_all()).await.is_err() {
        warn!("Final replay did not finish before shutdown");
      }
    }

    let mut remaining: BTreeMap<u64, PendingOp> = lock(&self.unsettled).clone();
    for op in self.queue.snapshot() {
      remaining.insert(op.seq, op);
    }
    let remaining: Vec<PendingOp> = remaining.into_values().collect();
    if !remaining.is_empty() {
      info!(count = remaining.len(), "Journaling unsynced operations");
    }
    journal.save_pending(&remaining)
  }

  /// Platform connectivity signal. Coming online triggers a replay through
  /// the watcher started by [`SyncManager::init`].
  pub fn set_online(&self, online: bool) -> bool {
    self.connectivity.set_online(online)
  }

  /// Current contents of a dataset, from the cache or else the remote.
  ///
  /// Never fails: remote errors are logged and fall back to whatever the
  /// cache holds, which may be nothing.
  pub async fn get_data(&self, dataset: Dataset) -> Option<String> {
    let key = dataset.key();
    if let Some(cached) = self.cache.read(key) {
      return Some(cached);
    }

    if !self.is_online() {
      warn!(key, "Offline - no cached data");
      return None;
    }

    match self.bridge.call(&RemoteOp::Fetch(dataset)).await {
      Ok(payload) => {
        let data = match self.newest_pending(key) {
          Some(pending) => {
            debug!(key, "Unsynced local write shadows fetched rows");
            pending
          }
          None => payload.to_string(),
        };
        self.cache.write(key, data.clone());
        Some(data)
      }
      Err(e) if e.is_misconfiguration() => {
        error!(key, error = %e, "Remote endpoint misconfigured");
        self.cache.read(key)
      }
      Err(e) => {
        warn!(key, error = %e, "Failed to fetch dataset");
        self.cache.read(key)
      }
    }
  }

  /// Accept an application write: cache it, then submit it in the
  /// background, or queue it when offline.
  pub fn record_write(self: &Arc<Self>, key: &str, value: &str) {
    self.cache.write(key, value);

    if Dataset::from_key(key).is_none() {
      debug!(key, "No remote resource for key, kept local");
      return;
    }

    let op = PendingOp::set(key, value);
    if !self.is_online() {
      warn!(key, "Offline - operation queued for sync");
      self.queue.enqueue(op);
      return;
    }

    let Ok(handle) = Handle::try_current() else {
      warn!(key, "No runtime for background sync, operation queued");
      self.queue.enqueue(op);
      return;
    };

    lock(&self.unsettled).insert(op.seq, op.clone());
    let manager = Arc::clone(self);
    let mut writers = lock(&self.writers);
    while writers.try_join_next().is_some() {}
    writers.spawn_on(async move { manager.submit_in_background(op).await }, &handle);
  }

  async fn submit_in_background(&self, op: PendingOp) {
    if let Err(e) = self.submit(&op).await {
      warn!(key = %op.key, error = %e, "Cloud sync failed, operation queued");
      self.queue.enqueue(op.clone());
    }
    lock(&self.unsettled).remove(&op.seq);
  }

  /// Push one write to the remote as a full replacement of its sheet.
  pub async fn submit(&self, op: &PendingOp) -> Result<(), BridgeError> {
    let Some(dataset) = Dataset::from_key(&op.key) else {
      return Ok(());
    };
    if !self.is_online() {
      return Err(BridgeError::Offline);
    }

    let gate = self.gate(dataset);
    let mut acknowledged = gate.lock().await;
    if *acknowledged >= op.seq {
      debug!(key = %op.key, seq = op.seq, "Superseded by a newer write, skipped");
      return Ok(());
    }

    let rows: serde_json::Value = serde_json::from_str(&op.value)
      .map_err(|e| BridgeError::Serialization(format!("{}: {}", op.key, e)))?;

    self
      .bridge
      .call(&RemoteOp::SyncSheet { dataset, rows })
      .await?;
    *acknowledged = op.seq;
    debug!(key = %op.key, seq = op.seq, "Synced");
    Ok(())
  }

  /// Replay the pending queue in order. Does nothing while offline.
  pub async fn drain_all(&self) -> DrainReport {
    let _drain = self.drain_lock.lock().await;
    if self.queue.is_empty() || !self.is_online() {
      return DrainReport::default();
    }

    info!(count = self.queue.len(), "Syncing pending operations");
    let report = self
      .queue
      .drain_all(|op| async move { self.submit(&op).await })
      .await;
    info!(
      submitted = report.submitted,
      requeued = report.requeued,
      "Pending sync finished"
    );
    self.events.emit(SyncEvent::Drained(report));
    report
  }

  /// Manual sync with the loading indicator around it.
  pub async fn sync_now(&self) -> DrainReport {
    self
      .events
      .emit(SyncEvent::Loading("Syncing pending changes...".to_string()));
    let report = self.drain_all().await;
    self.events.emit(SyncEvent::LoadingFinished);
    report
  }

  /// Fetch `datasets` into the cache and mirror them into native storage.
  ///
  /// Emits `DataLoaded` exactly once, whether or not every fetch worked.
  /// Returns the number of datasets loaded.
  pub async fn preload<S>(&self, datasets: &[Dataset], native: &S) -> usize
  where
    S: KeyValueStore + ?Sized,
  {
    self
      .events
      .emit(SyncEvent::Loading("Loading data from cloud...".to_string()));

    // No replay pass may hold queued ops out of sight while fetched rows are
    // checked against them.
    let _drain = self.drain_lock.lock().await;
    let fetches = datasets
      .iter()
      .map(|dataset| async move { (*dataset, self.get_data(*dataset).await) });
    let results = futures::future::join_all(fetches).await;

    let mut loaded = 0;
    for (dataset, data) in results {
      let Some(data) = data else {
        continue;
      };
      if let Err(e) = native.set_item(dataset.key(), &data) {
        warn!(key = dataset.key(), error = %e, "Failed to mirror dataset locally");
      }
      loaded += 1;
    }

    if loaded == datasets.len() {
      info!(loaded, "Cloud data loaded");
    } else {
      warn!(
        loaded,
        requested = datasets.len(),
        "Some datasets unavailable, using local data"
      );
    }

    self.events.emit(SyncEvent::DataLoaded { datasets: loaded });
    self.events.emit(SyncEvent::LoadingFinished);
    loaded
  }

  /// Value of the newest write to `key` the remote has not acknowledged.
  fn newest_pending(&self, key: &str) -> Option<String> {
    let queued = self.queue.snapshot();
    let unsettled: Vec<PendingOp> = lock(&self.unsettled).values().cloned().collect();
    queued
      .into_iter()
      .chain(unsettled)
      .filter(|op| op.key == key)
      .max_by_key(|op| op.seq)
      .map(|op| op.value)
  }

  fn gate(&self, dataset: Dataset) -> Gate {
    Arc::clone(lock(&self.gates).entry(dataset).or_default())
  }

  async fn watch_connectivity(self: Arc<Self>, mut rx: watch::Receiver<bool>) {
    while rx.changed().await.is_ok() {
      let online = *rx.borrow_and_update();
      self.events.emit(SyncEvent::ConnectivityChanged(online));
      if online {
        self.drain_all().await;
      }
    }
  }

  async fn replay_periodically(self: Arc<Self>) {
    let mut ticker = tokio::time::interval(self.settings.sync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately.
    ticker.tick().await;

    loop {
      ticker.tick().await;
      if self.is_online() && !self.queue.is_empty() {
        self.drain_all().await;
      }
    }
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|e| e.into_inner())
}
