//! Drop-in replacement for native storage that routes dataset keys through
//! the sync layer.

use color_eyre::Result;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::remote::Dataset;
use crate::store::KeyValueStore;

use super::manager::SyncManager;

/// Asks the user before an irreversible action.
pub trait Confirm: Send + Sync {
  fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
  F: Fn(&str) -> bool + Send + Sync,
{
  fn confirm(&self, prompt: &str) -> bool {
    self(prompt)
  }
}

/// Decides which keys are synced and which never leave the machine.
#[derive(Debug, Clone)]
pub struct KeyPolicy {
  local_only_marker: String,
  settings_key: String,
}

impl KeyPolicy {
  pub fn new(local_only_marker: impl Into<String>, settings_key: impl Into<String>) -> Self {
    Self {
      local_only_marker: local_only_marker.into(),
      settings_key: settings_key.into(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    Self::new(&config.sync.local_only_marker, &config.sync.settings_key)
  }

  /// Dataset keys are always synced, even when they happen to contain the
  /// local-only marker (`starcity_customer_credits` contains `custom`).
  pub fn is_syncable(&self, key: &str) -> bool {
    if key == self.settings_key {
      return false;
    }
    Dataset::from_key(key).is_some()
      || self.local_only_marker.is_empty()
      || !key.contains(&self.local_only_marker)
  }

  pub fn settings_key(&self) -> &str {
    &self.settings_key
  }
}

impl Default for KeyPolicy {
  fn default() -> Self {
    Self::new("custom", "starcity_settings")
  }
}

/// Native storage with syncable keys served from the cache and mirrored to
/// the remote.
///
/// Writes never fail because of the remote: the native write happens first
/// and synchronously, the remote submission afterwards in the background.
pub struct SyncedStorage<S: KeyValueStore> {
  native: Arc<S>,
  manager: Arc<SyncManager>,
  policy: KeyPolicy,
  confirm: Arc<dyn Confirm>,
}

impl<S: KeyValueStore> SyncedStorage<S> {
  pub fn new(
    native: Arc<S>,
    manager: Arc<SyncManager>,
    policy: KeyPolicy,
    confirm: Arc<dyn Confirm>,
  ) -> Self {
    Self {
      native,
      manager,
      policy,
      confirm,
    }
  }

  pub fn manager(&self) -> &Arc<SyncManager> {
    &self.manager
  }

  pub fn policy(&self) -> &KeyPolicy {
    &self.policy
  }

  pub fn confirmer(&self) -> &dyn Confirm {
    self.confirm.as_ref()
  }

  /// Startup load of `datasets` from the remote into cache and native storage.
  pub async fn preload(&self, datasets: &[Dataset]) -> usize {
    self.manager.preload(datasets, self.native.as_ref()).await
  }
}

impl<S: KeyValueStore> KeyValueStore for SyncedStorage<S> {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    if !self.policy.is_syncable(key) {
      return self.native.get_item(key);
    }

    // The cache fills asynchronously at startup, so fall back to native.
    match self.manager.cache().read(key) {
      Some(value) => Ok(Some(value)),
      None => self.native.get_item(key),
    }
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self.native.set_item(key, value)?;

    if self.policy.is_syncable(key) {
      self.manager.record_write(key, value);
    }
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self.native.remove_item(key)
  }

  fn clear(&self) -> Result<()> {
    if !self
      .confirm
      .confirm("This will clear ALL local data. Are you sure?")
    {
      info!("Clear declined, local data kept");
      return Ok(());
    }

    self.native.clear()?;
    self.manager.cache().clear();
    info!("Local data cleared");
    Ok(())
  }

  fn key(&self, index: usize) -> Result<Option<String>> {
    self.native.key(index)
  }

  fn length(&self) -> Result<usize> {
    self.native.length()
  }
}
