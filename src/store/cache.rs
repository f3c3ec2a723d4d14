use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Latest known serialized contents of each dataset.
///
/// Last write wins, unconditionally. Entries live until [`LocalCache::clear`];
/// there is no eviction since the dataset count is small and fixed.
#[derive(Debug, Default)]
pub struct LocalCache {
  entries: Mutex<HashMap<String, String>>,
}

impl LocalCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// `None` means the caller should ask the remote.
  pub fn read(&self, key: &str) -> Option<String> {
    self.entries().get(key).cloned()
  }

  pub fn write(&self, key: &str, value: impl Into<String>) {
    self.entries().insert(key.to_string(), value.into());
  }

  pub fn clear(&self) {
    self.entries().clear();
  }

  pub fn len(&self) -> usize {
    self.entries().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries().is_empty()
  }

  pub fn contains(&self, key: &str) -> bool {
    self.entries().contains_key(key)
  }

  fn entries(&self) -> MutexGuard<'_, HashMap<String, String>> {
    // Entries are independent strings, so a poisoned map is still consistent.
    self.entries.lock().unwrap_or_else(|e| e.into_inner())
  }
}
