use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::remote::Dataset;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub remote: RemoteConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Spreadsheet web-app endpoint (the `/exec` URL)
  pub url: String,
  /// Per-call ceiling before the bridge gives up
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
  /// Period of the background queue replay
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  /// Keys containing this substring never leave the machine
  #[serde(default = "default_local_only_marker")]
  pub local_only_marker: String,
  /// Settings key, always kept local
  #[serde(default = "default_settings_key")]
  pub settings_key: String,
  /// Datasets fetched into the cache at startup (defaults to every dataset)
  #[serde(default, deserialize_with = "deserialize_datasets")]
  pub preload: Option<Vec<Dataset>>,
  /// How long shutdown waits for the final queue replay
  #[serde(default = "default_shutdown_grace_secs")]
  pub shutdown_grace_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      interval_secs: default_interval_secs(),
      local_only_marker: default_local_only_marker(),
      settings_key: default_settings_key(),
      preload: None,
      shutdown_grace_secs: default_shutdown_grace_secs(),
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file backing the native key/value store
  pub path: Option<PathBuf>,
}

fn default_timeout_secs() -> u64 {
  15
}

fn default_interval_secs() -> u64 {
  30
}

fn default_local_only_marker() -> String {
  "custom".to_string()
}

fn default_settings_key() -> String {
  "starcity_settings".to_string()
}

fn default_shutdown_grace_secs() -> u64 {
  5
}

fn deserialize_datasets<'de, D>(deserializer: D) -> Result<Option<Vec<Dataset>>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let keys: Option<Vec<String>> = Option::deserialize(deserializer)?;
  keys
    .map(|keys| {
      keys
        .iter()
        .map(|k| {
          Dataset::from_key(k)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown dataset key: {}", k)))
        })
        .collect()
    })
    .transpose()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./shopsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/shopsync/config.yaml
  ///
  /// `SHOPSYNC_REMOTE_URL` overrides the endpoint from the file.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => {
        return Err(eyre!(
          "No configuration file found. Create one at ~/.config/shopsync/config.yaml\n\
                 It needs at least `remote: {{ url: <endpoint> }}`."
        ))
      }
    };

    if let Ok(url) = std::env::var("SHOPSYNC_REMOTE_URL") {
      config.remote.url = url;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("shopsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("shopsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.remote.url.trim().is_empty() {
      return Err(eyre!("remote.url must not be empty"));
    }
    Ok(config)
  }

  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.remote.timeout_secs)
  }

  pub fn sync_interval(&self) -> Duration {
    Duration::from_secs(self.sync.interval_secs.max(1))
  }

  pub fn shutdown_grace(&self) -> Duration {
    Duration::from_secs(self.sync.shutdown_grace_secs)
  }

  /// Datasets to preload, in table order when not configured.
  pub fn preload_datasets(&self) -> Vec<Dataset> {
    self
      .sync
      .preload
      .clone()
      .unwrap_or_else(|| Dataset::ALL.to_vec())
  }

  /// Resolve the native store path, defaulting to the user data directory.
  pub fn storage_path(&self) -> Result<PathBuf> {
    if let Some(p) = &self.storage.path {
      return Ok(p.clone());
    }
    Ok(data_dir()?.join("store.db"))
  }
}

/// Per-user data directory for the store and logs.
pub fn data_dir() -> Result<PathBuf> {
  let dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(dir.join("shopsync"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_fill_missing_sections() {
    let config = Config::parse("remote:\n  url: https://example.test/exec\n").unwrap();
    assert_eq!(config.timeout(), Duration::from_secs(15));
    assert_eq!(config.sync_interval(), Duration::from_secs(30));
    assert_eq!(config.sync.local_only_marker, "custom");
    assert_eq!(config.sync.settings_key, "starcity_settings");
    assert_eq!(config.preload_datasets().len(), Dataset::ALL.len());
  }

  #[test]
  fn test_preload_list_is_parsed() {
    let yaml = "remote:\n  url: https://example.test/exec\nsync:\n  preload: [starcity_users, starcity_stock]\n";
    let config = Config::parse(yaml).unwrap();
    assert_eq!(
      config.preload_datasets(),
      vec![Dataset::Users, Dataset::Stock]
    );
  }

  #[test]
  fn test_unknown_preload_key_is_rejected() {
    let yaml = "remote:\n  url: https://example.test/exec\nsync:\n  preload: [starcity_nope]\n";
    assert!(Config::parse(yaml).is_err());
  }

  #[test]
  fn test_empty_url_is_rejected() {
    assert!(Config::parse("remote:\n  url: \"\"\n").is_err());
  }

  #[test]
  fn test_load_from_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shopsync.yaml");
    std::fs::write(
      &path,
      "remote:\n  url: https://example.test/exec\n  timeout_secs: 20\nstorage:\n  path: /tmp/x.db\n",
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.timeout(), Duration::from_secs(20));
    assert_eq!(config.storage_path().unwrap(), PathBuf::from("/tmp/x.db"));
  }

  #[test]
  fn test_missing_explicit_path_errors() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("absent.yaml"))).is_err());
  }
}
