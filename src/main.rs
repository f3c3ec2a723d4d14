mod backup;
mod commands;
mod config;
mod event;
mod logging;
mod remote;
mod shell;
mod store;
mod sync;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

use commands::ShellCommand;
use remote::{Bridge, HttpTransport};
use store::SqliteStore;
use sync::{Confirm, KeyPolicy, ManagerSettings, SyncManager, SyncedStorage};

#[derive(Parser, Debug)]
#[command(name = "shopsync")]
#[command(about = "Offline-first local storage for the shop, synced to the cloud sheet")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./shopsync.yaml, then $XDG_CONFIG_HOME/shopsync/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Start offline: writes are queued until `online` is issued
  #[arg(long, global = true)]
  offline: bool,

  /// Answer yes to confirmation prompts
  #[arg(short, long, global = true)]
  yes: bool,

  #[command(subcommand)]
  command: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Interactive shell (default)
  Shell,
  /// Print a stored value
  Get {
    key: String,
    /// Load the dataset from the cloud first
    #[arg(long)]
    fresh: bool,
  },
  /// Store a value; `@path` reads it from a file, `-` from stdin
  Set { key: String, value: String },
  /// Remove a value from local storage
  Remove { key: String },
  /// List stored keys
  Keys,
  /// Replay queued operations
  Sync,
  /// Clear all local data
  Clear,
  /// Write a backup of every dataset to a file
  Export { path: PathBuf },
  /// Restore a backup file, overwriting current data
  Import { path: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init()?;

  info!(
    version = env!("CARGO_PKG_VERSION"),
    remote = %config.remote.url,
    "Starting shopsync"
  );

  let native = Arc::new(SqliteStore::open(&config.storage_path()?)?);
  let transport = HttpTransport::new(&config.remote.url, config.timeout())?;
  let bridge = Bridge::new(Arc::new(transport), config.timeout());
  let manager = Arc::new(SyncManager::new(
    bridge,
    ManagerSettings::from_config(&config, !args.offline),
  ));

  let confirm: Arc<dyn Confirm> = if args.yes {
    Arc::new(|_: &str| true)
  } else {
    Arc::new(shell::StdinConfirm)
  };
  let storage = Arc::new(SyncedStorage::new(
    Arc::clone(&native),
    Arc::clone(&manager),
    KeyPolicy::from_config(&config),
    confirm,
  ));

  manager.init(native.as_ref())?;
  let result = run(args.command.unwrap_or(Cmd::Shell), &config, &storage).await;
  manager.shutdown(native.as_ref()).await?;
  result
}

async fn run(
  command: Cmd,
  config: &config::Config,
  storage: &Arc<SyncedStorage<SqliteStore>>,
) -> Result<()> {
  let shell_command = match command {
    Cmd::Shell => {
      storage.preload(&config.preload_datasets()).await;
      return shell::run(Arc::clone(storage)).await;
    }
    Cmd::Export { path } => {
      storage.preload(&config.preload_datasets()).await;
      let backup = backup::export(storage.as_ref(), storage.policy().settings_key())?;
      let json = serde_json::to_string_pretty(&backup)?;
      std::fs::write(&path, json)
        .map_err(|e| eyre!("Failed to write backup {}: {}", path.display(), e))?;
      println!(
        "exported {} entries to {}",
        backup.datasets.len(),
        path.display()
      );
      return Ok(());
    }
    Cmd::Import { path } => {
      let contents = std::fs::read_to_string(&path)
        .map_err(|e| eyre!("Failed to read backup {}: {}", path.display(), e))?;
      let parsed: backup::Backup = serde_json::from_str(&contents)
        .map_err(|e| eyre!("Invalid backup file {}: {}", path.display(), e))?;
      let written = backup::import(
        storage.as_ref(),
        &parsed,
        storage.policy().settings_key(),
        storage.confirmer(),
      )?;
      println!("restored {} entries", written);
      return Ok(());
    }
    Cmd::Get { key, fresh } => {
      if fresh {
        if let Some(dataset) = remote::Dataset::from_key(&key) {
          storage.preload(&[dataset]).await;
        }
      }
      ShellCommand::Get(key)
    }
    Cmd::Set { key, value } => ShellCommand::Set {
      key,
      value: read_value(&value)?,
    },
    Cmd::Remove { key } => ShellCommand::Remove(key),
    Cmd::Keys => ShellCommand::Keys,
    Cmd::Sync => ShellCommand::Sync,
    Cmd::Clear => ShellCommand::Clear,
  };

  shell::execute(storage.as_ref(), shell_command).await
}

/// Resolve a `set` value argument: `-` is stdin, `@path` is a file.
fn read_value(arg: &str) -> Result<String> {
  if arg == "-" {
    let mut value = String::new();
    std::io::stdin()
      .read_to_string(&mut value)
      .map_err(|e| eyre!("Failed to read value from stdin: {}", e))?;
    return Ok(value.trim_end().to_string());
  }

  if let Some(path) = arg.strip_prefix('@') {
    let path = Path::new(path);
    return std::fs::read_to_string(path)
      .map(|v| v.trim_end().to_string())
      .map_err(|e| eyre!("Failed to read value from {}: {}", path.display(), e));
  }

  Ok(arg.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Write;

  #[test]
  fn test_read_value_literal_and_file() {
    assert_eq!(read_value("[1,2]").unwrap(), "[1,2]");

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, r#"[{{"sku":"A"}}]"#).unwrap();
    let arg = format!("@{}", file.path().display());
    assert_eq!(read_value(&arg).unwrap(), r#"[{"sku":"A"}]"#);

    assert!(read_value("@/definitely/missing/file.json").is_err());
  }

  #[test]
  fn test_args_parse_subcommands() {
    let args = Args::try_parse_from(["shopsync", "--offline", "get", "starcity_stock", "--fresh"])
      .unwrap();
    assert!(args.offline);
    assert!(matches!(
      args.command,
      Some(Cmd::Get { ref key, fresh: true }) if key == "starcity_stock"
    ));

    let args = Args::try_parse_from(["shopsync"]).unwrap();
    assert!(args.command.is_none());
  }
}
