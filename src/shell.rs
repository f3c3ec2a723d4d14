//! Line-oriented shell standing in for the application: it reads and writes
//! through the synced storage and relays connectivity changes.

use color_eyre::{eyre::eyre, Result};
use std::io::{BufRead, Write};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::broadcast;

use crate::commands::{self, ShellCommand, COMMANDS};
use crate::event::SyncEvent;
use crate::store::KeyValueStore;
use crate::sync::{Confirm, SyncedStorage};

/// Confirmation read from the terminal, defaulting to no.
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
  fn confirm(&self, prompt: &str) -> bool {
    print!("{} [y/N] ", prompt);
    let _ = std::io::stdout().flush();

    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer).is_err() {
      return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
  }
}

/// Run the interactive shell until `quit` or end of input.
pub async fn run<S: KeyValueStore + 'static>(storage: Arc<SyncedStorage<S>>) -> Result<()> {
  let printer = tokio::spawn(print_events(storage.manager().events().subscribe()));
  let handle = Handle::current();

  // Stdin is read on a blocking thread so confirmation prompts can share it.
  let result = tokio::task::spawn_blocking(move || read_eval_loop(&storage, &handle))
    .await
    .map_err(|e| eyre!("Shell task failed: {}", e))?;

  printer.abort();
  result
}

fn read_eval_loop<S: KeyValueStore>(storage: &SyncedStorage<S>, handle: &Handle) -> Result<()> {
  println!("shopsync shell, type `help` for commands");
  let mut line = String::new();

  loop {
    print!("shopsync> ");
    std::io::stdout().flush()?;

    line.clear();
    if std::io::stdin().lock().read_line(&mut line)? == 0 {
      break;
    }

    match commands::parse_line(&line) {
      Ok(Some(ShellCommand::Quit)) => break,
      Ok(Some(command)) => {
        if let Err(e) = handle.block_on(execute(storage, command)) {
          println!("error: {}", e);
        }
      }
      Ok(None) => {}
      Err(msg) => println!("{}", msg),
    }
  }

  Ok(())
}

/// Run one command against the synced storage, printing its result.
pub async fn execute<S: KeyValueStore>(
  storage: &SyncedStorage<S>,
  command: ShellCommand,
) -> Result<()> {
  let manager = storage.manager();

  match command {
    ShellCommand::Get(key) => match storage.get_item(&key)? {
      Some(value) => println!("{}", value),
      None => println!("({} is not set)", key),
    },
    ShellCommand::Set { key, value } => {
      storage.set_item(&key, &value)?;
      if storage.policy().is_syncable(&key) && !manager.is_online() {
        println!("saved locally, queued for sync");
      } else {
        println!("saved");
      }
    }
    ShellCommand::Remove(key) => {
      storage.remove_item(&key)?;
      println!("removed {}", key);
    }
    ShellCommand::Keys => {
      for index in 0..storage.length()? {
        if let Some(key) = storage.key(index)? {
          let scope = if storage.policy().is_syncable(&key) {
            "synced"
          } else {
            "local"
          };
          println!("{:<36} {}", key, scope);
        }
      }
    }
    ShellCommand::Online => {
      if !manager.set_online(true) {
        println!("already online");
      }
    }
    ShellCommand::Offline => {
      manager.set_online(false);
    }
    ShellCommand::Sync => {
      if !manager.is_online() {
        println!("offline, {} operation(s) stay queued", manager.queue().len());
      } else {
        let report = manager.sync_now().await;
        println!(
          "synced {} operation(s), {} requeued",
          report.submitted, report.requeued
        );
      }
    }
    ShellCommand::Status => {
      let status = manager.status();
      println!(
        "{} | queued: {} | cached datasets: {} | calls in flight: {}",
        if status.online { "online" } else { "offline" },
        status.queued,
        status.cached,
        status.in_flight
      );
    }
    ShellCommand::Clear => storage.clear()?,
    ShellCommand::Help => {
      for cmd in COMMANDS {
        println!("  {:<18} {}", cmd.usage, cmd.description);
      }
    }
    ShellCommand::Quit => {}
  }

  Ok(())
}

async fn print_events(mut events: broadcast::Receiver<SyncEvent>) {
  loop {
    let event = match events.recv().await {
      Ok(event) => event,
      Err(broadcast::error::RecvError::Lagged(_)) => continue,
      Err(broadcast::error::RecvError::Closed) => break,
    };

    match event {
      SyncEvent::Loading(message) => eprintln!("[..] {}", message),
      SyncEvent::LoadingFinished => {}
      SyncEvent::DataLoaded { datasets } => eprintln!("[ok] cloud data loaded ({} datasets)", datasets),
      SyncEvent::ConnectivityChanged(true) => eprintln!("[net] online"),
      SyncEvent::ConnectivityChanged(false) => eprintln!("[net] offline, writes will be queued"),
      SyncEvent::Drained(report) => eprintln!(
        "[sync] {} pending operation(s) synced, {} requeued",
        report.submitted, report.requeued
      ),
    }
  }
}
