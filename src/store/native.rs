//! Native key/value storage and its SQLite implementation.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::sync::{OpKind, PendingOp, QueueJournal};

/// Synchronous key/value storage with the browser-storage method set.
///
/// Enumeration order (`key(index)`) is insertion order; overwriting a key
/// keeps its position.
pub trait KeyValueStore: Send + Sync {
  fn get_item(&self, key: &str) -> Result<Option<String>>;

  fn set_item(&self, key: &str, value: &str) -> Result<()>;

  fn remove_item(&self, key: &str) -> Result<()>;

  fn clear(&self) -> Result<()>;

  /// Key at position `index`, if any.
  fn key(&self, index: usize) -> Result<Option<String>>;

  fn length(&self) -> Result<usize>;
}

/// SQLite-backed native store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for the key/value table and the pending-operation journal.
const STORE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Writes not yet acknowledged by the remote, kept across restarts
CREATE TABLE IF NOT EXISTS pending_ops (
    seq INTEGER PRIMARY KEY,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    kind TEXT NOT NULL
);
"#;

impl SqliteStore {
  /// Open (or create) the store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create store directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open store at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  pub fn open_in_memory() -> Result<Self> {
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory store: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(STORE_SCHEMA)
      .map_err(|e| eyre!("Failed to run store migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl KeyValueStore for SqliteStore {
  fn get_item(&self, key: &str) -> Result<Option<String>> {
    self
      .conn()?
      .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to read {}: {}", key, e))
  }

  fn set_item(&self, key: &str, value: &str) -> Result<()> {
    self
      .conn()?
      .execute(
        "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value],
      )
      .map_err(|e| eyre!("Failed to write {}: {}", key, e))?;
    Ok(())
  }

  fn remove_item(&self, key: &str) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM kv WHERE key = ?", params![key])
      .map_err(|e| eyre!("Failed to remove {}: {}", key, e))?;
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self
      .conn()?
      .execute("DELETE FROM kv", [])
      .map_err(|e| eyre!("Failed to clear store: {}", e))?;
    Ok(())
  }

  fn key(&self, index: usize) -> Result<Option<String>> {
    self
      .conn()?
      .query_row(
        "SELECT key FROM kv ORDER BY rowid LIMIT 1 OFFSET ?",
        params![index as i64],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to enumerate keys: {}", e))
  }

  fn length(&self) -> Result<usize> {
    let count: i64 = self
      .conn()?
      .query_row("SELECT COUNT(*) FROM kv", [], |row| row.get(0))
      .map_err(|e| eyre!("Failed to count keys: {}", e))?;
    Ok(count as usize)
  }
}

impl QueueJournal for SqliteStore {
  fn save_pending(&self, ops: &[PendingOp]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute("DELETE FROM pending_ops", [])
      .map_err(|e| eyre!("Failed to reset pending journal: {}", e))?;

    for op in ops {
      tx.execute(
        "INSERT OR REPLACE INTO pending_ops (seq, key, value, kind) VALUES (?, ?, ?, ?)",
        params![op.seq as i64, op.key, op.value, op.kind.as_str()],
      )
      .map_err(|e| eyre!("Failed to journal pending op: {}", e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit pending journal: {}", e))?;
    Ok(())
  }

  fn load_pending(&self) -> Result<Vec<PendingOp>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT seq, key, value, kind FROM pending_ops ORDER BY seq")
      .map_err(|e| eyre!("Failed to prepare journal query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read pending journal: {}", e))?;

    let mut ops = Vec::new();
    for row in rows {
      let (seq, key, value, kind) = row.map_err(|e| eyre!("Corrupt journal row: {}", e))?;
      let kind = OpKind::parse(&kind).ok_or_else(|| eyre!("Unknown op kind in journal: {}", kind))?;
      ops.push(PendingOp {
        seq: seq as u64,
        key,
        value,
        kind,
      });
    }
    Ok(ops)
  }
}
