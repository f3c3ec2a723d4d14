//! Ordered queue of writes the remote has not acknowledged yet.

use color_eyre::Result;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

/// Process-wide write sequence; later writes always get larger numbers.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
  Set,
}

impl OpKind {
  pub fn as_str(self) -> &'static str {
    match self {
      OpKind::Set => "set",
    }
  }

  pub fn parse(s: &str) -> Option<Self> {
    match s {
      "set" => Some(OpKind::Set),
      _ => None,
    }
  }
}

/// A write waiting to reach the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOp {
  pub seq: u64,
  pub key: String,
  pub value: String,
  pub kind: OpKind,
}

impl PendingOp {
  pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
    Self {
      seq: NEXT_SEQ.fetch_add(1, Ordering::SeqCst),
      key: key.into(),
      value: value.into(),
      kind: OpKind::Set,
    }
  }
}

/// Durable home for the queue between runs.
pub trait QueueJournal {
  /// Replace the journal with `ops`.
  fn save_pending(&self, ops: &[PendingOp]) -> Result<()>;

  /// Journaled ops in sequence order.
  fn load_pending(&self) -> Result<Vec<PendingOp>>;
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub submitted: usize,
  pub requeued: usize,
}

/// FIFO of pending writes. No deduplication: two writes to the same key are
/// both kept and replayed in order.
#[derive(Debug, Default)]
pub struct PendingQueue {
  ops: Mutex<VecDeque<PendingOp>>,
}

impl PendingQueue {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn enqueue(&self, op: PendingOp) {
    self.ops().push_back(op);
  }

  pub fn len(&self) -> usize {
    self.ops().len()
  }

  pub fn is_empty(&self) -> bool {
    self.ops().is_empty()
  }

  pub fn snapshot(&self) -> Vec<PendingOp> {
    self.ops().iter().cloned().collect()
  }

  /// Append journaled ops, keeping later writes numbered after them.
  pub fn restore(&self, ops: Vec<PendingOp>) {
    if let Some(max) = ops.iter().map(|op| op.seq).max() {
      NEXT_SEQ.fetch_max(max + 1, Ordering::SeqCst);
    }
    self.ops().extend(ops);
  }

  /// Replay every queued op through `submit`, in queue order.
  ///
  /// The queue is emptied up front; ops that fail go back on the tail behind
  /// anything enqueued meanwhile. If the returned future is dropped halfway,
  /// the ops not yet confirmed are put back at the head.
  pub async fn drain_all<F, Fut, E>(&self, mut submit: F) -> DrainReport
  where
    F: FnMut(PendingOp) -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
  {
    let mut batch = Batch {
      queue: self,
      remaining: std::mem::take(&mut *self.ops()),
    };
    let mut report = DrainReport::default();

    while let Some(op) = batch.remaining.front().cloned() {
      let outcome = submit(op.clone()).await;
      batch.remaining.pop_front();
      match outcome {
        Ok(()) => report.submitted += 1,
        Err(e) => {
          warn!(key = %op.key, seq = op.seq, error = %e, "Replay failed, requeued");
          self.enqueue(op);
          report.requeued += 1;
        }
      }
    }

    report
  }

  fn ops(&self) -> MutexGuard<'_, VecDeque<PendingOp>> {
    self.ops.lock().unwrap_or_else(|e| e.into_inner())
  }
}

/// Ops taken out of the queue for one drain pass.
struct Batch<'a> {
  queue: &'a PendingQueue,
  remaining: VecDeque<PendingOp>,
}

impl Drop for Batch<'_> {
  fn drop(&mut self) {
    if self.remaining.is_empty() {
      return;
    }
    let mut ops = self.queue.ops();
    for op in self.remaining.drain(..).rev() {
      ops.push_front(op);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  #[test]
  fn test_seq_is_monotonic() {
    let a = PendingOp::set("k", "1");
    let b = PendingOp::set("k", "2");
    assert!(b.seq > a.seq);
  }

  #[test]
  fn test_enqueue_keeps_duplicates() {
    let queue = PendingQueue::new();
    queue.enqueue(PendingOp::set("starcity_stock", "[1]"));
    queue.enqueue(PendingOp::set("starcity_stock", "[2]"));
    assert_eq!(queue.len(), 2);
  }

  #[tokio::test]
  async fn test_drain_submits_in_order() {
    let queue = PendingQueue::new();
    let a = PendingOp::set("key1", "A");
    let b = PendingOp::set("key1", "B");
    let c = PendingOp::set("key2", "C");
    queue.enqueue(a);
    queue.enqueue(b);
    queue.enqueue(c);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let report = queue
      .drain_all(|op| {
        let seen = Arc::clone(&seen);
        async move {
          seen.lock().unwrap().push(op.value);
          Ok::<_, String>(())
        }
      })
      .await;

    assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    assert_eq!(
      report,
      DrainReport {
        submitted: 3,
        requeued: 0
      }
    );
    assert!(queue.is_empty());
  }

  #[tokio::test]
  async fn test_failures_go_behind_newer_ops() {
    let queue = Arc::new(PendingQueue::new());
    queue.enqueue(PendingOp::set("key1", "A"));
    queue.enqueue(PendingOp::set("key2", "B"));

    let report = {
      let queue_in = Arc::clone(&queue);
      queue
        .drain_all(move |op| {
          let queue_in = Arc::clone(&queue_in);
          async move {
            if op.value == "A" {
              // A write that lands while the drain is running.
              queue_in.enqueue(PendingOp::set("key3", "late"));
              Err("remote down".to_string())
            } else {
              Ok(())
            }
          }
        })
        .await
    };

    assert_eq!(report.requeued, 1);
    let values: Vec<_> = queue.snapshot().into_iter().map(|op| op.value).collect();
    assert_eq!(values, vec!["late", "A"]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_dropped_drain_puts_ops_back_at_head() {
    let queue = PendingQueue::new();
    queue.enqueue(PendingOp::set("key1", "A"));
    queue.enqueue(PendingOp::set("key1", "B"));

    let drain = queue.drain_all(|_op| async {
      std::future::pending::<()>().await;
      Ok::<_, String>(())
    });
    let outcome = tokio::time::timeout(Duration::from_secs(1), drain).await;
    assert!(outcome.is_err());

    queue.enqueue(PendingOp::set("key1", "C"));
    let values: Vec<_> = queue.snapshot().into_iter().map(|op| op.value).collect();
    assert_eq!(values, vec!["A", "B", "C"]);
  }

  #[test]
  fn test_restore_bumps_sequence() {
    let queue = PendingQueue::new();
    let far = PendingOp {
      seq: 1_000_000,
      key: "k".to_string(),
      value: "v".to_string(),
      kind: OpKind::Set,
    };
    queue.restore(vec![far]);
    assert!(PendingOp::set("k", "w").seq > 1_000_000);
    assert_eq!(queue.len(), 1);
  }
}
