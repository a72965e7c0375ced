//! Background sync: form submissions queued while offline and replayed later.

mod queue;
mod replay;

use chrono::{DateTime, Utc};
use color_eyre::Result;
use serde::{Deserialize, Serialize};

pub use queue::SqliteQueue;
pub use replay::{BackgroundSync, SyncReport};

/// Contact form payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactSubmission {
  pub name: String,
  pub email: String,
  pub subject: String,
  pub message: String,
}

/// A submission waiting in the queue.
#[derive(Debug, Clone)]
pub struct PendingSubmission {
  pub id: i64,
  /// JSON body to POST
  pub payload: serde_json::Value,
  pub created_at: DateTime<Utc>,
  /// Failed replay attempts so far
  pub attempts: u32,
  pub last_error: Option<String>,
}

/// Persistent queue of submissions.
pub trait SubmissionQueue: Send + Sync {
  /// Add a submission, returning its id.
  fn enqueue(&self, payload: &serde_json::Value) -> Result<i64>;

  /// All queued submissions, oldest first.
  fn list_pending(&self) -> Result<Vec<PendingSubmission>>;

  /// Drop a delivered submission. Returns false if it wasn't queued.
  fn remove(&self, id: i64) -> Result<bool>;

  /// Note a failed replay attempt on a submission that stays queued.
  fn record_failure(&self, id: i64, error: &str) -> Result<()>;
}
