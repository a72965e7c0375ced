use color_eyre::{eyre::eyre, Result};
use rusqlite::params;
use std::sync::Arc;

use super::{PendingSubmission, SubmissionQueue};
use crate::db::{parse_datetime, Database};

/// Submission queue stored in the `pending_submissions` table.
#[derive(Clone)]
pub struct SqliteQueue {
  db: Arc<Database>,
}

impl SqliteQueue {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

impl SubmissionQueue for SqliteQueue {
  fn enqueue(&self, payload: &serde_json::Value) -> Result<i64> {
    let conn = self.db.lock()?;
    let data =
      serde_json::to_string(payload).map_err(|e| eyre!("Failed to serialize submission: {}", e))?;

    conn
      .execute(
        "INSERT INTO pending_submissions (payload, created_at) VALUES (?, datetime('now'))",
        params![data],
      )
      .map_err(|e| eyre!("Failed to queue submission: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_pending(&self) -> Result<Vec<PendingSubmission>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, payload, created_at, attempts, last_error FROM pending_submissions
         ORDER BY id",
      )
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, String>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, u32>(3)?,
          row.get::<_, Option<String>>(4)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query submissions: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read submission: {}", e))?;

    rows
      .into_iter()
      .map(|(id, payload, created_at, attempts, last_error)| {
        let payload = serde_json::from_str(&payload)
          .map_err(|e| eyre!("Failed to deserialize submission {}: {}", id, e))?;
        Ok(PendingSubmission {
          id,
          payload,
          created_at: parse_datetime(&created_at)?,
          attempts,
          last_error,
        })
      })
      .collect()
  }

  fn remove(&self, id: i64) -> Result<bool> {
    let conn = self.db.lock()?;

    let removed = conn
      .execute("DELETE FROM pending_submissions WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to remove submission {}: {}", id, e))?;

    Ok(removed > 0)
  }

  fn record_failure(&self, id: i64, error: &str) -> Result<()> {
    let conn = self.db.lock()?;

    conn
      .execute(
        "UPDATE pending_submissions SET attempts = attempts + 1, last_error = ? WHERE id = ?",
        params![error, id],
      )
      .map_err(|e| eyre!("Failed to update submission {}: {}", id, e))?;

    Ok(())
  }
}
