use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info, warn};
use url::Url;

use super::{ContactSubmission, PendingSubmission, SubmissionQueue};
use crate::config::Config;
use crate::fetch::Fetcher;
use crate::http::Request;

/// Counts from one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
  pub attempted: usize,
  pub delivered: usize,
  pub failed: usize,
}

/// Replays queued submissions when a sync event with the right tag fires.
pub struct BackgroundSync<Q: SubmissionQueue> {
  queue: Q,
  tag: String,
  endpoint: Url,
}

impl<Q: SubmissionQueue> BackgroundSync<Q> {
  pub fn new(queue: Q, tag: impl Into<String>, endpoint: Url) -> Self {
    Self {
      queue,
      tag: tag.into(),
      endpoint,
    }
  }

  pub fn from_config(queue: Q, config: &Config) -> Result<Self> {
    Ok(Self::new(
      queue,
      config.sync.tag.clone(),
      config.resolve(&config.sync.endpoint)?,
    ))
  }

  pub fn tag(&self) -> &str {
    &self.tag
  }

  pub fn queue(&self) -> &Q {
    &self.queue
  }

  /// Queue a contact form submission for the next sync.
  pub fn enqueue(&self, submission: &ContactSubmission) -> Result<i64> {
    let payload = serde_json::to_value(submission)
      .map_err(|e| eyre!("Failed to serialize submission: {}", e))?;
    let id = self.queue.enqueue(&payload)?;
    info!(id, "Queued submission for background sync");
    Ok(id)
  }

  /// Handle a sync event.
  ///
  /// Returns `None` for tags this queue doesn't own. Otherwise POSTs every
  /// pending submission to the endpoint in order; delivered ones are removed,
  /// failed ones stay queued with the failure recorded. A failure never stops
  /// the rest of the batch.
  pub async fn on_sync<F: Fetcher>(&self, tag: &str, fetcher: &F) -> Result<Option<SyncReport>> {
    if tag != self.tag {
      debug!(tag, "Ignoring sync event");
      return Ok(None);
    }

    let pending = self.queue.list_pending()?;
    info!(tag, pending = pending.len(), "Replaying queued submissions");

    let mut report = SyncReport::default();
    for submission in &pending {
      report.attempted += 1;
      match self.replay(submission, fetcher).await {
        Ok(()) => report.delivered += 1,
        Err(reason) => {
          report.failed += 1;
          warn!(id = submission.id, "Failed to sync submission: {}", reason);
          if let Err(e) = self.queue.record_failure(submission.id, &reason) {
            warn!(id = submission.id, "Failed to record sync failure: {}", e);
          }
        }
      }
    }

    info!(
      delivered = report.delivered,
      failed = report.failed,
      "Background sync finished"
    );
    Ok(Some(report))
  }

  async fn replay<F: Fetcher>(
    &self,
    submission: &PendingSubmission,
    fetcher: &F,
  ) -> std::result::Result<(), String> {
    let request =
      Request::post_json(self.endpoint.clone(), &submission.payload).map_err(|e| e.to_string())?;

    let response = fetcher
      .fetch(&request)
      .await
      .map_err(|e| e.to_string())?;
    if !response.ok() {
      return Err(format!("HTTP {}", response.status));
    }

    // Delivered; a failed delete only means it may be sent again
    if let Err(e) = self.queue.remove(submission.id) {
      warn!(id = submission.id, "Failed to remove delivered submission: {}", e);
    }
    debug!(id = submission.id, "Submission delivered");
    Ok(())
  }
}
