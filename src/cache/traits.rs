//! Core traits and types for the cache partitions.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::{Request, Response};
use crate::lifecycle::LifecycleState;

/// A response read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub response: Response,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Listing row for a partition entry (no body).
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub method: String,
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Persisted record of a controller version and the partitions it serves from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
  pub version: String,
  pub state: LifecycleState,
  pub static_partition: String,
  pub dynamic_partition: String,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Create the partition if it doesn't exist.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Partition names in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns false if it didn't exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Store a response, creating the partition if needed.
  fn put(&self, partition: &str, request: &Request, response: &Response) -> Result<()>;

  /// Store a batch of responses atomically: all are written or none are.
  fn put_all(&self, partition: &str, entries: &[(Request, Response)]) -> Result<()>;

  /// Look a request up in a single partition.
  fn get(&self, partition: &str, request: &Request) -> Result<Option<CachedResponse>>;

  /// Entries of a partition in URL order.
  fn entries(&self, partition: &str) -> Result<Vec<EntrySummary>>;

  /// Persisted registration for a controller version.
  fn registration(&self, version: &str) -> Result<Option<Registration>>;

  /// Persist a registration. Saving one as `Active` retires whichever other
  /// version was active, so at most one version serves at a time.
  fn save_registration(&self, registration: &Registration) -> Result<()>;

  /// The version currently serving requests, if any.
  fn active_registration(&self) -> Result<Option<Registration>>;
}

/// Stable storage key for a request: SHA-256 of method and URL, fragment ignored.
pub fn request_key(request: &Request) -> String {
  let mut url: Url = request.url.clone();
  url.set_fragment(None);

  let mut hasher = Sha256::new();
  hasher.update(request.method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}
