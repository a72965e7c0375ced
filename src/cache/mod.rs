//! Named cache partitions backed by SQLite.
//!
//! This module provides the storage half of the controller:
//! - Partitions are created explicitly (install) or lazily on first write
//! - Entries are keyed by request identity (method + URL), last write wins
//! - Partitions can be enumerated and deleted for activation-time pruning
//! - The registration record persists lifecycle state between runs

mod storage;
mod traits;

pub use storage::SqliteStorage;
pub use traits::{request_key, CacheStorage, CachedResponse, EntrySummary, Registration};
