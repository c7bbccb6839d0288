//! Durable request logging.

mod error;
mod record;
mod sled_store;
mod writer;

pub use error::{StorageError, WriteError};
pub use record::RequestLog;
pub use sled_store::SledLogStore;
pub use writer::{sanitize, ResilientWriter, RetryPolicy, MAX_PATH_LEN, MAX_SOURCE_LEN};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for request log storage backends.
///
/// Implementations perform the raw mutation and report failures as they
/// happen; retrying and input sanitization belong to [`ResilientWriter`].
#[async_trait]
pub trait LogStore: Send + Sync {
    /// Append one record.
    async fn append(
        &self,
        source: &str,
        path: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    /// Most recent records, newest first. A `limit` of zero returns all.
    async fn recent(&self, limit: usize) -> Result<Vec<RequestLog>, StorageError>;

    /// Number of stored records.
    async fn count(&self) -> Result<u64, StorageError>;

    /// Delete records older than `cutoff`, returning how many were removed.
    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> Result<(), StorageError>;
}
