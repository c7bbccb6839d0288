//! Request log store backed by sled.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use super::{LogStore, RequestLog, StorageError};

/// Name of the tree holding request records.
const REQUESTS_TREE: &str = "request_logs";

/// Request log store backed by an embedded sled database.
///
/// Records are JSON-encoded and keyed by big-endian ids from
/// `sled::Db::generate_id`, so key order matches insertion order.
pub struct SledLogStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledLogStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let store = Self::with_db(db)?;
        info!(path = %path.display(), records = store.tree.len(), "Opened request log store");
        Ok(store)
    }

    /// Create a store that is deleted when dropped.
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::with_db(db)
    }

    /// Create a store on an existing sled database.
    pub fn with_db(db: sled::Db) -> Result<Self, StorageError> {
        let tree = db.open_tree(REQUESTS_TREE)?;
        Ok(Self { db, tree })
    }

    /// Flush pending writes to disk.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let bytes = self.db.flush_async().await?;
        debug!(bytes = bytes, "Flushed request log store");
        Ok(())
    }

    /// Get the number of stored records.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn decode(value: &[u8]) -> Result<RequestLog, StorageError> {
        Ok(serde_json::from_slice(value)?)
    }

    /// Run a tree scan on the blocking pool so it never stalls a runtime worker.
    async fn scan<T, F>(&self, scan: F) -> Result<T, StorageError>
    where
        F: FnOnce(&sled::Tree) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let tree = self.tree.clone();
        tokio::task::spawn_blocking(move || scan(&tree))
            .await
            .map_err(|e| StorageError::Backend(format!("scan task failed: {}", e)))?
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn append(
        &self,
        source: &str,
        path: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let id = self.db.generate_id()?;
        let record = RequestLog {
            id,
            source: source.to_owned(),
            path: path.to_owned(),
            timestamp,
        };

        self.tree
            .insert(id.to_be_bytes(), serde_json::to_vec(&record)?)?;
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RequestLog>, StorageError> {
        let limit = if limit == 0 { usize::MAX } else { limit };

        self.scan(move |tree| {
            tree.iter()
                .rev()
                .take(limit)
                .map(|entry| {
                    let (_, value) = entry?;
                    Self::decode(&value)
                })
                .collect()
        })
        .await
    }

    async fn count(&self) -> Result<u64, StorageError> {
        self.scan(|tree| Ok(tree.len() as u64)).await
    }

    async fn prune_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
        self.scan(move |tree| {
            let mut batch = sled::Batch::default();
            let mut pruned = 0;

            for entry in tree.iter() {
                let (key, value) = entry?;
                if Self::decode(&value)?.timestamp < cutoff {
                    batch.remove(key);
                    pruned += 1;
                }
            }

            if pruned > 0 {
                tree.apply_batch(batch)?;
            }
            Ok(pruned)
        })
        .await
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.db.size_on_disk()?;
        Ok(())
    }
}

impl std::fmt::Debug for SledLogStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledLogStore")
            .field("records", &self.tree.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tokio_test::assert_ok;

    #[tokio::test]
    async fn test_append_and_recent() {
        let store = SledLogStore::temporary().unwrap();
        let now = Utc::now();

        store.append("192.0.2.1", "/first", now).await.unwrap();
        store.append("192.0.2.2", "/second", now).await.unwrap();
        store.append("192.0.2.1", "/third", now).await.unwrap();

        let logs = store.recent(10).await.unwrap();
        assert_eq!(logs.len(), 3);
        // Newest first
        assert_eq!(logs[0].path, "/third");
        assert_eq!(logs[2].path, "/first");
        assert_eq!(logs[1].source, "192.0.2.2");
        assert!(logs[0].id > logs[1].id);
    }

    #[tokio::test]
    async fn test_recent_limit() {
        let store = SledLogStore::temporary().unwrap();
        for i in 0..5 {
            store
                .append("192.0.2.1", &format!("/path{}", i), Utc::now())
                .await
                .unwrap();
        }

        assert_eq!(store.recent(2).await.unwrap().len(), 2);
        assert_eq!(store.recent(0).await.unwrap().len(), 5);
        assert_eq!(store.len(), 5);
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_prune_before() {
        let store = SledLogStore::temporary().unwrap();
        let now = Utc::now();

        store.append("192.0.2.1", "/old1", now - Duration::days(40)).await.unwrap();
        store
            .append("192.0.2.2", "/old2", now - Duration::days(40) + Duration::hours(1))
            .await
            .unwrap();
        store.append("192.0.2.3", "/recent1", now - Duration::days(10)).await.unwrap();
        store.append("192.0.2.4", "/recent2", now - Duration::days(1)).await.unwrap();

        let pruned = store.prune_before(now - Duration::days(30)).await.unwrap();
        assert_eq!(pruned, 2);

        let logs = store.recent(10).await.unwrap();
        let paths: Vec<&str> = logs.iter().map(|l| l.path.as_str()).collect();
        assert_eq!(paths, vec!["/recent2", "/recent1"]);
    }

    #[tokio::test]
    async fn test_prune_nothing_old() {
        let store = SledLogStore::temporary().unwrap();
        store.append("192.0.2.1", "/fresh", Utc::now()).await.unwrap();

        let pruned = store.prune_before(Utc::now() - Duration::days(30)).await.unwrap();
        assert_eq!(pruned, 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_ping_and_flush() {
        let store = SledLogStore::temporary().unwrap();
        assert_ok!(store.ping().await);
        assert_ok!(store.flush().await);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scan_reports_corrupt_records() {
        let store = SledLogStore::temporary().unwrap();
        store.append("192.0.2.1", "/valid", Utc::now()).await.unwrap();
        store.tree.insert(u64::MAX.to_be_bytes(), &b"not json"[..]).unwrap();

        let error = store.recent(0).await.unwrap_err();
        assert!(matches!(error, StorageError::Encoding(_)));
        assert!(!error.is_transient());

        let error = store.prune_before(Utc::now()).await.unwrap_err();
        assert!(matches!(error, StorageError::Encoding(_)));
        assert_eq!(store.count().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_prune_and_append() {
        let store = std::sync::Arc::new(SledLogStore::temporary().unwrap());
        let old = Utc::now() - Duration::days(40);
        for i in 0..500 {
            store.append("192.0.2.1", &format!("/old{}", i), old).await.unwrap();
        }

        let pruning = {
            let store = std::sync::Arc::clone(&store);
            tokio::spawn(async move { store.prune_before(Utc::now() - Duration::days(30)).await })
        };
        for i in 0..50 {
            store.append("192.0.2.2", &format!("/new{}", i), Utc::now()).await.unwrap();
        }

        assert_eq!(pruning.await.unwrap().unwrap(), 500);
        assert_eq!(store.count().await.unwrap(), 50);
    }
}
