//! Sanitizing, retrying request log writer.
//!
//! Every free-text field is stripped of control characters and truncated
//! before it reaches storage. The mutation itself is retried with
//! exponential backoff while the backend reports contention; any other
//! failure is returned after the first attempt.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::{LogStore, StorageError, WriteError};
use crate::config::StorageConfig;

/// Longest stored source address (textual IPv6 with zone fits).
pub const MAX_SOURCE_LEN: usize = 45;
/// Longest stored request path.
pub const MAX_PATH_LEN: usize = 2048;

/// Strip control characters (below U+0020 and U+007F), then truncate to at
/// most `max_len` bytes without splitting a character.
pub fn sanitize(input: &str, max_len: usize) -> String {
    let mut sanitized: String = input
        .chars()
        .filter(|c| *c >= '\u{20}' && *c != '\u{7f}')
        .collect();

    if sanitized.len() > max_len {
        let mut end = max_len;
        while !sanitized.is_char_boundary(end) {
            end -= 1;
        }
        sanitized.truncate(end);
    }

    sanitized
}

/// Retry schedule for transient storage failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles for each further retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Create a retry policy.
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// Create a retry policy from the storage configuration.
    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.max_write_retries, config.base_backoff())
    }

    /// Delay before retry number `retry` (zero-based): `base * 2^retry`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        2u32.checked_pow(retry)
            .and_then(|multiplier| self.base_delay.checked_mul(multiplier))
            .unwrap_or(Duration::MAX)
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(10))
    }
}

/// Writes request records through a [`LogStore`], sanitizing input and
/// retrying contention.
///
/// The writer keeps no shared mutable state; each call runs its own retry
/// loop and its backoff sleeps suspend only the calling task.
pub struct ResilientWriter<S: ?Sized = dyn LogStore> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S: LogStore + ?Sized> ResilientWriter<S> {
    /// Create a writer over `store`.
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    /// Record a request from `source` for `path`.
    pub async fn write(&self, source: &str, path: &str) -> Result<(), WriteError> {
        let source = sanitize(source, MAX_SOURCE_LEN);
        let path = sanitize(path, MAX_PATH_LEN);
        let timestamp = Utc::now();

        let store = &self.store;
        let (source, path) = (source.as_str(), path.as_str());
        self.execute(move || store.append(source, path, timestamp))
            .await
    }

    /// Run `operation`, retrying transient failures per the policy.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, WriteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StorageError>>,
    {
        let mut retry = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(WriteError::Permanent(error));
            }

            if retry >= self.policy.max_retries {
                warn!(
                    attempts = retry + 1,
                    error = %error,
                    "Storage still contended, giving up"
                );
                return Err(WriteError::RetriesExhausted {
                    attempts: retry + 1,
                    last: error,
                });
            }

            let delay = self.policy.delay_for(retry);
            debug!(
                attempt = retry + 1,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Transient storage error, retrying"
            );
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }

    /// Get the retry policy.
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Get the underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RequestLog;
    use async_trait::async_trait;
    use chrono::DateTime;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;
    use tokio_test::assert_err;

    /// Store that replays scripted outcomes and records what it was given.
    #[derive(Default)]
    struct ScriptedStore {
        outcomes: Mutex<VecDeque<Result<(), StorageError>>>,
        calls: AtomicUsize,
        written: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedStore {
        fn with_outcomes(outcomes: Vec<Result<(), StorageError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LogStore for ScriptedStore {
        async fn append(
            &self,
            source: &str,
            path: &str,
            _timestamp: DateTime<Utc>,
        ) -> Result<(), StorageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self.outcomes.lock().pop_front().unwrap_or(Ok(()));
            if outcome.is_ok() {
                self.written.lock().push((source.to_owned(), path.to_owned()));
            }
            outcome
        }

        async fn recent(&self, _limit: usize) -> Result<Vec<RequestLog>, StorageError> {
            Ok(Vec::new())
        }

        async fn count(&self) -> Result<u64, StorageError> {
            Ok(self.written.lock().len() as u64)
        }

        async fn prune_before(&self, _cutoff: DateTime<Utc>) -> Result<usize, StorageError> {
            Ok(0)
        }

        async fn ping(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    fn locked() -> StorageError {
        StorageError::Backend("database is locked".to_string())
    }

    fn writer(store: &Arc<ScriptedStore>) -> ResilientWriter<ScriptedStore> {
        ResilientWriter::new(Arc::clone(store), RetryPolicy::default())
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize("/test\n\r\x00path", MAX_PATH_LEN), "/testpath");
        assert_eq!(sanitize("a\tb\x1bc\x7fd", MAX_PATH_LEN), "abcd");
        assert_eq!(sanitize("/caf\u{e9}?q=1", MAX_PATH_LEN), "/caf\u{e9}?q=1");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "a".repeat(3000);
        assert_eq!(sanitize(&long, MAX_PATH_LEN).len(), MAX_PATH_LEN);

        let address = "1".repeat(100);
        assert_eq!(sanitize(&address, MAX_SOURCE_LEN).len(), MAX_SOURCE_LEN);

        assert_eq!(sanitize("short", 10), "short");
    }

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        // Each 'é' is two bytes
        let sanitized = sanitize("\u{e9}\u{e9}\u{e9}", 5);
        assert_eq!(sanitized, "\u{e9}\u{e9}");
    }

    #[test]
    fn test_sanitize_empty() {
        assert_eq!(sanitize("", MAX_PATH_LEN), "");
        assert_eq!(sanitize("\n\r\x00", MAX_PATH_LEN), "");
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_millis(10));
        assert_eq!(policy.delay_for(1), Duration::from_millis(20));
        assert_eq!(policy.delay_for(2), Duration::from_millis(40));
        assert_eq!(policy.max_attempts(), 4);

        // Keeps doubling up to the widest multiplier
        assert_eq!(policy.delay_for(31), Duration::from_millis(10) * (1u32 << 31));

        // Saturates instead of overflowing
        assert_eq!(policy.delay_for(32), Duration::MAX);
        assert_eq!(policy.delay_for(200), Duration::MAX);
        assert_eq!(
            RetryPolicy::new(3, Duration::from_secs(u64::MAX)).delay_for(1),
            Duration::MAX
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_succeeds_first_time() {
        let store = Arc::new(ScriptedStore::default());

        writer(&store).write("192.0.2.1", "/index").await.unwrap();

        assert_eq!(store.calls(), 1);
        assert_eq!(
            store.written.lock().clone(),
            vec![("192.0.2.1".to_string(), "/index".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_sanitizes_before_storing() {
        let store = Arc::new(ScriptedStore::default());
        let long_source = "9".repeat(80);

        writer(&store)
            .write(&long_source, "/test\n\r\x00path")
            .await
            .unwrap();

        let written = store.written.lock().clone();
        assert_eq!(written[0].0.len(), MAX_SOURCE_LEN);
        assert_eq!(written[0].1, "/testpath");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_then_success() {
        let store = Arc::new(ScriptedStore::with_outcomes(vec![Err(locked()), Err(locked())]));
        let started = Instant::now();

        writer(&store).write("192.0.2.1", "/retry").await.unwrap();

        assert_eq!(store.calls(), 3);
        // Backoff of 10ms then 20ms
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted() {
        let store = Arc::new(ScriptedStore::with_outcomes(
            (0..10).map(|_| Err(locked())).collect(),
        ));
        let started = Instant::now();

        let error = writer(&store).write("192.0.2.1", "/busy").await.unwrap_err();

        assert_eq!(store.calls(), 4);
        assert!(error.is_exhausted());
        match error {
            WriteError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 4);
                assert!(last.is_transient());
            }
            other => panic!("expected exhausted retries, got {:?}", other),
        }
        // 10 + 20 + 40ms of backoff, none after the final attempt
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(70));
        assert!(elapsed < Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let store = Arc::new(ScriptedStore::with_outcomes(vec![Err(StorageError::Backend(
            "disk I/O error".to_string(),
        ))]));

        let error = assert_err!(writer(&store).write("192.0.2.1", "/broken").await);

        assert_eq!(store.calls(), 1);
        assert!(matches!(error, WriteError::Permanent(_)));
        assert!(!error.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_after_transient() {
        let store = Arc::new(ScriptedStore::with_outcomes(vec![
            Err(StorageError::Busy("busy".to_string())),
            Err(StorageError::Backend("constraint failed".to_string())),
        ]));

        let error = assert_err!(writer(&store).write("192.0.2.1", "/mixed").await);

        assert_eq!(store.calls(), 2);
        assert!(matches!(error, WriteError::Permanent(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_policy() {
        let store = Arc::new(ScriptedStore::with_outcomes(vec![Err(locked())]));
        let writer = ResilientWriter::new(
            Arc::clone(&store),
            RetryPolicy::new(0, Duration::from_millis(10)),
        );

        let error = writer.write("192.0.2.1", "/once").await.unwrap_err();

        assert_eq!(store.calls(), 1);
        assert!(error.is_exhausted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_returns_value() {
        let store = Arc::new(ScriptedStore::default());
        let writer = writer(&store);
        let attempts = AtomicUsize::new(0);

        let value = writer
            .execute(|| {
                let attempt = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(StorageError::Busy("busy".to_string()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
