//! Global and per-client admission control.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use crate::config::RateLimitingConfig;
use crate::sweep::{spawn_periodic, SweepHandle};

/// Capacity and refill rate for a class of buckets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketParams {
    /// Maximum burst size
    pub capacity: u32,
    /// Tokens added per second
    pub refill_rate: f64,
}

impl BucketParams {
    /// Derive bucket parameters from a requests-per-minute budget.
    ///
    /// Bursts are allowed up to a tenth of the per-minute budget (at least
    /// one request); the bucket refills at the per-minute rate spread evenly
    /// over sixty seconds.
    pub fn per_minute(requests_per_minute: u32) -> Self {
        Self {
            capacity: (requests_per_minute / 10).max(1),
            refill_rate: f64::from(requests_per_minute) / 60.0,
        }
    }

    fn bucket_at(&self, now: Instant) -> TokenBucket {
        TokenBucket::new_at(self.capacity, self.refill_rate, now)
    }
}

/// Registry of token buckets deciding whether a call is admitted.
///
/// One global bucket is shared by every caller; each distinct client key gets
/// its own bucket, created lazily on first use. Lookups go through a sharded
/// concurrent map so unrelated keys never contend on one lock, and a bucket's
/// own lock is only taken after the map shard has been released.
pub struct LimiterRegistry {
    /// Bucket shared by all callers
    global: TokenBucket,
    /// Buckets indexed by client key
    per_key: DashMap<String, Arc<TokenBucket>>,
    /// Parameters for newly created per-key buckets
    per_key_params: BucketParams,
}

impl LimiterRegistry {
    /// Create a registry with the given global and per-key parameters.
    pub fn new(global: BucketParams, per_key: BucketParams) -> Self {
        Self {
            global: global.bucket_at(Instant::now()),
            per_key: DashMap::new(),
            per_key_params: per_key,
        }
    }

    /// Create a registry from the rate limiting configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self::new(
            BucketParams::per_minute(config.global_requests_per_minute),
            BucketParams::per_minute(config.per_client_requests_per_minute),
        )
    }

    /// Decide whether a call from `key` is admitted.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_at(key, Instant::now())
    }

    /// Decide whether a call from `key` is admitted at `now`.
    ///
    /// The global bucket is consulted first. A global rejection returns
    /// immediately without looking up, creating or draining the per-key
    /// bucket.
    pub fn admit_at(&self, key: &str, now: Instant) -> bool {
        if !self.global.try_acquire_at(now).is_admitted() {
            debug!(key = %key, "Global rate limit exceeded");
            return false;
        }

        let bucket = self.bucket_for(key, now);
        let admitted = bucket.try_acquire_at(now).is_admitted();

        if admitted {
            trace!(key = %key, "Request admitted");
        } else {
            debug!(key = %key, "Per-client rate limit exceeded");
        }

        admitted
    }

    /// Look up the bucket for `key`, creating it at full capacity if missing.
    fn bucket_for(&self, key: &str, now: Instant) -> Arc<TokenBucket> {
        if let Some(bucket) = self.per_key.get(key) {
            return Arc::clone(bucket.value());
        }

        let bucket = Arc::clone(
            self.per_key
                .entry(key.to_owned())
                .or_insert_with(|| {
                    debug!(
                        key = %key,
                        capacity = self.per_key_params.capacity,
                        refill_rate = self.per_key_params.refill_rate,
                        "Creating rate limit bucket"
                    );
                    Arc::new(self.per_key_params.bucket_at(now))
                })
                .value(),
        );
        bucket
    }

    /// Remove per-key buckets that have been idle long enough to refill.
    ///
    /// Returns the number of buckets removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(Instant::now())
    }

    /// Remove per-key buckets that are full as of `now`.
    ///
    /// A full bucket is indistinguishable from a freshly created one, so
    /// removing it never changes a later admission decision.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        let mut evicted = 0;
        self.per_key.retain(|_, bucket| {
            let idle = bucket.is_full_at(now);
            if idle {
                evicted += 1;
            }
            !idle
        });

        if evicted > 0 {
            debug!(
                evicted = evicted,
                remaining = self.per_key.len(),
                "Evicted idle rate limit buckets"
            );
        }
        evicted
    }

    /// Start the periodic eviction sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweepHandle {
        let registry = Arc::clone(self);
        spawn_periodic("rate-limit-eviction", period, move || {
            let registry = Arc::clone(&registry);
            async move {
                registry.evict_idle();
            }
        })
    }

    /// Get the number of tracked client keys.
    pub fn tracked_keys(&self) -> usize {
        self.per_key.len()
    }

    /// Get the token level of the bucket for `key`, if one exists.
    pub fn key_tokens(&self, key: &str) -> Option<f64> {
        self.per_key.get(key).map(|bucket| bucket.tokens())
    }

    /// Get the global bucket.
    pub fn global(&self) -> &TokenBucket {
        &self.global
    }

    /// Get the parameters used for per-key buckets.
    pub fn per_key_params(&self) -> BucketParams {
        self.per_key_params
    }
}

impl std::fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("global", &self.global)
            .field("tracked_keys", &self.per_key.len())
            .field("per_key_params", &self.per_key_params)
            .finish()
    }
}
