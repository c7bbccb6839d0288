//! Token bucket implementation.

use parking_lot::Mutex;
use tokio::time::Instant;

/// Outcome of a single admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// A token was taken; the call may proceed
    Admitted,
    /// The bucket was empty
    Rejected,
}

impl Admission {
    /// Whether the call was admitted.
    pub fn is_admitted(self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Mutable part of a bucket, always updated under one lock.
#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket with continuous refill.
///
/// Refill is folded into every acquire: the bucket gains
/// `elapsed * refill_rate` tokens, capped at `capacity`, before a token is
/// taken. The token level and refill timestamp live behind a single mutex so
/// concurrent callers on the same bucket observe a linearizable sequence.
pub struct TokenBucket {
    /// Maximum number of tokens
    capacity: u32,
    /// Tokens added per second
    refill_rate: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self::new_at(capacity, refill_rate, Instant::now())
    }

    /// Create a full bucket whose refill clock starts at `now`.
    ///
    /// A capacity of zero is raised to one; a negative or non-finite rate
    /// is treated as zero.
    pub fn new_at(capacity: u32, refill_rate: f64, now: Instant) -> Self {
        let capacity = capacity.max(1);
        let refill_rate = if refill_rate.is_finite() && refill_rate > 0.0 {
            refill_rate
        } else {
            0.0
        };

        Self {
            capacity,
            refill_rate,
            state: Mutex::new(BucketState {
                tokens: f64::from(capacity),
                last_refill: now,
            }),
        }
    }

    /// Refill, then take one token if available.
    pub fn try_acquire(&self) -> Admission {
        self.try_acquire_at(Instant::now())
    }

    /// Refill up to `now`, then take one token if available.
    pub fn try_acquire_at(&self, now: Instant) -> Admission {
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }

    /// Token level as of `now`, with refill applied.
    pub fn tokens_at(&self, now: Instant) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// Token level as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }

    /// Whether the bucket has refilled completely by `now`.
    pub fn is_full_at(&self, now: Instant) -> bool {
        self.tokens_at(now) >= f64::from(self.capacity)
    }

    /// Get the capacity of this bucket.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Get the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }

    // An instant earlier than the last refill adds nothing and does not move
    // the refill clock backwards.
    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let refilled = state.tokens + elapsed.as_secs_f64() * self.refill_rate;
        state.tokens = refilled.min(f64::from(self.capacity));
        state.last_refill = now;
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("capacity", &self.capacity)
            .field("refill_rate", &self.refill_rate)
            .field("tokens", &self.tokens())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_bucket_is_full() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(10, 1.0, now);

        assert_eq!(bucket.capacity(), 10);
        assert_eq!(bucket.tokens(), 10.0);
        assert!(bucket.is_full_at(now));
    }

    #[test]
    fn test_burst_admits_capacity_then_rejects() {
        let now = Instant::now();
        let bucket = TokenBucket::new_at(10, 10.0 / 60.0, now);

        let admitted = (0..15)
            .map(|_| bucket.try_acquire_at(now))
            .filter(|a| a.is_admitted())
            .count();

        assert_eq!(admitted, 10);
        assert_eq!(bucket.tokens(), 0.0);
    }

    #[test]
    fn test_refill_after_drain() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(10, 10.0 / 60.0, start);

        for _ in 0..10 {
            assert!(bucket.try_acquire_at(start).is_admitted());
        }
        assert_eq!(bucket.try_acquire_at(start), Admission::Rejected);

        // One token needs six seconds at 10 per minute
        let later = start + Duration::from_millis(6_010);
        assert_eq!(bucket.try_acquire_at(later), Admission::Admitted);
        assert_eq!(bucket.try_acquire_at(later), Admission::Rejected);
    }

    #[test]
    fn test_partial_refill_is_not_enough() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(1, 1.0, start);

        assert!(bucket.try_acquire_at(start).is_admitted());
        let half = start + Duration::from_millis(500);
        assert_eq!(bucket.try_acquire_at(half), Admission::Rejected);
        assert!((bucket.tokens() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_refill_caps_at_capacity() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(5, 100.0, start);

        bucket.try_acquire_at(start);
        let much_later = start + Duration::from_secs(3600);
        assert_eq!(bucket.tokens_at(much_later), 5.0);
    }

    #[test]
    fn test_earlier_instant_does_not_change_tokens() {
        let start = Instant::now();
        let later = start + Duration::from_secs(2);
        let bucket = TokenBucket::new_at(4, 1.0, later);

        assert!(bucket.try_acquire_at(later).is_admitted());
        let before = bucket.tokens();

        // Stale timestamps never refill or rewind the clock
        assert_eq!(bucket.tokens_at(start), before);
        assert_eq!(bucket.tokens_at(later), before);
    }

    #[test]
    fn test_zero_rate_never_refills() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(1, 0.0, start);

        assert!(bucket.try_acquire_at(start).is_admitted());
        let later = start + Duration::from_secs(86_400);
        assert_eq!(bucket.try_acquire_at(later), Admission::Rejected);
    }

    #[test]
    fn test_invalid_parameters_are_clamped() {
        let bucket = TokenBucket::new(0, f64::NAN);
        assert_eq!(bucket.capacity(), 1);
        assert_eq!(bucket.refill_rate(), 0.0);

        let bucket = TokenBucket::new(3, -2.0);
        assert_eq!(bucket.refill_rate(), 0.0);
    }

    #[test]
    fn test_tokens_stay_within_bounds() {
        let start = Instant::now();
        let bucket = TokenBucket::new_at(7, 3.5, start);

        // Mixed bursts and gaps of varying length
        let gaps_ms = [0u64, 1, 0, 250, 0, 0, 1_000, 3, 0, 10_000, 0, 0, 0, 400, 0];
        let mut now = start;
        for (round, gap) in gaps_ms.iter().cycle().take(300).enumerate() {
            now += Duration::from_millis(*gap);
            for _ in 0..(round % 4) {
                bucket.try_acquire_at(now);
            }
            let tokens = bucket.tokens_at(now);
            assert!(tokens >= 0.0, "tokens went negative: {}", tokens);
            assert!(tokens <= 7.0, "tokens exceeded capacity: {}", tokens);
        }
    }

    #[test]
    fn test_concurrent_acquire_never_overadmits() {
        let now = Instant::now();
        let bucket = Arc::new(TokenBucket::new_at(100, 0.0, now));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let bucket = Arc::clone(&bucket);
                thread::spawn(move || {
                    (0..50)
                        .filter(|_| bucket.try_acquire_at(now).is_admitted())
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 100);
        assert_eq!(bucket.tokens(), 0.0);
    }
}
