//! Token bucket limiter.
//!
//! Each key owns a bucket holding up to `capacity` fractional tokens that
//! refill continuously at `requests / window` tokens per second. A request
//! consumes one whole token.

use std::time::{Duration, Instant};

use super::state::KeyedState;
use super::{Decision, Limiter};

/// Smallest wait ever reported for a denied request.
const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-key token bucket.
///
/// Capacity is `burst` when non-zero, otherwise `requests`. A key seen for
/// the first time starts with a full bucket.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    buckets: KeyedState<Bucket>,
    /// Tokens added per second.
    rate: f64,
    capacity: f64,
}

impl TokenBucketLimiter {
    pub fn new(requests: u32, window: Duration, burst: u32) -> Self {
        let capacity = if burst > 0 { burst } else { requests };

        Self {
            buckets: KeyedState::new(),
            rate: f64::from(requests) / window.as_secs_f64(),
            capacity: f64::from(capacity),
        }
    }

    /// Maximum number of tokens a bucket can hold.
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Time until one full token is available, rounded up to whole
    /// milliseconds and never below [`MIN_WAIT`].
    fn wait_for_token(&self, tokens: f64) -> Duration {
        let millis = ((1.0 - tokens) / self.rate * 1000.0).ceil();
        if millis.is_nan() || millis < 1.0 {
            return MIN_WAIT;
        }
        if millis.is_infinite() {
            return Duration::MAX;
        }
        Duration::from_millis(millis as u64)
    }
}

impl Limiter for TokenBucketLimiter {
    fn allow_at(&self, key: &str, now: Instant) -> Decision {
        let mut bucket = self.buckets.get_or_insert_with(key, || Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !elapsed.is_zero() {
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        }
        // The baseline moves forward on every call, denied or not. Callers
        // racing on a stale `now` must not pull it backwards.
        bucket.last_refill = bucket.last_refill.max(now);

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Decision::Allowed;
        }

        Decision::Denied {
            wait: self.wait_for_token(bucket.tokens),
        }
    }

    fn reset(&self, key: &str) {
        self.buckets.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}
