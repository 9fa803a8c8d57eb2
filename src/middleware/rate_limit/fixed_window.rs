//! Fixed window limiter.
//!
//! Counts requests per key in discrete windows. A window opens on the first
//! request after the previous one expired, so boundaries follow request
//! arrival rather than the wall clock. Up to `2 * requests` admissions can
//! land in one window-length interval straddling a boundary.

use std::time::{Duration, Instant};

use super::state::KeyedState;
use super::{Decision, Limiter};

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    start: Instant,
}

#[derive(Debug)]
pub struct FixedWindowLimiter {
    windows: KeyedState<Window>,
    requests: u32,
    window: Duration,
}

impl FixedWindowLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            windows: KeyedState::new(),
            requests,
            window,
        }
    }
}

impl Limiter for FixedWindowLimiter {
    fn allow_at(&self, key: &str, now: Instant) -> Decision {
        let mut current = self.windows.get_or_insert_with(key, || Window {
            count: 0,
            start: now,
        });

        if now.saturating_duration_since(current.start) >= self.window {
            current.count = 0;
            current.start = now;
        }

        if current.count < self.requests {
            current.count += 1;
            return Decision::Allowed;
        }

        Decision::Denied {
            wait: self
                .window
                .saturating_sub(now.saturating_duration_since(current.start)),
        }
    }

    fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(1));
        let now = Instant::now();

        assert!(limiter.allow_at("k", now).is_allowed());
        assert!(limiter.allow_at("k", now).is_allowed());

        let decision = limiter.allow_at("k", now);
        assert!(!decision.is_allowed());
        assert_eq!(decision.wait_time(), Duration::from_secs(1));
    }

    #[test]
    fn test_wait_counts_down_to_window_end() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(1));
        let start = Instant::now();
        assert!(limiter.allow_at("k", start).is_allowed());

        let decision = limiter.allow_at("k", start + Duration::from_millis(750));
        assert_eq!(decision, Decision::Denied {
            wait: Duration::from_millis(250)
        });
    }

    #[test]
    fn test_window_resets_after_boundary() {
        let limiter = FixedWindowLimiter::new(2, Duration::from_secs(1));
        let start = Instant::now();

        assert!(limiter.allow_at("k", start).is_allowed());
        assert!(limiter.allow_at("k", start).is_allowed());
        assert!(!limiter.allow_at("k", start).is_allowed());

        let next = start + Duration::from_secs(1);
        assert!(limiter.allow_at("k", next).is_allowed());
        assert!(limiter.allow_at("k", next).is_allowed());
        assert!(!limiter.allow_at("k", next).is_allowed());
    }

    #[test]
    fn test_boundary_burst_artifact() {
        let limiter = FixedWindowLimiter::new(3, Duration::from_secs(1));
        let start = Instant::now();

        // First request opens the window; the other two land just before it closes.
        assert!(limiter.allow_at("k", start).is_allowed());
        let late = start + Duration::from_millis(990);
        assert!(limiter.allow_at("k", late).is_allowed());
        assert!(limiter.allow_at("k", late).is_allowed());

        // Right after the boundary a full quota is available again, so five
        // requests pass inside a 20ms span.
        let early = start + Duration::from_millis(1010);
        for _ in 0..3 {
            assert!(limiter.allow_at("k", early).is_allowed());
        }
        assert!(!limiter.allow_at("k", early).is_allowed());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = FixedWindowLimiter::new(1, Duration::from_secs(60));
        let now = Instant::now();

        assert!(limiter.allow_at("a", now).is_allowed());
        assert!(!limiter.allow_at("a", now).is_allowed());
        assert!(limiter.allow_at("b", now).is_allowed());
        assert_eq!(limiter.tracked_keys(), 2);
    }
}
