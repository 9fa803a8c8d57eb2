//! Sliding window limiter.
//!
//! Keeps the exact acceptance timestamps of each key inside the trailing
//! window, so the admitted count in any window-length interval never
//! exceeds the limit. Memory per key is bounded by `requests` entries.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::state::KeyedState;
use super::{Decision, Limiter};

#[derive(Debug)]
pub struct SlidingWindowLimiter {
    windows: KeyedState<VecDeque<Instant>>,
    requests: usize,
    window: Duration,
}

impl SlidingWindowLimiter {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self {
            windows: KeyedState::new(),
            requests: requests as usize,
            window,
        }
    }
}

impl Limiter for SlidingWindowLimiter {
    fn allow_at(&self, key: &str, now: Instant) -> Decision {
        let mut entry = self.windows.get_or_insert_with(key, VecDeque::new);
        let timestamps = entry.value_mut();

        // Lazily drop everything that has aged out of the window.
        while timestamps
            .front()
            .is_some_and(|&ts| now.saturating_duration_since(ts) >= self.window)
        {
            timestamps.pop_front();
        }

        if timestamps.len() < self.requests {
            // Keep the deque sorted even if `now` is older than the newest entry.
            let accepted = timestamps.back().map_or(now, |&newest| newest.max(now));
            timestamps.push_back(accepted);
            return Decision::Allowed;
        }

        // A slot frees up exactly when the oldest counted request ages out.
        let oldest = timestamps.front().copied().unwrap_or(now);
        Decision::Denied {
            wait: self
                .window
                .saturating_sub(now.saturating_duration_since(oldest)),
        }
    }

    fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}
