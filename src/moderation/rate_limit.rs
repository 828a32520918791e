//! Sliding-window rate limiter keyed by channel id
//!
//! Each key keeps the timestamps of its events inside the trailing window.
//! Expired timestamps are evicted lazily on the next check for that key.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

pub struct SlidingWindowLimiter {
    windows: DashMap<i64, VecDeque<Instant>>,
    window: Duration,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl SlidingWindowLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            window,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record one event for `key` and report whether it exceeds `limit`
    pub fn check(&self, key: i64, limit: u32) -> bool {
        self.check_at(key, limit, Instant::now())
    }

    /// Same as [`check`](Self::check) with an explicit clock reading
    pub fn check_at(&self, key: i64, limit: u32, now: Instant) -> bool {
        let mut events = self.windows.entry(key).or_default();
        evict(&mut events, now, self.window);
        events.push_back(now);
        events.len() > limit as usize
    }

    /// Events currently counted for `key` (without recording a new one)
    pub fn count(&self, key: i64) -> usize {
        self.count_at(key, Instant::now())
    }

    pub fn count_at(&self, key: i64, now: Instant) -> usize {
        self.windows
            .get(&key)
            .map(|events| {
                events
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) < self.window)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drop keys whose windows are fully expired (call periodically)
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.windows.retain(|_, events| {
            evict(events, now, self.window);
            !events.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn evict(events: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = events.front() {
        if now.saturating_duration_since(*oldest) >= window {
            events.pop_front();
        } else {
            break;
        }
    }
}
