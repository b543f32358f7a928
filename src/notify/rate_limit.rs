// src/notify/rate_limit.rs
use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Requests allowed per window (matches the webhook quota).
pub const DEFAULT_MAX_REQUESTS: usize = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(2000);

/// Sliding-window gate: at most `max_requests` sends in any `window`.
/// - Bursts up to the quota pass immediately, then sends are strictly deferred.
/// - `admit` never mutates the window; call `record` after a send actually happened.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_REQUESTS, DEFAULT_WINDOW)
    }
}

impl RateLimiter {
    /// `max_requests` of 0 is treated as 1.
    pub fn new(max_requests: usize, window: Duration) -> Self {
        let max_requests = max_requests.max(1);
        Self {
            max_requests,
            window,
            sent: VecDeque::with_capacity(max_requests),
        }
    }

    pub fn admit(&mut self) -> Duration {
        self.admit_at(Instant::now())
    }

    /// How long to wait before a send at `now` stays within quota.
    pub fn admit_at(&mut self, now: Instant) -> Duration {
        self.prune(now);
        if self.sent.len() < self.max_requests {
            return Duration::ZERO;
        }
        // Oldest timestamp that still counts once the window slides past it.
        let oldest = self.sent[self.sent.len() - self.max_requests];
        self.window.saturating_sub(now.saturating_duration_since(oldest))
    }

    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&mut self, now: Instant) {
        self.sent.push_back(now);
        while self.sent.len() > self.max_requests {
            self.sent.pop_front();
        }
    }

    pub fn in_window(&self) -> usize {
        self.sent.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&ts) = self.sent.front() {
            if now.saturating_duration_since(ts) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
    }
}
