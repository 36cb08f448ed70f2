//! # Rate Limiting System
//!
//! Fixed-window request counting per client key. Only requests that would
//! reach the upstream are counted; cache hits and joined in-flight fetches
//! never consume budget.
//!
//! ## Usage Example
//! ```rust,no_run
//! use metadata_gateway::core::config::RateLimitConfig;
//! use metadata_gateway::middleware::rate_limiting::FixedWindowRateLimiter;
//! use std::time::Duration;
//!
//! let limiter = FixedWindowRateLimiter::new(RateLimitConfig {
//!     max_requests: 100,
//!     window: Duration::from_secs(60),
//!     ..Default::default()
//! });
//!
//! let decision = limiter.check("203.0.113.7");
//! if !decision.allowed {
//!     println!("retry in {}s", decision.retry_after_secs);
//! }
//! ```

use crate::core::config::RateLimitConfig;
use crate::core::error::GatewayError;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Request count for one client in its current window
#[derive(Debug, Clone, Copy)]
pub struct RateLimitWindow {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitWindow {
    fn starting_at(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn has_elapsed(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }

    fn time_until_reset(&self, window: Duration, now: Instant) -> Duration {
        (self.window_start + window).saturating_duration_since(now)
    }
}

/// Rate limit decision result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Whole seconds until the window resets, rounded up
    pub retry_after_secs: u64,
}

/// Rate limiting metrics
#[derive(Debug, Default)]
pub struct RateLimitMetrics {
    pub requests_allowed: AtomicU64,
    pub requests_denied: AtomicU64,
}

/// Snapshot of rate limiting metrics
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitMetricsSnapshot {
    pub requests_allowed: u64,
    pub requests_denied: u64,
    pub tracked_clients: usize,
}

/// In-memory fixed-window rate limiter keyed by client identity
pub struct FixedWindowRateLimiter {
    config: RateLimitConfig,
    windows: DashMap<String, RateLimitWindow>,
    metrics: RateLimitMetrics,
}

impl FixedWindowRateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
            metrics: RateLimitMetrics::default(),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Count one request for `client_key` and decide whether it may proceed.
    pub fn check(&self, client_key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let limit = self.config.max_requests;
        let window_len = self.config.window;

        if !self.windows.contains_key(client_key) {
            self.make_room();
        }

        let decision = {
            let mut window = self
                .windows
                .entry(client_key.to_string())
                .or_insert_with(|| RateLimitWindow::starting_at(now));

            if window.has_elapsed(window_len, now) {
                *window = RateLimitWindow::starting_at(now);
            }
            window.count = window.count.saturating_add(1);

            RateLimitDecision {
                allowed: window.count <= limit,
                limit,
                remaining: limit.saturating_sub(window.count),
                retry_after_secs: ceil_secs(window.time_until_reset(window_len, now)),
            }
        };

        if decision.allowed {
            self.metrics.requests_allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metrics.requests_denied.fetch_add(1, Ordering::Relaxed);
            debug!(
                client = %client_key,
                retry_after_secs = decision.retry_after_secs,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Report the budget left for `client_key` without counting a request.
    pub fn peek(&self, client_key: &str) -> RateLimitDecision {
        let now = Instant::now();
        let limit = self.config.max_requests;
        let window_len = self.config.window;

        match self.windows.get(client_key) {
            Some(window) if !window.has_elapsed(window_len, now) => RateLimitDecision {
                allowed: window.count < limit,
                limit,
                remaining: limit.saturating_sub(window.count),
                retry_after_secs: ceil_secs(window.time_until_reset(window_len, now)),
            },
            _ => RateLimitDecision {
                allowed: limit > 0,
                limit,
                remaining: limit,
                retry_after_secs: 0,
            },
        }
    }

    /// Drop the window for `client_key`, restoring its full budget.
    pub fn reset(&self, client_key: &str) -> bool {
        self.windows.remove(client_key).is_some()
    }

    /// Remove every window that has already elapsed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let window_len = self.config.window;
        let before = self.windows.len();
        self.windows
            .retain(|_, window| !window.has_elapsed(window_len, now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!(removed, "Swept elapsed rate limit windows");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval` until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match limiter.upgrade() {
                    Some(limiter) => {
                        limiter.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    pub fn get_metrics(&self) -> RateLimitMetricsSnapshot {
        RateLimitMetricsSnapshot {
            requests_allowed: self.metrics.requests_allowed.load(Ordering::Relaxed),
            requests_denied: self.metrics.requests_denied.load(Ordering::Relaxed),
            tracked_clients: self.windows.len(),
        }
    }

    /// The error returned to a client denied by `decision`
    pub fn rejection(&self, decision: &RateLimitDecision) -> GatewayError {
        GatewayError::RateLimitExceeded {
            limit: decision.limit,
            window: humantime::format_duration(self.config.window).to_string(),
            retry_after_secs: decision.retry_after_secs,
        }
    }

    /// Keep the tracked-client bound: elapsed windows go first, then the oldest.
    fn make_room(&self) {
        if self.windows.len() < self.config.max_clients {
            return;
        }

        if self.sweep_expired() > 0 && self.windows.len() < self.config.max_clients {
            return;
        }

        while self.windows.len() >= self.config.max_clients {
            let oldest = self
                .windows
                .iter()
                .min_by_key(|window| window.value().window_start)
                .map(|window| window.key().clone());

            match oldest {
                Some(key) => {
                    self.windows.remove(&key);
                    warn!(client = %key, "Rate limiter at client capacity, dropped oldest window");
                }
                None => break,
            }
        }
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
