//! # Cache Store Types
//!
//! Entry and statistics types shared by the response cache store.

pub mod memory;

pub use memory::ResponseCache;

use super::UpstreamPayload;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

/// Cache entry with freshness metadata.
///
/// `stored_at <= fresh_until <= hard_expire_at` always holds.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Cached response body
    pub value: UpstreamPayload,

    /// When the entry was written
    pub stored_at: Instant,

    /// End of the fresh window
    pub fresh_until: Instant,

    /// After this instant the entry is never served
    pub hard_expire_at: Instant,

    /// Last time the entry was served, used for LRU eviction
    pub last_accessed: Instant,

    /// Number of times the entry was served
    pub access_count: u64,
}

impl CacheEntry {
    /// Create an entry stored at `now`; a hard TTL shorter than the fresh TTL is raised to it.
    pub fn new(value: UpstreamPayload, fresh_ttl: Duration, hard_ttl: Duration, now: Instant) -> Self {
        let hard_ttl = hard_ttl.max(fresh_ttl);
        Self {
            value,
            stored_at: now,
            fresh_until: now + fresh_ttl,
            hard_expire_at: now + hard_ttl,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn freshness_at(&self, now: Instant) -> Freshness {
        if now <= self.fresh_until {
            Freshness::Fresh
        } else if now <= self.hard_expire_at {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// How long the entry has been past its fresh window
    pub fn staleness_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fresh_until)
    }

    /// Time since the entry was stored
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.stored_at)
    }

    fn touch(&mut self, now: Instant) {
        self.last_accessed = now;
        self.access_count += 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Inside the fresh TTL
    Fresh,
    /// Past the fresh TTL, still before hard expiry
    Stale,
    /// Past hard expiry
    Expired,
}

/// How far past its fresh window a cached entry may be served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StalePolicy {
    /// Fresh entries only
    Reject,
    /// Stale entries no more than this far past their fresh window
    Within(Duration),
    /// Any entry that has not hit hard expiry
    UntilHardExpiry,
}

impl StalePolicy {
    /// Policy for a configured stale allowance; zero disables stale serving
    pub fn within(allowance: Duration) -> Self {
        if allowance.is_zero() {
            Self::Reject
        } else {
            Self::Within(allowance)
        }
    }

    fn permits(&self, entry: &CacheEntry, now: Instant) -> bool {
        match self {
            Self::Reject => false,
            Self::Within(allowance) => entry.staleness_at(now) <= *allowance,
            Self::UntilHardExpiry => true,
        }
    }
}

impl From<bool> for StalePolicy {
    fn from(allow_stale: bool) -> Self {
        if allow_stale {
            Self::UntilHardExpiry
        } else {
            Self::Reject
        }
    }
}

/// A served cache entry and whether it was stale at lookup time
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub entry: CacheEntry,
    pub freshness: Freshness,
}

impl CachedResponse {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    pub fn value(&self) -> &UpstreamPayload {
        &self.entry.value
    }

    pub fn into_value(self) -> UpstreamPayload {
        self.entry.value
    }
}

/// Cache store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub stale_hits: u64,
    pub evictions: u64,
    pub expired_cleanups: u64,
    /// Fresh hits as a percentage of fresh hits plus misses
    pub hit_rate: f64,
}
