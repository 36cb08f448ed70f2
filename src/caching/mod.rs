//! # Caching System Module
//!
//! Caching for upstream metadata responses:
//!
//! 1. **Response cache** ([`ResponseCache`]): bounded in-memory store where
//!    each entry is fresh, stale (servable on request) or expired.
//! 2. **Key generation** ([`CacheKey`]): endpoint normalization and
//!    namespacing.
//! 3. **In-flight registry** ([`InFlightRegistry`]): coalesces concurrent
//!    misses for one key into a single upstream fetch.
//!
//! ## Usage Example
//! ```rust,no_run
//! use metadata_gateway::caching::{CacheKey, ResponseCache, UpstreamPayload};
//! use metadata_gateway::core::config::CacheConfig;
//!
//! let cache = ResponseCache::new(CacheConfig::default());
//! let key = CacheKey::for_endpoint("tmdb", "/movie/550");
//!
//! cache.set(key.as_str(), UpstreamPayload::Text("cached".into()));
//! if let Some(hit) = cache.get(key.as_str(), false) {
//!     assert!(!hit.is_stale());
//! }
//! ```

pub mod deduplication;
pub mod key_generator;
pub mod stores;

pub use deduplication::{FetchOutcome, InFlight, InFlightGuard, InFlightRegistry, InFlightWaiter};
pub use key_generator::CacheKey;
pub use stores::{CacheEntry, CacheStats, CachedResponse, Freshness, ResponseCache, StalePolicy};

use serde::Serialize;

/// `Cache-Control` sent with fresh data
pub const FRESH_CACHE_CONTROL: &str = "public, s-maxage=300, stale-while-revalidate=600";

/// `Cache-Control` sent with stale data
pub const STALE_CACHE_CONTROL: &str = "public, s-maxage=60, stale-while-revalidate=600";

/// Body of a successful upstream response, as it is cached and served.
///
/// Serialized untagged, so text payloads are written to clients as a JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UpstreamPayload {
    Json(serde_json::Value),
    Text(String),
}

impl UpstreamPayload {
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json(_))
    }
}

/// Which branch produced a proxy response, reported in `X-Cache`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CacheStatus {
    /// Fresh cache entry
    Hit,
    /// Stale entry served on the normal path (only when enabled)
    Stale,
    /// Fetched from upstream by this request
    Miss,
    /// Joined another request's in-flight fetch
    Deduped,
    /// Upstream failed; stale entry served instead
    StaleIfError,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Stale => "STALE",
            Self::Miss => "MISS",
            Self::Deduped => "DEDUPED",
            Self::StaleIfError => "STALE_IF_ERROR",
        }
    }

    /// `Cache-Control` for intermediaries; stale branches get the shorter max-age.
    pub fn cache_control(&self) -> &'static str {
        match self {
            Self::Hit | Self::Miss | Self::Deduped => FRESH_CACHE_CONTROL,
            Self::Stale | Self::StaleIfError => STALE_CACHE_CONTROL,
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
