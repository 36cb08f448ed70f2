//! # In-Memory Response Cache
//!
//! Bounded in-memory cache with fresh/stale windows, LRU eviction and a
//! periodic sweep of hard-expired entries.

use super::{CacheEntry, CacheStats, CachedResponse, Freshness, StalePolicy};
use crate::caching::UpstreamPayload;
use crate::core::config::CacheConfig;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// In-memory response cache.
///
/// All methods take `&self`; share it behind an `Arc`. The entry bound is
/// enforced on insert, so under concurrent inserts of new keys the cache may
/// briefly hold a few entries over `max_entries`.
pub struct ResponseCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,

    hits: AtomicU64,
    misses: AtomicU64,
    stale_hits: AtomicU64,
    evictions: AtomicU64,
    expired_cleanups: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::with_capacity(config.max_entries.min(1024)),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            stale_hits: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_cleanups: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`, serving a stale entry only when `allow_stale` is set.
    pub fn get(&self, key: &str, allow_stale: bool) -> Option<CachedResponse> {
        self.lookup(key, StalePolicy::from(allow_stale))
    }

    /// Look up `key` under an explicit stale policy.
    ///
    /// Hard-expired entries are removed and reported as a miss.
    pub fn lookup(&self, key: &str, policy: StalePolicy) -> Option<CachedResponse> {
        let now = Instant::now();

        let freshness = {
            let mut entry = match self.entries.get_mut(key) {
                Some(entry) => entry,
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            };

            let freshness = entry.freshness_at(now);
            let servable = match freshness {
                Freshness::Fresh => true,
                Freshness::Stale => policy.permits(&entry, now),
                Freshness::Expired => false,
            };

            if servable {
                entry.touch(now);
                let counter = if freshness == Freshness::Fresh {
                    &self.hits
                } else {
                    &self.stale_hits
                };
                counter.fetch_add(1, Ordering::Relaxed);
                return Some(CachedResponse {
                    entry: entry.clone(),
                    freshness,
                });
            }
            freshness
        };

        if freshness == Freshness::Expired
            && self
                .entries
                .remove_if(key, |_, entry| entry.freshness_at(now) == Freshness::Expired)
                .is_some()
        {
            self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Removed hard-expired cache entry on lookup");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store `value` with the configured fresh and hard TTLs.
    pub fn set(&self, key: &str, value: UpstreamPayload) {
        self.set_with_ttl(key, value, self.config.fresh_ttl);
    }

    /// Store `value` with a custom fresh TTL; hard expiry is at least the configured hard TTL.
    pub fn set_with_ttl(&self, key: &str, value: UpstreamPayload, fresh_ttl: Duration) {
        let now = Instant::now();
        let hard_ttl = self.config.hard_ttl.max(fresh_ttl);

        if !self.entries.contains_key(key) {
            self.make_room();
        }

        self.entries
            .insert(key.to_string(), CacheEntry::new(value, fresh_ttl, hard_ttl, now));
        debug!(key = %key, ttl = ?fresh_ttl, "Cached upstream response");
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
        info!("Response cache cleared");
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every hard-expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| entry.freshness_at(now) != Freshness::Expired);
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            self.expired_cleanups
                .fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, remaining = self.entries.len(), "Swept expired cache entries");
        }
        removed
    }

    /// Run [`sweep_expired`](Self::sweep_expired) every `sweep_interval` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match cache.upgrade() {
                    Some(cache) => {
                        cache.sweep_expired();
                    }
                    None => break,
                }
            }
        })
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;

        CacheStats {
            entries: self.entries.len(),
            max_entries: self.config.max_entries,
            hits,
            misses,
            stale_hits: self.stale_hits.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
            hit_rate: if lookups > 0 {
                hits as f64 / lookups as f64 * 100.0
            } else {
                0.0
            },
        }
    }

    /// Free space for one new key: expired entries first, then least recently used.
    fn make_room(&self) {
        if self.entries.len() < self.config.max_entries {
            return;
        }

        if self.sweep_expired() > 0 && self.entries.len() < self.config.max_entries {
            return;
        }

        while self.entries.len() >= self.config.max_entries {
            let victim = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().last_accessed)
                .map(|entry| entry.key().clone());

            match victim {
                Some(key) => {
                    if self.entries.remove(&key).is_some() {
                        self.evictions.fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, "Evicted least recently used entry");
                    }
                }
                None => break,
            }
        }
    }
}
