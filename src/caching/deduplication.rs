//! # Request Deduplication Module
//!
//! Single-flight coalescing of upstream fetches. The first request to miss
//! the cache for a key becomes the leader and performs the fetch; every other
//! request for that key while the fetch is pending becomes a follower and
//! receives the leader's outcome, success or failure.
//!
//! The registry entry is removed when the leader completes or its guard is
//! dropped. Followers of a dropped guard see an "abandoned" internal error.

use super::UpstreamPayload;
use crate::core::error::GatewayError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Result shared by a leader with its followers
pub type FetchOutcome = Result<UpstreamPayload, GatewayError>;

type OutcomeSlot = Option<FetchOutcome>;

#[derive(Debug)]
struct InFlightSlot {
    generation: u64,
    receiver: watch::Receiver<OutcomeSlot>,
}

/// Registry of pending upstream fetches, keyed by cache key.
///
/// Cheap to clone; clones share the same registry.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    slots: Arc<DashMap<String, InFlightSlot>>,
    generations: Arc<AtomicU64>,
}

/// Role assigned by [`InFlightRegistry::join_or_register`]
#[derive(Debug)]
pub enum InFlight {
    Leader(InFlightGuard),
    Follower(InFlightWaiter),
}

impl InFlightRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the pending fetch for `key`, if there is one.
    pub fn get(&self, key: &str) -> Option<InFlightWaiter> {
        self.slots.get(key).map(|slot| InFlightWaiter {
            key: key.to_string(),
            receiver: slot.receiver.clone(),
        })
    }

    /// Atomically join the pending fetch for `key` or register a new one.
    pub fn join_or_register(&self, key: &str) -> InFlight {
        match self.slots.entry(key.to_string()) {
            Entry::Occupied(slot) => {
                debug!(key = %key, "Joining in-flight upstream fetch");
                InFlight::Follower(InFlightWaiter {
                    key: key.to_string(),
                    receiver: slot.get().receiver.clone(),
                })
            }
            Entry::Vacant(vacant) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let (sender, receiver) = watch::channel(None);
                vacant.insert(InFlightSlot {
                    generation,
                    receiver,
                });
                InFlight::Leader(InFlightGuard {
                    key: key.to_string(),
                    generation,
                    sender: Some(sender),
                    slots: Arc::clone(&self.slots),
                })
            }
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Forget every pending fetch. Already-joined followers keep waiting on their leader.
    pub fn clear(&self) {
        self.slots.clear();
    }
}

/// Leader's handle on a registered fetch.
///
/// Call [`complete`](Self::complete) with the outcome. Dropping the guard
/// without completing releases the key and fails every follower.
#[derive(Debug)]
pub struct InFlightGuard {
    key: String,
    generation: u64,
    sender: Option<watch::Sender<OutcomeSlot>>,
    slots: Arc<DashMap<String, InFlightSlot>>,
}

impl InFlightGuard {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// A waiter on this guard's own outcome
    pub fn waiter(&self) -> InFlightWaiter {
        let receiver = match &self.sender {
            Some(sender) => sender.subscribe(),
            None => watch::channel(None).1,
        };
        InFlightWaiter {
            key: self.key.clone(),
            receiver,
        }
    }

    /// Release the key and publish `outcome` to every follower.
    pub fn complete(mut self, outcome: FetchOutcome) {
        self.release();
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(outcome));
        }
    }

    fn release(&self) {
        let generation = self.generation;
        self.slots
            .remove_if(&self.key, |_, slot| slot.generation == generation);
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.sender.is_some() {
            warn!(key = %self.key, "In-flight fetch abandoned before completion");
            self.release();
        }
    }
}

/// Follower's handle on a pending fetch
#[derive(Debug)]
pub struct InFlightWaiter {
    key: String,
    receiver: watch::Receiver<OutcomeSlot>,
}

impl InFlightWaiter {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Wait for the leader's outcome.
    pub async fn wait(mut self) -> FetchOutcome {
        let outcome = match self.receiver.wait_for(Option::is_some).await {
            Ok(slot) => (*slot).clone(),
            Err(_) => None,
        };

        outcome.unwrap_or_else(|| {
            Err(GatewayError::internal(format!(
                "in-flight fetch for '{}' was abandoned",
                self.key
            )))
        })
    }
}
