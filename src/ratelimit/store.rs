//! Counter storage for rate limit entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::counter::RateLimitEntry;
use crate::clock::Clock;

/// Errors a counter store can report.
///
/// The in-process store never produces these; they exist for stores that
/// live behind a network connection.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Trait for counter store implementations.
///
/// Implementations must make `set_or_increment` atomic per key: two
/// concurrent calls for the same key must never both observe the
/// pre-increment count.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Look up the entry for `key`, expired or not.
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError>;

    /// Count one request against `key` and return the updated entry.
    ///
    /// A missing or expired entry is replaced by a fresh window starting at
    /// `now_ms` with a count of one. Otherwise the count is incremented in
    /// place, saturating at `ceiling`.
    async fn set_or_increment(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
        ceiling: u64,
    ) -> Result<RateLimitEntry, StoreError>;

    /// Delete the entry for `key`.
    async fn reset(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every entry.
    async fn clear_all(&self) -> Result<(), StoreError>;
}

/// In-process counter store.
///
/// Counters are local to this process; separate instances of the service do
/// not share them.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, RateLimitEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose window has elapsed at `now_ms`.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now_ms));
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitEntry>, StoreError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set_or_increment(
        &self,
        key: &str,
        window_ms: u64,
        now_ms: u64,
        ceiling: u64,
    ) -> Result<RateLimitEntry, StoreError> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let entry = match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now_ms) {
                    trace!(key = %key, "Window elapsed, starting a new one");
                    entry.restart(window_ms, now_ms);
                } else {
                    entry.increment(ceiling);
                }
                entry.clone()
            }
            Entry::Vacant(vacant) => {
                debug!(key = %key, window_ms = window_ms, "Creating new rate limit counter");
                vacant
                    .insert(RateLimitEntry::new(key, window_ms, now_ms))
                    .value()
                    .clone()
            }
        };
        Ok(entry)
    }

    async fn reset(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        self.entries.clear();
        Ok(())
    }
}

/// Periodically purge expired counters from `store`.
///
/// Without this, a store that sees many distinct client addresses grows
/// without bound. Abort the returned handle to stop the sweeper.
pub fn spawn_sweeper(
    store: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = store.purge_expired(clock.now_ms());
            if removed > 0 {
                debug!(
                    removed = removed,
                    remaining = store.len(),
                    "Purged expired rate limit counters"
                );
            }
        }
    })
}
