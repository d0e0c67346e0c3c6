//! TTL cache that stores values as fixed-size chunks.
//!
//! A cached value is a manifest (chunk count, length, expiry) plus its
//! chunks. Both live in the same map slot, so a writer replaces the whole
//! value under one shard lock and readers never see chunks from two
//! different writes. A value whose manifest has expired or whose chunks do
//! not add up is treated as missing.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::clock::Clock;
use crate::error::{GatekeeperError, Result};

/// Bookkeeping for one cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Manifest {
    chunk_count: usize,
    total_len: usize,
    expires_at: u64,
}

impl Manifest {
    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.expires_at
    }
}

#[derive(Debug, Clone)]
struct CachedValue {
    manifest: Manifest,
    chunks: Vec<Vec<u8>>,
}

impl CachedValue {
    /// Reassemble the value, or `None` if the chunks disagree with the manifest.
    fn assemble(&self) -> Option<Vec<u8>> {
        if self.chunks.len() != self.manifest.chunk_count {
            return None;
        }
        let value = self.chunks.concat();
        (value.len() == self.manifest.total_len).then_some(value)
    }
}

/// A chunked TTL cache held in memory.
pub struct ChunkedCache {
    entries: DashMap<String, CachedValue>,
    chunk_size: usize,
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ChunkedCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkedCache")
            .field("entries", &self.entries.len())
            .field("chunk_size", &self.chunk_size)
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl ChunkedCache {
    /// Create a cache. A `chunk_size` of zero is treated as one byte.
    pub fn new(chunk_size: usize, default_ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            chunk_size: chunk_size.max(1),
            default_ttl,
            clock,
        }
    }

    /// Store `value` under `key`, replacing any previous value in one step.
    /// A zero `ttl` uses the default TTL.
    pub fn set(&self, key: &str, value: &[u8], ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let expires_at = self.clock.now_ms().saturating_add(ttl_ms);

        let chunks: Vec<Vec<u8>> = value.chunks(self.chunk_size).map(<[u8]>::to_vec).collect();
        let manifest = Manifest {
            chunk_count: chunks.len(),
            total_len: value.len(),
            expires_at,
        };

        trace!(key = %key, chunks = chunks.len(), bytes = value.len(), "Cached value");
        self.entries
            .insert(key.to_string(), CachedValue { manifest, chunks });
    }

    /// Fetch the value for `key`, reassembled from its chunks.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        let now = self.clock.now_ms();

        let (manifest, assembled) = {
            let slot = self.entries.get(key)?;
            if slot.manifest.is_expired(now) {
                (slot.manifest, None)
            } else {
                (slot.manifest, Some(slot.assemble()))
            }
        };

        match assembled {
            Some(Some(value)) => Some(value),
            None => {
                trace!(key = %key, "Cached value expired");
                self.discard(key, manifest);
                None
            }
            Some(None) => {
                warn!(key = %key, "Cached value is damaged, discarding");
                self.discard(key, manifest);
                None
            }
        }
    }

    /// Remove `key` only if it still holds the value described by `manifest`,
    /// so a value written after the read is left alone.
    fn discard(&self, key: &str, manifest: Manifest) {
        self.entries.remove_if(key, |_, slot| slot.manifest == manifest);
    }

    /// Serialize `value` as JSON and store it.
    pub fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| GatekeeperError::Cache(format!("failed to encode '{}': {}", key, e)))?;
        self.set(key, &bytes, ttl);
        Ok(())
    }

    /// Fetch and decode a JSON value. Undecodable entries are discarded.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Cached value is not valid JSON, discarding");
                self.delete(key);
                None
            }
        }
    }

    /// Remove a value and all of its chunks.
    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Remove every expired value. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, slot| !slot.manifest.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed = removed, "Purged expired cache entries");
        }
        removed
    }

    /// Number of cached values.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored chunks across all values.
    pub fn chunk_count(&self) -> usize {
        self.entries.iter().map(|slot| slot.chunks.len()).sum()
    }
}

/// Periodically purge expired values from `cache`.
///
/// Abort the returned handle to stop the sweeper.
pub fn spawn_sweeper(cache: Arc<ChunkedCache>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            cache.purge_expired();
        }
    })
}
