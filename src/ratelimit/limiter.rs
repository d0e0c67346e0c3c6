//! Fixed-window rate limiting policy.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::headers::{rate_limit_headers, retry_after_secs};
use super::rules::RateLimitConfig;
use super::store::{CounterStore, MemoryStore};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// The outcome of a single rate limit evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitResult {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends (ms since epoch)
    pub reset_at: u64,
    /// Response headers describing the decision
    pub headers: BTreeMap<String, String>,
}

impl RateLimitResult {
    /// Seconds the client should wait, present only for denied requests.
    pub fn retry_after(&self) -> Option<u64> {
        self.headers
            .get(super::headers::RETRY_AFTER_HEADER)
            .and_then(|value| value.parse().ok())
    }
}

/// Applies the fixed-window policy against a counter store.
///
/// Each limiter owns its store, so tests can construct isolated limiters
/// instead of sharing process-wide state.
pub struct RateLimiter<S: CounterStore = MemoryStore> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter<MemoryStore> {
    /// Create a rate limiter with an in-process store and the system clock.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), Arc::new(SystemClock))
    }
}

impl Default for RateLimiter<MemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: CounterStore> RateLimiter<S> {
    pub fn with_store(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub(crate) fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Count one request against `key` and decide whether it is allowed.
    ///
    /// Denial is an ordinary result. If the store fails, the request is
    /// allowed and the failure is logged.
    pub async fn check_rate_limit(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        let now = self.clock.now_ms();
        // Denied requests past the first are not counted.
        let ceiling = config.max_requests.saturating_add(1);

        trace!(key = %key, limit = config.max_requests, window_ms = config.window_ms, "Checking rate limit");

        let entry = match self
            .store
            .set_or_increment(key, config.window_ms, now, ceiling)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store failed, allowing request");
                let reset_at = now.saturating_add(config.window_ms);
                return RateLimitResult {
                    allowed: true,
                    remaining: config.max_requests,
                    reset_at,
                    headers: rate_limit_headers(config.max_requests, config.max_requests, reset_at, None),
                };
            }
        };

        let allowed = entry.count <= config.max_requests;
        let remaining = if allowed {
            config.max_requests - entry.count
        } else {
            0
        };
        let reset_at = entry.window_start.saturating_add(config.window_ms);

        let retry_after = if allowed {
            None
        } else {
            debug!(
                key = %key,
                count = entry.count,
                limit = config.max_requests,
                "Rate limit exceeded"
            );
            Some(retry_after_secs(reset_at, now))
        };

        RateLimitResult {
            allowed,
            remaining,
            reset_at,
            headers: rate_limit_headers(config.max_requests, remaining, reset_at, retry_after),
        }
    }

    /// Forget the counter for one key.
    ///
    /// For tests and administrative cache clearing; not routed over HTTP.
    pub async fn reset_rate_limit(&self, key: &str) -> Result<()> {
        self.store.reset(key).await?;
        Ok(())
    }

    /// Forget every counter.
    ///
    /// Test utility; must not run while requests are being served.
    pub async fn clear_all_rate_limits(&self) -> Result<()> {
        self.store.clear_all().await?;
        Ok(())
    }
}
