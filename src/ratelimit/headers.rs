//! Rate limit response headers.

use std::collections::BTreeMap;

pub const LIMIT_HEADER: &str = "X-RateLimit-Limit";
pub const REMAINING_HEADER: &str = "X-RateLimit-Remaining";
/// Reset time as whole seconds since the Unix epoch, rounded up.
pub const RESET_HEADER: &str = "X-RateLimit-Reset";
pub const RETRY_AFTER_HEADER: &str = "Retry-After";

/// Whole seconds from `now_ms` until `reset_at_ms`, rounded up, at least 1.
pub fn retry_after_secs(reset_at_ms: u64, now_ms: u64) -> u64 {
    reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
}

/// Render a rate limit decision into response headers.
///
/// `Retry-After` is only emitted for denied requests.
pub fn rate_limit_headers(
    limit: u64,
    remaining: u64,
    reset_at_ms: u64,
    retry_after: Option<u64>,
) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert(LIMIT_HEADER.to_string(), limit.to_string());
    headers.insert(REMAINING_HEADER.to_string(), remaining.to_string());
    headers.insert(RESET_HEADER.to_string(), reset_at_ms.div_ceil(1000).to_string());
    if let Some(secs) = retry_after {
        headers.insert(RETRY_AFTER_HEADER.to_string(), secs.to_string());
    }
    headers
}
