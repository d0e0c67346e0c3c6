//! Rate limit key derivation.

use axum::http::HeaderMap;

/// Address used when no proxy header identifies the client.
pub const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// A key identifying who is calling which endpoint.
///
/// Authenticated callers are identified by user ID so that users sharing a
/// NAT address do not share a quota, and switching addresses does not reset
/// one. Anonymous callers are identified by client IP.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    /// User ID or client IP
    pub identity: String,
    /// Request path
    pub path: String,
}

impl RateLimitKey {
    /// Create a key, preferring a non-empty `user_id` over `client_ip`.
    pub fn new(client_ip: &str, path: &str, user_id: Option<&str>) -> Self {
        let identity = match user_id {
            Some(id) if !id.is_empty() => id,
            _ => client_ip,
        };

        Self {
            identity: identity.to_string(),
            path: path.to_string(),
        }
    }
}

impl std::fmt::Display for RateLimitKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rate:{}:{}", self.identity, self.path)
    }
}

/// Build the store key `rate:{identity}:{path}`.
pub fn get_rate_limit_key(client_ip: &str, path: &str, user_id: Option<&str>) -> String {
    RateLimitKey::new(client_ip, path, user_id).to_string()
}

/// Determine the client address from proxy headers.
///
/// Takes the first hop of `X-Forwarded-For`, then `X-Real-IP`, then falls
/// back to loopback. Only trustworthy behind a proxy that overwrites these
/// headers.
pub fn get_client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .unwrap_or(FALLBACK_CLIENT_IP)
        .to_string()
}
