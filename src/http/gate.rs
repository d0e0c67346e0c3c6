//! Rate limit middleware for protected routes.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{debug, info};

use crate::ratelimit::{
    get_client_ip, get_rate_limit_key, CounterStore, MemoryStore, RateLimitConfig,
    RateLimitResult, RateLimiter, RouteClass,
};

/// The authenticated caller, inserted into request extensions by an upstream
/// authentication layer. Requests without it are limited per client IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

/// A rate limiter bound to one route class.
pub struct RouteGate<S: CounterStore = MemoryStore> {
    limiter: Arc<RateLimiter<S>>,
    class: RouteClass,
    config: RateLimitConfig,
}

impl<S: CounterStore> Clone for RouteGate<S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            class: self.class,
            config: self.config,
        }
    }
}

impl<S: CounterStore> RouteGate<S> {
    pub fn new(limiter: Arc<RateLimiter<S>>, class: RouteClass, config: RateLimitConfig) -> Self {
        Self {
            limiter,
            class,
            config,
        }
    }

    /// The counter key for a request: user ID if authenticated, otherwise
    /// client IP, scoped to the request path.
    pub fn key_for(&self, request: &Request) -> String {
        let user_id = request
            .extensions()
            .get::<AuthenticatedUser>()
            .map(|user| user.0.as_str());
        let client_ip = get_client_ip(request.headers());
        get_rate_limit_key(&client_ip, request.uri().path(), user_id)
    }

    pub async fn check(&self, key: &str) -> RateLimitResult {
        self.limiter.check_rate_limit(key, &self.config).await
    }
}

/// Middleware entry point; install with `axum::middleware::from_fn_with_state`.
///
/// Denied requests get a 429 and never reach the handler. Allowed requests
/// get the rate limit headers added to the handler's response.
pub async fn enforce<S: CounterStore + 'static>(
    State(gate): State<RouteGate<S>>,
    request: Request,
    next: Next,
) -> Response {
    let key = gate.key_for(&request);
    let result = gate.check(&key).await;

    if !result.allowed {
        info!(
            class = %gate.class,
            key = %key,
            retry_after = ?result.retry_after(),
            "Request rate limited"
        );
        return too_many_requests(&result);
    }

    let mut response = next.run(request).await;
    apply_headers(response.headers_mut(), &result.headers);
    response
}

/// The 429 response for a denied request.
pub fn too_many_requests(result: &RateLimitResult) -> Response {
    let body = json!({
        "error": "Too many requests",
        "retryAfter": result.retry_after(),
    });
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    apply_headers(response.headers_mut(), &result.headers);
    response
}

fn apply_headers(target: &mut HeaderMap, headers: &BTreeMap<String, String>) {
    for (name, value) in headers {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                target.insert(name, value);
            }
            _ => debug!(header = %name, "Skipping unrepresentable rate limit header"),
        }
    }
}
