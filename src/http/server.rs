//! HTTP server and router construction.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::gate::{enforce, RouteGate};
use super::routes::{self, AppState};
use crate::error::{GatekeeperError, Result};
use crate::ratelimit::{CounterStore, RateLimiter, RouteClass, RoutePolicies};

/// Build the API router with every protected route behind its gate.
///
/// Route classes are resolved to limits here, once, rather than per request.
pub fn build_router<S: CounterStore + 'static>(
    limiter: Arc<RateLimiter<S>>,
    policies: &RoutePolicies,
    state: AppState,
) -> Router {
    let gate = |class: RouteClass| {
        from_fn_with_state(
            RouteGate::new(limiter.clone(), class, policies.get(class)),
            enforce::<S>,
        )
    };

    Router::new()
        .route("/health", get(routes::health))
        .route(
            "/api/auth/signin",
            post(routes::sign_in).route_layer(gate(RouteClass::Auth)),
        )
        .route(
            "/api/case-studies",
            get(routes::list_case_studies).route_layer(gate(RouteClass::Api)),
        )
        .route(
            "/api/upload",
            post(routes::upload).route_layer(gate(RouteClass::Upload)),
        )
        .route(
            "/api/search",
            get(routes::search).route_layer(gate(RouteClass::Search)),
        )
        .route(
            "/api/export/{id}",
            get(routes::export).route_layer(gate(RouteClass::Export)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// HTTP server for the gated API.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Serve until `signal` resolves, then drain in-flight requests.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            GatekeeperError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatekeeperError::Io(e)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ChunkedCache;
    use crate::clock::ManualClock;
    use crate::http::gate::AuthenticatedUser;
    use crate::ratelimit::{MemoryStore, RateLimitConfig};
    use axum::body::Body;
    use axum::extract::Request;
    use axum::http::StatusCode;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let limiter = Arc::new(RateLimiter::with_store(
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));
        let cache = Arc::new(ChunkedCache::new(16, Duration::from_secs(60), clock.clone()));
        let mut policies = RoutePolicies::default();
        policies.search = RateLimitConfig::new(2, 60_000);

        let app = build_router(limiter, &policies, AppState::new(cache, Duration::ZERO));
        (app, clock)
    }

    fn post_request(uri: &str) -> Request {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("x-real-ip", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    }

    fn get_request(uri: &str) -> Request {
        Request::builder()
            .uri(uri)
            .header("x-real-ip", "203.0.113.9")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_is_not_rate_limited() {
        let (app, _) = test_app();

        for _ in 0..20 {
            let response = app.clone().oneshot(get_request("/health")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert!(!response.headers().contains_key("x-ratelimit-limit"));
        }
    }

    #[tokio::test]
    async fn test_auth_route_uses_auth_policy() {
        let (app, _) = test_app();

        for remaining in (0..5).rev() {
            let response = app.clone().oneshot(post_request("/api/auth/signin")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(response.headers()["x-ratelimit-limit"], "5");
            assert_eq!(response.headers()["x-ratelimit-remaining"], remaining.to_string().as_str());
        }

        let response = app.clone().oneshot(post_request("/api/auth/signin")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().contains_key("retry-after"));
    }

    #[tokio::test]
    async fn test_route_classes_have_independent_counters() {
        let (app, _) = test_app();

        for _ in 0..5 {
            app.clone().oneshot(post_request("/api/auth/signin")).await.unwrap();
        }

        let response = app.clone().oneshot(get_request("/api/case-studies")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "100");
    }

    #[tokio::test]
    async fn test_quota_returns_after_window() {
        let (app, clock) = test_app();

        app.clone().oneshot(get_request("/api/search?q=pump")).await.unwrap();
        app.clone().oneshot(get_request("/api/search?q=pump")).await.unwrap();
        let denied = app.clone().oneshot(get_request("/api/search?q=pump")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);

        clock.advance(Duration::from_secs(60));

        let response = app.clone().oneshot(get_request("/api/search?q=pump")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "1");
    }

    #[tokio::test]
    async fn test_upload_reports_size() {
        let (app, _) = test_app();

        let mut request = post_request("/api/upload");
        *request.body_mut() = Body::from(vec![0u8; 1234]);
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["received"], 1234);
    }

    #[tokio::test]
    async fn test_export_served_from_cache() {
        let (app, _) = test_app();

        let first = app.clone().oneshot(get_request("/api/export/cs-1")).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers()[routes::CACHE_STATUS_HEADER], "miss");
        let first_body = axum::body::to_bytes(first.into_body(), usize::MAX)
            .await
            .unwrap();

        let second = app.clone().oneshot(get_request("/api/export/cs-1")).await.unwrap();
        assert_eq!(second.headers()[routes::CACHE_STATUS_HEADER], "hit");
        let second_body = axum::body::to_bytes(second.into_body(), usize::MAX)
            .await
            .unwrap();

        assert_eq!(first_body, second_body);
    }

    #[tokio::test]
    async fn test_export_limit_applies_per_user() {
        let (app, _) = test_app();

        for _ in 0..5 {
            let mut request = get_request("/api/export/cs-2");
            request.extensions_mut().insert(AuthenticatedUser("alice".to_string()));
            assert_eq!(app.clone().oneshot(request).await.unwrap().status(), StatusCode::OK);
        }

        let mut request = get_request("/api/export/cs-2");
        request.extensions_mut().insert(AuthenticatedUser("alice".to_string()));
        assert_eq!(
            app.clone().oneshot(request).await.unwrap().status(),
            StatusCode::TOO_MANY_REQUESTS
        );

        // Anonymous traffic from the same address has its own quota
        let response = app.clone().oneshot(get_request("/api/export/cs-2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let (app, _) = test_app();
        let _server = HttpServer::new(addr, app);
    }
}
