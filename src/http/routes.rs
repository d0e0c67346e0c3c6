//! API route handlers.
//!
//! Each protected route belongs to a route class and is wrapped in a
//! [`RouteGate`](super::RouteGate) by the router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::cache::ChunkedCache;

/// Header reporting whether an export was served from cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// State shared by the route handlers.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ChunkedCache>,
    pub cache_ttl: Duration,
}

impl AppState {
    pub fn new(cache: Arc<ChunkedCache>, cache_ttl: Duration) -> Self {
        Self { cache, cache_ttl }
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn sign_in() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn list_case_studies() -> Json<Value> {
    Json(json!({ "items": [] }))
}

pub async fn upload(body: Bytes) -> (StatusCode, Json<Value>) {
    debug!(bytes = body.len(), "Received upload");
    (StatusCode::CREATED, Json(json!({ "received": body.len() })))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

pub async fn search(Query(params): Query<SearchParams>) -> Json<Value> {
    Json(json!({ "query": params.q, "results": [] }))
}

/// A rendered case study export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub id: String,
    pub generated_at: String,
    pub format: String,
}

impl ExportDocument {
    fn render(id: &str) -> Self {
        Self {
            id: id.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            format: "pdf".to_string(),
        }
    }
}

/// Render an export, reusing a cached rendering while it is fresh.
pub async fn export(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let cache_key = format!("export:{}", id);

    if let Some(document) = state.cache.get_json::<ExportDocument>(&cache_key) {
        return with_cache_status(Json(document).into_response(), "hit");
    }

    let document = ExportDocument::render(&id);
    if let Err(e) = state.cache.set_json(&cache_key, &document, state.cache_ttl) {
        warn!(key = %cache_key, error = %e, "Failed to cache export");
    }
    with_cache_status(Json(document).into_response(), "miss")
}

fn with_cache_status(mut response: Response, status: &'static str) -> Response {
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status));
    response
}
