//! HTTP front end for the offline cache
//!
//! Provides /health and /caches; every other GET or HEAD is dispatched as a
//! fetch event against the scope URL.

use crate::error::{OfflineError, Result};
use crate::host::WorkerHost;
use crate::lifecycle::FetchSource;
use crate::types::HealthResponse;
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use generation_cache::{CachedResponse, RequestKey};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use url::Url;

/// Shared state for the HTTP server
pub struct ServerState {
    pub host: WorkerHost,
    /// Scope URL incoming paths are resolved against
    pub origin: Url,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(host: WorkerHost, origin: Url) -> Self {
        Self {
            host,
            origin,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct CachesResponse {
    current: String,
    caches: Vec<String>,
}

/// Headers that describe the upstream connection rather than the payload
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "keep-alive",
    "transfer-encoding",
    "upgrade",
];

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/caches", get(list_caches))
        .fallback(handle_fetch)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let cache = state.host.handler().storage().stats().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache_name: state.host.handler().cache_name().to_string(),
        worker_state: state.host.state().await,
        cache,
    })
}

/// List existing cache generations
async fn list_caches(State(state): State<SharedState>) -> Response {
    match state.host.handler().storage().keys().await {
        Ok(caches) => Json(CachesResponse {
            current: state.host.handler().cache_name().to_string(),
            caches,
        })
        .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// Dispatch a fetch event for any other path
async fn handle_fetch(State(state): State<SharedState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed");
    }

    let request = match request_key(&state.origin, &method, &uri) {
        Ok(request) => request,
        Err(e) => {
            warn!(uri = %uri, error = %e, "Rejected request");
            return error_response(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    match state.host.fetch(&request).await {
        Ok(outcome) => {
            let cache_header = match outcome.source {
                FetchSource::Cache => "HIT",
                FetchSource::Network => "MISS",
            };
            snapshot_response(outcome.response, cache_header)
        }
        Err(e @ OfflineError::InvalidState { .. }) => {
            warn!(request = %request, error = %e, "Fetch before activation");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            warn!(request = %request, error = %e, "Network request failed");
            error_response(StatusCode::BAD_GATEWAY, e.to_string())
        }
    }
}

/// Map an incoming path and query onto the scope URL. Anything that
/// resolves outside the scope (another host, or above the scope path) is
/// rejected.
fn request_key(origin: &Url, method: &Method, uri: &Uri) -> Result<RequestKey> {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .trim_start_matches('/');
    let url = origin
        .join(path)
        .map_err(|e| OfflineError::InvalidRequest(e.to_string()))?;

    let same_origin = url.scheme() == origin.scheme()
        && url.host_str() == origin.host_str()
        && url.port_or_known_default() == origin.port_or_known_default();
    if !same_origin || !url.path().starts_with(origin.path()) {
        return Err(OfflineError::InvalidRequest(format!(
            "{} is outside {}",
            url, origin
        )));
    }

    Ok(RequestKey::new(method.as_str(), &url))
}

fn snapshot_response(snapshot: CachedResponse, cache_header: &'static str) -> Response {
    let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::BAD_GATEWAY);

    let mut headers = HeaderMap::new();
    for (name, value) in &snapshot.headers {
        if HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h)) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    headers.insert("x-cache", HeaderValue::from_static(cache_header));
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
    }

    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}
