use crate::capture::ResponseCapture;
use crate::error::ForwardError;
use crate::forward::Forwarder;
use crate::metrics;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use stash_cache::{CacheEntry, CacheStore};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// Freshness tag added to every response that went through the cache logic.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared application state passed to all handlers.
pub struct AppState {
    pub store: Arc<CacheStore>,
    pub forwarder: Arc<dyn Forwarder>,
    pub max_body_size: usize,
    /// Reported by `/api/stats`; the sweeper owns its own copy.
    pub sweep_interval: Duration,
}

pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/{*path}", any(proxy_handler))
        .route("/", any(proxy_handler))
        .with_state(state)
}

/// Cache key for a request: path plus query, without scheme or host.
pub fn cache_key(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string()
}

/// Main proxy handler. Serves fresh GET entries from the cache, forwards
/// everything else; GET misses are captured on the way back.
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Response<Body> {
    let start = Instant::now();

    if req.method() != Method::GET {
        metrics::record_bypass();
        tracing::debug!(method = %req.method(), uri = %req.uri(), "cache bypass");
        return forward(&state, req, None).await;
    }

    let key = cache_key(req.uri());
    let now = SystemTime::now();

    if let Some(entry) = state.store.lookup(&key) {
        if entry.is_fresh(now, state.store.ttl()) {
            metrics::record_hit();
            tracing::debug!(
                key = %key,
                latency_us = start.elapsed().as_micros(),
                "cache HIT"
            );
            return build_cached_response(&entry);
        }
        tracing::debug!(key = %key, "cached entry is stale, refetching");
    }

    metrics::record_miss();
    let capture = ResponseCapture::new(Arc::clone(&state.store), key, state.max_body_size);
    let response = forward(&state, req, Some(capture)).await;

    tracing::debug!(
        status = response.status().as_u16(),
        latency_us = start.elapsed().as_micros(),
        "cache MISS → upstream"
    );
    response
}

/// Run the forwarder on its own task so a client that goes away cannot
/// cancel a capture half way through.
async fn forward(
    state: &AppState,
    req: Request<Body>,
    capture: Option<ResponseCapture>,
) -> Response<Body> {
    let upstream = state.forwarder.forward(req, capture);

    match tokio::spawn(upstream).await {
        Ok(Ok(response)) => response,
        Ok(Err(ForwardError::Timeout(after))) => {
            tracing::error!(timeout_ms = after.as_millis(), "upstream timed out");
            gateway_error(StatusCode::GATEWAY_TIMEOUT)
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "upstream request failed");
            gateway_error(StatusCode::BAD_GATEWAY)
        }
        Err(e) => {
            tracing::error!(error = %e, "forwarding task failed");
            gateway_error(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Build an HTTP response from a cached entry.
fn build_cached_response(entry: &CacheEntry) -> Response<Body> {
    let mut response = Response::new(Body::from(entry.body.clone()));
    *response.status_mut() = entry.status;
    *response.headers_mut() = entry.header_map();
    response
        .headers_mut()
        .insert(X_CACHE, HeaderValue::from_static("HIT"));
    response
}

fn gateway_error(status: StatusCode) -> Response<Body> {
    let reason = status.canonical_reason().unwrap_or("Gateway Error");
    (status, reason).into_response()
}
