use crate::error::CaptureError;
use crate::metrics;
use crate::proxy::X_CACHE;
use axum::body::{Body, BodyDataStream};
use axum::http::{HeaderValue, Response};
use bytes::{Bytes, BytesMut};
use futures_util::{stream, StreamExt};
use stash_cache::{CacheEntry, CacheStore};
use std::sync::Arc;
use std::time::SystemTime;

/// Fills the cache from one upstream GET response.
///
/// Consumed by [`capture`](Self::capture), so it runs at most once per
/// response.
pub struct ResponseCapture {
    store: Arc<CacheStore>,
    key: String,
    max_body_size: usize,
}

impl ResponseCapture {
    pub fn new(store: Arc<CacheStore>, key: String, max_body_size: usize) -> Self {
        Self {
            store,
            key,
            max_body_size,
        }
    }

    /// Buffer the body, store a new entry and tag the response `X-Cache: MISS`.
    ///
    /// If the body cannot be read in full (stream error or over the size
    /// limit) nothing is stored and the client gets the original stream:
    /// the bytes read so far followed by whatever the upstream body yields
    /// next.
    pub async fn capture(self, response: Response<Body>) -> Response<Body> {
        let (mut parts, body) = response.into_parts();
        let mut data = body.into_data_stream();
        let mut buf = BytesMut::new();

        match read_body(&mut data, &mut buf, self.max_body_size).await {
            Ok(()) => {
                let body = buf.freeze();
                // Snapshot before tagging so the cached copy never carries MISS.
                let entry = CacheEntry::new(
                    self.key.as_str(),
                    parts.status,
                    &parts.headers,
                    body.clone(),
                    SystemTime::now(),
                );
                let size = body.len();
                self.store.store(self.key.clone(), entry);
                metrics::record_store(self.store.len());

                tracing::debug!(
                    key = %self.key,
                    status = parts.status.as_u16(),
                    bytes = size,
                    "response captured"
                );

                parts.headers.insert(X_CACHE, HeaderValue::from_static("MISS"));
                Response::from_parts(parts, Body::from(body))
            }
            Err(CaptureError::TooLarge { limit }) => {
                metrics::record_capture_failure();
                tracing::warn!(key = %self.key, limit, "response too large to cache, relaying uncached");
                let replay = stream::iter([Ok(buf.freeze())]).chain(data);
                Response::from_parts(parts, Body::from_stream(replay))
            }
            Err(CaptureError::Body(e)) => {
                metrics::record_capture_failure();
                tracing::error!(key = %self.key, error = %e, "failed to capture response body");
                let replay = stream::iter([Ok(buf.freeze()), Err(e)]);
                Response::from_parts(parts, Body::from_stream(replay))
            }
        }
    }
}

/// Read the whole body into `buf`. On error `buf` keeps everything read so
/// far, including the chunk that crossed the limit.
async fn read_body(
    data: &mut BodyDataStream,
    buf: &mut BytesMut,
    limit: usize,
) -> Result<(), CaptureError> {
    while let Some(chunk) = data.next().await {
        let chunk: Bytes = chunk?;
        buf.extend_from_slice(&chunk);
        if buf.len() > limit {
            return Err(CaptureError::TooLarge { limit });
        }
    }
    Ok(())
}
