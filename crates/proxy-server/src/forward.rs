use crate::capture::ResponseCapture;
use crate::config::Upstream;
use crate::error::ForwardError;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Request, Response, Version};
use futures_util::future::BoxFuture;
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::net::SocketAddr;
use std::time::Duration;

pub type HttpClient = Client<HttpConnector, Body>;

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const KEEP_ALIVE: HeaderName = HeaderName::from_static("keep-alive");
const PROXY_CONNECTION: HeaderName = HeaderName::from_static("proxy-connection");

/// Headers that describe a single connection and are never relayed.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    KEEP_ALIVE,
    PROXY_CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Performs the upstream exchange for a request.
///
/// When `capture` is set, the implementation must hand the upstream response
/// to [`ResponseCapture::capture`] and return what it gives back, so the cache
/// is filled before the response reaches the client.
pub trait Forwarder: Send + Sync + 'static {
    fn forward(
        &self,
        req: Request<Body>,
        capture: Option<ResponseCapture>,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>>;
}

/// Reverse proxy to a single plain-HTTP upstream.
#[derive(Clone)]
pub struct HyperForwarder {
    client: HttpClient,
    upstream: Upstream,
    timeout: Duration,
}

impl HyperForwarder {
    pub fn new(upstream: Upstream, timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            upstream,
            timeout,
        }
    }

    /// Point the request at the upstream and rewrite proxy headers.
    fn upstream_request(&self, req: Request<Body>) -> Result<Request<Body>, ForwardError> {
        let (mut parts, body) = req.into_parts();

        let upstream_uri = format!(
            "{}{}",
            self.upstream.base_url,
            parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
        );
        parts.uri = upstream_uri
            .parse::<axum::http::Uri>()
            .map_err(axum::http::Error::from)?;
        parts.version = Version::HTTP_11;

        strip_hop_by_hop(&mut parts.headers);
        parts
            .headers
            .insert(header::HOST, self.upstream.authority.clone());

        // Never trust a client-supplied chain; the upstream sees our peer only.
        parts.headers.remove(&X_FORWARDED_FOR);
        if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
            if let Ok(ip) = HeaderValue::from_str(&peer.ip().to_string()) {
                parts.headers.insert(X_FORWARDED_FOR, ip);
            }
        }

        Ok(Request::from_parts(parts, body))
    }
}

impl Forwarder for HyperForwarder {
    fn forward(
        &self,
        req: Request<Body>,
        capture: Option<ResponseCapture>,
    ) -> BoxFuture<'static, Result<Response<Body>, ForwardError>> {
        let prepared = self.upstream_request(req);
        let client = self.client.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let upstream_req = prepared?;
            let upstream_uri = upstream_req.uri().clone();

            let upstream_resp: Response<Incoming> =
                tokio::time::timeout(timeout, client.request(upstream_req))
                    .await
                    .map_err(|_| ForwardError::Timeout(timeout))??;

            let (mut parts, incoming) = upstream_resp.into_parts();
            strip_hop_by_hop(&mut parts.headers);

            tracing::debug!(
                upstream = %upstream_uri,
                status = parts.status.as_u16(),
                "upstream responded"
            );

            let response = Response::from_parts(parts, Body::new(incoming));
            Ok(match capture {
                Some(capture) => capture.capture(response).await,
                None => response,
            })
        })
    }
}

/// Remove hop-by-hop headers, including any named by `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}
