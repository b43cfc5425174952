//! Request pipeline middleware: rate limiting, preflights, request ids and
//! request logs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, OriginalUri, Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::info;
use uuid::Uuid;

use crate::ratelimit::{Admission, RequestDescriptor, RouteLimiter, RouteRules};

/// Response header carrying the request id.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Where the client address is read from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientAddrSource {
    /// The TCP peer address
    #[default]
    Peer,
    /// `X-Forwarded-For`, then `X-Real-IP`, then the peer address
    Forwarded,
}

impl ClientAddrSource {
    /// Pick the source from the `trust_forwarded_headers` setting.
    pub fn from_trust(trust_forwarded_headers: bool) -> Self {
        if trust_forwarded_headers {
            ClientAddrSource::Forwarded
        } else {
            ClientAddrSource::Peer
        }
    }

    /// Resolve the client address of `request`.
    pub fn resolve(&self, request: &Request) -> Option<IpAddr> {
        if *self == ClientAddrSource::Forwarded {
            let headers = request.headers();

            let forwarded = headers
                .get("x-forwarded-for")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .and_then(|ip| ip.trim().parse().ok());
            if forwarded.is_some() {
                return forwarded;
            }

            let real_ip = headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .and_then(|ip| ip.trim().parse().ok());
            if real_ip.is_some() {
                return real_ip;
            }
        }

        request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
    }
}

/// Per-group state for [`rate_limit`].
#[derive(Debug, Clone)]
pub struct RateLimitState {
    /// The group's limiter
    pub limiter: Arc<RouteLimiter>,
    /// How client addresses are resolved
    pub addr_source: ClientAddrSource,
}

/// Reject requests whose client has no tokens left in this group.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Response {
    let descriptor = RequestDescriptor::new(
        state.addr_source.resolve(&request),
        request.method().as_str(),
        &request_path(&request),
    );

    match state.limiter.check(&descriptor) {
        Admission::Allowed => next.run(request).await,
        Admission::Denied(body) => body.into_response(),
    }
}

/// Answer CORS preflights with `204 No Content`.
///
/// Mounted outside the CORS layer, which answers every `OPTIONS` request
/// with an empty `200` before routing.
pub async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;

    let mut response = next.run(request).await;
    if preflight && response.status() == StatusCode::OK {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// Request id assigned by [`request_id`], available as a request extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestId(pub String);

/// Tag each request with a fresh v4 UUID and echo it in `X-Request-Id`.
pub async fn request_id(mut request: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    request.extensions_mut().insert(RequestId(id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// State for [`request_log`].
#[derive(Debug, Clone)]
pub struct RequestLogState {
    /// Route groups, used to tag each log line with its group
    pub rules: Arc<RouteRules>,
    /// How client addresses are resolved
    pub addr_source: ClientAddrSource,
}

/// Log one line per request once the response is ready.
pub async fn request_log(
    State(state): State<RequestLogState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request_path(&request);
    let client_ip = state.addr_source.resolve(&request);
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|RequestId(id)| id.clone())
        .unwrap_or_default();
    let group = state
        .rules
        .find_group(&path)
        .map(|group| group.name.clone());

    let response = next.run(request).await;

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        client_ip = ?client_ip,
        request_id = %request_id,
        group = ?group,
        "Incoming request"
    );

    response
}

/// The path as sent by the client, before any router rewriting.
fn request_path(request: &Request) -> String {
    request
        .extensions()
        .get::<OriginalUri>()
        .map(|OriginalUri(uri)| uri.path().to_string())
        .unwrap_or_else(|| request.uri().path().to_string())
}
