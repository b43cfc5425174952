//! Security and CORS response headers applied at the edge of the service.

use std::time::Duration;

use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::Method;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;

/// Origin allowed to make credentialed cross-origin requests.
pub const CORS_ALLOWED_ORIGIN: &str = "http://localhost";

/// How long browsers may cache a preflight answer.
pub const CORS_MAX_AGE: Duration = Duration::from_secs(86_400);

/// Headers stamped on every response.
pub const SECURITY_HEADERS: [(&str, &str); 6] = [
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("x-xss-protection", "1; mode=block"),
    (
        "strict-transport-security",
        "max-age=31536000; includeSubDomains; preload",
    ),
    ("referrer-policy", "no-referrer"),
    ("permissions-policy", "geolocation=(self), microphone=()"),
];

const CORS_ALLOWED_HEADERS: [&str; 8] = [
    "x-requested-with",
    "content-type",
    "origin",
    "authorization",
    "accept",
    "client-security-token",
    "accept-encoding",
    "x-access-token",
];

/// Wrap `router` so every response carries [`SECURITY_HEADERS`].
///
/// Values set by handlers are overridden.
pub fn with_security_headers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    SECURITY_HEADERS
        .iter()
        .fold(router, |router, &(name, value)| {
            router.layer(SetResponseHeaderLayer::overriding(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
}

/// CORS policy for browser clients.
///
/// The layer answers every `OPTIONS` request itself, so preflights never
/// reach a route group or its limiter.
pub fn cors_layer() -> CorsLayer {
    // UPDATE is not a standard method but existing clients announce it.
    let methods: Vec<Method> = [
        Method::POST,
        Method::GET,
        Method::OPTIONS,
        Method::PUT,
        Method::DELETE,
    ]
    .into_iter()
    .chain(Method::from_bytes(b"UPDATE").ok())
    .collect();

    let headers: Vec<HeaderName> = CORS_ALLOWED_HEADERS
        .iter()
        .map(|&name| HeaderName::from_static(name))
        .collect();

    CorsLayer::new()
        .allow_origin(HeaderValue::from_static(CORS_ALLOWED_ORIGIN))
        .allow_methods(methods)
        .allow_headers(headers)
        .expose_headers([header::CONTENT_LENGTH])
        .allow_credentials(true)
        .max_age(CORS_MAX_AGE)
}
