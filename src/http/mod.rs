//! HTTP edge: route groups, admission middleware and the response envelope.

mod headers;
mod middleware;
mod response;
mod router;
mod server;

pub use headers::{
    cors_layer, with_security_headers, CORS_ALLOWED_ORIGIN, CORS_MAX_AGE, SECURITY_HEADERS,
};
pub use middleware::{
    preflight_no_content, rate_limit, request_id, request_log, ClientAddrSource,
    RateLimitState, RequestId, RequestLogState, REQUEST_ID_HEADER,
};
pub use response::{ApiResponse, RATE_LIMIT_ERROR, RATE_LIMIT_MESSAGE};
pub use router::{RouteGroup, RouteGroups};
pub use server::HttpServer;
