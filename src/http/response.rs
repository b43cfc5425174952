//! JSON response envelope shared by every endpoint.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message of the rate limit rejection body.
pub const RATE_LIMIT_MESSAGE: &str = "Rate limit exceeded";
/// Error text of the rate limit rejection body.
pub const RATE_LIMIT_ERROR: &str = "You have exceeded the rate limit. Please try again later.";

/// The response envelope.
///
/// Field order is part of the wire format and matches what existing clients
/// parse: `message`, `error`, `path`, `status`, `data`, `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// Human-readable summary
    pub message: String,
    /// Error detail, `null` on success
    pub error: Option<Value>,
    /// Request path
    pub path: String,
    /// HTTP status code
    pub status: u16,
    /// Payload, `null` on error
    pub data: Option<Value>,
    /// When the response was produced (RFC 3339)
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    /// Build a success envelope.
    pub fn success(status: StatusCode, message: &str, path: &str, data: Value) -> Self {
        Self {
            message: message.to_string(),
            error: None,
            path: path.to_string(),
            status: status.as_u16(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }

    /// Build an error envelope.
    pub fn error(status: StatusCode, message: &str, error: &str, path: &str) -> Self {
        Self {
            message: message.to_string(),
            error: Some(Value::String(error.to_string())),
            path: path.to_string(),
            status: status.as_u16(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// The 429 body returned when a client exceeds its rate limit.
    pub fn rate_limited(path: &str) -> Self {
        Self::error(
            StatusCode::TOO_MANY_REQUESTS,
            RATE_LIMIT_MESSAGE,
            RATE_LIMIT_ERROR,
            path,
        )
    }

    /// The 404 body for unknown routes.
    pub fn not_found(path: &str) -> Self {
        Self::error(
            StatusCode::NOT_FOUND,
            "Not Found",
            "The requested resource was not found",
            path,
        )
    }

    /// The 405 body for known paths hit with an unsupported method.
    pub fn method_not_allowed(path: &str) -> Self {
        Self::error(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method Not Allowed",
            "The requested method is not allowed for this resource",
            path,
        )
    }

    /// The status as a `StatusCode`.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}
