//! Gateway error types with HTTP status code mapping.
//!
//! [`GatewayError`] is the central error type for the gateway. Each variant
//! maps to a specific HTTP status code and structured JSON error response.
//! Per-connection delivery problems live in
//! [`crate::ws::broadcast::DeliveryError`] and never reach a producer.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::persistence::StoreError;

/// Structured JSON error response body.
///
/// All non-ingestion error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 1001,
///     "message": "invalid request: city: city is required",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code (see code ranges on [`GatewayError`]).
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category        | HTTP Status                   |
/// |-----------|-----------------|-------------------------------|
/// | 1000–1999 | Validation      | 400 Bad Request               |
/// | 2000–2999 | Resource        | 401 / 403 / 404 / 409         |
/// | 429       | Rate limiting   | 429 Too Many Requests         |
/// | 3000–3999 | Server          | 500 / 503                     |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed or out-of-range input. Raised before any side effect.
    #[error("invalid request: {0}")]
    Validation(String),

    /// A required caller identity (the device id header) is missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The caller may not act on the resource.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The resource already exists under another identifier.
    #[error("conflict: {message}")]
    Conflict {
        /// What collided.
        message: String,
        /// Identifier of the existing resource.
        existing_id: Option<String>,
    },

    /// The caller's scope exhausted its quota for the current window.
    #[error("rate limit exceeded; retry after {retry_after_secs} s")]
    RateLimited {
        /// Requests left in the window (always 0 when rejected).
        remaining: u32,
        /// Seconds until the window rolls over.
        retry_after_secs: u64,
    },

    /// The durable store could not be reached or timed out.
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::Validation(_) => 1001,
            Self::Unauthorized(_) => 2001,
            Self::Forbidden(_) => 2003,
            Self::NotFound(_) => 2004,
            Self::Conflict { .. } => 2009,
            Self::RateLimited { .. } => 429,
            Self::StoreUnavailable(_) => 3001,
            Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Rate-limit response headers (`X-RateLimit-Remaining`, `Retry-After`),
    /// empty for every other variant.
    #[must_use]
    pub fn rate_limit_headers(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::RateLimited {
                remaining,
                retry_after_secs,
            } => vec![
                ("x-ratelimit-remaining", remaining.to_string()),
                ("retry-after", retry_after_secs.to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let headers = self.rate_limit_headers();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: match &self {
                    Self::Conflict { existing_id, .. } => existing_id.clone(),
                    _ => None,
                },
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        for (name, value) in headers {
            if let Ok(value) = value.parse::<HeaderValue>() {
                response.headers_mut().insert(name, value);
            }
        }
        response
    }
}
