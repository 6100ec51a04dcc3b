//! Uniform error payload for every failed request.
//!
//! All user-visible failures share one JSON shape:
//!
//! ```json
//! {
//!   "error": "at least 2 numbers are required, got 1",
//!   "code": "VALIDATION_ERROR",
//!   "details": {"numbers": "at least 2 numbers are required, got 1"},
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "request_id": "0190b6f1-...",
//!   "path": "/api/v1/sum"
//! }
//! ```

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sumapi_lib::Error as LibError;

/// Message returned for internal faults; the fault itself is never exposed.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal server error";

/// Machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The body could not be decoded into the expected shape.
    InvalidRequestBody,
    /// The body decoded but violates an input rule.
    ValidationError,
    /// An unexpected fault was caught by the recovery boundary.
    InternalServerError,
}

impl ErrorCode {
    /// HTTP status served with this code.
    pub fn status(self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequestBody | ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidRequestBody => "INVALID_REQUEST_BODY",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Standard error response body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable message.
    pub error: String,

    pub code: ErrorCode,

    /// Per-field messages, when the failure can be attributed to fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, String>>,

    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,

    /// Path of the request that failed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
}

impl ErrorResponse {
    pub fn new(
        error: impl Into<String>,
        code: ErrorCode,
        path: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
            timestamp: Utc::now(),
            request_id: request_id.into(),
            path: path.into(),
        }
    }

    /// Attach a message for one request field.
    pub fn with_detail(mut self, field: impl Into<String>, message: impl Into<String>) -> Self {
        self.details
            .get_or_insert_with(BTreeMap::new)
            .insert(field.into(), message.into());
        self
    }

    /// 500 response for a fault caught by the recovery boundary.
    pub fn internal(path: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self::new(
            INTERNAL_ERROR_MESSAGE,
            ErrorCode::InternalServerError,
            path,
            request_id,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.code.status()
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.error)
    }
}

impl std::error::Error for ErrorResponse {}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

/// Convert library errors to an [`ErrorResponse`].
///
/// The path and request id come from the request; library errors don't carry them.
pub fn from_lib_error(error: &LibError, path: &str, request_id: &str) -> ErrorResponse {
    match error {
        LibError::Decode(e) => {
            let message = e.to_string();
            ErrorResponse::new(message, ErrorCode::InvalidRequestBody, path, request_id)
        }
        LibError::Validation(v) => {
            ErrorResponse::new(v.to_string(), ErrorCode::ValidationError, path, request_id)
                .with_detail(v.field(), v.to_string())
        }
    }
}
