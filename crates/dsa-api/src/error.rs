//! # API Error Types
//!
//! One error type for the whole service. Every variant carries a
//! human-readable message and a machine-readable code; the HTTP status is
//! fixed per variant. Library errors (database, token decoding, malformed
//! identifiers, request body rejections, validation) are translated here so
//! handlers can propagate with `?`.
//!
//! ## Response Shape
//!
//! ```text
//! { "success": false, "error": "...", "code": "...", "details"?: [...], "retryAfter"?: 60 }
//! ```
//!
//! Internal errors are logged in full and answered with a generic message.
//! In development mode the error-detail middleware adds a `stack` field
//! built from the [`ErrorContext`] extension attached to every error response.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use dsa_core::{FieldViolation, ValidationErrors};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Message returned to clients in place of any internal error detail.
pub const INTERNAL_MESSAGE: &str = "Internal server error";

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Always `false`.
    pub success: bool,
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code (e.g. `"INVALID_OTP"`, `"VALIDATION_ERROR"`).
    pub code: String,
    /// Field violations, present only for validation errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Seconds until the client may retry, present on some rate-limit errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    /// Debug rendering of the error, development mode only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
            details: None,
            retry_after: None,
            stack: None,
        }
    }
}

/// Debug rendering of the error that produced a response.
///
/// Attached to the response extensions by [`AppError::into_response`] and
/// consumed by [`crate::middleware::error_detail`].
#[derive(Debug, Clone)]
pub struct ErrorContext(pub String);

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request (400).
    #[error("{message}")]
    BadRequest { message: String, code: &'static str },

    /// Missing, invalid or expired credentials (401).
    #[error("{message}")]
    Unauthorized { message: String, code: &'static str },

    /// Authenticated but not allowed (403).
    #[error("{message}")]
    Forbidden { message: String, code: &'static str },

    /// Resource not found (404).
    #[error("{message}")]
    NotFound { message: String, code: &'static str },

    /// Known path, unsupported method (405).
    #[error("{message}")]
    MethodNotAllowed { message: String, code: &'static str },

    /// Conflict with current resource state (409).
    #[error("{message}")]
    Conflict { message: String, code: &'static str },

    /// Request body over the buffering limit (413).
    #[error("{message}")]
    PayloadTooLarge { message: String, code: &'static str },

    /// Request validation failed (422).
    #[error("{message}")]
    Validation {
        message: String,
        violations: Vec<FieldViolation>,
    },

    /// Rate limit exceeded (429).
    #[error("{message}")]
    TooManyRequests {
        message: String,
        code: &'static str,
        retry_after: Option<u64>,
    },

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
            code: "BAD_REQUEST",
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
            code: "UNAUTHORIZED",
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::Forbidden {
            message: message.into(),
            code: "FORBIDDEN",
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            code: "NOT_FOUND",
        }
    }

    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::MethodNotAllowed {
            message: message.into(),
            code: "METHOD_NOT_ALLOWED",
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            code: "CONFLICT",
        }
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::PayloadTooLarge {
            message: message.into(),
            code: "PAYLOAD_TOO_LARGE",
        }
    }

    pub fn validation(violations: Vec<FieldViolation>) -> Self {
        Self::Validation {
            message: "Validation failed".to_string(),
            violations,
        }
    }

    pub fn too_many_requests(message: impl Into<String>) -> Self {
        Self::TooManyRequests {
            message: message.into(),
            code: "RATE_LIMIT_EXCEEDED",
            retry_after: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Replace the machine-readable code. No effect on `Validation` and
    /// `Internal`, whose codes are fixed.
    pub fn with_code(mut self, new_code: &'static str) -> Self {
        match &mut self {
            Self::BadRequest { code, .. }
            | Self::Unauthorized { code, .. }
            | Self::Forbidden { code, .. }
            | Self::NotFound { code, .. }
            | Self::MethodNotAllowed { code, .. }
            | Self::Conflict { code, .. }
            | Self::PayloadTooLarge { code, .. }
            | Self::TooManyRequests { code, .. } => *code = new_code,
            Self::Validation { .. } | Self::Internal(_) => {}
        }
        self
    }

    /// Attach a `retryAfter` hint to a rate-limit error.
    pub fn with_retry_after(mut self, secs: u64) -> Self {
        if let Self::TooManyRequests { retry_after, .. } = &mut self {
            *retry_after = Some(secs);
        }
        self
    }

    /// Whether this is an expected, client-caused failure rather than a fault.
    pub fn is_operational(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// HTTP status code and machine-readable error code for this error.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, *code),
            Self::Unauthorized { code, .. } => (StatusCode::UNAUTHORIZED, *code),
            Self::Forbidden { code, .. } => (StatusCode::FORBIDDEN, *code),
            Self::NotFound { code, .. } => (StatusCode::NOT_FOUND, *code),
            Self::MethodNotAllowed { code, .. } => (StatusCode::METHOD_NOT_ALLOWED, *code),
            Self::Conflict { code, .. } => (StatusCode::CONFLICT, *code),
            Self::PayloadTooLarge { code, .. } => (StatusCode::PAYLOAD_TOO_LARGE, *code),
            Self::Validation { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::TooManyRequests { code, .. } => (StatusCode::TOO_MANY_REQUESTS, *code),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// The client-facing body for this error.
    pub fn to_body(&self) -> ErrorBody {
        let (_, code) = self.status_and_code();
        let message = match self {
            Self::Internal(_) => INTERNAL_MESSAGE.to_string(),
            other => other.to_string(),
        };
        let mut body = ErrorBody::new(code, message);
        match self {
            Self::Validation { violations, .. } => {
                body.details = serde_json::to_value(violations).ok();
            }
            Self::TooManyRequests { retry_after, .. } => body.retry_after = *retry_after,
            _ => {}
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, _) = self.status_and_code();

        if !self.is_operational() {
            tracing::error!(error = %self, "internal server error");
        }

        let body = self.to_body();
        let mut response = (status, Json(body)).into_response();
        response
            .extensions_mut()
            .insert(ErrorContext(format!("{self:?}")));
        response
    }
}

// ── Translation layer ───────────────────────────────────────────────

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        Self::validation(err.into_violations())
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::not_found("Resource not found"),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                Some("23505") => {
                    Self::conflict("A record with this value already exists").with_code("DUPLICATE_KEY")
                }
                Some("23514") | Some("23502") => Self::Validation {
                    message: db.message().to_string(),
                    violations: Vec::new(),
                },
                _ => Self::Internal(err.to_string()),
            },
            _ => Self::Internal(err.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                Self::unauthorized("Token has expired").with_code("TOKEN_EXPIRED")
            }
            _ => Self::unauthorized("Invalid token").with_code("INVALID_TOKEN"),
        }
    }
}

impl From<uuid::Error> for AppError {
    fn from(_: uuid::Error) -> Self {
        Self::bad_request("Invalid identifier format").with_code("INVALID_ID")
    }
}

impl From<JsonRejection> for AppError {
    fn from(err: JsonRejection) -> Self {
        Self::bad_request(err.body_text()).with_code("INVALID_JSON")
    }
}
