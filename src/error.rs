//! # Error Handling
//!
//! This module defines the application's error taxonomy and how each kind
//! is converted to an HTTP response.
//!
//! ## Error Categories:
//! - **InvalidRequest**: missing/malformed identifying fields or a
//!   non-audio content-type (400 errors)
//! - **UnsupportedMedia**: filename extension not in the allowlist (400
//!   errors, detail enumerates the allowed set)
//! - **PayloadTooLarge**: byte ceiling exceeded mid-stream (413 errors)
//! - **StorageFault**: filesystem or upload-stream I/O failure (500 errors)
//! - **Internal / ConfigError**: server-side problems (500 errors)
//!
//! All errors are terminal for the current request; nothing is retried
//! internally. The `ResponseError` impl produces a consistent JSON
//! envelope so API clients can branch on a machine-readable type.

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// Each variant holds a human-readable detail message. The variant picks
/// the HTTP status class; the message carries the specifics (which
/// extension was rejected, what the configured ceiling is, and so on).
#[derive(Debug)]
pub enum AppError {
    /// Internal server errors not covered by a more specific variant
    Internal(String),

    /// Missing/malformed identifying fields or a rejected content-type
    InvalidRequest(String),

    /// Filename extension is not in the configured allowlist
    UnsupportedMedia(String),

    /// The upload exceeded the configured byte ceiling mid-stream
    PayloadTooLarge(String),

    /// Filesystem or upload-stream I/O failure during persist
    StorageFault(String),

    /// Configuration file or environment variable problems
    ConfigError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            AppError::UnsupportedMedia(msg) => write!(f, "Unsupported media: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::StorageFault(msg) => write!(f, "Storage fault: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

/// Converts each error into an HTTP response with a consistent JSON body:
///
/// ```json
/// {
///   "error": {
///     "type": "payload_too_large",
///     "message": "Uploaded file is too large (limit: 52428800 bytes)",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
            AppError::InvalidRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "invalid_request",
                msg.clone(),
            ),
            AppError::UnsupportedMedia(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "unsupported_media",
                msg.clone(),
            ),
            AppError::PayloadTooLarge(msg) => (
                actix_web::http::StatusCode::PAYLOAD_TOO_LARGE,
                "payload_too_large",
                msg.clone(),
            ),
            AppError::StorageFault(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "storage_fault",
                msg.clone(),
            ),
            AppError::ConfigError(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

/// Conversion from anyhow::Error so `?` works on general-purpose errors
/// raised during startup and configuration handling.
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// JSON parsing failures are almost always the client's fault, so they
/// map to an invalid-request response rather than a server error.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
