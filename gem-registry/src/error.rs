//! # Error Handling and Response Types
//!
//! Every fallible operation in the registry returns [`AppResult`]. Errors carry
//! a machine-readable [`ErrorCode`] that decides the HTTP status when they reach
//! a handler, so extraction, store and mirror failures are reported to the
//! client instead of panicking the serving worker.
//!
//! ## Error Response Format
//!
//! ```json
//! {
//!   "error": "Human-readable error message",
//!   "code": "machine_readable_error_code",
//!   "details": {...},
//!   "timestamp": "2024-01-01T12:00:00Z"
//! }
//! ```
//!
//! ## Error Classifications
//!
//! - **Corrupt archive** (422): the uploaded package could not be read
//! - **Not found** (404): unknown package, version or user
//! - **Upstream failure** (upstream status, else 502): mirror fetch failed
//! - **Blocked** (405): refused by the filter or the CVE gate
//! - **Store corruption** (500): persisted bytes did not deserialize
//! - **Internal errors** (500): I/O, encoding limits and everything else

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

/// Standardized error response structure
#[derive(Serialize, Debug)]
pub struct ApiErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<Value>,
    pub timestamp: String,
}

/// Machine-readable error classification
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCode {
    ValidationError,
    CorruptArchive,
    NotFound,
    UpstreamFailure(Option<u16>),
    Blocked,
    StoreCorruption,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::CorruptArchive => "corrupt_archive",
            ErrorCode::NotFound => "not_found",
            ErrorCode::UpstreamFailure(_) => "upstream_failure",
            ErrorCode::Blocked => "blocked",
            ErrorCode::StoreCorruption => "store_corruption",
            ErrorCode::InternalError => "internal_error",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationError => StatusCode::BAD_REQUEST,
            ErrorCode::CorruptArchive => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::UpstreamFailure(status) => status
                .and_then(|s| StatusCode::from_u16(s).ok())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ErrorCode::Blocked => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::StoreCorruption | ErrorCode::InternalError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml_ng::Error),

    #[error("Multipart form parsing error: {0}")]
    Multipart(#[from] axum::extract::multipart::MultipartError),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("corrupt archive {archive}: {reason}")]
    CorruptArchive { archive: String, reason: String },

    #[error("{0}")]
    NotFound(String),

    #[error("upstream failure: {message}")]
    UpstreamFailure { status: Option<u16>, message: String },

    #[error("{0}")]
    FilteredOrVulnerable(String),

    #[error("corrupt record {namespace}/{key}: {reason}")]
    StoreCorruption {
        namespace: String,
        key: String,
        reason: String,
    },

    #[error("value {0} does not fit the binary index length encoding")]
    EncodingLimitExceeded(i64),

    #[error("{0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl AppError {
    pub fn corrupt_archive(archive: impl Into<String>, reason: impl ToString) -> Self {
        AppError::CorruptArchive {
            archive: archive.into(),
            reason: reason.to_string(),
        }
    }

    /// Get the appropriate error code for this error type
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::BadRequest(_) | AppError::Json(_) | AppError::Multipart(_) => {
                ErrorCode::ValidationError
            }
            AppError::CorruptArchive { .. } => ErrorCode::CorruptArchive,
            AppError::NotFound(_) => ErrorCode::NotFound,
            AppError::UpstreamFailure { status, .. } => ErrorCode::UpstreamFailure(*status),
            AppError::Http(e) => ErrorCode::UpstreamFailure(e.status().map(|s| s.as_u16())),
            AppError::FilteredOrVulnerable(_) => ErrorCode::Blocked,
            AppError::StoreCorruption { .. } => ErrorCode::StoreCorruption,
            AppError::Io(_)
            | AppError::Yaml(_)
            | AppError::Sqlite(_)
            | AppError::Git(_)
            | AppError::EncodingLimitExceeded(_)
            | AppError::InternalError(_)
            | AppError::Anyhow(_) => ErrorCode::InternalError,
        }
    }

    /// Get additional error details if available
    pub fn details(&self) -> Option<Value> {
        match self {
            AppError::StoreCorruption { namespace, key, .. } => {
                Some(json!({"namespace": namespace, "key": key}))
            }
            AppError::CorruptArchive { archive, .. } => Some(json!({"archive": archive})),
            AppError::UpstreamFailure {
                status: Some(status),
                ..
            } => Some(json!({"upstream_status": status})),
            AppError::Anyhow(e) => e
                .source()
                .map(|source| json!({"source": source.to_string()})),
            _ => None,
        }
    }

    /// Create a standardized error response
    pub fn to_error_response(&self) -> ApiErrorResponse {
        let code = self.error_code();
        ApiErrorResponse {
            error: self.to_string(),
            code: code.as_str().to_string(),
            details: self.details(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.http_status();

        if status.is_server_error() {
            tracing::error!(error = %self, code = code.as_str(), "Request failed");
        } else {
            tracing::warn!(error = %self, code = code.as_str(), "Request rejected");
        }

        let error_response = self.to_error_response();
        tracing::debug!(status = %status, code = %error_response.code, "Returning standardized error response");

        (status, axum::Json(error_response)).into_response()
    }
}

/// Convenient result type for application operations.
pub type AppResult<T> = Result<T, AppError>;
