//! Error types for txsync
//!
//! `SyncError` is the failure taxonomy of a sync run; `ApiError` maps
//! failures onto HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use txsync_common::SourceKind;

/// Failure taxonomy of a sync run
///
/// Record-level failures never escalate to phase level, and phase-level
/// failures never abort the run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Another run holds the global lock (non-fatal, caller may retry later)
    #[error("Sync lock held by {0}")]
    LockContention(String),

    /// Fetch failed for one source phase
    #[error("Fetch failed for {source_kind}: {message}")]
    AdapterFetch { source_kind: SourceKind, message: String },

    /// One record's body could not be decoded (downgraded to a placeholder)
    #[error("Extraction failed for {external_id}: {message}")]
    Extraction { external_id: String, message: String },

    /// Classifier response could not be mapped back to its batch
    #[error("Batch correlation failed: {0}")]
    BatchCorrelation(String),

    /// Commit of one batch failed; its watermark was not advanced
    #[error("Persistence failed for {source_kind}: {message}")]
    Persistence { source_kind: SourceKind, message: String },

    /// Run stopped by cancellation
    #[error("Sync cancelled")]
    Cancelled,
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409) - sync already running or throttled
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),

    /// txsync-common error
    #[error("Common error: {0}")]
    Common(#[from] txsync_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Other(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                err.to_string(),
            ),
            ApiError::Common(txsync_common::Error::InvalidInput(ref msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
            }
            ApiError::Common(txsync_common::Error::NotFound(ref msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone())
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
