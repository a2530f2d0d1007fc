//! `RelayError` — the relay's own error type, mapped into the shared
//! `SyncErrorCode` taxonomy and rendered as the §6 `{code, message,
//! retryable, details?}` envelope via `IntoResponse`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use notewire_core::errors::{CoreError, SyncErrorCode};
use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("write actor unavailable: {0}")]
    WriterUnavailable(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,
    #[error(transparent)]
    Sync(#[from] CoreError),
}

impl RelayError {
    pub fn auth(message: impl Into<String>) -> Self {
        RelayError::Sync(CoreError::auth(message))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        RelayError::Sync(CoreError::validation(message))
    }

    pub fn hash_mismatch(message: impl Into<String>) -> Self {
        RelayError::Sync(CoreError::hash_mismatch(message))
    }

    /// `(wire code, HTTP status, retryable)` for a `SyncErrorCode`, collapsed
    /// onto the closed set the external interface documents in §6 — codes
    /// outside that set (e.g. `STORAGE_IO`) surface as `SERVER_ERROR`.
    fn wire(code: SyncErrorCode) -> (&'static str, StatusCode) {
        match code {
            SyncErrorCode::Auth => ("AUTH", StatusCode::UNAUTHORIZED),
            SyncErrorCode::Network => ("NETWORK", StatusCode::SERVICE_UNAVAILABLE),
            SyncErrorCode::HashMismatch => ("HASH_MISMATCH", StatusCode::BAD_REQUEST),
            SyncErrorCode::Quota => ("QUOTA", StatusCode::PAYMENT_REQUIRED),
            SyncErrorCode::DiskFull => ("DISK_FULL", StatusCode::INSUFFICIENT_STORAGE),
            SyncErrorCode::SchemaInvalid => ("SCHEMA_INVALID", StatusCode::BAD_REQUEST),
            SyncErrorCode::SchemaUnsupported => ("SCHEMA_UNSUPPORTED", StatusCode::BAD_REQUEST),
            SyncErrorCode::Validation => ("SCHEMA_INVALID", StatusCode::BAD_REQUEST),
            SyncErrorCode::ConflictState => ("SERVER_ERROR", StatusCode::CONFLICT),
            SyncErrorCode::ServerError
            | SyncErrorCode::StorageIo
            | SyncErrorCode::StorageCorrupt => ("SERVER_ERROR", StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope {
    code: &'static str,
    message: String,
    retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        if matches!(&self, RelayError::RangeNotSatisfiable) {
            let body = ErrorEnvelope {
                code: "SCHEMA_INVALID",
                message: self.to_string(),
                retryable: false,
                details: None,
            };
            return (StatusCode::RANGE_NOT_SATISFIABLE, Json(body)).into_response();
        }

        let core: CoreError = match self {
            RelayError::Sync(err) => err,
            RelayError::Diesel(diesel::result::Error::NotFound) => {
                CoreError::storage_io("not found")
            }
            other => CoreError::server_error(other.to_string()),
        };
        let (code, status) = Self::wire(core.code);
        let body = ErrorEnvelope {
            code,
            message: core.message,
            retryable: core.is_retryable(),
            details: core.details,
        };
        (status, Json(body)).into_response()
    }
}
