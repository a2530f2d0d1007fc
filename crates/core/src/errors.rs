//! Shared error taxonomy for the sync engine and its storage/transport collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias used across the sync engine.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Closed set of error codes carried on both the client `SyncError` and the
/// relay's HTTP error envelope (see the external interfaces section).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncErrorCode {
    Auth,
    Network,
    HashMismatch,
    Quota,
    DiskFull,
    ServerError,
    SchemaInvalid,
    SchemaUnsupported,
    StorageIo,
    StorageCorrupt,
    ConflictState,
    Validation,
}

/// Retry policy class, analogous to the classification used by the device
/// sync engine this crate is modeled on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// A classified, user-facing sync error.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct CoreError {
    pub code: SyncErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl CoreError {
    pub fn new(code: SyncErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Auth, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Network, message)
    }

    pub fn hash_mismatch(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::HashMismatch, message)
    }

    pub fn quota(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Quota, message)
    }

    pub fn disk_full(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::DiskFull, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::ServerError, message)
    }

    pub fn schema_invalid(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::SchemaInvalid, message)
    }

    pub fn schema_unsupported(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::SchemaUnsupported, message)
    }

    pub fn storage_io(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::StorageIo, message)
    }

    pub fn storage_corrupt(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::StorageCorrupt, message)
    }

    pub fn conflict_state(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::ConflictState, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(SyncErrorCode::Validation, message)
    }

    /// Classify this error for retry policy, mirroring `classify_http_status`.
    pub fn retry_class(&self) -> RetryClass {
        match self.code {
            SyncErrorCode::Auth => RetryClass::ReauthRequired,
            SyncErrorCode::Network => RetryClass::Retryable,
            SyncErrorCode::HashMismatch => RetryClass::Permanent,
            SyncErrorCode::Quota => RetryClass::Permanent,
            SyncErrorCode::DiskFull => RetryClass::Permanent,
            SyncErrorCode::ServerError => RetryClass::Retryable,
            SyncErrorCode::SchemaInvalid => RetryClass::Permanent,
            SyncErrorCode::SchemaUnsupported => RetryClass::Permanent,
            SyncErrorCode::StorageIo => RetryClass::Retryable,
            SyncErrorCode::StorageCorrupt => RetryClass::Permanent,
            SyncErrorCode::ConflictState => RetryClass::Retryable,
            SyncErrorCode::Validation => RetryClass::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.retry_class(), RetryClass::Retryable)
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::schema_invalid(format!("invalid JSON: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_require_reauth() {
        assert_eq!(CoreError::auth("expired").retry_class(), RetryClass::ReauthRequired);
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(CoreError::server_error("boom").is_retryable());
    }

    #[test]
    fn schema_errors_are_permanent() {
        assert!(!CoreError::schema_invalid("bad").is_retryable());
        assert!(!CoreError::schema_unsupported("too new").is_retryable());
    }

    #[test]
    fn error_code_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&SyncErrorCode::HashMismatch).unwrap();
        assert_eq!(json, "\"HASH_MISMATCH\"");
    }
}
