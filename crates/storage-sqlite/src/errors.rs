//! `StorageError` — the diesel/r2d2 boundary error, mapped into the shared
//! `notewire_core::CoreError` taxonomy at the `StorageAdapter` boundary.

use notewire_core::errors::{CoreError, SyncErrorCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Diesel(#[from] diesel::result::Error),
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("migration error: {0}")]
    Migration(String),
    #[error("write actor unavailable: {0}")]
    WriterUnavailable(String),
    #[error("invalid stored data: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CoreError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::Diesel(diesel::result::Error::NotFound) => {
                CoreError::storage_io(err.to_string())
            }
            StorageError::Corrupt(_) => CoreError::storage_corrupt(err.to_string()),
            _ => CoreError::new(SyncErrorCode::StorageIo, err.to_string()),
        }
    }
}
