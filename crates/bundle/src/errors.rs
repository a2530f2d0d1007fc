//! `BundleError` — the zip/manifest boundary error, mapped into the shared
//! `notewire_core::CoreError` taxonomy.

use notewire_core::errors::{CoreError, SyncErrorCode};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BundleError>;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed bundle JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bundle references blobs not locally present: {0:?}")]
    MissingBlobs(Vec<String>),
    #[error("invalid bundle: {0}")]
    InvalidManifest(String),
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl From<BundleError> for CoreError {
    fn from(err: BundleError) -> Self {
        match err {
            BundleError::Core(inner) => inner,
            BundleError::MissingBlobs(hashes) => {
                CoreError::new(SyncErrorCode::Validation, format!("missing blobs: {}", hashes.join(", ")))
            }
            BundleError::InvalidManifest(msg) => CoreError::schema_invalid(msg),
            other => CoreError::new(SyncErrorCode::StorageIo, other.to_string()),
        }
    }
}
