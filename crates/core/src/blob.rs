//! Blob manifest entries — the content-addressed attachment side-channel.

use serde::{Deserialize, Serialize};

use crate::stored_event::SyncStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobManifestEntry {
    /// sha256 hex digest of the blob's bytes.
    pub hash: String,
    pub size: i64,
    pub content_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<String>,
    pub is_present: bool,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at_ms: i64,
}

impl BlobManifestEntry {
    pub fn new_local(hash: impl Into<String>, size: i64, content_type: impl Into<String>, now_ms: i64) -> Self {
        Self {
            hash: hash.into(),
            size,
            content_type: content_type.into(),
            local_path: None,
            is_present: false,
            sync_status: SyncStatus::WaitingSync,
            error_code: None,
            error_message: None,
            updated_at_ms: now_ms,
        }
    }

    /// Entries not yet uploaded/downloaded count against `pendingBlobs`.
    pub fn is_pending(&self) -> bool {
        !self.is_present || self.sync_status != SyncStatus::Synced
    }
}
