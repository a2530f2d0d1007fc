//! `StoredEvent` — an `Event` plus its local sync lifecycle status.

use serde::{Deserialize, Serialize};

use crate::event::Event;

/// Lifecycle status tracked per stored event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    SavedLocal,
    WaitingSync,
    Syncing,
    Synced,
    SyncedTextOnly,
    MediaDownloading,
    SyncFailed,
    BlockedQuotaOrStorage,
    BlockedHashMismatch,
    BlockedAuth,
}

impl SyncStatus {
    /// Priority rank used by the inbox fold: lower rank is worse (shown first).
    /// `blocked_auth > blocked_hash_mismatch > blocked_quota_or_storage >
    /// sync_failed > syncing > media_downloading > synced_text_only >
    /// waiting_sync > saved_local > synced`.
    pub fn severity_rank(self) -> u8 {
        match self {
            SyncStatus::BlockedAuth => 0,
            SyncStatus::BlockedHashMismatch => 1,
            SyncStatus::BlockedQuotaOrStorage => 2,
            SyncStatus::SyncFailed => 3,
            SyncStatus::Syncing => 4,
            SyncStatus::MediaDownloading => 5,
            SyncStatus::SyncedTextOnly => 6,
            SyncStatus::WaitingSync => 7,
            SyncStatus::SavedLocal => 8,
            SyncStatus::Synced => 9,
        }
    }

    /// The worse of two statuses per the fixed inbox priority order.
    pub fn worse(self, other: SyncStatus) -> SyncStatus {
        if self.severity_rank() <= other.severity_rank() {
            self
        } else {
            other
        }
    }
}

/// An `Event` wrapped with its local sync lifecycle status and, on failure,
/// an error code/message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    #[serde(flatten)]
    pub event: Event,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StoredEvent {
    pub fn new_local(event: Event) -> Self {
        Self {
            event,
            sync_status: SyncStatus::SavedLocal,
            error_code: None,
            error_message: None,
        }
    }

    pub fn event_id(&self) -> &str {
        &self.event.event_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_matches_the_fixed_priority() {
        assert_eq!(
            SyncStatus::BlockedAuth.worse(SyncStatus::Synced),
            SyncStatus::BlockedAuth
        );
        assert_eq!(
            SyncStatus::Synced.worse(SyncStatus::WaitingSync),
            SyncStatus::WaitingSync
        );
        assert_eq!(
            SyncStatus::SyncFailed.worse(SyncStatus::Syncing),
            SyncStatus::SyncFailed
        );
    }
}
