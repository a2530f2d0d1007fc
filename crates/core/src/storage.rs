//! The storage adapter capability contract (C2). Two reference
//! implementations exist elsewhere in the workspace — `notewire-storage-sqlite`
//! (durable) and `notewire-storage-memory` (in-memory, for tests) — and both
//! must present identical semantics against this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::blob::BlobManifestEntry;
use crate::device_state::DeviceState;
use crate::errors::Result;
use crate::projection::Projection;
use crate::stored_event::{StoredEvent, SyncStatus};

/// Default bound for `listPendingEvents` when the caller does not override it.
pub const DEFAULT_PENDING_LIMIT: usize = 200;
/// Minimum ring size `saveSyncAttempt` must retain.
pub const MIN_SYNC_ATTEMPT_RING: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAttemptOutcome {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAttempt {
    pub workspace_id: String,
    pub at_ms: i64,
    pub outcome: SyncAttemptOutcome,
    pub pushed_count: usize,
    pub pulled_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// An `{eventId -> serverSeq}` mapping returned by a push, or replayed from a
/// pulled batch of canonical events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSeqMapping {
    pub event_id: String,
    pub server_seq: i64,
}

/// The durable per-workspace log, projection cache, blob manifest, and
/// attempt audit. Implementations must uphold atomic batch writes, an
/// idempotent merge-by-eventId upsert, gap-free local-seq allocation, and
/// canonical fold order for `list_events`.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get_device_state(&self, workspace_id: &str) -> Result<Option<DeviceState>>;
    async fn save_device_state(&self, state: &DeviceState) -> Result<()>;

    /// Returns the current `nextLocalSeq` and atomically advances it by one.
    async fn allocate_local_seq(&self, workspace_id: &str, device_id: &str) -> Result<i64>;

    /// All-or-nothing batch upsert, merged by `eventId` per the rules in §4.2.
    async fn upsert_events(&self, workspace_id: &str, events: &[StoredEvent]) -> Result<()>;

    /// Canonical events ascending by `serverSeq`, then provisional events in
    /// `list_pending_events` order. This is the canonical fold order.
    async fn list_events(&self, workspace_id: &str) -> Result<Vec<StoredEvent>>;

    /// Returns `true` if any stored row changed. Events that gain a
    /// `serverSeq` also transition to `synced` with cleared error.
    async fn assign_server_seq(&self, workspace_id: &str, mappings: &[ServerSeqMapping]) -> Result<bool>;

    /// Events with `serverSeq is null`, ordered by
    /// `(localSeq ASC, createdAtMs ASC, eventId ASC)`, bounded by `limit`.
    async fn list_pending_events(&self, workspace_id: &str, limit: usize) -> Result<Vec<StoredEvent>>;

    async fn update_event_status(
        &self,
        workspace_id: &str,
        event_id: &str,
        status: SyncStatus,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> Result<()>;

    async fn save_projection(&self, workspace_id: &str, projection: &Projection) -> Result<()>;
    async fn get_projection(&self, workspace_id: &str) -> Result<Option<Projection>>;

    async fn save_blob_manifest(&self, workspace_id: &str, entry: &BlobManifestEntry) -> Result<()>;
    async fn list_blob_manifest(&self, workspace_id: &str) -> Result<Vec<BlobManifestEntry>>;

    /// Appends to a bounded ring of at least `MIN_SYNC_ATTEMPT_RING` entries.
    async fn save_sync_attempt(&self, workspace_id: &str, attempt: &SyncAttempt) -> Result<()>;
    /// The `limit` most recent attempts, newest first.
    async fn list_sync_attempts(&self, workspace_id: &str, limit: usize) -> Result<Vec<SyncAttempt>>;
}

/// Merge rule for `upsert_events`: prefer a non-null `serverSeq` from either
/// side, take the incoming `syncStatus`/error fields, and preserve the
/// earliest `localSeq`. Reusable by every `StorageAdapter` implementation so
/// the merge policy is defined exactly once.
pub fn merge_stored_event(existing: &StoredEvent, incoming: &StoredEvent) -> StoredEvent {
    let mut merged = incoming.clone();
    if merged.event.server_seq.is_none() {
        merged.event.server_seq = existing.event.server_seq;
    }
    merged.event.local_seq = match (existing.event.local_seq, incoming.event.local_seq) {
        (Some(e), Some(i)) => Some(e.min(i)),
        (Some(e), None) => Some(e),
        (None, Some(i)) => Some(i),
        (None, None) => None,
    };
    merged
}
