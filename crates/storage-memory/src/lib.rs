//! An in-memory `StorageAdapter` (C2). No database, no filesystem — used by
//! the sync engine's own test suite and by integration tests in other
//! crates that need a fast, disposable storage backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use notewire_core::storage::{merge_stored_event, ServerSeqMapping, SyncAttempt, DEFAULT_PENDING_LIMIT};
use notewire_core::{
    BlobManifestEntry, CoreError, DeviceState, Projection, Result, StorageAdapter, StoredEvent, SyncStatus,
};

#[derive(Default)]
struct Workspace {
    device_state: Option<DeviceState>,
    events: HashMap<String, StoredEvent>,
    next_local_seq: i64,
    projection: Option<Projection>,
    blobs: HashMap<String, BlobManifestEntry>,
    sync_attempts: Vec<SyncAttempt>,
}

/// A `StorageAdapter` backed by a single mutex-guarded map of workspaces.
/// Every workspace is independent; nothing here is actually persisted.
#[derive(Default)]
pub struct MemoryStorage {
    workspaces: Mutex<HashMap<String, Workspace>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get_device_state(&self, workspace_id: &str) -> Result<Option<DeviceState>> {
        let workspaces = self.workspaces.lock().await;
        Ok(workspaces.get(workspace_id).and_then(|w| w.device_state.clone()))
    }

    async fn save_device_state(&self, state: &DeviceState) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(state.workspace_id.clone()).or_default();
        workspace.device_state = Some(state.clone());
        Ok(())
    }

    async fn allocate_local_seq(&self, workspace_id: &str, _device_id: &str) -> Result<i64> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        if workspace.next_local_seq == 0 {
            workspace.next_local_seq = 1;
        }
        let allocated = workspace.next_local_seq;
        workspace.next_local_seq += 1;
        Ok(allocated)
    }

    async fn upsert_events(&self, workspace_id: &str, events: &[StoredEvent]) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        for incoming in events {
            let key = incoming.event_id().to_string();
            let merged = match workspace.events.get(&key) {
                Some(existing) => merge_stored_event(existing, incoming),
                None => incoming.clone(),
            };
            if merged.event.local_seq.map(|s| s + 1).unwrap_or(1) >= workspace.next_local_seq {
                workspace.next_local_seq = merged.event.local_seq.map(|s| s + 1).unwrap_or(1).max(workspace.next_local_seq);
            }
            workspace.events.insert(key, merged);
        }
        Ok(())
    }

    async fn list_events(&self, workspace_id: &str) -> Result<Vec<StoredEvent>> {
        let workspaces = self.workspaces.lock().await;
        let mut events: Vec<StoredEvent> = workspaces
            .get(workspace_id)
            .map(|w| w.events.values().cloned().collect())
            .unwrap_or_default();
        notewire_core::projection::canonical_fold_order(&mut events);
        Ok(events)
    }

    async fn assign_server_seq(&self, workspace_id: &str, mappings: &[ServerSeqMapping]) -> Result<bool> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        let mut changed = false;
        for mapping in mappings {
            if let Some(stored) = workspace.events.get_mut(&mapping.event_id) {
                if stored.event.server_seq != Some(mapping.server_seq) {
                    stored.event.server_seq = Some(mapping.server_seq);
                    stored.sync_status = SyncStatus::Synced;
                    stored.error_code = None;
                    stored.error_message = None;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    async fn list_pending_events(&self, workspace_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
        let workspaces = self.workspaces.lock().await;
        let limit = if limit == 0 { DEFAULT_PENDING_LIMIT } else { limit };
        let mut pending: Vec<StoredEvent> = workspaces
            .get(workspace_id)
            .map(|w| w.events.values().filter(|e| e.event.server_seq.is_none()).cloned().collect())
            .unwrap_or_default();
        pending.sort_by(|a, b| {
            (a.event.local_seq, a.event.created_at_ms, &a.event.event_id).cmp(&(
                b.event.local_seq,
                b.event.created_at_ms,
                &b.event.event_id,
            ))
        });
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_event_status(
        &self,
        workspace_id: &str,
        event_id: &str,
        status: SyncStatus,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces
            .get_mut(workspace_id)
            .ok_or_else(|| CoreError::storage_io(format!("unknown workspace {workspace_id}")))?;
        let stored = workspace
            .events
            .get_mut(event_id)
            .ok_or_else(|| CoreError::storage_io(format!("unknown event {event_id}")))?;
        stored.sync_status = status;
        stored.error_code = error_code;
        stored.error_message = error_message;
        Ok(())
    }

    async fn save_projection(&self, workspace_id: &str, projection: &Projection) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        workspace.projection = Some(projection.clone());
        Ok(())
    }

    async fn get_projection(&self, workspace_id: &str) -> Result<Option<Projection>> {
        let workspaces = self.workspaces.lock().await;
        Ok(workspaces.get(workspace_id).and_then(|w| w.projection.clone()))
    }

    async fn save_blob_manifest(&self, workspace_id: &str, entry: &BlobManifestEntry) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        workspace.blobs.insert(entry.hash.clone(), entry.clone());
        Ok(())
    }

    async fn list_blob_manifest(&self, workspace_id: &str) -> Result<Vec<BlobManifestEntry>> {
        let workspaces = self.workspaces.lock().await;
        let mut entries: Vec<BlobManifestEntry> = workspaces
            .get(workspace_id)
            .map(|w| w.blobs.values().cloned().collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| a.hash.cmp(&b.hash));
        Ok(entries)
    }

    async fn save_sync_attempt(&self, workspace_id: &str, attempt: &SyncAttempt) -> Result<()> {
        let mut workspaces = self.workspaces.lock().await;
        let workspace = workspaces.entry(workspace_id.to_string()).or_default();
        workspace.sync_attempts.push(attempt.clone());
        let ring_floor = notewire_core::storage::MIN_SYNC_ATTEMPT_RING;
        if workspace.sync_attempts.len() > ring_floor {
            let overflow = workspace.sync_attempts.len() - ring_floor;
            workspace.sync_attempts.drain(0..overflow);
        }
        Ok(())
    }

    async fn list_sync_attempts(&self, workspace_id: &str, limit: usize) -> Result<Vec<SyncAttempt>> {
        let workspaces = self.workspaces.lock().await;
        let mut attempts = workspaces
            .get(workspace_id)
            .map(|w| w.sync_attempts.clone())
            .unwrap_or_default();
        attempts.reverse();
        attempts.truncate(limit);
        Ok(attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notewire_core::event::{create_event, EventPayload};

    fn sample_event(local_seq: i64) -> StoredEvent {
        let event = create_event(
            EventPayload::CaptureTextCreate {
                atom_id: "atom-1".into(),
                title: None,
                body: "hello".into(),
            },
            "device-a",
            "ws-1",
            local_seq,
        );
        StoredEvent::new_local(event)
    }

    #[tokio::test]
    async fn allocate_local_seq_is_gap_free_and_monotonic() {
        let storage = MemoryStorage::new();
        let first = storage.allocate_local_seq("ws-1", "device-a").await.unwrap();
        let second = storage.allocate_local_seq("ws-1", "device-a").await.unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 2);
    }

    #[tokio::test]
    async fn upsert_then_list_events_round_trips() {
        let storage = MemoryStorage::new();
        let event = sample_event(1);
        storage.upsert_events("ws-1", &[event.clone()]).await.unwrap();
        let listed = storage.list_events("ws-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event_id(), event.event_id());
    }

    #[tokio::test]
    async fn assign_server_seq_transitions_to_synced() {
        let storage = MemoryStorage::new();
        let event = sample_event(1);
        let event_id = event.event_id().to_string();
        storage.upsert_events("ws-1", &[event]).await.unwrap();

        let changed = storage
            .assign_server_seq("ws-1", &[ServerSeqMapping { event_id: event_id.clone(), server_seq: 10 }])
            .await
            .unwrap();
        assert!(changed);

        let listed = storage.list_events("ws-1").await.unwrap();
        assert_eq!(listed[0].event.server_seq, Some(10));
        assert_eq!(listed[0].sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn list_pending_events_excludes_assigned_events() {
        let storage = MemoryStorage::new();
        let pending = sample_event(1);
        let assigned = sample_event(2);
        let assigned_id = assigned.event_id().to_string();
        storage.upsert_events("ws-1", &[pending, assigned]).await.unwrap();
        storage
            .assign_server_seq("ws-1", &[ServerSeqMapping { event_id: assigned_id, server_seq: 1 }])
            .await
            .unwrap();

        let pending_events = storage.list_pending_events("ws-1", 0).await.unwrap();
        assert_eq!(pending_events.len(), 1);
    }

    #[tokio::test]
    async fn save_sync_attempt_keeps_at_least_the_minimum_ring() {
        let storage = MemoryStorage::new();
        for i in 0..250 {
            storage
                .save_sync_attempt(
                    "ws-1",
                    &SyncAttempt {
                        workspace_id: "ws-1".into(),
                        at_ms: i,
                        outcome: notewire_core::storage::SyncAttemptOutcome::Success,
                        pushed_count: 0,
                        pulled_count: 0,
                        error_code: None,
                        error_message: None,
                    },
                )
                .await
                .unwrap();
        }
        let attempts = storage.list_sync_attempts("ws-1", 500).await.unwrap();
        assert!(attempts.len() >= notewire_core::storage::MIN_SYNC_ATTEMPT_RING);
        assert_eq!(attempts[0].at_ms, 249);
    }

    #[tokio::test]
    async fn device_state_round_trips() {
        let storage = MemoryStorage::new();
        let state = DeviceState::new("ws-1", "user-1", "device-a");
        storage.save_device_state(&state).await.unwrap();
        let fetched = storage.get_device_state("ws-1").await.unwrap().unwrap();
        assert_eq!(fetched.device_id, "device-a");
    }
}
