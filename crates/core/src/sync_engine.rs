//! The sync engine (C4): local-seq allocation, the `syncNow` push/pull
//! protocol, status, and retries.
//!
//! The single-flight guard and background loop shape are modeled on the
//! runtime state the device sync commands keep alongside their service
//! context (a `Mutex<()>` cycle guard plus a cancellable background task),
//! generalized here from a concrete service registry into a `SyncEngine`
//! generic over `StorageAdapter` and `Transport`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::device_state::DeviceState;
use crate::errors::{CoreError, Result};
use crate::event::{create_event, migrate_event, EventPayload};
use crate::projection::{build_projection, InboxItem, Projection};
use crate::retry::{backoff_seconds_with_jitter, FOREGROUND_SYNC_INTERVAL_JITTER_SECS, FOREGROUND_SYNC_INTERVAL_SECS};
use crate::storage::{
    ServerSeqMapping, StorageAdapter, SyncAttempt, SyncAttemptOutcome, DEFAULT_PENDING_LIMIT,
};
use crate::stored_event::{StoredEvent, SyncStatus};
use crate::transport::{PullRequest, PushRequest, Transport};

/// A large but bounded scan used only to *count* pending work for status
/// reporting; unlike `listPendingEvents` it is not meant to gate a push batch.
const STATUS_PENDING_SCAN_LIMIT: usize = 100_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatusError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatusSnapshot {
    pub last_success_at_ms: Option<i64>,
    pub pending_events: usize,
    pub pending_blobs: usize,
    pub last_error: Option<SyncStatusError>,
    pub last_pulled_seq: i64,
    pub last_applied_seq: i64,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Orchestrates capture, projection rebuilds, and the `syncNow` protocol for
/// one device in one workspace.
pub struct SyncEngine<S: StorageAdapter, T: Transport> {
    storage: Arc<S>,
    transport: Arc<T>,
    workspace_id: String,
    user_id: String,
    device_id: String,
    cycle_mutex: AsyncMutex<()>,
    cancelled: AtomicBool,
}

impl<S: StorageAdapter + 'static, T: Transport + 'static> SyncEngine<S, T> {
    pub fn new(
        storage: Arc<S>,
        transport: Arc<T>,
        workspace_id: impl Into<String>,
        user_id: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            storage,
            transport,
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            cycle_mutex: AsyncMutex::new(()),
            cancelled: AtomicBool::new(false),
        }
    }

    async fn load_or_init_device_state(&self) -> Result<DeviceState> {
        match self.storage.get_device_state(&self.workspace_id).await? {
            Some(state) => Ok(state),
            None => {
                let state = DeviceState::new(&self.workspace_id, &self.user_id, &self.device_id);
                self.storage.save_device_state(&state).await?;
                Ok(state)
            }
        }
    }

    /// One event appended locally, projection rebuilt; body must be
    /// non-empty after trim.
    pub async fn capture_text(
        &self,
        atom_id: impl Into<String>,
        body: impl Into<String>,
        title: Option<String>,
    ) -> Result<StoredEvent> {
        let body = body.into();
        if body.trim().is_empty() {
            return Err(CoreError::validation("body must be non-empty after trim"));
        }
        self.append_local_event(EventPayload::CaptureTextCreate {
            atom_id: atom_id.into(),
            title,
            body,
        })
        .await
    }

    /// Appends any draft event type locally and rebuilds the projection.
    pub async fn append_local_event(&self, payload: EventPayload) -> Result<StoredEvent> {
        self.load_or_init_device_state().await?;
        let local_seq = self.storage.allocate_local_seq(&self.workspace_id, &self.device_id).await?;
        let event = create_event(payload, &self.device_id, &self.workspace_id, local_seq);
        let stored = StoredEvent::new_local(event);
        self.storage.upsert_events(&self.workspace_id, std::slice::from_ref(&stored)).await?;
        self.rebuild_projection().await?;
        Ok(stored)
    }

    /// The projection inbox; rebuilds first if no projection is cached yet.
    pub async fn get_inbox(&self) -> Result<Vec<InboxItem>> {
        match self.storage.get_projection(&self.workspace_id).await? {
            Some(projection) => Ok(projection.inbox),
            None => Ok(self.rebuild_projection().await?.inbox),
        }
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatusSnapshot> {
        let device_state = self.load_or_init_device_state().await?;
        self.status_snapshot(&device_state).await
    }

    async fn status_snapshot(&self, device_state: &DeviceState) -> Result<SyncStatusSnapshot> {
        let pending = self
            .storage
            .list_pending_events(&self.workspace_id, STATUS_PENDING_SCAN_LIMIT)
            .await?;
        let blobs = self.storage.list_blob_manifest(&self.workspace_id).await?;
        let pending_blobs = blobs.iter().filter(|entry| entry.is_pending()).count();
        Ok(SyncStatusSnapshot {
            last_success_at_ms: device_state.last_sync_success_at_ms,
            pending_events: pending.len(),
            pending_blobs,
            last_error: device_state.last_error_code.clone().map(|code| SyncStatusError {
                code,
                message: device_state.last_error_message.clone().unwrap_or_default(),
            }),
            last_pulled_seq: device_state.last_pulled_seq,
            last_applied_seq: device_state.last_applied_seq,
        })
    }

    /// Forces a re-fold from the log, persists the projection, updates
    /// `lastAppliedSeq`, and clears `projectionDirty`.
    pub async fn rebuild_projection(&self) -> Result<Projection> {
        let mut events = self.storage.list_events(&self.workspace_id).await?;
        let projection = build_projection(&mut events);
        self.storage.save_projection(&self.workspace_id, &projection).await?;

        let mut device_state = self.load_or_init_device_state().await?;
        device_state.last_applied_seq = projection.last_applied_seq;
        device_state.projection_dirty = false;
        self.storage.save_device_state(&device_state).await?;
        Ok(projection)
    }

    /// The central protocol: single-flight per device, concurrent calls are
    /// serialized on `cycle_mutex`.
    pub async fn sync_now(&self) -> Result<SyncStatusSnapshot> {
        let _guard = self.cycle_mutex.lock().await;
        match self.run_sync_cycle().await {
            Ok(snapshot) => Ok(snapshot),
            Err(err) => {
                self.record_failed_attempt(&err).await;
                Err(err)
            }
        }
    }

    async fn record_failed_attempt(&self, err: &CoreError) {
        if let Ok(mut device_state) = self.load_or_init_device_state().await {
            device_state.set_error(format!("{:?}", err.code), err.message.clone());
            let _ = self.storage.save_device_state(&device_state).await;
        }
        let attempt = SyncAttempt {
            workspace_id: self.workspace_id.clone(),
            at_ms: now_ms(),
            outcome: SyncAttemptOutcome::Error,
            pushed_count: 0,
            pulled_count: 0,
            error_code: Some(format!("{:?}", err.code)),
            error_message: Some(err.message.clone()),
        };
        let _ = self.storage.save_sync_attempt(&self.workspace_id, &attempt).await;
    }

    async fn run_sync_cycle(&self) -> Result<SyncStatusSnapshot> {
        let mut device_state = self.load_or_init_device_state().await?;
        let pull_cursor = device_state.last_pulled_seq;

        let pending = self
            .storage
            .list_pending_events(&self.workspace_id, DEFAULT_PENDING_LIMIT)
            .await?;
        for stored in &pending {
            self.storage
                .update_event_status(&self.workspace_id, stored.event_id(), SyncStatus::Syncing, None, None)
                .await?;
        }

        let mut cursor_after_push = pull_cursor;
        let mut projection_dirty = false;
        let mut pushed_count = 0usize;

        if !pending.is_empty() {
            let events: Vec<Value> = pending
                .iter()
                .map(|stored| serde_json::to_value(&stored.event).map_err(CoreError::from))
                .collect::<Result<_>>()?;
            let response = self
                .transport
                .push(PushRequest {
                    workspace_id: self.workspace_id.clone(),
                    user_id: self.user_id.clone(),
                    device_id: self.device_id.clone(),
                    client_cursor: pull_cursor,
                    events,
                })
                .await?;

            pushed_count = response.accepted.len();
            let mappings: Vec<ServerSeqMapping> = response
                .accepted
                .iter()
                .map(|accepted| ServerSeqMapping {
                    event_id: accepted.event_id.clone(),
                    server_seq: accepted.server_seq,
                })
                .collect();
            if !mappings.is_empty() && self.storage.assign_server_seq(&self.workspace_id, &mappings).await? {
                projection_dirty = true;
            }
            for accepted in &response.accepted {
                self.storage
                    .update_event_status(&self.workspace_id, &accepted.event_id, SyncStatus::Synced, None, None)
                    .await?;
            }
            cursor_after_push = cursor_after_push.max(response.cursor);
        }

        let pull_response = self
            .transport
            .pull(PullRequest {
                workspace_id: self.workspace_id.clone(),
                user_id: self.user_id.clone(),
                device_id: self.device_id.clone(),
                cursor: pull_cursor,
            })
            .await?;

        let mut pulled_stored = Vec::with_capacity(pull_response.events.len());
        let mut pull_mappings = Vec::new();
        for raw in &pull_response.events {
            let event = migrate_event(raw)?;
            if let Some(server_seq) = event.server_seq {
                pull_mappings.push(ServerSeqMapping {
                    event_id: event.event_id.clone(),
                    server_seq,
                });
            }
            pulled_stored.push(StoredEvent {
                event,
                sync_status: SyncStatus::Synced,
                error_code: None,
                error_message: None,
            });
        }
        let pulled_count = pulled_stored.len();
        if !pulled_stored.is_empty() {
            self.storage.upsert_events(&self.workspace_id, &pulled_stored).await?;
        }
        if !pull_mappings.is_empty() && self.storage.assign_server_seq(&self.workspace_id, &pull_mappings).await? {
            projection_dirty = true;
        }

        device_state.last_pulled_seq = device_state
            .last_pulled_seq
            .max(cursor_after_push)
            .max(pull_response.cursor);

        if projection_dirty {
            device_state.projection_dirty = true;
            self.storage.save_device_state(&device_state).await?;
            self.rebuild_projection().await?;
            device_state = self
                .storage
                .get_device_state(&self.workspace_id)
                .await?
                .ok_or_else(|| CoreError::storage_corrupt("device state missing after projection rebuild"))?;
            device_state.last_pulled_seq = device_state
                .last_pulled_seq
                .max(cursor_after_push)
                .max(pull_response.cursor);
        }

        device_state.last_sync_success_at_ms = Some(now_ms());
        device_state.clear_error();
        self.storage.save_device_state(&device_state).await?;

        let attempt = SyncAttempt {
            workspace_id: self.workspace_id.clone(),
            at_ms: now_ms(),
            outcome: SyncAttemptOutcome::Success,
            pushed_count,
            pulled_count,
            error_code: None,
            error_message: None,
        };
        self.storage.save_sync_attempt(&self.workspace_id, &attempt).await?;

        self.status_snapshot(&device_state).await
    }

    pub fn request_cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Spawns a background task that calls `syncNow` on a jittered foreground
    /// interval, with the retry backoff widening the gap after consecutive
    /// failures. Intended for long-running processes; short-lived callers
    /// (CLIs, tests) should just call `sync_now` directly.
    pub fn spawn_background_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut consecutive_failures = 0i32;
            while !engine.cancelled.load(Ordering::SeqCst) {
                let jitter_roll = (rand_jitter_roll)();
                let base_wait = FOREGROUND_SYNC_INTERVAL_SECS
                    + (jitter_roll * FOREGROUND_SYNC_INTERVAL_JITTER_SECS as f64) as u64;
                let wait_secs = if consecutive_failures > 0 {
                    backoff_seconds_with_jitter(consecutive_failures, jitter_roll) as u64
                } else {
                    base_wait
                };
                tokio::time::sleep(std::time::Duration::from_secs(wait_secs)).await;
                if engine.cancelled.load(Ordering::SeqCst) {
                    break;
                }
                match engine.sync_now().await {
                    Ok(_) => consecutive_failures = 0,
                    Err(err) => {
                        consecutive_failures = (consecutive_failures + 1).min(8);
                        log::warn!("background sync cycle failed: {err}");
                    }
                }
            }
        })
    }
}

fn rand_jitter_roll() -> f64 {
    use rand::Rng;
    rand::thread_rng().gen_range(0.0..1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::BlobManifestEntry;
    use crate::device_state::DeviceState;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    /// A minimal in-process `StorageAdapter` double used only by these unit
    /// tests; the real durable/in-memory implementations live in
    /// `notewire-storage-sqlite` and `notewire-storage-memory`.
    #[derive(Default)]
    struct FakeStorage {
        inner: StdMutex<FakeStorageInner>,
    }

    #[derive(Default)]
    struct FakeStorageInner {
        device_state: Option<DeviceState>,
        next_local_seq: i64,
        events: BTreeMap<String, StoredEvent>,
        projection: Option<Projection>,
        blobs: Vec<BlobManifestEntry>,
        attempts: Vec<SyncAttempt>,
    }

    impl FakeStorage {
        fn new() -> Self {
            Self {
                inner: StdMutex::new(FakeStorageInner {
                    next_local_seq: 1,
                    ..Default::default()
                }),
            }
        }
    }

    #[async_trait::async_trait]
    impl StorageAdapter for FakeStorage {
        async fn get_device_state(&self, _workspace_id: &str) -> Result<Option<DeviceState>> {
            Ok(self.inner.lock().unwrap().device_state.clone())
        }

        async fn save_device_state(&self, state: &DeviceState) -> Result<()> {
            self.inner.lock().unwrap().device_state = Some(state.clone());
            Ok(())
        }

        async fn allocate_local_seq(&self, _workspace_id: &str, _device_id: &str) -> Result<i64> {
            let mut inner = self.inner.lock().unwrap();
            let seq = inner.next_local_seq;
            inner.next_local_seq += 1;
            Ok(seq)
        }

        async fn upsert_events(&self, _workspace_id: &str, events: &[StoredEvent]) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            for incoming in events {
                let key = incoming.event_id().to_string();
                let merged = match inner.events.get(&key) {
                    Some(existing) => crate::storage::merge_stored_event(existing, incoming),
                    None => incoming.clone(),
                };
                inner.events.insert(key, merged);
            }
            Ok(())
        }

        async fn list_events(&self, _workspace_id: &str) -> Result<Vec<StoredEvent>> {
            let inner = self.inner.lock().unwrap();
            let mut events: Vec<StoredEvent> = inner.events.values().cloned().collect();
            crate::projection::canonical_fold_order(&mut events);
            Ok(events)
        }

        async fn assign_server_seq(&self, _workspace_id: &str, mappings: &[ServerSeqMapping]) -> Result<bool> {
            let mut inner = self.inner.lock().unwrap();
            let mut changed = false;
            for mapping in mappings {
                if let Some(stored) = inner.events.get_mut(&mapping.event_id) {
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

        async fn list_pending_events(&self, _workspace_id: &str, limit: usize) -> Result<Vec<StoredEvent>> {
            let inner = self.inner.lock().unwrap();
            let mut pending: Vec<StoredEvent> = inner
                .events
                .values()
                .filter(|stored| stored.event.server_seq.is_none())
                .cloned()
                .collect();
            pending.sort_by(|a, b| {
                a.event
                    .local_seq
                    .cmp(&b.event.local_seq)
                    .then(a.event.created_at_ms.cmp(&b.event.created_at_ms))
                    .then(a.event.event_id.cmp(&b.event.event_id))
            });
            pending.truncate(limit);
            Ok(pending)
        }

        async fn update_event_status(
            &self,
            _workspace_id: &str,
            event_id: &str,
            status: SyncStatus,
            error_code: Option<String>,
            error_message: Option<String>,
        ) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            if let Some(stored) = inner.events.get_mut(event_id) {
                stored.sync_status = status;
                stored.error_code = error_code;
                stored.error_message = error_message;
            }
            Ok(())
        }

        async fn save_projection(&self, _workspace_id: &str, projection: &Projection) -> Result<()> {
            self.inner.lock().unwrap().projection = Some(projection.clone());
            Ok(())
        }

        async fn get_projection(&self, _workspace_id: &str) -> Result<Option<Projection>> {
            Ok(self.inner.lock().unwrap().projection.clone())
        }

        async fn save_blob_manifest(&self, _workspace_id: &str, entry: &BlobManifestEntry) -> Result<()> {
            let mut inner = self.inner.lock().unwrap();
            inner.blobs.retain(|existing| existing.hash != entry.hash);
            inner.blobs.push(entry.clone());
            Ok(())
        }

        async fn list_blob_manifest(&self, _workspace_id: &str) -> Result<Vec<BlobManifestEntry>> {
            Ok(self.inner.lock().unwrap().blobs.clone())
        }

        async fn save_sync_attempt(&self, _workspace_id: &str, attempt: &SyncAttempt) -> Result<()> {
            self.inner.lock().unwrap().attempts.push(attempt.clone());
            Ok(())
        }

        async fn list_sync_attempts(&self, _workspace_id: &str, limit: usize) -> Result<Vec<SyncAttempt>> {
            let inner = self.inner.lock().unwrap();
            Ok(inner.attempts.iter().rev().take(limit).cloned().collect())
        }
    }

    /// A minimal in-process `Transport` double used only by these unit tests;
    /// the real HTTP/disabled implementations live in `notewire-transport`.
    struct FakeRelay {
        next_seq: AtomicUsize,
        log: StdMutex<Vec<Value>>,
    }

    impl FakeRelay {
        fn new() -> Self {
            Self {
                next_seq: AtomicUsize::new(1),
                log: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl Transport for FakeRelay {
        async fn push(&self, request: PushRequest) -> Result<crate::transport::PushResponse> {
            let mut log = self.log.lock().unwrap();
            let mut accepted = Vec::new();
            for mut event in request.events {
                let event_id = event.get("eventId").and_then(Value::as_str).unwrap().to_string();
                let seq = self.next_seq.fetch_add(1, Ordering::SeqCst) as i64;
                event["serverSeq"] = Value::from(seq);
                log.push(event);
                accepted.push(crate::transport::AcceptedEvent {
                    event_id,
                    server_seq: seq,
                });
            }
            let cursor = self.next_seq.load(Ordering::SeqCst) as i64 - 1;
            Ok(crate::transport::PushResponse {
                accepted,
                cursor: cursor.max(request.client_cursor),
                missing_blob_hashes: Vec::new(),
            })
        }

        async fn pull(&self, request: PullRequest) -> Result<crate::transport::PullResponse> {
            let log = self.log.lock().unwrap();
            let events: Vec<Value> = log
                .iter()
                .filter(|e| e.get("serverSeq").and_then(Value::as_i64).unwrap_or(0) > request.cursor)
                .cloned()
                .collect();
            let cursor = events
                .iter()
                .filter_map(|e| e.get("serverSeq").and_then(Value::as_i64))
                .max()
                .unwrap_or(request.cursor);
            Ok(crate::transport::PullResponse {
                events,
                cursor,
                conflicts: Vec::new(),
            })
        }

        async fn upload_blob(&self, _workspace_id: &str, _hash: &str, _content_type: &str, _bytes: Vec<u8>) -> Result<()> {
            Ok(())
        }

        async fn download_blob(&self, _workspace_id: &str, _hash: &str) -> Result<Vec<u8>> {
            Err(CoreError::network("no blob in fake relay"))
        }
    }

    fn make_engine() -> Arc<SyncEngine<FakeStorage, FakeRelay>> {
        let storage = Arc::new(FakeStorage::new());
        let transport = Arc::new(FakeRelay::new());
        Arc::new(SyncEngine::new(storage, transport, "ws-1", "user-1", "device-a"))
    }

    #[tokio::test]
    async fn capture_then_sync_assigns_a_server_seq() {
        let engine = make_engine();
        engine.capture_text("atom-1", "hello", None).await.unwrap();
        let status = engine.sync_now().await.unwrap();
        assert_eq!(status.pending_events, 0);
        let inbox = engine.get_inbox().await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].server_seq.is_some());
    }

    #[tokio::test]
    async fn repeated_sync_with_no_activity_is_a_no_op() {
        let engine = make_engine();
        engine.capture_text("atom-1", "hello", None).await.unwrap();
        let first = engine.sync_now().await.unwrap();
        let second = engine.sync_now().await.unwrap();
        assert_eq!(first.last_applied_seq, second.last_applied_seq);
        assert_eq!(second.pending_events, 0);
    }

    #[tokio::test]
    async fn offline_capture_is_visible_before_any_sync() {
        let engine = make_engine();
        engine.capture_text("atom-1", "hello", None).await.unwrap();
        let inbox = engine.get_inbox().await.unwrap();
        assert_eq!(inbox.len(), 1);
        assert!(inbox[0].server_seq.is_none());
        assert_eq!(inbox[0].sync_status, SyncStatus::SavedLocal);
    }
}
