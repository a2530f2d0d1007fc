//! `notewire-storage-sqlite`: the durable `StorageAdapter` implementation (C2)
//! backed by an embedded SQLite database, diesel, and r2d2 pooling. Reads go
//! through the pool directly; writes are serialized through a single-writer
//! actor (`write_actor`) so SQLite's one-writer constraint never surfaces as
//! contention between concurrent callers.

mod adapter;
mod db;
mod errors;
mod models;
mod schema;
mod write_actor;

pub use adapter::SqliteStorage;
pub use db::{create_pool, get_connection, init, run_migrations, SqlitePool, SqlitePooledConnection};
pub use errors::{Result, StorageError};
pub use write_actor::{spawn_writer, WriteHandle};

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use notewire_core::event::{create_event, EventPayload};
    use notewire_core::{DeviceState, StorageAdapter, StoredEvent, SyncStatus};

    use super::*;

    async fn setup() -> SqliteStorage {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = init(dir.path()).expect("init");
        run_migrations(&db_path).expect("migrate");
        let pool = create_pool(&db_path).expect("pool");
        let writer = spawn_writer(pool.clone());
        // Keep the tempdir alive for the duration of the test by leaking it;
        // the OS reclaims it on process exit and these are short-lived tests.
        std::mem::forget(dir);
        SqliteStorage::new(Arc::new(pool), writer)
    }

    #[tokio::test]
    async fn device_state_round_trips() {
        let storage = setup().await;
        assert!(storage.get_device_state("ws-1").await.unwrap().is_none());

        let state = DeviceState::new("ws-1", "user-1", "device-1");
        storage.save_device_state(&state).await.unwrap();

        let loaded = storage.get_device_state("ws-1").await.unwrap().unwrap();
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn allocate_local_seq_is_gap_free_and_monotonic() {
        let storage = setup().await;
        let mut seqs = Vec::new();
        for _ in 0..5 {
            seqs.push(storage.allocate_local_seq("ws-1", "device-1").await.unwrap());
        }
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    fn stored(local_seq: i64) -> StoredEvent {
        let event = create_event(
            EventPayload::CaptureTextCreate { atom_id: "atom-1".into(), title: None, body: "hi".into() },
            "device-1",
            "ws-1",
            local_seq,
        );
        StoredEvent::new_local(event)
    }

    #[tokio::test]
    async fn upsert_then_list_events_round_trips() {
        let storage = setup().await;
        let event = stored(1);
        storage.upsert_events("ws-1", std::slice::from_ref(&event)).await.unwrap();

        let listed = storage.list_events("ws-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].event.event_id, event.event.event_id);
        assert_eq!(listed[0].sync_status, SyncStatus::SavedLocal);
    }

    #[tokio::test]
    async fn assign_server_seq_transitions_pending_event_to_synced() {
        let storage = setup().await;
        let event = stored(1);
        let event_id = event.event.event_id.clone();
        storage.upsert_events("ws-1", std::slice::from_ref(&event)).await.unwrap();

        let changed = storage
            .assign_server_seq(
                "ws-1",
                &[notewire_core::storage::ServerSeqMapping { event_id: event_id.clone(), server_seq: 42 }],
            )
            .await
            .unwrap();
        assert!(changed);

        let pending = storage.list_pending_events("ws-1", 0).await.unwrap();
        assert!(pending.is_empty());

        let all = storage.list_events("ws-1").await.unwrap();
        assert_eq!(all[0].event.server_seq, Some(42));
        assert_eq!(all[0].sync_status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn sync_attempt_ring_keeps_the_most_recent_window() {
        let storage = setup().await;
        for i in 0..(notewire_core::storage::MIN_SYNC_ATTEMPT_RING + 10) {
            let attempt = notewire_core::storage::SyncAttempt {
                workspace_id: "ws-1".into(),
                at_ms: i as i64,
                outcome: notewire_core::storage::SyncAttemptOutcome::Success,
                pushed_count: 1,
                pulled_count: 0,
                error_code: None,
                error_message: None,
            };
            storage.save_sync_attempt("ws-1", &attempt).await.unwrap();
        }
        let attempts = storage
            .list_sync_attempts("ws-1", notewire_core::storage::MIN_SYNC_ATTEMPT_RING + 50)
            .await
            .unwrap();
        assert_eq!(attempts.len(), notewire_core::storage::MIN_SYNC_ATTEMPT_RING);
        assert_eq!(attempts[0].at_ms, (notewire_core::storage::MIN_SYNC_ATTEMPT_RING + 9) as i64);
    }
}
