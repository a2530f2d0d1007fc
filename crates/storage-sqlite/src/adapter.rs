//! `SqliteStorage` — the durable `StorageAdapter` implementation (C2).
//! Reads go straight through the r2d2 pool; writes funnel through the single
//! write actor so SQLite's one-writer-at-a-time constraint is never a
//! source of `SQLITE_BUSY` contention between concurrent callers.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use notewire_core::errors::Result as CoreResult;
use notewire_core::projection::{Atom, AtomVersion, Conflict, ConflictStatus, InboxItem};
use notewire_core::storage::{
    merge_stored_event, ServerSeqMapping, SyncAttempt, SyncAttemptOutcome, DEFAULT_PENDING_LIMIT,
    MIN_SYNC_ATTEMPT_RING,
};
use notewire_core::{BlobManifestEntry, CoreError, DeviceState, Event, Projection, StorageAdapter, StoredEvent, SyncStatus};

use crate::db::SqlitePool;
use crate::errors::StorageError;
use crate::models::{
    AtomRow, AtomVersionRow, BlobManifestRow, ConflictRow, DeviceStateRow, EventRow, InboxItemRow, NewSyncAttemptRow,
    ProjectionMetaRow, SyncAttemptRow,
};
use crate::schema::{atom_versions, atoms, blob_manifest, conflicts, device_state, events, inbox_items, projection_meta, sync_attempts};
use crate::write_actor::WriteHandle;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    writer: WriteHandle,
}

impl SqliteStorage {
    pub fn new(pool: Arc<SqlitePool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn sync_status_to_text(status: SyncStatus) -> String {
    serde_json::to_value(status).unwrap_or_default().as_str().unwrap_or("saved_local").to_string()
}

fn sync_status_from_text(text: &str) -> SyncStatus {
    serde_json::from_value(serde_json::Value::String(text.to_string())).unwrap_or(SyncStatus::SyncFailed)
}

fn event_row_to_stored(row: EventRow) -> CoreResult<StoredEvent> {
    let event: Event = serde_json::from_str(&row.payload_json)?;
    Ok(StoredEvent {
        event,
        sync_status: sync_status_from_text(&row.sync_status),
        error_code: row.error_code,
        error_message: row.error_message,
    })
}

fn stored_to_event_row(workspace_id: &str, stored: &StoredEvent) -> CoreResult<EventRow> {
    let payload_json = serde_json::to_string(&stored.event)?;
    Ok(EventRow {
        workspace_id: workspace_id.to_string(),
        event_id: stored.event.event_id.clone(),
        event_schema_version: stored.event.event_schema_version,
        payload_schema_version: stored.event.payload_schema_version,
        created_at_ms: stored.event.created_at_ms,
        device_id: stored.event.device_id.clone(),
        local_seq: stored.event.local_seq,
        server_seq: stored.event.server_seq,
        payload_json,
        sync_status: sync_status_to_text(stored.sync_status),
        error_code: stored.error_code.clone(),
        error_message: stored.error_message.clone(),
    })
}

fn device_state_to_row(state: &DeviceState) -> DeviceStateRow {
    DeviceStateRow {
        workspace_id: state.workspace_id.clone(),
        user_id: state.user_id.clone(),
        device_id: state.device_id.clone(),
        next_local_seq: state.next_local_seq,
        last_pulled_seq: state.last_pulled_seq,
        last_applied_seq: state.last_applied_seq,
        projection_dirty: state.projection_dirty,
        last_sync_success_at_ms: state.last_sync_success_at_ms,
        last_error_code: state.last_error_code.clone(),
        last_error_message: state.last_error_message.clone(),
    }
}

fn row_to_device_state(row: DeviceStateRow) -> DeviceState {
    DeviceState {
        workspace_id: row.workspace_id,
        user_id: row.user_id,
        device_id: row.device_id,
        next_local_seq: row.next_local_seq,
        last_pulled_seq: row.last_pulled_seq,
        last_applied_seq: row.last_applied_seq,
        projection_dirty: row.projection_dirty,
        last_sync_success_at_ms: row.last_sync_success_at_ms,
        last_error_code: row.last_error_code,
        last_error_message: row.last_error_message,
    }
}

#[async_trait]
impl StorageAdapter for SqliteStorage {
    async fn get_device_state(&self, workspace_id: &str) -> CoreResult<Option<DeviceState>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;
        let row = device_state::table
            .find(workspace_id)
            .first::<DeviceStateRow>(&mut conn)
            .optional()
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        Ok(row.map(row_to_device_state))
    }

    async fn save_device_state(&self, state: &DeviceState) -> CoreResult<()> {
        let row = device_state_to_row(state);
        self.writer
            .exec(move |conn| {
                diesel::insert_into(device_state::table)
                    .values(&row)
                    .on_conflict(device_state::workspace_id)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }

    async fn allocate_local_seq(&self, workspace_id: &str, device_id: &str) -> CoreResult<i64> {
        let workspace_id = workspace_id.to_string();
        let device_id = device_id.to_string();
        self.writer
            .exec(move |conn| {
                let existing = device_state::table
                    .find(&workspace_id)
                    .first::<DeviceStateRow>(conn)
                    .optional()
                    .map_err(StorageError::from)?;

                let mut row = existing.unwrap_or_else(|| DeviceStateRow {
                    workspace_id: workspace_id.clone(),
                    user_id: String::new(),
                    device_id: device_id.clone(),
                    next_local_seq: 1,
                    last_pulled_seq: 0,
                    last_applied_seq: 0,
                    projection_dirty: false,
                    last_sync_success_at_ms: None,
                    last_error_code: None,
                    last_error_message: None,
                });
                let allocated = row.next_local_seq;
                row.next_local_seq += 1;

                diesel::insert_into(device_state::table)
                    .values(&row)
                    .on_conflict(device_state::workspace_id)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;

                Ok(allocated)
            })
            .await
            .map_err(CoreError::from)
    }

    async fn upsert_events(&self, workspace_id: &str, events_in: &[StoredEvent]) -> CoreResult<()> {
        let workspace_id = workspace_id.to_string();
        let incoming = events_in.to_vec();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    for stored in &incoming {
                        let existing_row = events::table
                            .find((&workspace_id, &stored.event.event_id))
                            .first::<EventRow>(conn)
                            .optional()
                            .map_err(StorageError::from)?;

                        let merged = match existing_row {
                            Some(existing) => {
                                let existing_stored = event_row_to_stored(existing)
                                    .map_err(|err| StorageError::Corrupt(err.to_string()))?;
                                merge_stored_event(&existing_stored, stored)
                            }
                            None => stored.clone(),
                        };

                        let row = stored_to_event_row(&workspace_id, &merged)
                            .map_err(|err| StorageError::Corrupt(err.to_string()))?;

                        diesel::insert_into(events::table)
                            .values(&row)
                            .on_conflict((events::workspace_id, events::event_id))
                            .do_update()
                            .set(&row)
                            .execute(conn)
                            .map_err(StorageError::from)?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(CoreError::from)
    }

    async fn list_events(&self, workspace_id: &str) -> CoreResult<Vec<StoredEvent>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;
        let rows = events::table
            .filter(events::workspace_id.eq(workspace_id))
            .load::<EventRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        let mut stored: Vec<StoredEvent> = rows.into_iter().map(event_row_to_stored).collect::<CoreResult<_>>()?;
        notewire_core::projection::canonical_fold_order(&mut stored);
        Ok(stored)
    }

    async fn assign_server_seq(&self, workspace_id: &str, mappings: &[ServerSeqMapping]) -> CoreResult<bool> {
        let workspace_id = workspace_id.to_string();
        let mappings = mappings.to_vec();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    let mut changed = false;
                    for mapping in &mappings {
                        let existing = events::table
                            .find((&workspace_id, &mapping.event_id))
                            .first::<EventRow>(conn)
                            .optional()
                            .map_err(StorageError::from)?;
                        let Some(mut row) = existing else { continue };
                        if row.server_seq != Some(mapping.server_seq) {
                            row.server_seq = Some(mapping.server_seq);
                            row.sync_status = sync_status_to_text(SyncStatus::Synced);
                            row.error_code = None;
                            row.error_message = None;
                            diesel::update(events::table.find((&workspace_id, &mapping.event_id)))
                                .set(&row)
                                .execute(conn)
                                .map_err(StorageError::from)?;
                            changed = true;
                        }
                    }
                    Ok(changed)
                })
            })
            .await
            .map_err(CoreError::from)
    }

    async fn list_pending_events(&self, workspace_id: &str, limit: usize) -> CoreResult<Vec<StoredEvent>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;
        let limit = if limit == 0 { DEFAULT_PENDING_LIMIT } else { limit };
        let rows = events::table
            .filter(events::workspace_id.eq(workspace_id))
            .filter(events::server_seq.is_null())
            .order((events::local_seq.asc(), events::created_at_ms.asc(), events::event_id.asc()))
            .limit(limit as i64)
            .load::<EventRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        rows.into_iter().map(event_row_to_stored).collect()
    }

    async fn update_event_status(
        &self,
        workspace_id: &str,
        event_id: &str,
        status: SyncStatus,
        error_code: Option<String>,
        error_message: Option<String>,
    ) -> CoreResult<()> {
        let workspace_id = workspace_id.to_string();
        let event_id = event_id.to_string();
        self.writer
            .exec(move |conn| {
                let updated = diesel::update(events::table.find((&workspace_id, &event_id)))
                    .set((
                        events::sync_status.eq(sync_status_to_text(status)),
                        events::error_code.eq(&error_code),
                        events::error_message.eq(&error_message),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                if updated == 0 {
                    return Err(StorageError::Corrupt(format!("unknown event {event_id}")));
                }
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }

    async fn save_projection(&self, workspace_id: &str, projection: &Projection) -> CoreResult<()> {
        let workspace_id = workspace_id.to_string();
        let projection = projection.clone();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    diesel::delete(atoms::table.filter(atoms::workspace_id.eq(&workspace_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    diesel::delete(atom_versions::table.filter(atom_versions::workspace_id.eq(&workspace_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    diesel::delete(conflicts::table.filter(conflicts::workspace_id.eq(&workspace_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;
                    diesel::delete(inbox_items::table.filter(inbox_items::workspace_id.eq(&workspace_id)))
                        .execute(conn)
                        .map_err(StorageError::from)?;

                    for atom in projection.atoms.values() {
                        let row = AtomRow {
                            workspace_id: workspace_id.clone(),
                            atom_id: atom.atom_id.clone(),
                            title: atom.title.clone(),
                            body: atom.body.clone(),
                            created_at_ms: atom.created_at_ms,
                            updated_at_ms: atom.updated_at_ms,
                            capture_event_id: atom.capture_event_id.clone(),
                            head_version_ids_json: serde_json::to_string(&atom.head_version_ids)
                                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                            needs_resolution: atom.needs_resolution,
                            blob_hashes_json: serde_json::to_string(&atom.blob_hashes)
                                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                        };
                        diesel::insert_into(atoms::table).values(&row).execute(conn).map_err(StorageError::from)?;
                    }

                    for version in &projection.atom_versions {
                        let row = AtomVersionRow {
                            workspace_id: workspace_id.clone(),
                            version_id: version.version_id.clone(),
                            atom_id: version.atom_id.clone(),
                            parent_version_id: version.parent_version_id.clone(),
                            body: version.body.clone(),
                            created_at_ms: version.created_at_ms,
                            server_seq: version.server_seq,
                            local_seq: version.local_seq,
                        };
                        diesel::insert_into(atom_versions::table).values(&row).execute(conn).map_err(StorageError::from)?;
                    }

                    for conflict in projection.conflicts.values() {
                        let row = ConflictRow {
                            workspace_id: workspace_id.clone(),
                            conflict_id: conflict.conflict_id.clone(),
                            atom_id: conflict.atom_id.clone(),
                            version_ids_json: serde_json::to_string(&conflict.version_ids)
                                .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                            reason: conflict.reason.clone(),
                            status: match conflict.status {
                                ConflictStatus::Open => "open".to_string(),
                                ConflictStatus::Resolved => "resolved".to_string(),
                            },
                            created_at_ms: conflict.created_at_ms,
                            updated_at_ms: conflict.updated_at_ms,
                        };
                        diesel::insert_into(conflicts::table).values(&row).execute(conn).map_err(StorageError::from)?;
                    }

                    for item in &projection.inbox {
                        let row = InboxItemRow {
                            workspace_id: workspace_id.clone(),
                            id: item.id.clone(),
                            atom_id: item.atom_id.clone(),
                            title: item.title.clone(),
                            preview: item.preview.clone(),
                            created_at_ms: item.created_at_ms,
                            updated_at_ms: item.updated_at_ms,
                            source_event_id: item.source_event_id.clone(),
                            sync_status: sync_status_to_text(item.sync_status),
                            needs_resolution: item.needs_resolution,
                            server_seq: item.server_seq,
                        };
                        diesel::insert_into(inbox_items::table).values(&row).execute(conn).map_err(StorageError::from)?;
                    }

                    let meta = ProjectionMetaRow {
                        workspace_id: workspace_id.clone(),
                        last_applied_seq: projection.last_applied_seq,
                        referenced_blobs_json: serde_json::to_string(&projection.referenced_blobs)
                            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
                        updated_at_ms: projection.last_applied_seq.max(0),
                    };
                    diesel::insert_into(projection_meta::table)
                        .values(&meta)
                        .on_conflict(projection_meta::workspace_id)
                        .do_update()
                        .set(&meta)
                        .execute(conn)
                        .map_err(StorageError::from)?;

                    Ok(())
                })
            })
            .await
            .map_err(CoreError::from)
    }

    async fn get_projection(&self, workspace_id: &str) -> CoreResult<Option<Projection>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;

        let meta = projection_meta::table
            .find(workspace_id)
            .first::<ProjectionMetaRow>(&mut conn)
            .optional()
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        let Some(meta) = meta else { return Ok(None) };

        let atom_rows = atoms::table
            .filter(atoms::workspace_id.eq(workspace_id))
            .load::<AtomRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        let version_rows = atom_versions::table
            .filter(atom_versions::workspace_id.eq(workspace_id))
            .load::<AtomVersionRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        let conflict_rows = conflicts::table
            .filter(conflicts::workspace_id.eq(workspace_id))
            .load::<ConflictRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        let inbox_rows = inbox_items::table
            .filter(inbox_items::workspace_id.eq(workspace_id))
            .load::<InboxItemRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;

        let mut atoms_map = std::collections::BTreeMap::new();
        for row in atom_rows {
            let atom = Atom {
                atom_id: row.atom_id.clone(),
                title: row.title,
                body: row.body,
                created_at_ms: row.created_at_ms,
                updated_at_ms: row.updated_at_ms,
                capture_event_id: row.capture_event_id,
                head_version_ids: serde_json::from_str(&row.head_version_ids_json)?,
                needs_resolution: row.needs_resolution,
                blob_hashes: serde_json::from_str(&row.blob_hashes_json)?,
            };
            atoms_map.insert(row.atom_id, atom);
        }

        let atom_versions_vec = version_rows
            .into_iter()
            .map(|row| AtomVersion {
                atom_id: row.atom_id,
                version_id: row.version_id,
                parent_version_id: row.parent_version_id,
                body: row.body,
                created_at_ms: row.created_at_ms,
                server_seq: row.server_seq,
                local_seq: row.local_seq,
            })
            .collect();

        let mut conflicts_map = std::collections::BTreeMap::new();
        for row in conflict_rows {
            let conflict = Conflict {
                conflict_id: row.conflict_id.clone(),
                atom_id: row.atom_id,
                version_ids: serde_json::from_str(&row.version_ids_json)?,
                reason: row.reason,
                status: if row.status == "resolved" { ConflictStatus::Resolved } else { ConflictStatus::Open },
                created_at_ms: row.created_at_ms,
                updated_at_ms: row.updated_at_ms,
            };
            conflicts_map.insert(row.conflict_id, conflict);
        }

        let inbox_vec = inbox_rows
            .into_iter()
            .map(|row| InboxItem {
                id: row.id,
                atom_id: row.atom_id,
                title: row.title,
                preview: row.preview,
                created_at_ms: row.created_at_ms,
                updated_at_ms: row.updated_at_ms,
                source_event_id: row.source_event_id,
                sync_status: sync_status_from_text(&row.sync_status),
                needs_resolution: row.needs_resolution,
                server_seq: row.server_seq,
            })
            .collect();

        Ok(Some(Projection {
            atoms: atoms_map,
            atom_versions: atom_versions_vec,
            conflicts: conflicts_map,
            inbox: inbox_vec,
            referenced_blobs: serde_json::from_str(&meta.referenced_blobs_json)?,
            last_applied_seq: meta.last_applied_seq,
        }))
    }

    async fn save_blob_manifest(&self, workspace_id: &str, entry: &BlobManifestEntry) -> CoreResult<()> {
        let workspace_id = workspace_id.to_string();
        let entry = entry.clone();
        self.writer
            .exec(move |conn| {
                let row = BlobManifestRow {
                    workspace_id: workspace_id.clone(),
                    hash: entry.hash.clone(),
                    size: entry.size,
                    content_type: entry.content_type.clone(),
                    local_path: entry.local_path.clone(),
                    is_present: entry.is_present,
                    sync_status: sync_status_to_text(entry.sync_status),
                    error_code: entry.error_code.clone(),
                    error_message: entry.error_message.clone(),
                    updated_at_ms: entry.updated_at_ms,
                };
                diesel::insert_into(blob_manifest::table)
                    .values(&row)
                    .on_conflict((blob_manifest::workspace_id, blob_manifest::hash))
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
            .map_err(CoreError::from)
    }

    async fn list_blob_manifest(&self, workspace_id: &str) -> CoreResult<Vec<BlobManifestEntry>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;
        let rows = blob_manifest::table
            .filter(blob_manifest::workspace_id.eq(workspace_id))
            .order(blob_manifest::hash.asc())
            .load::<BlobManifestRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| BlobManifestEntry {
                hash: row.hash,
                size: row.size,
                content_type: row.content_type,
                local_path: row.local_path,
                is_present: row.is_present,
                sync_status: sync_status_from_text(&row.sync_status),
                error_code: row.error_code,
                error_message: row.error_message,
                updated_at_ms: row.updated_at_ms,
            })
            .collect())
    }

    async fn save_sync_attempt(&self, workspace_id: &str, attempt: &SyncAttempt) -> CoreResult<()> {
        let workspace_id = workspace_id.to_string();
        let attempt = attempt.clone();
        self.writer
            .exec(move |conn| {
                conn.transaction(|conn| {
                    let row = NewSyncAttemptRow {
                        workspace_id: workspace_id.clone(),
                        at_ms: attempt.at_ms,
                        outcome: match attempt.outcome {
                            SyncAttemptOutcome::Success => "success".to_string(),
                            SyncAttemptOutcome::Error => "error".to_string(),
                        },
                        pushed_count: attempt.pushed_count as i64,
                        pulled_count: attempt.pulled_count as i64,
                        error_code: attempt.error_code.clone(),
                        error_message: attempt.error_message.clone(),
                    };
                    diesel::insert_into(sync_attempts::table).values(&row).execute(conn).map_err(StorageError::from)?;

                    let count: i64 = sync_attempts::table
                        .filter(sync_attempts::workspace_id.eq(&workspace_id))
                        .count()
                        .get_result(conn)
                        .map_err(StorageError::from)?;
                    let overflow = count - MIN_SYNC_ATTEMPT_RING as i64;
                    if overflow > 0 {
                        let stale_ids: Vec<i64> = sync_attempts::table
                            .filter(sync_attempts::workspace_id.eq(&workspace_id))
                            .order(sync_attempts::id.asc())
                            .limit(overflow)
                            .select(sync_attempts::id)
                            .load(conn)
                            .map_err(StorageError::from)?;
                        diesel::delete(sync_attempts::table.filter(sync_attempts::id.eq_any(stale_ids)))
                            .execute(conn)
                            .map_err(StorageError::from)?;
                    }
                    Ok(())
                })
            })
            .await
            .map_err(CoreError::from)
    }

    async fn list_sync_attempts(&self, workspace_id: &str, limit: usize) -> CoreResult<Vec<SyncAttempt>> {
        let mut conn = self.pool.get().map_err(StorageError::from).map_err(CoreError::from)?;
        let rows = sync_attempts::table
            .filter(sync_attempts::workspace_id.eq(workspace_id))
            .order(sync_attempts::id.desc())
            .limit(limit as i64)
            .load::<SyncAttemptRow>(&mut conn)
            .map_err(StorageError::from)
            .map_err(CoreError::from)?;
        Ok(rows
            .into_iter()
            .map(|row| SyncAttempt {
                workspace_id: row.workspace_id,
                at_ms: row.at_ms,
                outcome: if row.outcome == "success" { SyncAttemptOutcome::Success } else { SyncAttemptOutcome::Error },
                pushed_count: row.pushed_count as usize,
                pulled_count: row.pulled_count as usize,
                error_code: row.error_code,
                error_message: row.error_message,
            })
            .collect())
    }
}
