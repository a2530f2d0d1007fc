//! The relay's sequencing logic: monotonic per-workspace `serverSeq`
//! allocation, event dedup, device cursor handoff. Runs inside the write
//! actor's single connection, so sequence allocation is serializable per
//! workspace for free.

use diesel::prelude::*;
use serde_json::Value;

use notewire_core::event::{migrate_event, EventPayload};
use notewire_core::errors::CoreError;
use notewire_core::transport::{AcceptedEvent, PullResponse, PushResponse};

use crate::errors::{RelayError, Result};
use crate::models::{DeviceCursorRow, RelayEventRow, WorkspaceSeqRow};
use crate::schema::{blobs, device_cursors, events, workspace_seq};

const PULL_PAGE_LIMIT: i64 = 1000;

fn allocate_next_seq(conn: &mut SqliteConnection, workspace_id: &str) -> Result<i64> {
    let existing = workspace_seq::table
        .find(workspace_id)
        .first::<WorkspaceSeqRow>(conn)
        .optional()?;
    let allocated = existing.as_ref().map(|row| row.next_seq).unwrap_or(1);
    let row = WorkspaceSeqRow { workspace_id: workspace_id.to_string(), next_seq: allocated + 1 };
    diesel::insert_into(workspace_seq::table)
        .values(&row)
        .on_conflict(workspace_seq::workspace_id)
        .do_update()
        .set(&row)
        .execute(conn)?;
    Ok(allocated)
}

fn max_seq_for_workspace(conn: &mut SqliteConnection, workspace_id: &str) -> Result<i64> {
    let max: Option<i64> = events::table
        .filter(events::workspace_id.eq(workspace_id))
        .select(diesel::dsl::max(events::seq))
        .first(conn)?;
    Ok(max.unwrap_or(0))
}

/// Runs the push handler's six transactional steps. `raw_events` are the
/// caller-supplied JSON event bodies, already known to belong to
/// `workspace_id`/`user_id` via the verified auth token.
pub fn push(
    conn: &mut SqliteConnection,
    workspace_id: &str,
    user_id: &str,
    device_id: &str,
    client_cursor: i64,
    raw_events: &[Value],
    now_ms: i64,
) -> Result<PushResponse> {
    conn.transaction(|conn| {
        let mut accepted = Vec::with_capacity(raw_events.len());
        let mut missing_blob_hashes = Vec::new();

        for raw in raw_events {
            let mut event = migrate_event(raw)?;
            if event.workspace_id != workspace_id {
                return Err(RelayError::Sync(CoreError::schema_invalid(
                    "event workspaceId does not match the authenticated workspace",
                )));
            }

            let existing = events::table
                .filter(events::workspace_id.eq(workspace_id))
                .filter(events::event_id.eq(&event.event_id))
                .first::<RelayEventRow>(conn)
                .optional()?;

            let assigned_seq = if let Some(row) = existing {
                row.seq
            } else {
                let seq = allocate_next_seq(conn, workspace_id)?;
                event.server_seq = Some(seq);
                let row = RelayEventRow {
                    workspace_id: workspace_id.to_string(),
                    seq,
                    event_id: event.event_id.clone(),
                    device_id: device_id.to_string(),
                    user_id: user_id.to_string(),
                    created_at_ms: event.created_at_ms,
                    event_schema_version: event.event_schema_version,
                    payload_schema_version: event.payload_schema_version,
                    event_type: event.payload.type_tag().to_string(),
                    payload_json: serde_json::to_string(&event).map_err(CoreError::from)?,
                    local_seq: event.local_seq,
                };
                diesel::insert_into(events::table).values(&row).execute(conn)?;
                seq
            };

            if let EventPayload::BlobAdd { hash, .. } = &event.payload {
                let present = blobs::table
                    .filter(blobs::workspace_id.eq(workspace_id))
                    .filter(blobs::hash.eq(hash))
                    .count()
                    .get_result::<i64>(conn)?
                    > 0;
                if !present && !missing_blob_hashes.contains(hash) {
                    missing_blob_hashes.push(hash.clone());
                }
            }

            accepted.push(AcceptedEvent { event_id: event.event_id, server_seq: assigned_seq });
        }

        let existing_cursor = device_cursors::table
            .find((workspace_id, device_id))
            .first::<DeviceCursorRow>(conn)
            .optional()?;
        let new_last_seq = existing_cursor.map(|row| row.last_seq.max(client_cursor)).unwrap_or(client_cursor);
        let cursor_row = DeviceCursorRow {
            workspace_id: workspace_id.to_string(),
            device_id: device_id.to_string(),
            last_seq: new_last_seq,
            updated_at_ms: now_ms,
        };
        diesel::insert_into(device_cursors::table)
            .values(&cursor_row)
            .on_conflict((device_cursors::workspace_id, device_cursors::device_id))
            .do_update()
            .set(&cursor_row)
            .execute(conn)?;

        let cursor = max_seq_for_workspace(conn, workspace_id)?;
        Ok(PushResponse { accepted, cursor, missing_blob_hashes })
    })
}

/// `SELECT * FROM events WHERE workspaceId = ? AND seq > cursor ORDER BY seq ASC LIMIT 1000`.
pub fn pull(conn: &mut SqliteConnection, workspace_id: &str, cursor: i64) -> Result<PullResponse> {
    let rows = events::table
        .filter(events::workspace_id.eq(workspace_id))
        .filter(events::seq.gt(cursor))
        .order(events::seq.asc())
        .limit(PULL_PAGE_LIMIT)
        .load::<RelayEventRow>(conn)?;

    let new_cursor = rows.last().map(|row| row.seq).unwrap_or(cursor);
    let events_json = rows
        .iter()
        .map(|row| serde_json::from_str::<Value>(&row.payload_json).map_err(CoreError::from))
        .collect::<std::result::Result<Vec<Value>, CoreError>>()?;

    // Conflicts are advisory-only (open question (b)) and nothing in this
    // workspace ever writes into `conflicts`, so there is nothing to query
    // yet. Revisit if a future pass starts populating the table.
    let conflicts = Vec::<Value>::new();

    Ok(PullResponse { events: events_json, cursor: new_cursor, conflicts })
}
