//! Diesel row structs for the relay's own tables.

use diesel::prelude::*;

use crate::schema::*;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id))]
#[diesel(table_name = workspace_seq)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct WorkspaceSeqRow {
    pub workspace_id: String,
    pub next_seq: i64,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, seq))]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RelayEventRow {
    pub workspace_id: String,
    pub seq: i64,
    pub event_id: String,
    pub device_id: String,
    pub user_id: String,
    pub created_at_ms: i64,
    pub event_schema_version: i32,
    pub payload_schema_version: Option<i32>,
    pub event_type: String,
    pub payload_json: String,
    pub local_seq: Option<i64>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, device_id))]
#[diesel(table_name = device_cursors)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceCursorRow {
    pub workspace_id: String,
    pub device_id: String,
    pub last_seq: i64,
    pub updated_at_ms: i64,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, hash))]
#[diesel(table_name = blobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BlobRow {
    pub workspace_id: String,
    pub hash: String,
    pub size: i64,
    pub content_type: String,
    pub created_at_ms: i64,
    pub path: String,
}

/// Mirrors the `conflicts` table named in the relay's persisted layout.
/// Nothing constructs or inserts this row yet — conflicts are advisory-only
/// and the relay never writes to this table (see `sequencer::pull`).
#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, conflict_id))]
#[diesel(table_name = conflicts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[allow(dead_code)]
pub struct RelayConflictRow {
    pub workspace_id: String,
    pub conflict_id: String,
    pub atom_id: String,
    pub version_ids_json: String,
    pub reason: String,
    pub status: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}
