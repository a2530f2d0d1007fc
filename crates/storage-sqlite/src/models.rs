//! Diesel row structs for the `notewire-storage-sqlite` tables.

use diesel::prelude::*;

use crate::schema::*;

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id))]
#[diesel(table_name = device_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DeviceStateRow {
    pub workspace_id: String,
    pub user_id: String,
    pub device_id: String,
    pub next_local_seq: i64,
    pub last_pulled_seq: i64,
    pub last_applied_seq: i64,
    pub projection_dirty: bool,
    pub last_sync_success_at_ms: Option<i64>,
    pub last_error_code: Option<String>,
    pub last_error_message: Option<String>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, event_id))]
#[diesel(table_name = events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct EventRow {
    pub workspace_id: String,
    pub event_id: String,
    pub event_schema_version: i32,
    pub payload_schema_version: Option<i32>,
    pub created_at_ms: i64,
    pub device_id: String,
    pub local_seq: Option<i64>,
    pub server_seq: Option<i64>,
    pub payload_json: String,
    pub sync_status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, atom_id))]
#[diesel(table_name = atoms)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AtomRow {
    pub workspace_id: String,
    pub atom_id: String,
    pub title: String,
    pub body: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub capture_event_id: String,
    pub head_version_ids_json: String,
    pub needs_resolution: bool,
    pub blob_hashes_json: String,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, version_id))]
#[diesel(table_name = atom_versions)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AtomVersionRow {
    pub workspace_id: String,
    pub version_id: String,
    pub atom_id: String,
    pub parent_version_id: Option<String>,
    pub body: String,
    pub created_at_ms: i64,
    pub server_seq: Option<i64>,
    pub local_seq: Option<i64>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, conflict_id))]
#[diesel(table_name = conflicts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ConflictRow {
    pub workspace_id: String,
    pub conflict_id: String,
    pub atom_id: String,
    pub version_ids_json: String,
    pub reason: String,
    pub status: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, id))]
#[diesel(table_name = inbox_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct InboxItemRow {
    pub workspace_id: String,
    pub id: String,
    pub atom_id: String,
    pub title: String,
    pub preview: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub source_event_id: String,
    pub sync_status: String,
    pub needs_resolution: bool,
    pub server_seq: Option<i64>,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id))]
#[diesel(table_name = projection_meta)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ProjectionMetaRow {
    pub workspace_id: String,
    pub last_applied_seq: i64,
    pub referenced_blobs_json: String,
    pub updated_at_ms: i64,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(workspace_id, hash))]
#[diesel(table_name = blob_manifest)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct BlobManifestRow {
    pub workspace_id: String,
    pub hash: String,
    pub size: i64,
    pub content_type: String,
    pub local_path: Option<String>,
    pub is_present: bool,
    pub sync_status: String,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Queryable, Identifiable, Insertable, AsChangeset, Selectable, Debug, Clone)]
#[diesel(primary_key(id))]
#[diesel(table_name = sync_attempts)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncAttemptRow {
    pub id: i64,
    pub workspace_id: String,
    pub at_ms: i64,
    pub outcome: String,
    pub pushed_count: i64,
    pub pulled_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Queryable, Insertable, Debug, Clone)]
#[diesel(table_name = sync_attempts)]
pub struct NewSyncAttemptRow {
    pub workspace_id: String,
    pub at_ms: i64,
    pub outcome: String,
    pub pushed_count: i64,
    pub pulled_count: i64,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}
