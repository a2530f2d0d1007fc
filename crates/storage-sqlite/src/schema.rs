// Diesel table definitions for the client-side embedded database. A single
// database file holds multiple workspaces; every table is keyed by
// `workspace_id`.

diesel::table! {
    device_state (workspace_id) {
        workspace_id -> Text,
        user_id -> Text,
        device_id -> Text,
        next_local_seq -> BigInt,
        last_pulled_seq -> BigInt,
        last_applied_seq -> BigInt,
        projection_dirty -> Bool,
        last_sync_success_at_ms -> Nullable<BigInt>,
        last_error_code -> Nullable<Text>,
        last_error_message -> Nullable<Text>,
    }
}

diesel::table! {
    events (workspace_id, event_id) {
        workspace_id -> Text,
        event_id -> Text,
        event_schema_version -> Integer,
        payload_schema_version -> Nullable<Integer>,
        created_at_ms -> BigInt,
        device_id -> Text,
        local_seq -> Nullable<BigInt>,
        server_seq -> Nullable<BigInt>,
        payload_json -> Text,
        sync_status -> Text,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    atoms (workspace_id, atom_id) {
        workspace_id -> Text,
        atom_id -> Text,
        title -> Text,
        body -> Text,
        created_at_ms -> BigInt,
        updated_at_ms -> BigInt,
        capture_event_id -> Text,
        head_version_ids_json -> Text,
        needs_resolution -> Bool,
        blob_hashes_json -> Text,
    }
}

diesel::table! {
    atom_versions (workspace_id, version_id) {
        workspace_id -> Text,
        version_id -> Text,
        atom_id -> Text,
        parent_version_id -> Nullable<Text>,
        body -> Text,
        created_at_ms -> BigInt,
        server_seq -> Nullable<BigInt>,
        local_seq -> Nullable<BigInt>,
    }
}

diesel::table! {
    conflicts (workspace_id, conflict_id) {
        workspace_id -> Text,
        conflict_id -> Text,
        atom_id -> Text,
        version_ids_json -> Text,
        reason -> Text,
        status -> Text,
        created_at_ms -> BigInt,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    inbox_items (workspace_id, id) {
        workspace_id -> Text,
        id -> Text,
        atom_id -> Text,
        title -> Text,
        preview -> Text,
        created_at_ms -> BigInt,
        updated_at_ms -> BigInt,
        source_event_id -> Text,
        sync_status -> Text,
        needs_resolution -> Bool,
        server_seq -> Nullable<BigInt>,
    }
}

diesel::table! {
    projection_meta (workspace_id) {
        workspace_id -> Text,
        last_applied_seq -> BigInt,
        referenced_blobs_json -> Text,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    blob_manifest (workspace_id, hash) {
        workspace_id -> Text,
        hash -> Text,
        size -> BigInt,
        content_type -> Text,
        local_path -> Nullable<Text>,
        is_present -> Bool,
        sync_status -> Text,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    sync_attempts (id) {
        id -> BigInt,
        workspace_id -> Text,
        at_ms -> BigInt,
        outcome -> Text,
        pushed_count -> BigInt,
        pulled_count -> BigInt,
        error_code -> Nullable<Text>,
        error_message -> Nullable<Text>,
    }
}
