// Diesel table definitions for the relay's own database. `type` is a Rust
// keyword, so the event type tag column is named `event_type` here (the
// wire `type` tag lives unaffected inside `payload_json`).

diesel::table! {
    workspace_seq (workspace_id) {
        workspace_id -> Text,
        next_seq -> BigInt,
    }
}

diesel::table! {
    events (workspace_id, seq) {
        workspace_id -> Text,
        seq -> BigInt,
        event_id -> Text,
        device_id -> Text,
        user_id -> Text,
        created_at_ms -> BigInt,
        event_schema_version -> Integer,
        payload_schema_version -> Nullable<Integer>,
        event_type -> Text,
        payload_json -> Text,
        local_seq -> Nullable<BigInt>,
    }
}

diesel::table! {
    device_cursors (workspace_id, device_id) {
        workspace_id -> Text,
        device_id -> Text,
        last_seq -> BigInt,
        updated_at_ms -> BigInt,
    }
}

diesel::table! {
    blobs (workspace_id, hash) {
        workspace_id -> Text,
        hash -> Text,
        size -> BigInt,
        content_type -> Text,
        created_at_ms -> BigInt,
        path -> Text,
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
