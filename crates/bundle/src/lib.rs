//! `notewire-bundle`: round-trippable export/import bundles (C7) — a zip
//! archive carrying the full event log, a human-readable projection mirror,
//! and referenced blob bytes.

mod errors;
mod export;
mod import;
mod manifest;

pub use errors::{BundleError, Result};
pub use export::{export_bundle, ExportOptions};
pub use import::{import_bundle, validate_import_bundle, ImportMode};
pub use manifest::{Manifest, ManifestCounts, BUNDLE_SCHEMA_VERSION};

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use notewire_core::event::{create_event, EventPayload};
    use notewire_core::projection::build_projection;
    use notewire_core::stored_event::StoredEvent;

    use super::*;

    fn capture_event(workspace_id: &str, atom_id: &str, body: &str, local_seq: i64, server_seq: Option<i64>) -> StoredEvent {
        let mut event = create_event(
            EventPayload::CaptureTextCreate { atom_id: atom_id.into(), title: None, body: body.into() },
            "device-a",
            workspace_id,
            local_seq,
        );
        event.server_seq = server_seq;
        let mut stored = StoredEvent::new_local(event);
        if server_seq.is_some() {
            stored.sync_status = notewire_core::SyncStatus::Synced;
        }
        stored
    }

    #[test]
    fn export_then_import_restore_round_trips_events() {
        let mut events = vec![capture_event("ws-1", "atom-1", "hello world", 1, Some(1))];
        let projection = build_projection(&mut events);

        let bundle = export_bundle(
            "ws-1",
            &events,
            &projection,
            &BTreeMap::new(),
            1_000_000,
            &ExportOptions::default(),
        )
        .expect("export");

        let manifest = validate_import_bundle(&bundle).expect("valid bundle");
        assert_eq!(manifest.workspace_id, "ws-1");
        assert_eq!(manifest.counts.atoms, 1);

        let (workspace_id, imported) = import_bundle(&bundle, ImportMode::Restore, true).expect("import");
        assert_eq!(workspace_id, "ws-1");
        assert_eq!(imported.len(), 1);
        assert_eq!(imported[0].event.workspace_id, "ws-1");
        assert_eq!(imported[0].sync_status, notewire_core::SyncStatus::Synced);
    }

    #[test]
    fn restore_into_nonempty_workspace_is_rejected() {
        let mut events = vec![capture_event("ws-1", "atom-1", "hello world", 1, Some(1))];
        let projection = build_projection(&mut events);
        let bundle = export_bundle("ws-1", &events, &projection, &BTreeMap::new(), 1_000_000, &ExportOptions::default())
            .expect("export");

        let err = import_bundle(&bundle, ImportMode::Restore, false).unwrap_err();
        assert!(matches!(err, BundleError::Core(_)));
    }

    #[test]
    fn clone_import_rewrites_workspace_id_on_every_event() {
        let mut events = vec![
            capture_event("ws-1", "atom-1", "hello", 1, Some(1)),
            capture_event("ws-1", "atom-2", "world", 2, None),
        ];
        let projection = build_projection(&mut events);
        let bundle =
            export_bundle("ws-1", &events, &projection, &BTreeMap::new(), 1_000_000, &ExportOptions::default())
                .expect("export");

        let (new_workspace_id, imported) = import_bundle(&bundle, ImportMode::Clone, false).expect("import");
        assert_ne!(new_workspace_id, "ws-1");
        assert!(imported.iter().all(|e| e.event.workspace_id == new_workspace_id));
        let statuses: Vec<_> = imported.iter().map(|e| e.sync_status).collect();
        assert!(statuses.contains(&notewire_core::SyncStatus::Synced));
        assert!(statuses.contains(&notewire_core::SyncStatus::SavedLocal));
    }

    #[test]
    fn export_aborts_on_missing_blob_unless_allowed() {
        let mut events = vec![capture_event("ws-1", "atom-1", "hello", 1, Some(1))];
        events.push({
            let mut event = create_event(
                EventPayload::BlobAdd {
                    atom_id: Some("atom-1".into()),
                    hash: "deadbeef".into(),
                    size: 4,
                    content_type: "text/plain".into(),
                    ext_hint: None,
                },
                "device-a",
                "ws-1",
                2,
            );
            event.server_seq = Some(2);
            let mut stored = StoredEvent::new_local(event);
            stored.sync_status = notewire_core::SyncStatus::Synced;
            stored
        });
        let projection = build_projection(&mut events);

        let err = export_bundle("ws-1", &events, &projection, &BTreeMap::new(), 1_000_000, &ExportOptions::default())
            .unwrap_err();
        assert!(matches!(err, BundleError::MissingBlobs(_)));

        let allowed = export_bundle(
            "ws-1",
            &events,
            &projection,
            &BTreeMap::new(),
            1_000_000,
            &ExportOptions { allow_missing_blobs: true },
        )
        .expect("export with missing blobs allowed");
        let manifest = validate_import_bundle(&allowed).expect("still valid");
        assert_eq!(manifest.missing_blobs, vec!["deadbeef".to_string()]);
    }

    #[test]
    fn rejects_bundle_with_wrong_schema_version() {
        let mut manifest_json = serde_json::json!({
            "schemaVersion": "9.9",
            "createdAtMs": 1,
            "workspaceId": "ws-1",
            "eventSchemaVersion": 1,
            "minSupportedEventSchemaVersion": 1,
            "counts": {"atoms": 0, "events": 0, "blobs": 0, "conflicts": 0},
            "referencedBlobs": []
        });
        let bytes = build_minimal_zip(&mut manifest_json);
        let err = validate_import_bundle(&bytes).unwrap_err();
        assert!(matches!(err, BundleError::InvalidManifest(_)));
    }

    fn build_minimal_zip(manifest_json: &mut serde_json::Value) -> Vec<u8> {
        use std::io::{Cursor, Write};
        use zip::write::SimpleFileOptions;
        let buffer = Cursor::new(Vec::new());
        let mut zip = zip::ZipWriter::new(buffer);
        let options = SimpleFileOptions::default();
        zip.start_file("manifest.json", options).unwrap();
        zip.write_all(manifest_json.to_string().as_bytes()).unwrap();
        zip.start_file("events/events.jsonl", options).unwrap();
        zip.finish().unwrap().into_inner()
    }
}
