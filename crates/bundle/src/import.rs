//! Bundle import (C7): validates and ingests a bundle produced by
//! `export_bundle`.

use std::io::Read;

use notewire_core::errors::CoreError;
use notewire_core::event::{migrate_event, CURRENT_EVENT_SCHEMA_VERSION};
use notewire_core::{Event, StoredEvent, SyncStatus};
use zip::ZipArchive;

use crate::errors::{BundleError, Result};
use crate::manifest::{Manifest, BUNDLE_SCHEMA_VERSION};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportMode {
    /// Keep the bundle's `workspaceId`; only permitted into an empty workspace.
    Restore,
    /// Synthesize a new `workspaceId` and rewrite every event to carry it.
    Clone,
}

fn read_zip_entry(archive: &mut ZipArchive<std::io::Cursor<&[u8]>>, name: &str) -> Result<String> {
    let mut entry = archive.by_name(name)?;
    let mut contents = String::new();
    entry.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Reads `manifest.json` and validates it per §4.7's `validateImportBundle`
/// rules: `schemaVersion` must be `"0.2"`, `minSupportedEventSchemaVersion`
/// must not exceed `CURRENT`, `eventSchemaVersion` must be at least
/// `MIN_SUPPORTED`, and every event in `events.jsonl` must pass `migrateEvent`.
pub fn validate_import_bundle(bytes: &[u8]) -> Result<Manifest> {
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))?;
    let manifest: Manifest = serde_json::from_str(&read_zip_entry(&mut archive, "manifest.json")?)?;

    if manifest.schema_version != BUNDLE_SCHEMA_VERSION {
        return Err(BundleError::InvalidManifest(format!(
            "unsupported bundle schemaVersion {} (expected {BUNDLE_SCHEMA_VERSION})",
            manifest.schema_version
        )));
    }
    if manifest.min_supported_event_schema_version > CURRENT_EVENT_SCHEMA_VERSION {
        return Err(BundleError::InvalidManifest(format!(
            "bundle requires event schema support newer than this build supports ({})",
            manifest.min_supported_event_schema_version
        )));
    }
    if manifest.event_schema_version < notewire_core::event::MIN_SUPPORTED_EVENT_SCHEMA_VERSION {
        return Err(BundleError::InvalidManifest(format!(
            "bundle eventSchemaVersion {} is older than this build's minimum supported version",
            manifest.event_schema_version
        )));
    }

    for event in read_events_jsonl(&mut archive)? {
        migrate_event(&event)?;
    }

    Ok(manifest)
}

fn read_events_jsonl(archive: &mut ZipArchive<std::io::Cursor<&[u8]>>) -> Result<Vec<serde_json::Value>> {
    let contents = read_zip_entry(archive, "events/events.jsonl")?;
    let mut events = Vec::new();
    for line in contents.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        events.push(serde_json::from_str(trimmed)?);
    }
    Ok(events)
}

/// Imports a validated bundle, returning the `StoredEvent`s ready for
/// `StorageAdapter::upsert_events` plus the effective `workspaceId`.
///
/// `target_is_empty` is the caller's answer to "does the destination
/// workspace already hold any events?" (e.g. `StorageAdapter::list_events`
/// for the candidate `workspaceId` being empty) — `Restore` refuses to run
/// against a non-empty destination, per §4.7's precondition on that mode.
pub fn import_bundle(bytes: &[u8], mode: ImportMode, target_is_empty: bool) -> Result<(String, Vec<StoredEvent>)> {
    let manifest = validate_import_bundle(bytes)?;
    if mode == ImportMode::Restore && !target_is_empty {
        return Err(BundleError::Core(CoreError::validation(format!(
            "restore import into workspace {} requires an empty workspace",
            manifest.workspace_id
        ))));
    }
    let mut archive = ZipArchive::new(std::io::Cursor::new(bytes))?;
    let raw_events = read_events_jsonl(&mut archive)?;

    let target_workspace_id = match mode {
        ImportMode::Restore => manifest.workspace_id.clone(),
        ImportMode::Clone => uuid::Uuid::new_v4().to_string(),
    };

    let mut stored = Vec::with_capacity(raw_events.len());
    for raw in raw_events {
        let mut event: Event = migrate_event(&raw)?;
        let sync_status = if event.server_seq.is_some() { SyncStatus::Synced } else { SyncStatus::SavedLocal };
        if mode == ImportMode::Clone {
            event.workspace_id = target_workspace_id.clone();
        }
        stored.push(StoredEvent { event, sync_status, error_code: None, error_message: None });
    }

    Ok((target_workspace_id, stored))
}
