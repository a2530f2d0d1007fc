//! Bundle export (C7): a zip archive with a fixed layout —
//! `manifest.json`, `events/events.jsonl`, `atoms/<atomId>.md`,
//! `portable/state.json`, `blobs/<hash>.<ext>`.

use std::collections::BTreeMap;
use std::io::{Cursor, Write};

use notewire_core::event::CURRENT_EVENT_SCHEMA_VERSION;
use notewire_core::{Projection, StoredEvent};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use crate::errors::{BundleError, Result};
use crate::manifest::{Manifest, ManifestCounts, BUNDLE_SCHEMA_VERSION};

/// Maps a blob's `contentType` to a filename extension for `blobs/<hash>.<ext>`.
fn ext_for_content_type(content_type: &str) -> &'static str {
    match content_type {
        "text/plain" => "txt",
        "text/markdown" => "md",
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        _ => "bin",
    }
}

fn yaml_string_list(values: &[String]) -> String {
    let quoted: Vec<String> = values.iter().map(|v| format!("\"{}\"", v.replace('"', "\\\""))).collect();
    format!("[{}]", quoted.join(", "))
}

fn atom_markdown(atom: &notewire_core::projection::Atom) -> String {
    format!(
        "---\natomId: \"{}\"\ntitle: \"{}\"\ncreatedAtMs: {}\nupdatedAtMs: {}\nheadVersionIds: {}\nneedsResolution: {}\nblobHashes: {}\n---\n{}\n",
        atom.atom_id.replace('"', "\\\""),
        atom.title.replace('"', "\\\""),
        atom.created_at_ms,
        atom.updated_at_ms,
        yaml_string_list(&atom.head_version_ids),
        atom.needs_resolution,
        yaml_string_list(&atom.blob_hashes),
        atom.body,
    )
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct PortableState<'a> {
    atoms: Vec<&'a notewire_core::projection::Atom>,
    atom_versions: &'a [notewire_core::projection::AtomVersion],
    conflicts: Vec<&'a notewire_core::projection::Conflict>,
}

/// Options controlling export behavior.
pub struct ExportOptions {
    /// If false, export fails with a `Validation` error when any referenced
    /// blob is not present in `blobs`. If true, missing hashes are recorded
    /// in `manifest.missingBlobs` and the bundle is still produced.
    pub allow_missing_blobs: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { allow_missing_blobs: false }
    }
}

/// Builds a zip bundle in memory. `events` must already be in canonical fold
/// order. `blobs` maps referenced blob hashes to their bytes; a missing entry
/// means the blob is not locally present.
pub fn export_bundle(
    workspace_id: &str,
    events: &[StoredEvent],
    projection: &Projection,
    blobs: &BTreeMap<String, Vec<u8>>,
    now_ms: i64,
    options: &ExportOptions,
) -> Result<Vec<u8>> {
    let missing_blobs: Vec<String> =
        projection.referenced_blobs.iter().filter(|hash| !blobs.contains_key(*hash)).cloned().collect();
    if !missing_blobs.is_empty() && !options.allow_missing_blobs {
        return Err(BundleError::MissingBlobs(missing_blobs));
    }

    let manifest = Manifest {
        schema_version: BUNDLE_SCHEMA_VERSION.to_string(),
        created_at_ms: now_ms,
        workspace_id: workspace_id.to_string(),
        event_schema_version: CURRENT_EVENT_SCHEMA_VERSION,
        min_supported_event_schema_version: notewire_core::event::MIN_SUPPORTED_EVENT_SCHEMA_VERSION,
        counts: ManifestCounts {
            atoms: projection.atoms.len(),
            events: events.len(),
            blobs: blobs.len(),
            conflicts: projection.conflicts.len(),
        },
        referenced_blobs: projection.referenced_blobs.clone(),
        missing_blobs: missing_blobs.clone(),
    };

    let buffer = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(buffer);
    let options_stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    zip.start_file("manifest.json", options_stored)?;
    zip.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    zip.start_file("events/events.jsonl", options_stored)?;
    for stored in events {
        let line = serde_json::to_string(&stored.event)?;
        zip.write_all(line.as_bytes())?;
        zip.write_all(b"\n")?;
    }

    for atom in projection.atoms.values() {
        zip.start_file(format!("atoms/{}.md", atom.atom_id), options_stored)?;
        zip.write_all(atom_markdown(atom).as_bytes())?;
    }

    let portable = PortableState {
        atoms: projection.atoms.values().collect(),
        atom_versions: &projection.atom_versions,
        conflicts: projection.conflicts.values().collect(),
    };
    zip.start_file("portable/state.json", options_stored)?;
    zip.write_all(serde_json::to_string_pretty(&portable)?.as_bytes())?;

    for hash in &projection.referenced_blobs {
        let Some(bytes) = blobs.get(hash) else { continue };
        let content_type = guess_content_type_for_hash(hash, events);
        zip.start_file(format!("blobs/{}.{}", hash, ext_for_content_type(&content_type)), options_stored)?;
        zip.write_all(bytes)?;
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

fn guess_content_type_for_hash(hash: &str, events: &[StoredEvent]) -> String {
    for stored in events {
        if let notewire_core::event::EventPayload::BlobAdd { hash: h, content_type, .. } = &stored.event.payload {
            if h == hash {
                return content_type.clone();
            }
        }
    }
    "application/octet-stream".to_string()
}
