//! The bundle manifest (`manifest.json`).

use serde::{Deserialize, Serialize};

/// Bundle schema version this crate writes and accepts.
pub const BUNDLE_SCHEMA_VERSION: &str = "0.2";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestCounts {
    pub atoms: usize,
    pub events: usize,
    pub blobs: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub schema_version: String,
    pub created_at_ms: i64,
    pub workspace_id: String,
    pub event_schema_version: i32,
    pub min_supported_event_schema_version: i32,
    pub counts: ManifestCounts,
    pub referenced_blobs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub missing_blobs: Vec<String>,
}
