//! The transport contract (C5): `push`, `pull`, `uploadBlob`, `downloadBlob`.
//! Implementations live in `notewire-transport` (a reqwest HTTP client and a
//! disabled stub); this crate only defines the trait and wire DTOs shared by
//! both the client and the relay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushRequest {
    pub workspace_id: String,
    pub user_id: String,
    pub device_id: String,
    pub client_cursor: i64,
    /// Events stripped of client-only fields before transmission.
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedEvent {
    pub event_id: String,
    pub server_seq: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    pub accepted: Vec<AcceptedEvent>,
    pub cursor: i64,
    #[serde(default)]
    pub missing_blob_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub workspace_id: String,
    pub user_id: String,
    pub device_id: String,
    pub cursor: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullResponse {
    pub events: Vec<Value>,
    pub cursor: i64,
    #[serde(default)]
    pub conflicts: Vec<Value>,
}

/// `push`, `pull`, `uploadBlob`, `downloadBlob` — one HTTP implementation, one
/// disabled stub that fails every call with an `AUTH`-class error.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn push(&self, request: PushRequest) -> Result<PushResponse>;
    async fn pull(&self, request: PullRequest) -> Result<PullResponse>;
    async fn upload_blob(&self, workspace_id: &str, hash: &str, content_type: &str, bytes: Vec<u8>) -> Result<()>;
    async fn download_blob(&self, workspace_id: &str, hash: &str) -> Result<Vec<u8>>;
}
