//! `DeviceState` — one row per workspace per install (C2/C4 bookkeeping).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceState {
    pub workspace_id: String,
    pub user_id: String,
    pub device_id: String,
    pub next_local_seq: i64,
    pub last_pulled_seq: i64,
    pub last_applied_seq: i64,
    pub projection_dirty: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_success_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_message: Option<String>,
}

impl DeviceState {
    pub fn new(workspace_id: impl Into<String>, user_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            user_id: user_id.into(),
            device_id: device_id.into(),
            next_local_seq: 1,
            last_pulled_seq: 0,
            last_applied_seq: 0,
            projection_dirty: false,
            last_sync_success_at_ms: None,
            last_error_code: None,
            last_error_message: None,
        }
    }

    pub fn clear_error(&mut self) {
        self.last_error_code = None;
        self.last_error_message = None;
    }

    pub fn set_error(&mut self, code: impl Into<String>, message: impl Into<String>) {
        self.last_error_code = Some(code.into());
        self.last_error_message = Some(message.into());
    }
}
