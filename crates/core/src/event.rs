//! The event model: the append-only log's sole unit of truth (C1).

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::{CoreError, Result};

/// Lowest event schema version this build still accepts.
pub const MIN_SUPPORTED_EVENT_SCHEMA_VERSION: i32 = 1;
/// Current event schema version written by this build.
pub const CURRENT_EVENT_SCHEMA_VERSION: i32 = 1;

const MIN_EVENT_ID_LEN: usize = 8;

/// The closed set of event payload shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "capture.text.create")]
    CaptureTextCreate {
        #[serde(rename = "atomId")]
        atom_id: String,
        #[serde(default, rename = "title")]
        title: Option<String>,
        body: String,
    },
    #[serde(rename = "atom.text.update")]
    AtomTextUpdate {
        #[serde(rename = "atomId")]
        atom_id: String,
        body: String,
        #[serde(default, rename = "baseVersionId")]
        base_version_id: Option<String>,
    },
    #[serde(rename = "blob.add")]
    BlobAdd {
        #[serde(default, rename = "atomId")]
        atom_id: Option<String>,
        hash: String,
        size: i64,
        #[serde(rename = "contentType")]
        content_type: String,
        #[serde(default, rename = "extHint")]
        ext_hint: Option<String>,
    },
    #[serde(rename = "changeset.suggest.create")]
    ChangesetSuggestCreate {
        #[serde(rename = "changesetId")]
        changeset_id: String,
        #[serde(rename = "noteIds")]
        note_ids: Vec<String>,
        #[serde(default)]
        summary: Option<String>,
    },
}

impl EventPayload {
    /// The wire `type` tag, e.g. `"capture.text.create"`.
    pub fn type_tag(&self) -> &'static str {
        match self {
            EventPayload::CaptureTextCreate { .. } => "capture.text.create",
            EventPayload::AtomTextUpdate { .. } => "atom.text.update",
            EventPayload::BlobAdd { .. } => "blob.add",
            EventPayload::ChangesetSuggestCreate { .. } => "changeset.suggest.create",
        }
    }

    fn is_closed_set_tag(tag: &str) -> bool {
        matches!(
            tag,
            "capture.text.create" | "atom.text.update" | "blob.add" | "changeset.suggest.create"
        )
    }
}

/// An immutable event: the sole unit of truth in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_id: String,
    pub event_schema_version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_schema_version: Option<i32>,
    pub created_at_ms: i64,
    pub device_id: String,
    pub workspace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// `eventId` is unique within a workspace and an event is "canonical" once
    /// it carries a `serverSeq`.
    pub fn is_canonical(&self) -> bool {
        self.server_seq.is_some()
    }
}

/// A draft payload plus the local context needed to mint a new `Event`.
pub fn create_event(
    payload: EventPayload,
    device_id: &str,
    workspace_id: &str,
    local_seq: i64,
) -> Event {
    Event {
        event_id: Uuid::now_v7().to_string(),
        event_schema_version: CURRENT_EVENT_SCHEMA_VERSION,
        payload_schema_version: None,
        created_at_ms: chrono::Utc::now().timestamp_millis(),
        device_id: device_id.to_string(),
        workspace_id: workspace_id.to_string(),
        local_seq: Some(local_seq),
        server_seq: None,
        payload,
    }
}

/// Ingest a foreign event (from transport or import), validating and
/// normalizing it per the migration contract.
///
/// `serverSeq` supplied by the relay is always authoritative and is passed
/// through unchanged; `localSeq` from the input is preserved but never trusted
/// as this device's own sequence.
pub fn migrate_event(raw: &Value) -> Result<Event> {
    let obj = raw
        .as_object()
        .ok_or_else(|| CoreError::schema_invalid("event is not a JSON object"))?;

    let event_id = obj
        .get("eventId")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::schema_invalid("eventId missing"))?;
    if event_id.len() < MIN_EVENT_ID_LEN {
        return Err(CoreError::schema_invalid("eventId too short"));
    }

    let type_tag = obj
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::schema_invalid("type missing"))?;
    if !EventPayload::is_closed_set_tag(type_tag) {
        return Err(CoreError::schema_invalid(format!("unknown event type {type_tag}")));
    }

    let device_id = obj
        .get("deviceId")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::schema_invalid("deviceId missing"))?;
    let workspace_id = obj
        .get("workspaceId")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::schema_invalid("workspaceId missing"))?;

    if !obj.contains_key("payload") && !is_flattened_payload(obj, type_tag) {
        return Err(CoreError::schema_invalid("payload missing or not an object"));
    }

    let event_schema_version = obj
        .get("eventSchemaVersion")
        .and_then(Value::as_i64)
        .map(|v| v as i32)
        .unwrap_or(CURRENT_EVENT_SCHEMA_VERSION);
    if event_schema_version < MIN_SUPPORTED_EVENT_SCHEMA_VERSION {
        return Err(CoreError::schema_unsupported(format!(
            "eventSchemaVersion {event_schema_version} below minimum supported {MIN_SUPPORTED_EVENT_SCHEMA_VERSION}"
        )));
    }
    if event_schema_version > CURRENT_EVENT_SCHEMA_VERSION {
        return Err(CoreError::schema_unsupported(format!(
            "eventSchemaVersion {event_schema_version} is newer than this build ({CURRENT_EVENT_SCHEMA_VERSION})"
        )));
    }

    let created_at_ms = normalize_created_at_ms(obj);

    let payload: EventPayload = serde_json::from_value(raw.clone())
        .map_err(|err| CoreError::schema_invalid(format!("invalid payload for {type_tag}: {err}")))?;

    Ok(Event {
        event_id: event_id.to_string(),
        event_schema_version,
        payload_schema_version: obj
            .get("payloadSchemaVersion")
            .and_then(Value::as_i64)
            .map(|v| v as i32),
        created_at_ms,
        device_id: device_id.to_string(),
        workspace_id: workspace_id.to_string(),
        local_seq: obj.get("localSeq").and_then(Value::as_i64),
        server_seq: obj.get("serverSeq").and_then(Value::as_i64),
        payload,
    })
}

/// The event payload is serialized flattened (no nested `payload` key); this
/// just confirms the object has fields beyond the envelope, so legacy inputs
/// that nest under `"payload": {...}` are also tolerated below.
fn is_flattened_payload(obj: &serde_json::Map<String, Value>, type_tag: &str) -> bool {
    match type_tag {
        "capture.text.create" => obj.contains_key("atomId") && obj.contains_key("body"),
        "atom.text.update" => obj.contains_key("atomId") && obj.contains_key("body"),
        "blob.add" => obj.contains_key("hash") && obj.contains_key("size"),
        "changeset.suggest.create" => obj.contains_key("changesetId"),
        _ => false,
    }
}

fn normalize_created_at_ms(obj: &serde_json::Map<String, Value>) -> i64 {
    if let Some(ms) = obj.get("createdAtMs").and_then(Value::as_i64) {
        return ms;
    }
    if let Some(iso) = obj.get("createdAt").and_then(Value::as_str) {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(iso) {
            return parsed.timestamp_millis();
        }
    }
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_capture(event_id: &str) -> Value {
        json!({
            "eventId": event_id,
            "eventSchemaVersion": 1,
            "type": "capture.text.create",
            "createdAtMs": 1_000_000,
            "deviceId": "device-a",
            "workspaceId": "ws-1",
            "atomId": "atom-1",
            "body": "hello"
        })
    }

    #[test]
    fn migrates_a_well_formed_event() {
        let event = migrate_event(&valid_capture("01930000-0000-7000-8000-000000000000")).unwrap();
        assert_eq!(event.workspace_id, "ws-1");
        assert!(matches!(event.payload, EventPayload::CaptureTextCreate { .. }));
        assert!(!event.is_canonical());
    }

    #[test]
    fn rejects_short_event_id() {
        let err = migrate_event(&valid_capture("abc")).unwrap_err();
        assert_eq!(err.code, crate::errors::SyncErrorCode::SchemaInvalid);
    }

    #[test]
    fn rejects_unknown_type() {
        let mut raw = valid_capture("01930000-0000-7000-8000-000000000000");
        raw["type"] = json!("note.delete.forever");
        let err = migrate_event(&raw).unwrap_err();
        assert_eq!(err.code, crate::errors::SyncErrorCode::SchemaInvalid);
    }

    #[test]
    fn rejects_schema_version_outside_supported_range() {
        let mut raw = valid_capture("01930000-0000-7000-8000-000000000000");
        raw["eventSchemaVersion"] = json!(99);
        let err = migrate_event(&raw).unwrap_err();
        assert_eq!(err.code, crate::errors::SyncErrorCode::SchemaUnsupported);
    }

    #[test]
    fn falls_back_to_iso_created_at_then_to_now() {
        let mut raw = valid_capture("01930000-0000-7000-8000-000000000000");
        raw.as_object_mut().unwrap().remove("createdAtMs");
        raw["createdAt"] = json!("2026-01-01T00:00:00Z");
        let event = migrate_event(&raw).unwrap();
        assert_eq!(event.created_at_ms, 1_767_225_600_000);
    }

    #[test]
    fn create_event_mints_a_time_sortable_id() {
        let payload = EventPayload::CaptureTextCreate {
            atom_id: "atom-1".into(),
            title: None,
            body: "hi".into(),
        };
        let event = create_event(payload, "device-a", "ws-1", 1);
        assert_eq!(event.local_seq, Some(1));
        assert!(event.server_seq.is_none());
        assert_eq!(event.payload.type_tag(), "capture.text.create");
    }
}
