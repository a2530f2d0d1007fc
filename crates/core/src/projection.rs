//! The projection engine (C3): a deterministic fold from the canonical event
//! order into atoms, revisions, conflicts, and the inbox view-model.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::EventPayload;
use crate::stored_event::{StoredEvent, SyncStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Atom {
    pub atom_id: String,
    pub title: String,
    pub body: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub capture_event_id: String,
    pub head_version_ids: Vec<String>,
    pub needs_resolution: bool,
    pub blob_hashes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomVersion {
    pub atom_id: String,
    pub version_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_version_id: Option<String>,
    pub body: String,
    pub created_at_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_seq: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Open,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub conflict_id: String,
    pub atom_id: String,
    pub version_ids: Vec<String>,
    pub reason: String,
    pub status: ConflictStatus,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboxItem {
    pub id: String,
    pub atom_id: String,
    pub title: String,
    pub preview: String,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub source_event_id: String,
    pub sync_status: SyncStatus,
    pub needs_resolution: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seq: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub atoms: BTreeMap<String, Atom>,
    pub atom_versions: Vec<AtomVersion>,
    pub conflicts: BTreeMap<String, Conflict>,
    pub inbox: Vec<InboxItem>,
    pub referenced_blobs: Vec<String>,
    pub last_applied_seq: i64,
}

fn conflict_id_for(atom_id: &str) -> String {
    format!("conflict:{atom_id}")
}

fn inbox_id_for(atom_id: &str) -> String {
    format!("atom:{atom_id}")
}

fn derive_title(title: Option<&str>, body: &str) -> String {
    if let Some(t) = title {
        let trimmed = t.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Some(line) = body.lines().map(str::trim).find(|l| !l.is_empty()) {
        return line.to_string();
    }
    "Untitled".to_string()
}

fn preview_of(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > 120 {
        let truncated: String = collapsed.chars().take(120).collect();
        format!("{truncated}…")
    } else {
        collapsed
    }
}

/// Sort events into the canonical fold order: canonical events ascending by
/// `serverSeq`, then provisional events by `(localSeq, createdAtMs, eventId)`.
/// This never depends on hash map iteration order.
pub fn canonical_fold_order(events: &mut [StoredEvent]) {
    events.sort_by(|a, b| {
        let a_canon = a.event.server_seq;
        let b_canon = b.event.server_seq;
        match (a_canon, b_canon) {
            (Some(sa), Some(sb)) => sa.cmp(&sb),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => {
                let a_key = (a.event.local_seq, a.event.created_at_ms, &a.event.event_id);
                let b_key = (b.event.local_seq, b.event.created_at_ms, &b.event.event_id);
                a_key.cmp(&b_key)
            }
        }
    });
}

/// Fold the canonical event order into a `Projection` snapshot. `events` is
/// sorted in place into fold order before folding.
pub fn build_projection(events: &mut [StoredEvent]) -> Projection {
    canonical_fold_order(events);

    let mut atoms: BTreeMap<String, Atom> = BTreeMap::new();
    let mut atom_versions: Vec<AtomVersion> = Vec::new();
    let mut conflicts: BTreeMap<String, Conflict> = BTreeMap::new();
    let mut referenced_blobs: BTreeSet<String> = BTreeSet::new();
    // Per-atom aggregation for the inbox: worst status seen, whether any
    // referencing event lacks a serverSeq, and which event last set the body.
    let mut worst_status: BTreeMap<String, SyncStatus> = BTreeMap::new();
    let mut any_missing_server_seq: BTreeMap<String, bool> = BTreeMap::new();
    let mut last_body_event: BTreeMap<String, String> = BTreeMap::new();
    let mut last_applied_seq: i64 = 0;

    for stored in events.iter() {
        let event = &stored.event;
        if let Some(seq) = event.server_seq {
            last_applied_seq = last_applied_seq.max(seq);
        }

        match &event.payload {
            EventPayload::CaptureTextCreate { atom_id, title, body } => {
                record_inbox_signal(
                    &mut worst_status,
                    &mut any_missing_server_seq,
                    atom_id,
                    stored,
                );
                if atoms.contains_key(atom_id) {
                    continue;
                }
                let atom = Atom {
                    atom_id: atom_id.clone(),
                    title: derive_title(title.as_deref(), body),
                    body: body.clone(),
                    created_at_ms: event.created_at_ms,
                    updated_at_ms: event.created_at_ms,
                    capture_event_id: event.event_id.clone(),
                    head_version_ids: vec![event.event_id.clone()],
                    needs_resolution: false,
                    blob_hashes: Vec::new(),
                };
                atom_versions.push(AtomVersion {
                    atom_id: atom_id.clone(),
                    version_id: event.event_id.clone(),
                    parent_version_id: None,
                    body: body.clone(),
                    created_at_ms: event.created_at_ms,
                    server_seq: event.server_seq,
                    local_seq: event.local_seq,
                });
                last_body_event.insert(atom_id.clone(), event.event_id.clone());
                atoms.insert(atom_id.clone(), atom);
            }
            EventPayload::AtomTextUpdate {
                atom_id,
                body,
                base_version_id,
            } => {
                record_inbox_signal(
                    &mut worst_status,
                    &mut any_missing_server_seq,
                    atom_id,
                    stored,
                );
                if !atoms.contains_key(atom_id) {
                    // Synthesize an atom so out-of-order pulls still resolve.
                    atoms.insert(
                        atom_id.clone(),
                        Atom {
                            atom_id: atom_id.clone(),
                            title: derive_title(None, body),
                            body: body.clone(),
                            created_at_ms: event.created_at_ms,
                            updated_at_ms: event.created_at_ms,
                            capture_event_id: event.event_id.clone(),
                            head_version_ids: vec![event.event_id.clone()],
                            needs_resolution: false,
                            blob_hashes: Vec::new(),
                        },
                    );
                    atom_versions.push(AtomVersion {
                        atom_id: atom_id.clone(),
                        version_id: event.event_id.clone(),
                        parent_version_id: base_version_id.clone(),
                        body: body.clone(),
                        created_at_ms: event.created_at_ms,
                        server_seq: event.server_seq,
                        local_seq: event.local_seq,
                    });
                    last_body_event.insert(atom_id.clone(), event.event_id.clone());
                    continue;
                }

                let atom = atoms.get_mut(atom_id).expect("checked above");
                let is_conflict = base_version_id
                    .as_ref()
                    .is_some_and(|base| !atom.head_version_ids.iter().any(|h| h == base));

                if is_conflict {
                    if !atom.head_version_ids.iter().any(|h| h == &event.event_id) {
                        atom.head_version_ids.push(event.event_id.clone());
                    }
                    atom.needs_resolution = true;
                    let now = event.created_at_ms;
                    let cid = conflict_id_for(atom_id);
                    conflicts
                        .entry(cid.clone())
                        .and_modify(|c| {
                            c.version_ids = atom.head_version_ids.clone();
                            c.updated_at_ms = now;
                        })
                        .or_insert_with(|| Conflict {
                            conflict_id: cid,
                            atom_id: atom_id.clone(),
                            version_ids: atom.head_version_ids.clone(),
                            reason: "concurrent_update".to_string(),
                            status: ConflictStatus::Open,
                            created_at_ms: now,
                            updated_at_ms: now,
                        });
                } else {
                    atom.head_version_ids = vec![event.event_id.clone()];
                }

                atom.body = body.clone();
                atom.updated_at_ms = event.created_at_ms;
                last_body_event.insert(atom_id.clone(), event.event_id.clone());

                atom_versions.push(AtomVersion {
                    atom_id: atom_id.clone(),
                    version_id: event.event_id.clone(),
                    parent_version_id: base_version_id.clone(),
                    body: body.clone(),
                    created_at_ms: event.created_at_ms,
                    server_seq: event.server_seq,
                    local_seq: event.local_seq,
                });
            }
            EventPayload::BlobAdd { atom_id, hash, .. } => {
                referenced_blobs.insert(hash.clone());
                if let Some(atom_id) = atom_id {
                    record_inbox_signal(
                        &mut worst_status,
                        &mut any_missing_server_seq,
                        atom_id,
                        stored,
                    );
                    if let Some(atom) = atoms.get_mut(atom_id) {
                        if !atom.blob_hashes.iter().any(|h| h == hash) {
                            atom.blob_hashes.push(hash.clone());
                        }
                    }
                }
            }
            EventPayload::ChangesetSuggestCreate { .. } => {
                // Accepted and stored; this projection does not surface it
                // (Open Question (a)). Re-emitted verbatim on export.
            }
        }
    }

    let mut inbox: Vec<InboxItem> = atoms
        .values()
        .map(|atom| {
            let mut status = worst_status
                .get(&atom.atom_id)
                .copied()
                .unwrap_or(SyncStatus::SavedLocal);
            if status == SyncStatus::Synced && any_missing_server_seq.get(&atom.atom_id).copied().unwrap_or(false) {
                status = SyncStatus::WaitingSync;
            }
            InboxItem {
                id: inbox_id_for(&atom.atom_id),
                atom_id: atom.atom_id.clone(),
                title: atom.title.clone(),
                preview: preview_of(&atom.body),
                created_at_ms: atom.created_at_ms,
                updated_at_ms: atom.updated_at_ms,
                source_event_id: last_body_event
                    .get(&atom.atom_id)
                    .cloned()
                    .unwrap_or_else(|| atom.capture_event_id.clone()),
                sync_status: status,
                needs_resolution: atom.needs_resolution,
                server_seq: atom_versions
                    .iter()
                    .rev()
                    .find(|v| v.atom_id == atom.atom_id)
                    .and_then(|v| v.server_seq),
            }
        })
        .collect();

    inbox.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms).then_with(|| a.id.cmp(&b.id)));

    Projection {
        atoms,
        atom_versions,
        conflicts,
        inbox,
        referenced_blobs: referenced_blobs.into_iter().collect(),
        last_applied_seq,
    }
}

fn record_inbox_signal(
    worst_status: &mut BTreeMap<String, SyncStatus>,
    any_missing_server_seq: &mut BTreeMap<String, bool>,
    atom_id: &str,
    stored: &StoredEvent,
) {
    worst_status
        .entry(atom_id.to_string())
        .and_modify(|s| *s = s.worse(stored.sync_status))
        .or_insert(stored.sync_status);
    if stored.event.server_seq.is_none() {
        any_missing_server_seq.insert(atom_id.to_string(), true);
    } else {
        any_missing_server_seq.entry(atom_id.to_string()).or_insert(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{create_event, EventPayload};
    use crate::stored_event::StoredEvent;

    fn capture(atom_id: &str, body: &str, local_seq: i64, server_seq: Option<i64>) -> StoredEvent {
        let mut event = create_event(
            EventPayload::CaptureTextCreate {
                atom_id: atom_id.to_string(),
                title: None,
                body: body.to_string(),
            },
            "device-a",
            "ws-1",
            local_seq,
        );
        event.server_seq = server_seq;
        StoredEvent {
            event,
            sync_status: if server_seq.is_some() {
                SyncStatus::Synced
            } else {
                SyncStatus::SavedLocal
            },
            error_code: None,
            error_message: None,
        }
    }

    fn update(atom_id: &str, body: &str, base: Option<&str>, local_seq: i64, server_seq: Option<i64>) -> StoredEvent {
        let mut event = create_event(
            EventPayload::AtomTextUpdate {
                atom_id: atom_id.to_string(),
                body: body.to_string(),
                base_version_id: base.map(str::to_string),
            },
            "device-a",
            "ws-1",
            local_seq,
        );
        event.server_seq = server_seq;
        StoredEvent {
            event,
            sync_status: if server_seq.is_some() {
                SyncStatus::Synced
            } else {
                SyncStatus::SavedLocal
            },
            error_code: None,
            error_message: None,
        }
    }

    #[test]
    fn capture_creates_an_atom_with_derived_title() {
        let mut events = vec![capture("a1", "hello world\nmore", 1, None)];
        let projection = build_projection(&mut events);
        let atom = projection.atoms.get("a1").unwrap();
        assert_eq!(atom.title, "hello world");
        assert_eq!(atom.head_version_ids.len(), 1);
    }

    #[test]
    fn duplicate_capture_is_idempotent() {
        let mut events = vec![capture("a1", "first", 1, None), capture("a1", "second", 2, None)];
        let projection = build_projection(&mut events);
        assert_eq!(projection.atoms.get("a1").unwrap().body, "first");
    }

    #[test]
    fn concurrent_updates_open_a_conflict() {
        let cap = capture("shared", "base", 1, Some(1));
        let capture_id = cap.event.event_id.clone();
        let mut events = vec![
            cap,
            update("shared", "Edit from A", Some(&capture_id), 2, None),
            update("shared", "Edit from B", Some(&capture_id), 3, None),
        ];
        let projection = build_projection(&mut events);
        let atom = projection.atoms.get("shared").unwrap();
        assert!(atom.needs_resolution);
        assert_eq!(atom.head_version_ids.len(), 2);
        let conflict = projection.conflicts.get("conflict:shared").unwrap();
        assert_eq!(conflict.reason, "concurrent_update");
        assert_eq!(conflict.status, ConflictStatus::Open);
        assert_eq!(conflict.version_ids.len(), 2);
    }

    #[test]
    fn non_conflicting_update_replaces_the_head() {
        let cap = capture("a1", "base", 1, Some(1));
        let capture_id = cap.event.event_id.clone();
        let upd = update("a1", "v2", Some(&capture_id), 2, Some(2));
        let upd_id = upd.event.event_id.clone();
        let mut events = vec![cap, upd, update("a1", "v3", Some(&upd_id), 3, Some(3))];
        let projection = build_projection(&mut events);
        let atom = projection.atoms.get("a1").unwrap();
        assert_eq!(atom.body, "v3");
        assert_eq!(atom.head_version_ids.len(), 1);
        assert!(!atom.needs_resolution);
    }

    #[test]
    fn synced_atom_with_a_provisional_event_is_demoted_to_waiting_sync() {
        let cap = capture("a1", "base", 1, Some(1));
        let capture_id = cap.event.event_id.clone();
        let mut events = vec![cap, update("a1", "v2", Some(&capture_id), 2, None)];
        let mut provisional = events.last_mut().unwrap().clone();
        provisional.sync_status = SyncStatus::Synced;
        *events.last_mut().unwrap() = provisional;
        let projection = build_projection(&mut events);
        let item = projection.inbox.iter().find(|i| i.atom_id == "a1").unwrap();
        assert_eq!(item.sync_status, SyncStatus::WaitingSync);
    }

    #[test]
    fn inbox_is_ordered_newest_first_then_by_id() {
        let mut events = vec![
            capture("a1", "one", 1, Some(1)),
            capture("a2", "two", 2, Some(2)),
        ];
        events[1].event.created_at_ms = events[0].event.created_at_ms;
        let projection = build_projection(&mut events);
        assert_eq!(projection.inbox[0].id, "atom:a1");
        assert_eq!(projection.inbox[1].id, "atom:a2");
    }

    #[test]
    fn deterministic_reorder_final_body_follows_server_seq_not_arrival_order() {
        let cap = capture("01", "base", 1, Some(10));
        let capture_id = cap.event.event_id.clone();
        let mut second = update("01", "seq-12", Some(&capture_id), 3, Some(12));
        let mut third = update("01", "seq-11", Some(&capture_id), 2, Some(11));
        second.sync_status = SyncStatus::Synced;
        third.sync_status = SyncStatus::Synced;
        // Arrival order on the client was third-then-second; fold order must
        // still resolve by serverSeq.
        let mut arrived_third_first = vec![cap.clone(), third.clone(), second.clone()];
        let mut arrived_second_first = vec![cap, second, third];
        let a = build_projection(&mut arrived_third_first);
        let b = build_projection(&mut arrived_second_first);
        assert_eq!(a.atoms.get("01").unwrap().body, "seq-12");
        assert_eq!(a.atoms, b.atoms);
    }
}
