//! `notewire-core`: the event log, projection fold, and sync engine shared by
//! every storage/transport implementation and by the relay and server
//! binaries. Nothing in this crate talks to a disk or a socket directly —
//! that's `notewire-storage-sqlite`/`notewire-storage-memory` and
//! `notewire-transport`'s job, against the `StorageAdapter` and `Transport`
//! contracts defined here.

pub mod blob;
pub mod device_state;
pub mod errors;
pub mod event;
pub mod projection;
pub mod retry;
pub mod storage;
pub mod stored_event;
pub mod sync_engine;
pub mod transport;

pub use blob::BlobManifestEntry;
pub use device_state::DeviceState;
pub use errors::{CoreError, Result, RetryClass, SyncErrorCode};
pub use event::{create_event, migrate_event, Event, EventPayload};
pub use projection::{build_projection, Atom, AtomVersion, Conflict, ConflictStatus, InboxItem, Projection};
pub use storage::{merge_stored_event, ServerSeqMapping, StorageAdapter, SyncAttempt, SyncAttemptOutcome};
pub use stored_event::{StoredEvent, SyncStatus};
pub use sync_engine::{SyncEngine, SyncStatusError, SyncStatusSnapshot};
pub use transport::{AcceptedEvent, PullRequest, PullResponse, PushRequest, PushResponse, Transport};
