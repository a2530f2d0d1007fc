//! `notewire-relay`: C6, the server-side sequencing service, as a library so
//! a thin binary (`apps/server`) or an in-process test harness can mount its
//! axum router without owning any of its persistence concerns directly.

use std::path::PathBuf;

use crate::db::SqlitePool;
use crate::write_actor::WriteHandle;

pub mod auth;
pub mod blob_store;
pub mod db;
pub mod errors;
pub mod models;
pub mod routes;
pub mod schema;
pub mod sequencer;
pub mod write_actor;

pub use errors::{RelayError, Result};
pub use routes::router;

/// Shared state handed to every axum handler. Reads go straight through the
/// pool; writes funnel through `write_handle` so per-workspace `serverSeq`
/// allocation stays serializable without an extra lock (§5).
pub struct AppState {
    pub pool: SqlitePool,
    pub write_handle: WriteHandle,
    pub token_secret: Vec<u8>,
    pub blob_dir: PathBuf,
}

impl AppState {
    pub fn new(pool: SqlitePool, write_handle: WriteHandle, token_secret: Vec<u8>, blob_dir: PathBuf) -> Self {
        Self { pool, write_handle, token_secret, blob_dir }
    }
}
