//! Pool bootstrap and migration runner for the relay's embedded SQLite
//! database. Shape mirrors `notewire-storage-sqlite`'s `db.rs`; the schema
//! and migrations are the relay's own.

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::{Connection, SqliteConnection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::{RelayError, Result};

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn run_migrations(db_path: impl AsRef<Path>) -> Result<()> {
    let mut conn = SqliteConnection::establish(&db_path.as_ref().to_string_lossy())
        .map_err(|err| RelayError::Migration(err.to_string()))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| RelayError::Migration(err.to_string()))?;
    Ok(())
}

pub fn create_pool(db_path: impl AsRef<Path>) -> Result<SqlitePool> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.as_ref().to_string_lossy());
    let pool = Pool::builder().max_size(8).build(manager)?;
    {
        let mut conn = pool.get()?;
        conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")?;
    }
    Ok(pool)
}

pub fn get_connection(pool: &SqlitePool) -> Result<SqlitePooledConnection> {
    pool.get().map_err(RelayError::from)
}
