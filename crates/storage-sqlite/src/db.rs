//! Pool bootstrap and migration runner for the embedded SQLite database.
//! Mirrors the `init`/`create_pool`/`get_connection`/`run_migrations` shape
//! the write-serialization actor and `SqliteStorage` are built against.

use std::path::{Path, PathBuf};

use diesel::connection::SimpleConnection;
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::errors::{Result, StorageError};

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Ensures `app_data_dir` exists and returns the path to the database file
/// inside it.
pub fn init(app_data_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let dir = app_data_dir.as_ref();
    std::fs::create_dir_all(dir)?;
    Ok(dir.join("notewire.sqlite"))
}

pub fn run_migrations(db_path: impl AsRef<Path>) -> Result<()> {
    let mut conn = SqliteConnection::establish_sqlite(db_path.as_ref())?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| StorageError::Migration(err.to_string()))?;
    Ok(())
}

pub fn create_pool(db_path: impl AsRef<Path>) -> Result<SqlitePool> {
    let manager = ConnectionManager::<SqliteConnection>::new(db_path.as_ref().to_string_lossy());
    let pool = Pool::builder().max_size(8).build(manager)?;
    {
        let mut conn = pool.get()?;
        conn.batch_execute("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .map_err(StorageError::from)?;
    }
    Ok(pool)
}

pub fn get_connection(pool: &SqlitePool) -> Result<SqlitePooledConnection> {
    pool.get().map_err(StorageError::from)
}

trait EstablishSqlite: Sized {
    fn establish_sqlite(path: &Path) -> Result<Self>;
}

impl EstablishSqlite for SqliteConnection {
    fn establish_sqlite(path: &Path) -> Result<Self> {
        use diesel::Connection;
        SqliteConnection::establish(&path.to_string_lossy())
            .map_err(|err| StorageError::Migration(err.to_string()))
    }
}
