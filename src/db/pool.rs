//! Connection pool bootstrap and schema migration, grounded in the teacher's
//! `db::duckdb_service::{DuckDbPool, initialize_db}`.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use duckdb::DuckdbConnectionManager;
use tracing::info;

use super::writer::Writer;
use super::StorageError;

pub type DuckPool = r2d2::Pool<DuckdbConnectionManager>;

const MIGRATIONS: &str = include_str!("migrations.sql");

/// Resolves the on-disk database path the way the teacher resolves its config path:
/// explicit override first, then `VSTATS_DB_PATH`, then a fixed default.
pub fn resolve_db_path(explicit: Option<&str>) -> PathBuf {
    explicit
        .map(PathBuf::from)
        .or_else(|| env::var("VSTATS_DB_PATH").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("vstats.duckdb"))
}

fn run_migrations(path: &Path) -> Result<(), StorageError> {
    let conn = duckdb::Connection::open(path)?;
    conn.execute_batch(MIGRATIONS)?;
    Ok(())
}

/// Everything the rest of the core needs to talk to storage: a read pool plus a handle to
/// send mutations to the single writer thread.
pub struct StorageHandle {
    pub pool: DuckPool,
    pub writer: Arc<Writer>,
}

impl StorageHandle {
    /// Opens (creating if absent) the database at `path`, runs migrations, and spawns the
    /// dedicated writer thread. Mirrors the teacher's `DuckDBService::new` bootstrap order:
    /// migrate before the pool is handed out to readers.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        run_migrations(path)?;
        info!(db_path = %path.display(), "storage schema ready");

        let manager = DuckdbConnectionManager::file(path)?;
        let pool = r2d2::Pool::builder().max_size(8).build(manager)?;

        let writer = Writer::spawn(path.to_path_buf())?;

        Ok(Self { pool, writer })
    }
}
