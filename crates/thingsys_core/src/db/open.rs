//! Connection bootstrap utilities for SQLite.
//!
//! # Responsibility
//! - Open the store database inside the storage directory, or in memory.
//! - Trigger schema migrations before returning a usable connection.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{error, info};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

/// File name of the store database inside the storage directory.
pub const DB_FILE_NAME: &str = "things.sqlite3";

/// Opens (creating if needed) the store database under `storage_dir`.
///
/// # Side effects
/// - Creates `storage_dir` when missing.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(storage_dir: impl AsRef<Path>) -> DbResult<Connection> {
    let started_at = Instant::now();
    let storage_dir = storage_dir.as_ref();
    info!(
        "event=db_open module=db status=start mode=file dir={}",
        storage_dir.display()
    );

    log_outcome("file", started_at, open_file(storage_dir))
}

/// Opens an in-memory database with all migrations applied.
pub fn open_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode=memory");

    let opened = Connection::open_in_memory()
        .map_err(DbError::from)
        .and_then(|mut conn| bootstrap_connection(&mut conn).map(|()| conn));
    log_outcome("memory", started_at, opened)
}

fn open_file(storage_dir: &Path) -> DbResult<Connection> {
    std::fs::create_dir_all(storage_dir).map_err(|error| DbError::StorageDir {
        dir: storage_dir.to_path_buf(),
        error,
    })?;
    let mut conn = Connection::open(storage_dir.join(DB_FILE_NAME))?;
    bootstrap_connection(&mut conn)?;
    Ok(conn)
}

fn log_outcome(
    mode: &str,
    started_at: Instant,
    opened: DbResult<Connection>,
) -> DbResult<Connection> {
    match &opened {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            mode,
            started_at.elapsed().as_millis()
        ),
        Err(err) => error!(
            "event=db_open module=db status=error mode={} duration_ms={} error={}",
            mode,
            started_at.elapsed().as_millis(),
            err
        ),
    }
    opened
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
