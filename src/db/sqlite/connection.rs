//! SQLite connection pool construction

use crate::error::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::Path;
use std::time::Duration;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Pool over a database file
pub fn file_pool(path: &Path, size: u32) -> Result<SqlitePool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        // WAL lets readers proceed while an ingestion run writes
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; \
             PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;",
        )
    });

    let pool = Pool::builder()
        .max_size(size.max(1))
        .connection_timeout(Duration::from_secs(30))
        .build(manager)?;
    Ok(pool)
}

/// Single-connection pool over a private in-memory database.
///
/// Every in-memory connection is its own database, so the one connection
/// is never recycled.
pub fn memory_pool() -> Result<SqlitePool> {
    let manager = SqliteConnectionManager::memory()
        .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys=ON;"));

    let pool = Pool::builder()
        .max_size(1)
        .min_idle(Some(1))
        .idle_timeout(None)
        .max_lifetime(None)
        .build(manager)?;
    Ok(pool)
}
