//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_items", CREATE_ITEMS_TABLE)?;
    run_migration(conn, "002_ingestion_runs", CREATE_INGESTION_RUNS_TABLE)?;
    run_migration(conn, "003_ingestion_run_errors", CREATE_INGESTION_RUN_ERRORS_TABLE)?;
    run_migration(conn, "004_account_settings", CREATE_ACCOUNT_SETTINGS_TABLE)?;
    run_migration(conn, "005_saved_reports", CREATE_SAVED_REPORTS_TABLE)?;

    tracing::debug!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_ITEMS_TABLE: &str = r#"
CREATE TABLE items (
    id TEXT PRIMARY KEY,
    schema_version INTEGER NOT NULL DEFAULT 1,
    account_id TEXT NOT NULL,
    serial_number TEXT NOT NULL,
    item_number TEXT,
    item_type TEXT,
    code TEXT,
    carat_range TEXT,
    quality TEXT,
    metal_type TEXT,
    metal_code TEXT,
    carat_code INTEGER,
    total_carat_weight REAL,
    unit_price REAL NOT NULL DEFAULT 0,
    description TEXT,
    date_created TEXT,
    location_code TEXT,
    shipment_date TEXT,
    salesperson_code TEXT,
    state TEXT NOT NULL CHECK (state IN ('pending', 'onjobs', 'instock', 'sales', 'deleted')),
    first_seen_at TEXT,
    last_seen_at TEXT,
    sold_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX idx_items_account_serial ON items(account_id, serial_number, id);
CREATE INDEX idx_items_account_state ON items(account_id, state, last_seen_at);
CREATE INDEX idx_items_account_sold ON items(account_id, sold_at);
"#;

const CREATE_INGESTION_RUNS_TABLE: &str = r#"
CREATE TABLE ingestion_runs (
    id TEXT PRIMARY KEY,
    account_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'completed', 'failed')),
    filename TEXT,
    feed_sha256 TEXT,
    total_records INTEGER NOT NULL DEFAULT 0,
    processed_records INTEGER NOT NULL DEFAULT 0,
    new_items INTEGER NOT NULL DEFAULT 0,
    updated_items INTEGER NOT NULL DEFAULT 0,
    sold_items INTEGER NOT NULL DEFAULT 0,
    error_count INTEGER NOT NULL DEFAULT 0,
    error_message TEXT,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX idx_ingestion_runs_account ON ingestion_runs(account_id, created_at);
"#;

const CREATE_INGESTION_RUN_ERRORS_TABLE: &str = r#"
CREATE TABLE ingestion_run_errors (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL REFERENCES ingestion_runs(id) ON DELETE CASCADE,
    row_number INTEGER NOT NULL,
    serial_number TEXT,
    message TEXT NOT NULL
);

CREATE INDEX idx_ingestion_run_errors_run ON ingestion_run_errors(run_id, row_number);
"#;

const CREATE_ACCOUNT_SETTINGS_TABLE: &str = r#"
CREATE TABLE account_settings (
    account_id TEXT PRIMARY KEY,
    feed_location TEXT,
    sync_interval_minutes INTEGER,
    stale_after_minutes INTEGER,
    ideal_turn REAL,
    enabled INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

const CREATE_SAVED_REPORTS_TABLE: &str = r#"
CREATE TABLE saved_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    account_id TEXT NOT NULL,
    name TEXT NOT NULL,
    filter_json TEXT NOT NULL,
    last_used_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (account_id, name)
);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 5);
    }
}
