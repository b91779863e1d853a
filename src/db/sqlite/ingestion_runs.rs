//! Ingestion run records and their row errors

use super::codec::{conversion_error, format_timestamp, opt_timestamp_at, timestamp_at};
use super::models::{IngestionRun, RunCounts, RunStatus};
use crate::error::{AppError, Result, RowError};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Row errors kept per run; the rest are only counted
pub const MAX_STORED_ROW_ERRORS: usize = 500;

const RUN_COLUMNS: &str = "id, account_id, status, filename, feed_sha256, total_records, \
     processed_records, new_items, updated_items, sold_items, error_count, error_message, \
     started_at, completed_at, created_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<IngestionRun> {
    let status: String = row.get(2)?;
    let status = status
        .parse::<RunStatus>()
        .map_err(|e| conversion_error(2, e.to_string()))?;

    let count = |i: usize| -> rusqlite::Result<u64> { Ok(row.get::<_, i64>(i)? as u64) };

    Ok(IngestionRun {
        id: row.get(0)?,
        account_id: row.get(1)?,
        status,
        filename: row.get(3)?,
        feed_sha256: row.get(4)?,
        counts: RunCounts {
            total_records: count(5)?,
            processed_records: count(6)?,
            new_items: count(7)?,
            updated_items: count(8)?,
            sold_items: count(9)?,
            error_count: count(10)?,
        },
        error_message: row.get(11)?,
        started_at: opt_timestamp_at(row, 12)?,
        completed_at: opt_timestamp_at(row, 13)?,
        created_at: timestamp_at(row, 14)?,
    })
}

/// Create a pending run
pub fn create_run(conn: &Connection, account_id: &str, now: DateTime<Utc>) -> Result<IngestionRun> {
    let id = uuid::Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO ingestion_runs (id, account_id, status, created_at) VALUES (?, ?, 'pending', ?)",
        params![id, account_id, format_timestamp(now)],
    )?;
    get_run(conn, &id)
}

/// Get run by id
pub fn get_run(conn: &Connection, id: &str) -> Result<IngestionRun> {
    let sql = format!("SELECT {} FROM ingestion_runs WHERE id = ?", RUN_COLUMNS);
    conn.query_row(&sql, [id], run_from_row)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Ingestion run not found: {}", id)))
}

/// Most recent runs for an account, newest first
pub fn list_runs(conn: &Connection, account_id: &str, limit: usize) -> Result<Vec<IngestionRun>> {
    let sql = format!(
        "SELECT {} FROM ingestion_runs WHERE account_id = ? ORDER BY created_at DESC, id LIMIT ?",
        RUN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let runs = stmt
        .query_map(params![account_id, limit as i64], run_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(runs)
}

/// Newest run for an account
pub fn latest_run(conn: &Connection, account_id: &str) -> Result<Option<IngestionRun>> {
    Ok(list_runs(conn, account_id, 1)?.into_iter().next())
}

/// Turn a zero-row guarded update into the right error
fn ensure_changed(conn: &Connection, id: &str, changed: usize, action: &str) -> Result<()> {
    if changed > 0 {
        return Ok(());
    }
    let run = get_run(conn, id)?;
    Err(AppError::Validation(format!(
        "Cannot {} ingestion run {}: status is {}",
        action, id, run.status
    )))
}

/// pending -> processing
pub fn start_run(
    conn: &Connection,
    id: &str,
    filename: &str,
    feed_sha256: &str,
    now: DateTime<Utc>,
) -> Result<IngestionRun> {
    let changed = conn.execute(
        "UPDATE ingestion_runs
         SET status = 'processing', filename = ?, feed_sha256 = ?, started_at = ?
         WHERE id = ? AND status = 'pending'",
        params![filename, feed_sha256, format_timestamp(now), id],
    )?;
    ensure_changed(conn, id, changed, "start")?;
    get_run(conn, id)
}

/// Progress update while processing
pub fn update_counts(conn: &Connection, id: &str, counts: &RunCounts) -> Result<()> {
    let changed = conn.execute(
        "UPDATE ingestion_runs
         SET total_records = ?, processed_records = ?, new_items = ?, updated_items = ?,
             sold_items = ?, error_count = ?
         WHERE id = ? AND status = 'processing'",
        params![
            counts.total_records as i64,
            counts.processed_records as i64,
            counts.new_items as i64,
            counts.updated_items as i64,
            counts.sold_items as i64,
            counts.error_count as i64,
            id,
        ],
    )?;
    ensure_changed(conn, id, changed, "update")
}

/// Final transition with counts; `error` marks the run failed
pub fn finish_run(
    conn: &Connection,
    id: &str,
    counts: &RunCounts,
    error: Option<&str>,
    now: DateTime<Utc>,
) -> Result<IngestionRun> {
    let status = if error.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Completed
    };

    let changed = conn.execute(
        "UPDATE ingestion_runs
         SET status = ?, total_records = ?, processed_records = ?, new_items = ?,
             updated_items = ?, sold_items = ?, error_count = ?, error_message = ?,
             completed_at = ?
         WHERE id = ? AND status IN ('pending', 'processing')",
        params![
            status.as_str(),
            counts.total_records as i64,
            counts.processed_records as i64,
            counts.new_items as i64,
            counts.updated_items as i64,
            counts.sold_items as i64,
            counts.error_count as i64,
            error,
            format_timestamp(now),
            id,
        ],
    )?;
    ensure_changed(conn, id, changed, "finish")?;
    get_run(conn, id)
}

/// Store row errors, keeping at most `MAX_STORED_ROW_ERRORS` per run
pub fn record_row_errors(conn: &mut Connection, run_id: &str, errors: &[RowError]) -> Result<usize> {
    let tx = conn.transaction()?;

    let stored: i64 = tx.query_row(
        "SELECT COUNT(*) FROM ingestion_run_errors WHERE run_id = ?",
        [run_id],
        |row| row.get(0),
    )?;
    let room = MAX_STORED_ROW_ERRORS.saturating_sub(stored as usize);
    let batch = &errors[..errors.len().min(room)];

    {
        let mut stmt = tx.prepare(
            "INSERT INTO ingestion_run_errors (run_id, row_number, serial_number, message)
             VALUES (?, ?, ?, ?)",
        )?;
        for err in batch {
            stmt.execute(params![run_id, err.row as i64, err.serial_number, err.message])?;
        }
    }

    tx.commit()?;
    Ok(batch.len())
}

/// Stored row errors for a run, in row order
pub fn list_row_errors(conn: &Connection, run_id: &str) -> Result<Vec<RowError>> {
    let mut stmt = conn.prepare(
        "SELECT row_number, serial_number, message FROM ingestion_run_errors
         WHERE run_id = ? ORDER BY row_number, id",
    )?;
    let errors = stmt
        .query_map([run_id], |row| {
            Ok(RowError {
                row: row.get::<_, i64>(0)? as u64,
                serial_number: row.get(1)?,
                message: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(errors)
}
