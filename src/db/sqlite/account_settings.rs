//! Per-account ingestion settings

use super::codec::format_timestamp;
use super::models::AccountSettings;
use crate::error::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SETTINGS_COLUMNS: &str =
    "account_id, feed_location, sync_interval_minutes, stale_after_minutes, ideal_turn, enabled";

fn settings_from_row(row: &Row<'_>) -> rusqlite::Result<AccountSettings> {
    Ok(AccountSettings {
        account_id: row.get(0)?,
        feed_location: row.get(1)?,
        sync_interval_minutes: row.get(2)?,
        stale_after_minutes: row.get(3)?,
        ideal_turn: row.get(4)?,
        enabled: row.get::<_, i32>(5)? == 1,
    })
}

/// Get settings for an account
pub fn get_settings(conn: &Connection, account_id: &str) -> Result<Option<AccountSettings>> {
    let sql = format!(
        "SELECT {} FROM account_settings WHERE account_id = ?",
        SETTINGS_COLUMNS
    );
    Ok(conn
        .query_row(&sql, [account_id], settings_from_row)
        .optional()?)
}

/// Insert or replace settings for an account
pub fn save_settings(
    conn: &Connection,
    settings: &AccountSettings,
    now: DateTime<Utc>,
) -> Result<()> {
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO account_settings
            (account_id, feed_location, sync_interval_minutes, stale_after_minutes, ideal_turn,
             enabled, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(account_id) DO UPDATE SET
            feed_location = excluded.feed_location,
            sync_interval_minutes = excluded.sync_interval_minutes,
            stale_after_minutes = excluded.stale_after_minutes,
            ideal_turn = excluded.ideal_turn,
            enabled = excluded.enabled,
            updated_at = excluded.updated_at",
        params![
            settings.account_id,
            settings.feed_location,
            settings.sync_interval_minutes,
            settings.stale_after_minutes,
            settings.ideal_turn,
            settings.enabled as i32,
            ts,
        ],
    )?;
    Ok(())
}

/// Enabled accounts that have somewhere to pull a feed from
pub fn list_syncable(conn: &Connection) -> Result<Vec<AccountSettings>> {
    let sql = format!(
        "SELECT {} FROM account_settings
         WHERE enabled = 1 AND feed_location IS NOT NULL AND TRIM(feed_location) != ''
         ORDER BY account_id",
        SETTINGS_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let settings = stmt
        .query_map([], settings_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(settings)
}
