//! Saved report presets

use super::codec::{conversion_error, format_timestamp, opt_timestamp_at, timestamp_at};
use super::models::SavedReport;
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};

const REPORT_COLUMNS: &str =
    "id, account_id, name, filter_json, last_used_at, created_at, updated_at";

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<SavedReport> {
    let raw: String = row.get(3)?;
    let filter = serde_json::from_str(&raw).map_err(|e| conversion_error(3, e.to_string()))?;

    Ok(SavedReport {
        id: row.get(0)?,
        account_id: row.get(1)?,
        name: row.get(2)?,
        filter,
        last_used_at: opt_timestamp_at(row, 4)?,
        created_at: timestamp_at(row, 5)?,
        updated_at: timestamp_at(row, 6)?,
    })
}

fn duplicate_name(err: rusqlite::Error, name: &str) -> AppError {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            AppError::Validation(format!("A report named '{}' already exists", name))
        }
        other => other.into(),
    }
}

/// Create a report
pub fn create_report(
    conn: &Connection,
    account_id: &str,
    name: &str,
    filter: &serde_json::Value,
    now: DateTime<Utc>,
) -> Result<SavedReport> {
    let ts = format_timestamp(now);
    conn.execute(
        "INSERT INTO saved_reports (account_id, name, filter_json, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?4)",
        params![account_id, name, filter.to_string(), ts],
    )
    .map_err(|e| duplicate_name(e, name))?;

    let id = conn.last_insert_rowid();
    get_report(conn, account_id, id)
}

/// Get report by id within an account
pub fn get_report(conn: &Connection, account_id: &str, id: i64) -> Result<SavedReport> {
    let sql = format!(
        "SELECT {} FROM saved_reports WHERE id = ? AND account_id = ?",
        REPORT_COLUMNS
    );
    conn.query_row(&sql, params![id, account_id], report_from_row)
        .optional()?
        .ok_or_else(|| AppError::NotFound(format!("Saved report not found: {}", id)))
}

/// Reports of an account, most recently used first
pub fn list_reports(conn: &Connection, account_id: &str) -> Result<Vec<SavedReport>> {
    let sql = format!(
        "SELECT {} FROM saved_reports WHERE account_id = ?
         ORDER BY last_used_at DESC, updated_at DESC, id DESC",
        REPORT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let reports = stmt
        .query_map([account_id], report_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(reports)
}

/// Rename a report and/or replace its filter
pub fn update_report(
    conn: &Connection,
    account_id: &str,
    id: i64,
    name: Option<&str>,
    filter: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<SavedReport> {
    let mut updates = vec!["updated_at = ?"];
    let mut values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(format_timestamp(now))];

    if let Some(n) = name {
        updates.push("name = ?");
        values.push(Box::new(n.to_string()));
    }
    if let Some(f) = filter {
        updates.push("filter_json = ?");
        values.push(Box::new(f.to_string()));
    }

    values.push(Box::new(id));
    values.push(Box::new(account_id.to_string()));

    let sql = format!(
        "UPDATE saved_reports SET {} WHERE id = ? AND account_id = ?",
        updates.join(", ")
    );
    let params: Vec<&dyn rusqlite::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let changed = conn
        .execute(&sql, params.as_slice())
        .map_err(|e| duplicate_name(e, name.unwrap_or_default()))?;

    if changed == 0 {
        return Err(AppError::NotFound(format!("Saved report not found: {}", id)));
    }
    get_report(conn, account_id, id)
}

/// Stamp `last_used_at`
pub fn touch_report(conn: &Connection, account_id: &str, id: i64, now: DateTime<Utc>) -> Result<()> {
    let changed = conn.execute(
        "UPDATE saved_reports SET last_used_at = ? WHERE id = ? AND account_id = ?",
        params![format_timestamp(now), id, account_id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("Saved report not found: {}", id)));
    }
    Ok(())
}

/// Delete a report
pub fn delete_report(conn: &Connection, account_id: &str, id: i64) -> Result<()> {
    let changed = conn.execute(
        "DELETE FROM saved_reports WHERE id = ? AND account_id = ?",
        params![id, account_id],
    )?;
    if changed == 0 {
        return Err(AppError::NotFound(format!("Saved report not found: {}", id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::migrations::run_migrations;
    use chrono::Duration;
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_names_are_unique_per_account() {
        let conn = setup();
        let now = Utc::now();
        let filter = json!({"types": ["Rings"]});

        create_report(&conn, "acct", "Rings only", &filter, now).unwrap();
        let dup = create_report(&conn, "acct", "Rings only", &filter, now);
        assert!(matches!(dup, Err(AppError::Validation(_))));
        assert!(create_report(&conn, "other", "Rings only", &filter, now).is_ok());
    }

    #[test]
    fn test_list_orders_by_last_use() {
        let conn = setup();
        let now = Utc::now();
        let a = create_report(&conn, "acct", "A", &json!({}), now).unwrap();
        create_report(&conn, "acct", "B", &json!({}), now).unwrap();
        let c = create_report(&conn, "acct", "C", &json!({}), now).unwrap();

        touch_report(&conn, "acct", a.id, now + Duration::minutes(5)).unwrap();
        touch_report(&conn, "acct", c.id, now + Duration::minutes(1)).unwrap();

        let names: Vec<_> = list_reports(&conn, "acct")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["A", "C", "B"]);
    }

    #[test]
    fn test_update_and_delete() {
        let conn = setup();
        let now = Utc::now();
        let report = create_report(&conn, "acct", "Old", &json!({"idealTurn": 2.0}), now).unwrap();

        let updated = update_report(&conn, "acct", report.id, Some("New"), None, now).unwrap();
        assert_eq!(updated.name, "New");
        assert_eq!(updated.filter, json!({"idealTurn": 2.0}));

        assert!(matches!(
            update_report(&conn, "other", report.id, Some("X"), None, now),
            Err(AppError::NotFound(_))
        ));

        delete_report(&conn, "acct", report.id).unwrap();
        assert!(matches!(
            get_report(&conn, "acct", report.id),
            Err(AppError::NotFound(_))
        ));
    }
}
