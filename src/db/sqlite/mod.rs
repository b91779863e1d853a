//! SQLite database module

mod codec;
pub mod models;
mod account_settings;
mod connection;
mod ingestion_runs;
mod items;
mod migrations;
mod query;
mod saved_reports;

use crate::error::{AppError, Result, RowError};
use crate::inventory::InventoryItem;
use crate::store::{AggregationRequest, Bucket, ItemQuery, ItemStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use connection::SqlitePool;
use rusqlite::Connection;
use std::path::Path;

pub use ingestion_runs::MAX_STORED_ROW_ERRORS;
pub use items::UNKNOWN_KEY;
pub use models::{AccountSettings, IngestionRun, RunCounts, RunStatus, SavedReport};

/// SQLite database wrapper.
///
/// Cloning is cheap; clones share the connection pool.
#[derive(Clone)]
pub struct SqliteDb {
    pool: SqlitePool,
}

impl SqliteDb {
    /// Open (or create) the database file and run migrations
    pub fn new(path: &Path, pool_size: u32) -> Result<Self> {
        let db = Self {
            pool: connection::file_pool(path, pool_size)?,
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        let db = Self {
            pool: connection::memory_pool()?,
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.pool.get()?;
        migrations::run_migrations(&conn)
    }

    /// Run blocking SQLite work off the async runtime
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("database task failed: {}", e)))?
    }

    // ========== Ingestion Run Methods ==========

    /// Create a pending run
    pub async fn create_run(&self, account_id: &str, now: DateTime<Utc>) -> Result<IngestionRun> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| ingestion_runs::create_run(conn, &account_id, now))
            .await
    }

    pub async fn get_run(&self, id: &str) -> Result<IngestionRun> {
        let id = id.to_string();
        self.with_conn(move |conn| ingestion_runs::get_run(conn, &id))
            .await
    }

    /// Most recent runs for an account
    pub async fn list_runs(&self, account_id: &str, limit: usize) -> Result<Vec<IngestionRun>> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| ingestion_runs::list_runs(conn, &account_id, limit))
            .await
    }

    pub async fn latest_run(&self, account_id: &str) -> Result<Option<IngestionRun>> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| ingestion_runs::latest_run(conn, &account_id))
            .await
    }

    /// Move a pending run to processing
    pub async fn start_run(
        &self,
        id: &str,
        filename: &str,
        feed_sha256: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestionRun> {
        let (id, filename, sha) = (id.to_string(), filename.to_string(), feed_sha256.to_string());
        self.with_conn(move |conn| ingestion_runs::start_run(conn, &id, &filename, &sha, now))
            .await
    }

    pub async fn update_run_counts(&self, id: &str, counts: RunCounts) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| ingestion_runs::update_counts(conn, &id, &counts))
            .await
    }

    /// Mark a run completed, or failed when `error` is set
    pub async fn finish_run(
        &self,
        id: &str,
        counts: RunCounts,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<IngestionRun> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            ingestion_runs::finish_run(conn, &id, &counts, error.as_deref(), now)
        })
        .await
    }

    pub async fn record_row_errors(&self, run_id: &str, errors: Vec<RowError>) -> Result<usize> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| ingestion_runs::record_row_errors(conn, &run_id, &errors))
            .await
    }

    pub async fn list_row_errors(&self, run_id: &str) -> Result<Vec<RowError>> {
        let run_id = run_id.to_string();
        self.with_conn(move |conn| ingestion_runs::list_row_errors(conn, &run_id))
            .await
    }

    // ========== Account Settings Methods ==========

    pub async fn get_account_settings(&self, account_id: &str) -> Result<Option<AccountSettings>> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| account_settings::get_settings(conn, &account_id))
            .await
    }

    pub async fn save_account_settings(
        &self,
        settings: AccountSettings,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(move |conn| account_settings::save_settings(conn, &settings, now))
            .await
    }

    /// Enabled accounts with a feed location
    pub async fn list_syncable_accounts(&self) -> Result<Vec<AccountSettings>> {
        self.with_conn(|conn| account_settings::list_syncable(conn))
            .await
    }

    // ========== Saved Report Methods ==========

    pub async fn create_report(
        &self,
        account_id: &str,
        name: &str,
        filter: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<SavedReport> {
        let (account_id, name) = (account_id.to_string(), name.to_string());
        self.with_conn(move |conn| {
            saved_reports::create_report(conn, &account_id, &name, &filter, now)
        })
        .await
    }

    pub async fn get_report(&self, account_id: &str, id: i64) -> Result<SavedReport> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| saved_reports::get_report(conn, &account_id, id))
            .await
    }

    pub async fn list_reports(&self, account_id: &str) -> Result<Vec<SavedReport>> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| saved_reports::list_reports(conn, &account_id))
            .await
    }

    pub async fn update_report(
        &self,
        account_id: &str,
        id: i64,
        name: Option<String>,
        filter: Option<serde_json::Value>,
        now: DateTime<Utc>,
    ) -> Result<SavedReport> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| {
            saved_reports::update_report(
                conn,
                &account_id,
                id,
                name.as_deref(),
                filter.as_ref(),
                now,
            )
        })
        .await
    }

    pub async fn touch_report(&self, account_id: &str, id: i64, now: DateTime<Utc>) -> Result<()> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| saved_reports::touch_report(conn, &account_id, id, now))
            .await
    }

    pub async fn delete_report(&self, account_id: &str, id: i64) -> Result<()> {
        let account_id = account_id.to_string();
        self.with_conn(move |conn| saved_reports::delete_report(conn, &account_id, id))
            .await
    }
}

#[async_trait]
impl ItemStore for SqliteDb {
    async fn find(&self, id: &str) -> Result<Option<InventoryItem>> {
        let id = id.to_string();
        self.with_conn(move |conn| items::find(conn, &id)).await
    }

    async fn find_by_serial(
        &self,
        account_id: &str,
        serial_number: &str,
    ) -> Result<Option<InventoryItem>> {
        let (account_id, serial) = (account_id.to_string(), serial_number.to_string());
        self.with_conn(move |conn| items::find_by_serial(conn, &account_id, &serial))
            .await
    }

    async fn upsert(&self, item: &InventoryItem) -> Result<()> {
        let item = item.clone();
        self.with_conn(move |conn| items::upsert(conn, &item)).await
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| items::delete(conn, &id)).await
    }

    async fn search(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>> {
        let query = query.clone();
        self.with_conn(move |conn| items::search(conn, &query)).await
    }

    async fn count(&self, query: &ItemQuery) -> Result<u64> {
        let query = query.clone();
        self.with_conn(move |conn| items::count(conn, &query)).await
    }

    async fn aggregate(&self, request: &AggregationRequest) -> Result<Bucket> {
        let request = request.clone();
        self.with_conn(move |conn| items::aggregate(conn, &request))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ItemState;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_in_memory_store_persists_across_calls() {
        let db = SqliteDb::open_in_memory().unwrap();
        let item = InventoryItem::new("acct", "1001", ItemState::InStock, Utc::now());
        db.upsert(&item).await.unwrap();

        let found = db.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert_eq!(db.count(&ItemQuery::for_account("acct")).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_file_database_reopens() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stockturn.db");
        let item = InventoryItem::new("acct", "7", ItemState::OnJobs, Utc::now());

        {
            let db = SqliteDb::new(&path, 2).unwrap();
            db.upsert(&item).await.unwrap();
        }

        let db = SqliteDb::new(&path, 2).unwrap();
        let found = db.find(&item.id).await.unwrap().unwrap();
        assert_eq!(found.state, ItemState::OnJobs);
    }
}
