//! Ingestion Service
//!
//! Runs one feed through parse, reconcile and (optionally) the sale sweep,
//! recording every step on an [`IngestionRun`]. A failure is written to the
//! run before it is returned to the caller.

use super::reconcile_service::ReconcileService;
use super::sales_detection_service::SalesDetectionService;
use crate::db::sqlite::{IngestionRun, RunCounts};
use crate::error::{AppError, Result};
use crate::feed::{parse_feed, source_for_location, FeedPayload};
use crate::state::{AppState, EffectiveSettings};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

/// Marks an account as busy until dropped
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, DateTime<Utc>>,
    account_id: String,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(state: &'a AppState, account_id: &str, now: DateTime<Utc>) -> Result<Self> {
        match state.in_flight.entry(account_id.to_string()) {
            Entry::Occupied(running) => Err(AppError::Validation(format!(
                "An ingestion for account {} has been running since {}",
                account_id,
                running.get()
            ))),
            Entry::Vacant(slot) => {
                slot.insert(now);
                Ok(Self {
                    in_flight: &state.in_flight,
                    account_id: account_id.to_string(),
                })
            }
        }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.account_id);
    }
}

/// Ingestion service for business logic
pub struct IngestionService;

impl IngestionService {
    /// Scheduled pull: fetch the account's configured feed, reconcile, sweep
    pub async fn sync_account(
        state: &AppState,
        account_id: &str,
        now: DateTime<Utc>,
    ) -> Result<IngestionRun> {
        info!("IngestionService::sync_account - account {}", account_id);

        let settings = state.settings_for(account_id).await?;
        let location = settings
            .feed_location
            .clone()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| {
                AppError::Config(format!("Account {} has no feed location", account_id))
            })?;

        let _guard = InFlightGuard::acquire(state, account_id, now)?;
        let run = state.db.create_run(account_id, now).await?;

        let mut counts = RunCounts::default();
        let result = async {
            let source = source_for_location(&location)?;
            info!("Fetching feed for account {} from {}", account_id, source.describe());
            let payload = source.fetch().await?;
            Self::process(state, &run.id, &settings, &payload, true, now, &mut counts).await
        }
        .await;

        Self::conclude(state, &run.id, counts, result, now).await
    }

    /// Manual upload. The sweep is opt-in since an upload may be a partial feed.
    pub async fn ingest_upload(
        state: &AppState,
        account_id: &str,
        filename: &str,
        bytes: Vec<u8>,
        sweep: bool,
        now: DateTime<Utc>,
    ) -> Result<IngestionRun> {
        info!(
            "IngestionService::ingest_upload - account {}, file {} ({} bytes)",
            account_id,
            filename,
            bytes.len()
        );

        let settings = state.settings_for(account_id).await?;
        let _guard = InFlightGuard::acquire(state, account_id, now)?;
        let run = state.db.create_run(account_id, now).await?;

        let payload = FeedPayload {
            filename: filename.to_string(),
            bytes,
        };
        let mut counts = RunCounts::default();
        let result =
            Self::process(state, &run.id, &settings, &payload, sweep, now, &mut counts).await;

        Self::conclude(state, &run.id, counts, result, now).await
    }

    /// Whether an ingestion for the account is currently running
    pub fn is_running(state: &AppState, account_id: &str) -> bool {
        state.in_flight.contains_key(account_id)
    }

    // ========================================================================
    // Private Helper Methods
    // ========================================================================

    async fn process(
        state: &AppState,
        run_id: &str,
        settings: &EffectiveSettings,
        payload: &FeedPayload,
        sweep: bool,
        now: DateTime<Utc>,
        counts: &mut RunCounts,
    ) -> Result<()> {
        let digest = hex::encode(Sha256::digest(&payload.bytes));
        state
            .db
            .start_run(run_id, &payload.filename, &digest, now)
            .await?;

        let rows: Vec<_> = parse_feed(&payload.bytes, &state.config.carat_bands)?.collect();
        let report =
            ReconcileService::reconcile(state, &settings.account_id, rows, now).await?;

        counts.total_records = report.total_records();
        counts.processed_records = report.processed_count;
        counts.new_items = report.created;
        counts.updated_items = report.updated;
        counts.error_count = report.errors.len() as u64;

        if !report.errors.is_empty() {
            let stored = state.db.record_row_errors(run_id, report.errors).await?;
            warn!(
                "Run {}: {} row errors ({} stored)",
                run_id, counts.error_count, stored
            );
        }
        state.db.update_run_counts(run_id, *counts).await?;

        if !sweep {
            return Ok(());
        }
        if report.processed_count == 0 {
            // An empty feed would read as every item sold
            warn!(
                "Run {}: feed {} had no usable rows, skipping sale sweep",
                run_id, payload.filename
            );
            return Ok(());
        }

        let swept =
            SalesDetectionService::sweep(state, &settings.account_id, settings.stale_after, now)
                .await?;
        counts.sold_items = swept.sold;
        Ok(())
    }

    async fn conclude(
        state: &AppState,
        run_id: &str,
        counts: RunCounts,
        result: Result<()>,
        now: DateTime<Utc>,
    ) -> Result<IngestionRun> {
        match result {
            Ok(()) => {
                let run = state.db.finish_run(run_id, counts, None, now).await?;
                info!(
                    "Run {} completed: {} rows, {} new, {} updated, {} sold, {} errors",
                    run_id,
                    counts.total_records,
                    counts.new_items,
                    counts.updated_items,
                    counts.sold_items,
                    counts.error_count
                );
                Ok(run)
            }
            Err(err) => {
                error!("Run {} failed: {}", run_id, err);
                if let Err(record_err) = state
                    .db
                    .finish_run(run_id, counts, Some(err.to_string()), now)
                    .await
                {
                    error!("Could not record failure of run {}: {}", run_id, record_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::sqlite::{AccountSettings, RunStatus};
    use crate::inventory::ItemState;
    use chrono::{Duration, TimeZone};

    const FEED: &str = "Serial No.,Type,Unit Price,Status\n\
                        1001,Rings,100,Stock\n\
                        1002,Studs,200,Stock\n\
                        ,Studs,300,Stock\n";

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn state() -> AppState {
        AppState::in_memory(AppConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_upload_records_completed_run() {
        let state = state();
        let run = IngestionService::ingest_upload(
            &state,
            "acct",
            "feed.csv",
            FEED.as_bytes().to_vec(),
            false,
            t0(),
        )
        .await
        .unwrap();

        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.filename.as_deref(), Some("feed.csv"));
        assert_eq!(run.feed_sha256.as_ref().map(|h| h.len()), Some(64));
        assert_eq!(run.counts.total_records, 3);
        assert_eq!(run.counts.new_items, 2);
        assert_eq!(run.counts.processed_records, 2);
        assert_eq!(run.counts.error_count, 1);
        assert_eq!(run.completed_at, Some(t0()));

        let errors = state.db.list_row_errors(&run.id).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].row, 4);
        assert!(!IngestionService::is_running(&state, "acct"));
    }

    #[tokio::test]
    async fn test_unreadable_feed_fails_the_run() {
        let state = state();
        let result = IngestionService::ingest_upload(
            &state,
            "acct",
            "photo.png",
            vec![0x89, b'P', b'N', b'G', 0, 0],
            true,
            t0(),
        )
        .await;
        assert!(matches!(result, Err(AppError::FeedUnreadable(_))));

        let run = state.db.latest_run("acct").await.unwrap().unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.error_message.unwrap().contains("binary"));
        assert!(!IngestionService::is_running(&state, "acct"));
    }

    #[tokio::test]
    async fn test_concurrent_ingestion_is_rejected() {
        let state = state();
        state.in_flight.insert("acct".to_string(), t0());

        let result = IngestionService::ingest_upload(
            &state,
            "acct",
            "feed.csv",
            FEED.as_bytes().to_vec(),
            false,
            t0(),
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(state.db.list_runs("acct", 10).await.unwrap().is_empty());

        // Other accounts are independent
        assert!(IngestionService::ingest_upload(
            &state,
            "other",
            "feed.csv",
            FEED.as_bytes().to_vec(),
            false,
            t0(),
        )
        .await
        .is_ok());
    }

    #[tokio::test]
    async fn test_sync_reads_directory_and_sweeps() {
        let state = state();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("feed.csv"), FEED).unwrap();

        let mut settings = AccountSettings::new("acct");
        settings.feed_location = Some(dir.path().display().to_string());
        state.db.save_account_settings(settings, t0()).await.unwrap();

        let first = IngestionService::sync_account(&state, "acct", t0()).await.unwrap();
        assert_eq!(first.counts.new_items, 2);
        assert_eq!(first.counts.sold_items, 0);

        // 1002 drops out of the feed
        std::fs::write(
            dir.path().join("feed.csv"),
            "Serial No.,Unit Price\n1001,100\n",
        )
        .unwrap();
        let later = t0() + Duration::hours(3);
        let second = IngestionService::sync_account(&state, "acct", later).await.unwrap();
        assert_eq!(second.status, RunStatus::Completed);
        assert_eq!(second.counts.updated_items, 1);
        assert_eq!(second.counts.sold_items, 1);

        let gone = state.store.find_by_serial("acct", "1002").await.unwrap().unwrap();
        assert_eq!(gone.state, ItemState::Sales);
        assert_eq!(gone.sold_at, Some(later));

        let runs = state.db.list_runs("acct", 10).await.unwrap();
        assert_eq!(runs.len(), 2);
    }

    #[tokio::test]
    async fn test_sync_without_location_is_a_config_error() {
        let state = state();
        let result = IngestionService::sync_account(&state, "acct", t0()).await;
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_feed_skips_sweep() {
        let state = state();
        IngestionService::ingest_upload(&state, "acct", "a.csv", FEED.as_bytes().to_vec(), false, t0())
            .await
            .unwrap();

        let later = t0() + Duration::hours(5);
        let run = IngestionService::ingest_upload(
            &state,
            "acct",
            "b.csv",
            b"Serial No.,Price\n".to_vec(),
            true,
            later,
        )
        .await
        .unwrap();
        assert_eq!(run.counts.sold_items, 0);
        let item = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(item.state, ItemState::InStock);
    }
}
