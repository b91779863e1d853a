//! Reconcile Service
//!
//! Folds candidate feed rows into the item store: match by serial number,
//! refresh fields, move lifecycle state toward what the feed reports.

use crate::error::{AppError, Result, RowError};
use crate::inventory::{
    CandidateItem, FeedStatus, InventoryItem, ItemState, LifecycleEvent, OTHER_RANGE,
};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

/// State of a new item first seen as a job in production
pub const NEW_JOB_STATE: ItemState = ItemState::OnJobs;

/// State of a new item first seen as stock on hand
pub const NEW_STOCK_STATE: ItemState = ItemState::InStock;

/// Outcome of folding one feed into the store
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub created: u64,
    pub updated: u64,
    /// Rows that created or updated an item
    pub processed_count: u64,
    pub errors: Vec<RowError>,
}

impl ReconcileReport {
    /// Every non-blank row seen, good or bad
    pub fn total_records(&self) -> u64 {
        self.processed_count + self.errors.len() as u64
    }
}

enum Outcome {
    Created,
    Updated,
}

/// Event that moves an existing item toward the status the feed reports.
///
/// `None` when the item is already compatible or cannot move (deleted items
/// only get their fields refreshed).
pub fn plan_transition(state: ItemState, status: FeedStatus) -> Option<LifecycleEvent> {
    match (state, status) {
        (ItemState::Pending, FeedStatus::Job) => Some(LifecycleEvent::ActivateJob),
        (ItemState::Pending, FeedStatus::Stock) => Some(LifecycleEvent::MoveToStock),
        (ItemState::OnJobs, FeedStatus::Stock) => Some(LifecycleEvent::MoveToStock),
        // Back on the feed after being inferred sold
        (ItemState::Sales, _) => Some(LifecycleEvent::Reactivate),
        _ => None,
    }
}

/// Reconcile service for business logic
pub struct ReconcileService;

impl ReconcileService {
    /// Fold parsed rows into the store for one account.
    ///
    /// Row-level problems are collected in the report. A store failure aborts
    /// the whole pass.
    pub async fn reconcile<I>(
        state: &AppState,
        account_id: &str,
        rows: I,
        now: DateTime<Utc>,
    ) -> Result<ReconcileReport>
    where
        I: IntoIterator<Item = std::result::Result<CandidateItem, RowError>>,
    {
        info!("ReconcileService::reconcile - account {}", account_id);

        let mut report = ReconcileReport::default();

        for row in rows {
            let candidate = match row {
                Ok(candidate) => candidate,
                Err(err) => {
                    warn!("Skipping feed {}", err);
                    report.errors.push(err);
                    continue;
                }
            };

            match Self::reconcile_one(state, account_id, &candidate, now).await {
                Ok(Outcome::Created) => report.created += 1,
                Ok(Outcome::Updated) => report.updated += 1,
                Err(err @ AppError::StoreUnavailable(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        "Row {} ({}) not reconciled: {}",
                        candidate.row, candidate.serial_number, err
                    );
                    report.errors.push(RowError::new(
                        candidate.row,
                        Some(&candidate.serial_number),
                        err.to_string(),
                    ));
                    continue;
                }
            }
            report.processed_count += 1;
        }

        info!(
            "Reconciled account {}: {} created, {} updated, {} row errors",
            account_id,
            report.created,
            report.updated,
            report.errors.len()
        );
        Ok(report)
    }

    async fn reconcile_one(
        state: &AppState,
        account_id: &str,
        candidate: &CandidateItem,
        now: DateTime<Utc>,
    ) -> Result<Outcome> {
        let existing = state
            .store
            .find_by_serial(account_id, &candidate.serial_number)
            .await?;

        match existing {
            Some(mut item) => {
                item.merge_from(candidate);
                if item.last_seen_at.map_or(true, |seen| seen < now) {
                    item.last_seen_at = Some(now);
                }
                if let Some(event) = plan_transition(item.state, candidate.status) {
                    let from = item.state;
                    item.apply(event, now)?;
                    debug!(
                        "Item {} ({}): {} -> {}",
                        item.serial_number, item.id, from, item.state
                    );
                }
                item.updated_at = now;
                state.store.upsert(&item).await?;
                Ok(Outcome::Updated)
            }
            None => {
                let initial = match candidate.status {
                    FeedStatus::Job => NEW_JOB_STATE,
                    FeedStatus::Stock => NEW_STOCK_STATE,
                };
                let mut item =
                    InventoryItem::new(account_id, &candidate.serial_number, initial, now);
                item.merge_from(candidate);
                if item.carat_range.is_none() {
                    item.carat_range = Some(OTHER_RANGE.to_string());
                }
                state.store.upsert(&item).await?;
                debug!("Created item {} as {}", item.serial_number, item.state);
                Ok(Outcome::Created)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::feed::parse_feed;
    use crate::inventory::CaratBands;
    use crate::store::{ItemQuery, ItemStore};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};

    const FEED: &str = "Serial No.,Type,Style No,Quality,Carat Weight,Unit Price,Status,Location\n\
                        1001,Rings,R100,VS1,1.55,\"$1,234.50\",Stock,House\n\
                        1002,Studs,S200,SI1,0.75,500,On Job,\n\
                        1003,Pendants,P300,VS2,,80,Stock,Memo 12\n";

    fn state() -> AppState {
        AppState::in_memory(AppConfig::default()).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    async fn ingest(state: &AppState, feed: &str, now: DateTime<Utc>) -> ReconcileReport {
        let bands = CaratBands::standard();
        let rows: Vec<_> = parse_feed(feed.as_bytes(), &bands).unwrap().collect();
        ReconcileService::reconcile(state, "acct", rows, now).await.unwrap()
    }

    #[test]
    fn test_plan_transition_targets_legal_events() {
        for from in ItemState::ALL {
            for status in [FeedStatus::Job, FeedStatus::Stock] {
                if let Some(event) = plan_transition(from, status) {
                    assert!(from.may(event), "{} cannot {}", from, event);
                }
            }
        }
        assert_eq!(plan_transition(ItemState::InStock, FeedStatus::Job), None);
        assert_eq!(plan_transition(ItemState::Deleted, FeedStatus::Stock), None);
    }

    #[tokio::test]
    async fn test_first_sight_creates_items() {
        let state = state();
        let now = t0();
        let report = ingest(&state, FEED, now).await;

        assert_eq!(report.created, 3);
        assert_eq!(report.updated, 0);
        assert_eq!(report.processed_count, 3);
        assert!(report.errors.is_empty());

        let ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(ring.state, NEW_STOCK_STATE);
        assert_eq!(ring.unit_price, 1234.5);
        assert_eq!(ring.carat_range.as_deref(), Some("1.40-1.69"));
        assert_eq!(ring.first_seen_at, Some(now));

        let studs = state.store.find_by_serial("acct", "1002").await.unwrap().unwrap();
        assert_eq!(studs.state, NEW_JOB_STATE);

        let pendant = state.store.find_by_serial("acct", "1003").await.unwrap().unwrap();
        assert_eq!(pendant.carat_range.as_deref(), Some(OTHER_RANGE));
        assert!(pendant.is_on_memo());
    }

    #[tokio::test]
    async fn test_reingesting_is_idempotent() {
        let state = state();
        let now = t0();
        ingest(&state, FEED, now).await;

        let second = ingest(&state, FEED, now + Duration::hours(1)).await;
        let third = ingest(&state, FEED, now + Duration::hours(2)).await;
        assert_eq!(second.updated, 3);
        assert_eq!(second.updated, third.updated);
        assert_eq!(third.created, 0);

        let count = state.store.count(&ItemQuery::for_account("acct")).await.unwrap();
        assert_eq!(count, 3);

        let ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(ring.first_seen_at, Some(now));
        assert_eq!(ring.last_seen_at, Some(now + Duration::hours(2)));
    }

    #[tokio::test]
    async fn test_job_moves_to_stock_and_sold_item_reactivates() {
        let state = state();
        let now = t0();
        ingest(&state, FEED, now).await;

        let mut ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        ring.apply(LifecycleEvent::MarkSold, now).unwrap();
        state.store.upsert(&ring).await.unwrap();

        let later = now + Duration::hours(3);
        let feed = "Serial No.,Unit Price,Status\n1001,1300,Stock\n1002,500,Stock\n";
        let report = ingest(&state, feed, later).await;
        assert_eq!(report.updated, 2);

        let ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(ring.state, ItemState::InStock);
        assert_eq!(ring.sold_at, None);
        assert_eq!(ring.unit_price, 1300.0);
        // Fields absent from the second feed keep their values
        assert_eq!(ring.quality.as_deref(), Some("VS1"));

        let studs = state.store.find_by_serial("acct", "1002").await.unwrap().unwrap();
        assert_eq!(studs.state, ItemState::InStock);
    }

    #[tokio::test]
    async fn test_deleted_items_only_refresh_fields() {
        let state = state();
        let now = t0();
        ingest(&state, FEED, now).await;

        let mut ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        ring.apply(LifecycleEvent::MarkDeleted, now).unwrap();
        state.store.upsert(&ring).await.unwrap();

        ingest(&state, "Serial No.,Price\n1001,99\n", now + Duration::hours(1)).await;
        let ring = state.store.find_by_serial("acct", "1001").await.unwrap().unwrap();
        assert_eq!(ring.state, ItemState::Deleted);
        assert_eq!(ring.unit_price, 99.0);
    }

    #[tokio::test]
    async fn test_bad_rows_do_not_abort() {
        let state = state();
        let feed = "Serial No.,Price\n,10\n2001,20\n";
        let report = ingest(&state, feed, t0()).await;
        assert_eq!(report.created, 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].row, 2);
        assert_eq!(report.total_records(), 2);
    }

    /// Store that fails every call
    struct DownStore;

    #[async_trait]
    impl ItemStore for DownStore {
        async fn find(&self, _: &str) -> Result<Option<InventoryItem>> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn find_by_serial(&self, _: &str, _: &str) -> Result<Option<InventoryItem>> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn upsert(&self, _: &InventoryItem) -> Result<()> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn search(&self, _: &ItemQuery) -> Result<Vec<InventoryItem>> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn count(&self, _: &ItemQuery) -> Result<u64> {
            Err(AppError::StoreUnavailable("down".into()))
        }
        async fn aggregate(
            &self,
            _: &crate::store::AggregationRequest,
        ) -> Result<crate::store::Bucket> {
            Err(AppError::StoreUnavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_store_failure_is_fatal() {
        let base = state();
        let state = AppState::with_store(
            base.db.clone(),
            std::sync::Arc::new(DownStore),
            AppConfig::default(),
        );
        let bands = CaratBands::standard();
        let rows: Vec<_> = parse_feed(FEED.as_bytes(), &bands).unwrap().collect();
        let result = ReconcileService::reconcile(&state, "acct", rows, t0()).await;
        assert!(matches!(result, Err(AppError::StoreUnavailable(_))));
    }
}
