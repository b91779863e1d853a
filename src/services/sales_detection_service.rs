//! Sales Detection Service
//!
//! The point-of-sale feed carries no "sold" signal. An in-stock item that has
//! dropped out of the feed for longer than the staleness threshold is taken
//! as sold.

use crate::error::Result;
use crate::inventory::{ItemState, LifecycleEvent};
use crate::state::AppState;
use crate::store::{Field, ItemQuery, Value};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::ops::Bound;
use tracing::{debug, info, warn};

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Items marked sold
    pub sold: u64,
    /// In-stock items before the sweep
    pub active_before: u64,
    /// Set when `sold` crossed the configured alert ratio
    pub anomalous: bool,
}

/// Sales detection service for business logic
pub struct SalesDetectionService;

impl SalesDetectionService {
    /// Mark every in-stock item of `account_id` unseen since `now - stale_after` as sold
    pub async fn sweep(
        state: &AppState,
        account_id: &str,
        stale_after: Duration,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        info!(
            "SalesDetectionService::sweep - account {}, stale after {} min",
            account_id,
            stale_after.num_minutes()
        );

        let cutoff = now - stale_after;
        let in_stock = ItemQuery::for_account(account_id).term(Field::State, ItemState::InStock.as_str());
        let active_before = state.store.count(&in_stock).await?;

        let stale = in_stock.range(
            Field::LastSeenAt,
            Bound::Unbounded,
            Bound::Excluded(Value::Time(cutoff)),
        );
        let candidates = state.store.search(&stale).await?;

        let mut report = SweepReport {
            active_before,
            ..Default::default()
        };

        for mut item in candidates {
            if !item.may_transition(LifecycleEvent::MarkSold) {
                continue;
            }
            item.apply(LifecycleEvent::MarkSold, now)?;
            state.store.upsert(&item).await?;
            debug!(
                "Inferred sale of {} (last seen {:?})",
                item.serial_number, item.last_seen_at
            );
            report.sold += 1;
        }

        let threshold = active_before as f64 * state.config.sweep_alert_ratio;
        if report.sold > 0 && report.sold as f64 > threshold {
            report.anomalous = true;
            warn!(
                "Sweep for account {} marked {} of {} in-stock items sold; check the feed for gaps",
                account_id, report.sold, active_before
            );
        }

        info!("Sweep for account {} marked {} items sold", account_id, report.sold);
        Ok(report)
    }
}
