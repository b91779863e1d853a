//! Saved Report Service
//!
//! Named per-account filter presets for the table view.

use super::aggregation_service::AggregationService;
use crate::analytics::{AggregationFilter, TableView};
use crate::db::sqlite::SavedReport;
use crate::error::{AppError, Result};
use crate::state::AppState;
use chrono::{DateTime, Utc};
use tracing::info;

fn clean_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Report name must not be empty".to_string()));
    }
    Ok(name.to_string())
}

/// Saved report service for business logic
pub struct SavedReportService;

impl SavedReportService {
    /// Save a filter under a name unique within the account
    pub async fn save(
        state: &AppState,
        account_id: &str,
        name: &str,
        filter: &AggregationFilter,
        now: DateTime<Utc>,
    ) -> Result<SavedReport> {
        info!("SavedReportService::save - account {}, '{}'", account_id, name);
        let name = clean_name(name)?;
        let filter = serde_json::to_value(filter)?;
        state.db.create_report(account_id, &name, filter, now).await
    }

    /// Most recently used first
    pub async fn list(state: &AppState, account_id: &str) -> Result<Vec<SavedReport>> {
        state.db.list_reports(account_id).await
    }

    pub async fn get(state: &AppState, account_id: &str, id: i64) -> Result<SavedReport> {
        state.db.get_report(account_id, id).await
    }

    /// Decode the stored filter
    pub fn filter_of(report: &SavedReport) -> Result<AggregationFilter> {
        Ok(serde_json::from_value(report.filter.clone())?)
    }

    /// Rename and/or replace the filter
    pub async fn update(
        state: &AppState,
        account_id: &str,
        id: i64,
        name: Option<&str>,
        filter: Option<&AggregationFilter>,
        now: DateTime<Utc>,
    ) -> Result<SavedReport> {
        info!("SavedReportService::update - account {}, report {}", account_id, id);
        let name = name.map(clean_name).transpose()?;
        let filter = filter.map(serde_json::to_value).transpose()?;
        state.db.update_report(account_id, id, name, filter, now).await
    }

    pub async fn delete(state: &AppState, account_id: &str, id: i64) -> Result<()> {
        info!("SavedReportService::delete - account {}, report {}", account_id, id);
        state.db.delete_report(account_id, id).await
    }

    /// Run the table view with a saved filter and mark the report used
    pub async fn run_table(
        state: &AppState,
        account_id: &str,
        id: i64,
        now: DateTime<Utc>,
    ) -> Result<TableView> {
        info!("SavedReportService::run_table - account {}, report {}", account_id, id);
        let report = state.db.get_report(account_id, id).await?;
        let filter = Self::filter_of(&report)?;
        let table = AggregationService::table_view(state, account_id, &filter, now).await?;
        state.db.touch_report(account_id, id, now).await?;
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::inventory::{InventoryItem, ItemState};
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn rings_only() -> AggregationFilter {
        AggregationFilter {
            types: vec!["Rings".into()],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_save_and_decode_filter() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        let saved = SavedReportService::save(&state, "acct", "  Rings  ", &rings_only(), t0())
            .await
            .unwrap();
        assert_eq!(saved.name, "Rings");

        let loaded = SavedReportService::get(&state, "acct", saved.id).await.unwrap();
        assert_eq!(SavedReportService::filter_of(&loaded).unwrap(), rings_only());

        let duplicate = SavedReportService::save(&state, "acct", "Rings", &rings_only(), t0()).await;
        assert!(matches!(duplicate, Err(AppError::Validation(_))));
        let blank = SavedReportService::save(&state, "acct", " ", &rings_only(), t0()).await;
        assert!(matches!(blank, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_run_table_marks_report_used() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        let mut ring = InventoryItem::new("acct", "r1", ItemState::InStock, t0());
        ring.item_type = Some("Rings".into());
        state.store.upsert(&ring).await.unwrap();
        let mut studs = InventoryItem::new("acct", "s1", ItemState::InStock, t0());
        studs.item_type = Some("Studs".into());
        state.store.upsert(&studs).await.unwrap();

        let first = SavedReportService::save(&state, "acct", "Rings", &rings_only(), t0())
            .await
            .unwrap();
        let second = SavedReportService::save(
            &state,
            "acct",
            "Everything",
            &AggregationFilter::default(),
            t0(),
        )
        .await
        .unwrap();

        let later = t0() + Duration::minutes(5);
        let table = SavedReportService::run_table(&state, "acct", first.id, later)
            .await
            .unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].item_type, "Rings");

        let listed = SavedReportService::list(&state, "acct").await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[0].last_used_at, Some(later));
        assert_eq!(listed[1].id, second.id);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let state = AppState::in_memory(AppConfig::default()).unwrap();
        let saved = SavedReportService::save(&state, "acct", "Rings", &rings_only(), t0())
            .await
            .unwrap();

        let updated = SavedReportService::update(
            &state,
            "acct",
            saved.id,
            Some("All types"),
            Some(&AggregationFilter::default()),
            t0() + Duration::minutes(1),
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "All types");
        assert_eq!(
            SavedReportService::filter_of(&updated).unwrap(),
            AggregationFilter::default()
        );

        SavedReportService::delete(&state, "acct", saved.id).await.unwrap();
        assert!(matches!(
            SavedReportService::get(&state, "acct", saved.id).await,
            Err(AppError::NotFound(_))
        ));
        // Reports are scoped to their account
        assert!(matches!(
            SavedReportService::delete(&state, "other", saved.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
