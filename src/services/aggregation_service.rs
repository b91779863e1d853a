//! Aggregation Service
//!
//! Read-only analytics over the item store: the carat/type grid, the
//! code/quality drill-down, the flat table and the items behind one cell.
//! Every store call runs under the configured query deadline; a timeout
//! fails the whole request.

use crate::analytics::filter::today_of;
use crate::analytics::formatter::{
    alphabetical_axis, carat_axis, grid_view, table_view, type_axis,
};
use crate::analytics::{
    AggregationFilter, CellMetrics, GridView, LeafDetailView, MetricContext, MetricNode,
    MetricRecord, TableView,
};
use crate::db::sqlite::UNKNOWN_KEY;
use crate::error::{AppError, Result};
use crate::inventory::carat::range_sort_key;
use crate::inventory::{InventoryItem, ItemState, OTHER_RANGE};
use crate::state::AppState;
use crate::store::{
    AggregationRequest, Bucket, BucketStats, Clause, Field, ItemQuery, SalesWindow, SortOrder,
    Value,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::ops::Bound;
use tracing::{debug, info};

/// Request-wide inputs resolved from a filter
struct Scope {
    query: ItemQuery,
    sales: SalesWindow,
    ctx: MetricContext,
    now: DateTime<Utc>,
}

impl Scope {
    fn request(&self, query: ItemQuery, group_by: Vec<Field>) -> AggregationRequest {
        AggregationRequest {
            query,
            group_by,
            window: self.sales,
            now: self.now,
        }
    }
}

/// Pin a query to one hierarchy key. The store groups missing values under
/// the placeholder key, so it selects those items as well as literal ones.
fn anchored(query: ItemQuery, field: Field, key: &str) -> ItemQuery {
    if key == UNKNOWN_KEY {
        query.clause(Clause::Any(vec![
            Clause::Missing(field),
            Clause::Term(field, Value::from(UNKNOWN_KEY)),
        ]))
    } else {
        query.term(field, key)
    }
}

fn child_keys(bucket: &Bucket) -> impl Iterator<Item = String> + '_ {
    bucket.children.iter().map(|c| c.key.clone())
}

/// Aggregation service for business logic
pub struct AggregationService;

impl AggregationService {
    /// Metrics for every `(caratRange, type)` cell. Rows are carat ranges.
    pub async fn level_one_grid(
        state: &AppState,
        account_id: &str,
        filter: &AggregationFilter,
        now: DateTime<Utc>,
    ) -> Result<GridView> {
        info!("AggregationService::level_one_grid - account {}", account_id);

        let scope = Self::scope(state, account_id, filter, now).await?;
        let request = scope.request(scope.query.clone(), vec![Field::CaratRange, Field::Type]);
        let root = Self::aggregate(state, &request).await?;

        let carat_labels: Vec<String> = if filter.carat_ranges.is_empty() {
            state
                .config
                .carat_bands
                .bands()
                .iter()
                .map(|band| band.label.clone())
                .chain(std::iter::once(OTHER_RANGE.to_string()))
                .chain(child_keys(&root))
                .collect()
        } else {
            filter.carat_ranges.clone()
        };

        let type_labels: Vec<String> = if filter.types.is_empty() {
            let observed = root.children.iter().flat_map(child_keys);
            state.config.type_order.iter().cloned().chain(observed).collect()
        } else {
            filter.types.clone()
        };

        let rows = carat_axis(carat_labels);
        let columns = type_axis(&state.config.type_order, type_labels);
        let node = MetricNode::from_bucket(&root, &scope.ctx);
        Ok(grid_view(&node, rows, columns))
    }

    /// Metrics for every `(code, quality)` cell inside one type/carat cell.
    /// Rows are codes.
    pub async fn level_two_grid(
        state: &AppState,
        account_id: &str,
        filter: &AggregationFilter,
        item_type: &str,
        carat_range: &str,
        now: DateTime<Utc>,
    ) -> Result<GridView> {
        info!(
            "AggregationService::level_two_grid - account {}, {} / {}",
            account_id, item_type, carat_range
        );

        let scope = Self::scope(state, account_id, filter, now).await?;
        let query = anchored(scope.query.clone(), Field::Type, item_type);
        let query = anchored(query, Field::CaratRange, carat_range);
        let request = scope.request(query, vec![Field::Code, Field::Quality]);
        let root = Self::aggregate(state, &request).await?;

        let rows = if filter.codes.is_empty() {
            alphabetical_axis(child_keys(&root))
        } else {
            alphabetical_axis(filter.codes.iter().cloned())
        };
        let columns = if filter.qualities.is_empty() {
            alphabetical_axis(root.children.iter().flat_map(child_keys))
        } else {
            alphabetical_axis(filter.qualities.iter().cloned())
        };

        let node = MetricNode::from_bucket(&root, &scope.ctx);
        Ok(grid_view(&node, rows, columns))
    }

    /// Items behind one cell: on hand, in production and sold in the window,
    /// plus the cell's summary metrics
    #[allow(clippy::too_many_arguments)]
    pub async fn leaf_detail(
        state: &AppState,
        account_id: &str,
        filter: &AggregationFilter,
        item_type: &str,
        carat_range: &str,
        code: Option<&str>,
        quality: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LeafDetailView> {
        info!(
            "AggregationService::leaf_detail - account {}, {} / {} / {:?} / {:?}",
            account_id, item_type, carat_range, code, quality
        );

        let scope = Self::scope(state, account_id, filter, now).await?;
        let mut query = anchored(scope.query.clone(), Field::Type, item_type);
        query = anchored(query, Field::CaratRange, carat_range);
        if let Some(code) = code {
            query = anchored(query, Field::Code, code);
        }
        if let Some(quality) = quality {
            query = anchored(query, Field::Quality, quality);
        }

        let cap = state.config.max_detail_items;
        let sales = scope.sales;

        let on_hand_query = query
            .clone()
            .term(Field::State, ItemState::InStock.as_str())
            .sort_by(Field::SerialNumber, SortOrder::Asc)
            .limit(cap + 1);
        let production_query = query
            .clone()
            .term(Field::State, ItemState::OnJobs.as_str())
            .sort_by(Field::SerialNumber, SortOrder::Asc)
            .limit(cap + 1);
        let sold_query = query
            .clone()
            .term(Field::State, ItemState::Sales.as_str())
            .range(
                Field::SoldAt,
                Bound::Included(Value::Time(sales.from)),
                Bound::Included(Value::Time(sales.to)),
            )
            .sort_by(Field::SoldAt, SortOrder::Desc)
            .limit(cap + 1);
        let summary_request = scope.request(query, Vec::new());

        let (on_hand, in_production, sold_in_range, summary) = tokio::try_join!(
            Self::search(state, &on_hand_query),
            Self::search(state, &production_query),
            Self::search(state, &sold_query),
            Self::aggregate(state, &summary_request),
        )?;

        let mut truncated = false;
        let mut cap_list = |mut items: Vec<InventoryItem>| {
            if items.len() > cap {
                items.truncate(cap);
                truncated = true;
            }
            items
        };
        let on_hand = cap_list(on_hand);
        let in_production = cap_list(in_production);
        let sold_in_range = cap_list(sold_in_range);

        Ok(LeafDetailView {
            summary: MetricRecord::from(&CellMetrics::from_stats(&summary.stats, &scope.ctx)),
            on_hand,
            in_production,
            sold_in_range,
            truncated,
        })
    }

    /// Every populated `(type, caratRange, code, quality)` combination as a row
    pub async fn table_view(
        state: &AppState,
        account_id: &str,
        filter: &AggregationFilter,
        now: DateTime<Utc>,
    ) -> Result<TableView> {
        info!("AggregationService::table_view - account {}", account_id);

        let scope = Self::scope(state, account_id, filter, now).await?;
        let request = scope.request(
            scope.query.clone(),
            vec![Field::Type, Field::CaratRange, Field::Code, Field::Quality],
        );
        let root = Self::aggregate(state, &request).await?;
        let node = MetricNode::from_bucket(&root, &scope.ctx);

        let type_rank = |item_type: &str| {
            state
                .config
                .type_order
                .iter()
                .position(|t| t == item_type)
                .unwrap_or(usize::MAX)
        };

        let mut leaves = node.leaves();
        if let Some(ranges) = &filter.metric_ranges {
            leaves.retain(|(_, leaf)| ranges.matches(&leaf.metrics));
        }
        leaves.sort_by_cached_key(|(path, _)| {
            let key = |i: usize| path.get(i).copied().unwrap_or_default().to_string();
            (
                type_rank(&key(0)),
                key(0),
                range_sort_key(&key(1)),
                key(2),
                key(3),
            )
        });

        let mut totals = BucketStats::default();
        for (_, leaf) in &leaves {
            totals.merge(&leaf.stats);
        }
        debug!("Table for account {} has {} rows", account_id, leaves.len());

        Ok(table_view(&leaves, &CellMetrics::from_stats(&totals, &scope.ctx)))
    }

    // ========================================================================
    // Private Helper Methods
    // ========================================================================

    async fn scope(
        state: &AppState,
        account_id: &str,
        filter: &AggregationFilter,
        now: DateTime<Utc>,
    ) -> Result<Scope> {
        let today = today_of(now);
        let window = filter.window(today)?;

        let ideal_turn = match filter.ideal_turn.filter(|t| t.is_finite() && *t > 0.0) {
            Some(turn) => turn,
            None => state.settings_for(account_id).await?.ideal_turn,
        };

        Ok(Scope {
            query: filter.query(account_id, today)?,
            sales: window.sales_window()?,
            ctx: MetricContext {
                days_in_period: window.days_in_period(),
                ideal_turn,
            },
            now,
        })
    }

    async fn with_deadline<T, F>(state: &AppState, what: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = state.config.query_timeout;
        tokio::time::timeout(limit, call).await.map_err(|_| {
            AppError::StoreUnavailable(format!("{} timed out after {:?}", what, limit))
        })?
    }

    async fn aggregate(state: &AppState, request: &AggregationRequest) -> Result<Bucket> {
        request.validate()?;
        Self::with_deadline(state, "aggregation", state.store.aggregate(request)).await
    }

    async fn search(state: &AppState, query: &ItemQuery) -> Result<Vec<InventoryItem>> {
        Self::with_deadline(state, "item search", state.store.search(query)).await
    }
}
