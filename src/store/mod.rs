//! Item store
//!
//! Repository interface over inventory items. The core never talks to a
//! concrete backend directly; a store is injected through `AppState`.

pub mod query;

use crate::error::Result;
use crate::inventory::InventoryItem;
use async_trait::async_trait;

pub use query::{
    AggregationRequest, Bucket, BucketStats, Clause, Field, ItemQuery, Mean, SalesWindow, Sort,
    SortOrder, Tally, Value, MAX_GROUP_LEVELS,
};

/// Queryable collection of inventory items.
///
/// Every backend failure surfaces as `AppError::StoreUnavailable`.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn find(&self, id: &str) -> Result<Option<InventoryItem>>;

    /// Match key lookup. Duplicates are a store anomaly; the lowest id wins.
    async fn find_by_serial(
        &self,
        account_id: &str,
        serial_number: &str,
    ) -> Result<Option<InventoryItem>>;

    /// Insert or replace by `id`
    async fn upsert(&self, item: &InventoryItem) -> Result<()>;

    /// Returns whether a record was removed
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn search(&self, query: &ItemQuery) -> Result<Vec<InventoryItem>>;

    async fn count(&self, query: &ItemQuery) -> Result<u64>;

    /// Nested grouped metrics. The returned root bucket holds the totals.
    async fn aggregate(&self, request: &AggregationRequest) -> Result<Bucket>;
}
