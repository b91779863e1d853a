//! Inventory item record and the candidate records produced by feeds

use super::lifecycle::{self, ItemState, LifecycleEvent};
use crate::error::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Current version of the stored item layout
pub const ITEM_SCHEMA_VERSION: u32 = 1;

/// Normalized location of an item
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    House,
    OnMemo,
    /// Any other location value, lowercased
    Other(String),
}

impl Location {
    /// Normalize a free-text location: anything mentioning "memo" is on memo,
    /// anything mentioning "house" is in house.
    pub fn normalize(raw: &str) -> Option<Self> {
        let loc = raw.trim().to_lowercase();
        if loc.is_empty() {
            None
        } else if loc.contains("memo") {
            Some(Location::OnMemo)
        } else if loc.contains("house") {
            Some(Location::House)
        } else {
            Some(Location::Other(loc))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Location::House => "house",
            Location::OnMemo => "on_memo",
            Location::Other(code) => code,
        }
    }

    /// Decode the stored form
    pub fn from_stored(code: &str) -> Self {
        match code {
            "house" => Location::House,
            "on_memo" => Location::OnMemo,
            other => Location::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Production status as classified from a feed row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    /// Job in production
    Job,
    /// Stock on hand
    Stock,
}

impl FeedStatus {
    /// A status mentioning "job" means the piece is still in production
    pub fn classify(raw: Option<&str>) -> Self {
        match raw {
            Some(status) if status.to_lowercase().contains("job") => FeedStatus::Job,
            _ => FeedStatus::Stock,
        }
    }
}

/// One physical piece tracked for an account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub schema_version: u32,

    pub id: String,
    pub account_id: String,
    pub serial_number: String,
    pub item_number: Option<String>,

    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub code: Option<String>,
    pub carat_range: Option<String>,
    pub quality: Option<String>,
    pub metal_type: Option<String>,
    pub metal_code: Option<String>,
    pub carat_code: Option<i64>,
    pub total_carat_weight: Option<f64>,

    pub unit_price: f64,
    pub description: Option<String>,
    pub date_created: Option<NaiveDate>,

    pub location_code: Option<Location>,
    pub shipment_date: Option<NaiveDate>,
    pub salesperson_code: Option<String>,

    pub state: ItemState,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub sold_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InventoryItem {
    /// New item first sighted at `now`
    pub fn new(
        account_id: &str,
        serial_number: &str,
        state: ItemState,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            schema_version: ITEM_SCHEMA_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            account_id: account_id.to_string(),
            serial_number: serial_number.to_string(),
            item_number: None,
            item_type: None,
            code: None,
            carat_range: None,
            quality: None,
            metal_type: None,
            metal_code: None,
            carat_code: None,
            total_carat_weight: None,
            unit_price: 0.0,
            description: None,
            date_created: None,
            location_code: None,
            shipment_date: None,
            salesperson_code: None,
            state,
            first_seen_at: Some(now),
            last_seen_at: Some(now),
            sold_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn may_transition(&self, event: LifecycleEvent) -> bool {
        self.state.may(event)
    }

    /// Fire `event`. On an illegal transition the item is left unchanged.
    pub fn apply(&mut self, event: LifecycleEvent, now: DateTime<Utc>) -> Result<ItemState> {
        let next = lifecycle::transition(self.state, event)?;

        match event {
            LifecycleEvent::MarkSold => self.sold_at = Some(now),
            LifecycleEvent::Reactivate => self.sold_at = None,
            _ => {}
        }

        self.state = next;
        self.updated_at = now;
        Ok(next)
    }

    /// Overlay every field the feed supplied. Fields the feed did not carry
    /// keep their stored value.
    pub fn merge_from(&mut self, candidate: &CandidateItem) {
        fn overlay<T: Clone>(target: &mut Option<T>, incoming: &Option<T>) {
            if let Some(value) = incoming {
                *target = Some(value.clone());
            }
        }

        overlay(&mut self.item_number, &candidate.item_number);
        overlay(&mut self.item_type, &candidate.item_type);
        overlay(&mut self.code, &candidate.code);
        overlay(&mut self.carat_range, &candidate.carat_range);
        overlay(&mut self.quality, &candidate.quality);
        overlay(&mut self.metal_type, &candidate.metal_type);
        overlay(&mut self.metal_code, &candidate.metal_code);
        overlay(&mut self.carat_code, &candidate.carat_code);
        overlay(&mut self.total_carat_weight, &candidate.total_carat_weight);
        overlay(&mut self.description, &candidate.description);
        overlay(&mut self.date_created, &candidate.date_created);
        overlay(&mut self.location_code, &candidate.location_code);
        overlay(&mut self.shipment_date, &candidate.shipment_date);
        overlay(&mut self.salesperson_code, &candidate.salesperson_code);

        if let Some(price) = candidate.unit_price {
            self.unit_price = price;
        }
    }

    pub fn is_on_memo(&self) -> bool {
        matches!(self.location_code, Some(Location::OnMemo))
    }
}

/// Normalized field-set for one feed row, before reconciliation.
///
/// `None` means the feed did not carry the field (or the cell was empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateItem {
    /// Line in the feed this row came from
    pub row: u64,
    pub serial_number: String,
    pub item_number: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub code: Option<String>,
    pub carat_range: Option<String>,
    pub quality: Option<String>,
    pub metal_type: Option<String>,
    pub metal_code: Option<String>,
    pub carat_code: Option<i64>,
    pub total_carat_weight: Option<f64>,
    pub unit_price: Option<f64>,
    pub description: Option<String>,
    pub date_created: Option<NaiveDate>,
    pub location_code: Option<Location>,
    pub shipment_date: Option<NaiveDate>,
    pub salesperson_code: Option<String>,
    pub status: FeedStatus,
}

impl CandidateItem {
    pub fn new(row: u64, serial_number: &str) -> Self {
        Self {
            row,
            serial_number: serial_number.to_string(),
            item_number: None,
            item_type: None,
            code: None,
            carat_range: None,
            quality: None,
            metal_type: None,
            metal_code: None,
            carat_code: None,
            total_carat_weight: None,
            unit_price: None,
            description: None,
            date_created: None,
            location_code: None,
            shipment_date: None,
            salesperson_code: None,
            status: FeedStatus::Stock,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_location_normalization() {
        assert_eq!(Location::normalize("On-Memo"), Some(Location::OnMemo));
        assert_eq!(Location::normalize("MEMO 14"), Some(Location::OnMemo));
        assert_eq!(Location::normalize("In-House"), Some(Location::House));
        assert_eq!(
            Location::normalize(" Vault B "),
            Some(Location::Other("vault b".to_string()))
        );
        assert_eq!(Location::normalize("   "), None);
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(FeedStatus::classify(Some("On Job")), FeedStatus::Job);
        assert_eq!(FeedStatus::classify(Some("JOBS")), FeedStatus::Job);
        assert_eq!(FeedStatus::classify(Some("Stock")), FeedStatus::Stock);
        assert_eq!(FeedStatus::classify(None), FeedStatus::Stock);
    }

    #[test]
    fn test_mark_sold_sets_sold_at_once() {
        let now = Utc::now();
        let mut item = InventoryItem::new("acct", "1001", ItemState::InStock, now);
        let later = now + Duration::hours(3);

        item.apply(LifecycleEvent::MarkSold, later).unwrap();
        assert_eq!(item.state, ItemState::Sales);
        assert_eq!(item.sold_at, Some(later));

        // Second markSold is illegal and must not move sold_at
        let err = item.apply(LifecycleEvent::MarkSold, later + Duration::hours(1));
        assert!(err.is_err());
        assert_eq!(item.sold_at, Some(later));
        assert_eq!(item.state, ItemState::Sales);
    }

    #[test]
    fn test_reactivate_clears_sold_at() {
        let now = Utc::now();
        let mut item = InventoryItem::new("acct", "1001", ItemState::InStock, now);
        item.apply(LifecycleEvent::MarkSold, now).unwrap();
        item.apply(LifecycleEvent::Reactivate, now).unwrap();
        assert_eq!(item.state, ItemState::InStock);
        assert_eq!(item.sold_at, None);
    }

    #[test]
    fn test_illegal_transition_leaves_item_unchanged() {
        let now = Utc::now();
        let mut item = InventoryItem::new("acct", "1001", ItemState::Pending, now);
        let before = item.clone();
        assert!(!item.may_transition(LifecycleEvent::MarkSold));
        assert!(item.apply(LifecycleEvent::MarkSold, now + Duration::hours(1)).is_err());
        assert_eq!(item, before);
    }

    #[test]
    fn test_merge_keeps_fields_absent_from_feed() {
        let now = Utc::now();
        let mut item = InventoryItem::new("acct", "1001", ItemState::InStock, now);
        item.description = Some("Halo ring".to_string());
        item.unit_price = 900.0;

        let mut candidate = CandidateItem::new(2, "1001");
        candidate.unit_price = Some(1234.5);
        candidate.quality = Some("VS1".to_string());
        item.merge_from(&candidate);

        assert_eq!(item.unit_price, 1234.5);
        assert_eq!(item.quality.as_deref(), Some("VS1"));
        assert_eq!(item.description.as_deref(), Some("Halo ring"));
    }
}
