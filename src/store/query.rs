//! Structured query and aggregation DSL for the item store

use crate::error::{AppError, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Maximum nesting depth of an aggregation
pub const MAX_GROUP_LEVELS: usize = 4;

/// Queryable item fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    Id,
    AccountId,
    SerialNumber,
    ItemNumber,
    Type,
    Code,
    CaratRange,
    Quality,
    MetalType,
    MetalCode,
    LocationCode,
    SalespersonCode,
    State,
    UnitPrice,
    TotalCaratWeight,
    DateCreated,
    ShipmentDate,
    FirstSeenAt,
    LastSeenAt,
    SoldAt,
    CreatedAt,
    UpdatedAt,
}

impl Field {
    /// Fields an aggregation may group by
    pub fn is_groupable(self) -> bool {
        matches!(
            self,
            Field::Type
                | Field::Code
                | Field::CaratRange
                | Field::Quality
                | Field::MetalType
                | Field::LocationCode
                | Field::State
                | Field::SalespersonCode
        )
    }
}

/// Typed comparison value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Number(f64),
    Date(NaiveDate),
    Time(DateTime<Utc>),
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<NaiveDate> for Value {
    fn from(v: NaiveDate) -> Self {
        Value::Date(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Time(v)
    }
}

/// One predicate. Clauses in a query are AND-combined.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    /// Exact match
    Term(Field, Value),
    /// Match any of the values ("in")
    Terms(Field, Vec<Value>),
    /// Bounded range; unbounded ends impose nothing
    Range {
        field: Field,
        lower: Bound<Value>,
        upper: Bound<Value>,
    },
    /// Field has no value
    Missing(Field),
    /// Any of the nested clauses holds
    Any(Vec<Clause>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sort {
    pub field: Field,
    pub order: SortOrder,
}

/// Filtered item selection within one account
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub account_id: String,
    pub clauses: Vec<Clause>,
    pub sort: Vec<Sort>,
    pub limit: Option<usize>,
}

impl ItemQuery {
    pub fn for_account(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            clauses: Vec::new(),
            sort: Vec::new(),
            limit: None,
        }
    }

    pub fn clause(mut self, clause: Clause) -> Self {
        self.clauses.push(clause);
        self
    }

    pub fn term(self, field: Field, value: impl Into<Value>) -> Self {
        self.clause(Clause::Term(field, value.into()))
    }

    /// "In" match. An empty value list matches nothing.
    pub fn terms<V: Into<Value>>(self, field: Field, values: impl IntoIterator<Item = V>) -> Self {
        let values = values.into_iter().map(Into::into).collect();
        self.clause(Clause::Terms(field, values))
    }

    pub fn range(self, field: Field, lower: Bound<Value>, upper: Bound<Value>) -> Self {
        self.clause(Clause::Range {
            field,
            lower,
            upper,
        })
    }

    pub fn sort_by(mut self, field: Field, order: SortOrder) -> Self {
        self.sort.push(Sort { field, order });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Sold-in-period window, both ends inclusive. An inverted window matches nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SalesWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Grouped metric extraction over a query
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationRequest {
    pub query: ItemQuery,
    /// Outermost level first
    pub group_by: Vec<Field>,
    pub window: SalesWindow,
    /// Reference instant for aging
    pub now: DateTime<Utc>,
}

impl AggregationRequest {
    pub fn validate(&self) -> Result<()> {
        if self.group_by.len() > MAX_GROUP_LEVELS {
            return Err(AppError::Validation(format!(
                "Aggregation supports at most {} levels, got {}",
                MAX_GROUP_LEVELS,
                self.group_by.len()
            )));
        }
        if let Some(field) = self.group_by.iter().find(|f| !f.is_groupable()) {
            return Err(AppError::Validation(format!(
                "Cannot group by {:?}",
                field
            )));
        }
        Ok(())
    }
}

/// Count and price sum
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Tally {
    pub count: u64,
    pub value: f64,
}

impl Tally {
    pub fn merge(&mut self, other: &Tally) {
        self.count += other.count;
        self.value += other.value;
    }
}

/// Mean kept as sum and sample count so partial results combine exactly
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Mean {
    pub total: f64,
    pub samples: u64,
}

impl Mean {
    pub fn merge(&mut self, other: &Mean) {
        self.total += other.total;
        self.samples += other.samples;
    }

    /// Zero when there are no samples
    pub fn value(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.total / self.samples as f64
        }
    }
}

/// Raw per-bucket figures as extracted by the store
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BucketStats {
    /// Items currently on hand
    pub inventory: Tally,
    /// Items in production
    pub jobs: Tally,
    /// Items sold inside the window
    pub sales: Tally,
    /// On-hand items out on memo
    pub on_memo: u64,
    /// On-hand items at the house or with no location
    pub in_house: u64,
    /// Days since intake, over on-hand items
    pub inventory_age: Mean,
    /// Days from intake to sale, over items sold inside the window
    pub sales_age: Mean,
    /// Days since shipment, over on-memo items with a shipment date
    pub memo_days: Mean,
}

impl BucketStats {
    pub fn merge(&mut self, other: &BucketStats) {
        self.inventory.merge(&other.inventory);
        self.jobs.merge(&other.jobs);
        self.sales.merge(&other.sales);
        self.on_memo += other.on_memo;
        self.in_house += other.in_house;
        self.inventory_age.merge(&other.inventory_age);
        self.sales_age.merge(&other.sales_age);
        self.memo_days.merge(&other.memo_days);
    }

    pub fn is_empty(&self) -> bool {
        self.inventory.count == 0 && self.jobs.count == 0 && self.sales.count == 0
    }
}

/// One node of a nested aggregation result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub key: String,
    pub stats: BucketStats,
    pub children: Vec<Bucket>,
}

impl Bucket {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }

    /// Add a leaf row under `path`, rolling its figures up every level
    pub fn insert(&mut self, path: &[String], stats: &BucketStats) {
        self.stats.merge(stats);
        if let Some((head, rest)) = path.split_first() {
            let index = match self.children.iter().position(|c| &c.key == head) {
                Some(index) => index,
                None => {
                    self.children.push(Bucket::new(head.clone()));
                    self.children.len() - 1
                }
            };
            self.children[index].insert(rest, stats);
        }
    }

    pub fn child(&self, key: &str) -> Option<&Bucket> {
        self.children.iter().find(|c| c.key == key)
    }

    /// Follow a key path down the tree
    pub fn descend(&self, path: &[&str]) -> Option<&Bucket> {
        path.iter().try_fold(self, |node, key| node.child(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(inv: u64, value: f64) -> BucketStats {
        BucketStats {
            inventory: Tally { count: inv, value },
            inventory_age: Mean {
                total: 10.0 * inv as f64,
                samples: inv,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_bucket_insert_rolls_up() {
        let mut root = Bucket::new("");
        root.insert(&["Rings".into(), "VS1".into()], &stats(2, 200.0));
        root.insert(&["Rings".into(), "SI1".into()], &stats(1, 50.0));
        root.insert(&["Studs".into(), "VS1".into()], &stats(3, 30.0));

        assert_eq!(root.stats.inventory.count, 6);
        assert_eq!(root.children.len(), 2);
        let rings = root.child("Rings").unwrap();
        assert_eq!(rings.stats.inventory, Tally { count: 3, value: 250.0 });
        assert_eq!(rings.children.len(), 2);
        assert_eq!(
            root.descend(&["Studs", "VS1"]).unwrap().stats.inventory.count,
            3
        );
        assert!(root.descend(&["Studs", "SI1"]).is_none());
    }

    #[test]
    fn test_mean_of_empty_is_zero() {
        assert_eq!(Mean::default().value(), 0.0);
        let mut m = Mean { total: 30.0, samples: 2 };
        m.merge(&Mean { total: 15.0, samples: 1 });
        assert_eq!(m.value(), 15.0);
    }

    #[test]
    fn test_request_validation() {
        let now = Utc::now();
        let mut request = AggregationRequest {
            query: ItemQuery::for_account("acct"),
            group_by: vec![Field::Type, Field::CaratRange, Field::Code, Field::Quality],
            window: SalesWindow { from: now, to: now },
            now,
        };
        assert!(request.validate().is_ok());

        request.group_by.push(Field::MetalType);
        assert!(matches!(request.validate(), Err(AppError::Validation(_))));

        request.group_by = vec![Field::UnitPrice];
        assert!(matches!(request.validate(), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_merge_sums_location_tallies() {
        let mut s = stats(5, 0.0);
        s.on_memo = 2;
        s.in_house = 2;
        s.merge(&BucketStats {
            on_memo: 1,
            in_house: 3,
            ..stats(4, 0.0)
        });
        assert_eq!(s.inventory.count, 9);
        assert_eq!(s.on_memo, 3);
        assert_eq!(s.in_house, 5);
    }
}
