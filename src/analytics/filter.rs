//! Aggregation filters and their translation into store clauses

use super::metrics::CellMetrics;
use crate::error::{AppError, Result};
use crate::inventory::Location;
use crate::store::{Clause, Field, ItemQuery, SalesWindow, Value};
use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Bound;

/// Length of the default reporting window
pub const DEFAULT_WINDOW_DAYS: u64 = 365;

/// Memo-status filter labels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MemoStatus {
    /// In house, or no location recorded
    InHouse,
    OnMemo,
}

/// Inclusive day-count range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

/// Inclusive numeric range used by table metric filters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricRange {
    pub fn contains(&self, value: f64) -> bool {
        self.min.map_or(true, |min| value >= min) && self.max.map_or(true, |max| value <= max)
    }
}

/// Post-aggregation filters on table rows
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricRanges {
    pub inventory_count: Option<MetricRange>,
    pub inventory_value: Option<MetricRange>,
    pub jobs_count: Option<MetricRange>,
    pub sales_count: Option<MetricRange>,
    pub sales_value: Option<MetricRange>,
    pub turn: Option<MetricRange>,
    pub needs_surplus: Option<MetricRange>,
    pub inv_avg_aging: Option<MetricRange>,
    pub sales_avg_aging: Option<MetricRange>,
}

impl MetricRanges {
    /// Every configured range holds for `m`
    pub fn matches(&self, m: &CellMetrics) -> bool {
        let checks = [
            (self.inventory_count, m.inventory.count as f64),
            (self.inventory_value, m.inventory.value),
            (self.jobs_count, m.jobs.count as f64),
            (self.sales_count, m.sales.count as f64),
            (self.sales_value, m.sales.value),
            (self.turn, m.turn),
            (self.needs_surplus, m.needs_surplus as f64),
            (self.inv_avg_aging, m.inv_avg_aging),
            (self.sales_avg_aging, m.sales_avg_aging),
        ];
        checks
            .iter()
            .all(|(range, value)| range.map_or(true, |r| r.contains(*value)))
    }
}

/// Request-scoped filter shared by every aggregation operation.
///
/// All item-level filters are AND-combined; an empty list imposes nothing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregationFilter {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub ideal_turn: Option<f64>,
    pub types: Vec<String>,
    pub carat_ranges: Vec<String>,
    pub codes: Vec<String>,
    pub qualities: Vec<String>,
    pub memo_status: Vec<MemoStatus>,
    pub days_on_memo: Option<DayRange>,
    pub metric_ranges: Option<MetricRanges>,
}

impl AggregationFilter {
    /// Reporting window, defaulting to the trailing year ending `today`
    pub fn window(&self, today: NaiveDate) -> Result<ReportWindow> {
        let to = self.to_date.unwrap_or(today);
        let from = match self.from_date {
            Some(from) => from,
            None => days_before(to, DEFAULT_WINDOW_DAYS)?,
        };
        Ok(ReportWindow { from, to })
    }

    /// Item-level predicates. Date ranges are relative to `today`.
    pub fn clauses(&self, today: NaiveDate) -> Result<Vec<Clause>> {
        let mut clauses = Vec::new();

        let lists = [
            (Field::Type, &self.types),
            (Field::CaratRange, &self.carat_ranges),
            (Field::Code, &self.codes),
            (Field::Quality, &self.qualities),
        ];
        for (field, values) in lists {
            if !values.is_empty() {
                clauses.push(Clause::Terms(
                    field,
                    values.iter().map(|v| Value::from(v.as_str())).collect(),
                ));
            }
        }

        if !self.memo_status.is_empty() {
            let mut any = Vec::new();
            if self.memo_status.contains(&MemoStatus::InHouse) {
                any.push(Clause::Term(
                    Field::LocationCode,
                    Location::House.as_str().into(),
                ));
                any.push(Clause::Missing(Field::LocationCode));
            }
            if self.memo_status.contains(&MemoStatus::OnMemo) {
                any.push(Clause::Term(
                    Field::LocationCode,
                    Location::OnMemo.as_str().into(),
                ));
            }
            clauses.push(Clause::Any(any));
        }

        if let Some(range) = self.days_on_memo {
            // More days on memo means an earlier shipment date
            let upper = match range.min {
                Some(min) => Bound::Included(Value::Date(days_before(today, min.into())?)),
                None => Bound::Unbounded,
            };
            let lower = match range.max {
                Some(max) => Bound::Included(Value::Date(days_before(today, max.into())?)),
                None => Bound::Unbounded,
            };
            if range.min.is_some() || range.max.is_some() {
                clauses.push(Clause::Range {
                    field: Field::ShipmentDate,
                    lower,
                    upper,
                });
            }
        }

        Ok(clauses)
    }

    /// Account-scoped query carrying every item-level predicate
    pub fn query(&self, account_id: &str, today: NaiveDate) -> Result<ItemQuery> {
        Ok(self
            .clauses(today)?
            .into_iter()
            .fold(ItemQuery::for_account(account_id), ItemQuery::clause))
    }
}

/// Resolved reporting period, both dates inclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportWindow {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl ReportWindow {
    /// Days used by the turn formula. Zero or negative periods count as one day.
    pub fn days_in_period(&self) -> i64 {
        (self.to - self.from).num_days().max(1)
    }

    /// Instants bounding "sold in period": start of `from` to end of `to`
    pub fn sales_window(&self) -> Result<SalesWindow> {
        let next_day = self.to.succ_opt().ok_or_else(|| {
            AppError::Validation(format!("Date {} is out of range", self.to))
        })?;
        Ok(SalesWindow {
            from: self.from.and_time(NaiveTime::MIN).and_utc(),
            to: next_day.and_time(NaiveTime::MIN).and_utc() - Duration::milliseconds(1),
        })
    }
}

fn days_before(date: NaiveDate, days: u64) -> Result<NaiveDate> {
    date.checked_sub_days(Days::new(days)).ok_or_else(|| {
        AppError::Validation(format!("{} days before {} is out of range", days, date))
    })
}

/// Calendar day of an instant, for date-relative filters
pub fn today_of(now: DateTime<Utc>) -> NaiveDate {
    now.date_naive()
}
