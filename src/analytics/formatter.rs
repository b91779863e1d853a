//! Wire shapes for aggregation results
//!
//! Walks metric trees into nested grids, flat table rows and leaf item lists.
//! Values pass through unchanged apart from display rounding.

use super::metrics::{CellMetrics, MetricNode};
use crate::inventory::carat::range_sort_key;
use crate::inventory::InventoryItem;
use serde::Serialize;
use std::collections::BTreeSet;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// One bucket's metrics, rounded for display
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub inventory_count: u64,
    pub inventory_value: f64,
    pub jobs_count: u64,
    pub jobs_value: f64,
    pub sales_count: u64,
    pub sales_value: f64,
    pub inv_avg_aging: i64,
    pub sales_avg_aging: i64,
    pub in_house_count: u64,
    pub on_memo_count: u64,
    pub avg_days_on_memo: i64,
    pub turn: f64,
    pub ideal_inventory: i64,
    pub needs_surplus: i64,
}

impl From<&CellMetrics> for MetricRecord {
    fn from(m: &CellMetrics) -> Self {
        Self {
            inventory_count: m.inventory.count,
            inventory_value: round2(m.inventory.value),
            jobs_count: m.jobs.count,
            jobs_value: round2(m.jobs.value),
            sales_count: m.sales.count,
            sales_value: round2(m.sales.value),
            inv_avg_aging: m.inv_avg_aging.round() as i64,
            sales_avg_aging: m.sales_avg_aging.round() as i64,
            in_house_count: m.in_house_count,
            on_memo_count: m.on_memo_count,
            avg_days_on_memo: m.avg_days_on_memo.round() as i64,
            turn: round2(m.turn),
            ideal_inventory: m.ideal_inventory,
            needs_surplus: m.needs_surplus,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridCell {
    pub key: String,
    pub metrics: MetricRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub key: String,
    pub cells: Vec<GridCell>,
    pub totals: MetricRecord,
}

/// Dense two-axis grid
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridView {
    pub row_keys: Vec<String>,
    pub column_keys: Vec<String>,
    pub rows: Vec<GridRow>,
    pub totals: MetricRecord,
}

impl GridView {
    pub fn cell(&self, row: &str, column: &str) -> Option<&MetricRecord> {
        self.rows
            .iter()
            .find(|r| r.key == row)?
            .cells
            .iter()
            .find(|c| c.key == column)
            .map(|c| &c.metrics)
    }
}

/// One populated `(type, caratRange, code, quality)` combination
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableRow {
    #[serde(rename = "type")]
    pub item_type: String,
    pub carat_range: String,
    pub code: String,
    pub quality: String,
    #[serde(flatten)]
    pub metrics: MetricRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableView {
    pub rows: Vec<TableRow>,
    pub totals: MetricRecord,
}

/// Items behind one hierarchy cell
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeafDetailView {
    pub summary: MetricRecord,
    pub on_hand: Vec<InventoryItem>,
    pub in_production: Vec<InventoryItem>,
    pub sold_in_range: Vec<InventoryItem>,
    /// Set when any list hit the item cap
    pub truncated: bool,
}

/// Carat-range axis: ascending lower bound, `Other` and unparsable labels last
pub fn carat_axis<I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut axis: Vec<String> = labels.into_iter().collect::<BTreeSet<_>>().into_iter().collect();
    axis.sort_by_key(|label| range_sort_key(label));
    axis
}

/// Type axis: `preferred` order first, anything else alphabetically after
pub fn type_axis<I>(preferred: &[String], labels: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut rest: BTreeSet<String> = labels.into_iter().collect();
    let mut axis: Vec<String> = preferred
        .iter()
        .filter(|t| rest.remove(t.as_str()))
        .cloned()
        .collect();
    axis.extend(rest);
    axis
}

/// Distinct labels, alphabetical
pub fn alphabetical_axis<I>(labels: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    labels.into_iter().collect::<BTreeSet<_>>().into_iter().collect()
}

/// Shape a two-level metric tree as a dense grid over the given axes.
///
/// Combinations missing from the tree become all-zero cells.
pub fn grid_view(root: &MetricNode, row_keys: Vec<String>, column_keys: Vec<String>) -> GridView {
    let zero = MetricRecord::from(&CellMetrics::default());

    let rows = row_keys
        .iter()
        .map(|row_key| {
            let row = root.child(row_key);
            let cells = column_keys
                .iter()
                .map(|column_key| GridCell {
                    key: column_key.clone(),
                    metrics: row
                        .and_then(|r| r.child(column_key))
                        .map(|cell| MetricRecord::from(&cell.metrics))
                        .unwrap_or(zero),
                })
                .collect();
            GridRow {
                key: row_key.clone(),
                cells,
                totals: row.map(|r| MetricRecord::from(&r.metrics)).unwrap_or(zero),
            }
        })
        .collect();

    GridView {
        row_keys,
        column_keys,
        rows,
        totals: MetricRecord::from(&root.metrics),
    }
}

/// Flatten four-level leaves into table rows, in the given order
pub fn table_view(leaves: &[(Vec<&str>, &MetricNode)], totals: &CellMetrics) -> TableView {
    let rows = leaves
        .iter()
        .filter_map(|(path, node)| match path.as_slice() {
            [item_type, carat_range, code, quality] => Some(TableRow {
                item_type: item_type.to_string(),
                carat_range: carat_range.to_string(),
                code: code.to_string(),
                quality: quality.to_string(),
                metrics: MetricRecord::from(&node.metrics),
            }),
            _ => None,
        })
        .collect();

    TableView {
        rows,
        totals: MetricRecord::from(totals),
    }
}
