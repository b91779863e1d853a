//! Per-bucket business metrics
//!
//! Everything here is kept in full precision; rounding happens only when a
//! record is formatted for output.

use crate::store::{Bucket, BucketStats, Tally};
use serde::Serialize;

const DAYS_PER_YEAR: f64 = 365.0;

/// Annualized stock turn. Zero when there is no inventory.
pub fn turn(sales_count: u64, inventory_count: u64, days_in_period: i64) -> f64 {
    if inventory_count == 0 {
        return 0.0;
    }
    let days = days_in_period.max(1) as f64;
    sales_count as f64 / inventory_count as f64 * (DAYS_PER_YEAR / days)
}

/// Target stock level.
///
/// With a positive turn the target is derived from sales; otherwise it falls
/// back to current inventory. The two bases are intentional and must stay.
pub fn ideal_inventory(sales_count: u64, inventory_count: u64, turn: f64, ideal_turn: f64) -> i64 {
    if turn > 0.0 {
        (sales_count as f64 / turn * ideal_turn).round() as i64
    } else {
        (inventory_count as f64 * ideal_turn).round() as i64
    }
}

/// Positive: stock needed. Negative: surplus.
pub fn needs_surplus(ideal_inventory: i64, inventory_count: u64, jobs_count: u64) -> i64 {
    ideal_inventory - inventory_count as i64 - jobs_count as i64
}

/// Inputs shared by every bucket of one request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricContext {
    pub days_in_period: i64,
    pub ideal_turn: f64,
}

/// Metrics of one bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CellMetrics {
    pub inventory: Tally,
    pub jobs: Tally,
    pub sales: Tally,
    pub inv_avg_aging: f64,
    pub sales_avg_aging: f64,
    pub in_house_count: u64,
    pub on_memo_count: u64,
    pub avg_days_on_memo: f64,
    pub turn: f64,
    pub ideal_inventory: i64,
    pub needs_surplus: i64,
}

impl CellMetrics {
    pub fn from_stats(stats: &BucketStats, ctx: &MetricContext) -> Self {
        let turn = turn(stats.sales.count, stats.inventory.count, ctx.days_in_period);
        let ideal = ideal_inventory(stats.sales.count, stats.inventory.count, turn, ctx.ideal_turn);

        Self {
            inventory: stats.inventory,
            jobs: stats.jobs,
            sales: stats.sales,
            inv_avg_aging: stats.inventory_age.value(),
            sales_avg_aging: stats.sales_age.value(),
            in_house_count: stats.in_house,
            on_memo_count: stats.on_memo,
            avg_days_on_memo: stats.memo_days.value(),
            turn,
            ideal_inventory: ideal,
            needs_surplus: needs_surplus(ideal, stats.inventory.count, stats.jobs.count),
        }
    }
}

/// Aggregation result with metrics attached at every level
#[derive(Debug, Clone, PartialEq)]
pub struct MetricNode {
    pub key: String,
    pub stats: BucketStats,
    pub metrics: CellMetrics,
    pub children: Vec<MetricNode>,
}

impl MetricNode {
    pub fn from_bucket(bucket: &Bucket, ctx: &MetricContext) -> Self {
        Self {
            key: bucket.key.clone(),
            stats: bucket.stats,
            metrics: CellMetrics::from_stats(&bucket.stats, ctx),
            children: bucket
                .children
                .iter()
                .map(|child| MetricNode::from_bucket(child, ctx))
                .collect(),
        }
    }

    pub fn child(&self, key: &str) -> Option<&MetricNode> {
        self.children.iter().find(|c| c.key == key)
    }

    /// Visit every leaf with its key path
    pub fn leaves(&self) -> Vec<(Vec<&str>, &MetricNode)> {
        let mut out = Vec::new();
        collect_leaves(self, &mut Vec::new(), &mut out);
        out
    }
}

fn collect_leaves<'a>(
    node: &'a MetricNode,
    path: &mut Vec<&'a str>,
    out: &mut Vec<(Vec<&'a str>, &'a MetricNode)>,
) {
    for child in &node.children {
        path.push(&child.key);
        if child.children.is_empty() {
            out.push((path.clone(), child));
        } else {
            collect_leaves(child, path, out);
        }
        path.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Mean;

    fn stats(inventory: u64, sales: u64, jobs: u64) -> BucketStats {
        BucketStats {
            inventory: Tally {
                count: inventory,
                value: inventory as f64 * 100.0,
            },
            jobs: Tally {
                count: jobs,
                value: 0.0,
            },
            sales: Tally {
                count: sales,
                value: 0.0,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_turn_and_needs_worked_example() {
        let ctx = MetricContext {
            days_in_period: 365,
            ideal_turn: 2.0,
        };
        let m = CellMetrics::from_stats(&stats(10, 5, 2), &ctx);
        assert!((m.turn - 0.5).abs() < 1e-12);
        assert_eq!(m.ideal_inventory, 20);
        assert_eq!(m.needs_surplus, 8);
    }

    #[test]
    fn test_zero_inventory() {
        let ctx = MetricContext {
            days_in_period: 365,
            ideal_turn: 1.4,
        };
        let m = CellMetrics::from_stats(&stats(0, 0, 3), &ctx);
        assert_eq!(m.turn, 0.0);
        assert_eq!(m.ideal_inventory, 0);
        assert_eq!(m.needs_surplus, -3);
    }

    #[test]
    fn test_sales_without_inventory_falls_back_to_inventory_basis() {
        // Turn is zero with nothing on hand, so the inventory basis applies
        assert_eq!(turn(4, 0, 365), 0.0);
        assert_eq!(ideal_inventory(4, 0, 0.0, 1.4), 0);
        assert_eq!(ideal_inventory(0, 10, 0.0, 1.4), 14);
    }

    #[test]
    fn test_turn_scales_with_period() {
        assert!((turn(5, 10, 73) - 2.5).abs() < 1e-12);
        // Degenerate periods count as one day
        assert_eq!(turn(1, 1, 0), 365.0);
        assert_eq!(turn(1, 1, -30), 365.0);
    }

    #[test]
    fn test_averages_and_memo_split() {
        let mut s = stats(4, 0, 0);
        s.on_memo = 1;
        s.in_house = 3;
        s.inventory_age = Mean {
            total: 100.0,
            samples: 4,
        };
        s.memo_days = Mean {
            total: 12.0,
            samples: 1,
        };
        let ctx = MetricContext {
            days_in_period: 365,
            ideal_turn: 1.0,
        };
        let m = CellMetrics::from_stats(&s, &ctx);
        assert_eq!(m.in_house_count, 3);
        assert_eq!(m.on_memo_count, 1);
        assert_eq!(m.inv_avg_aging, 25.0);
        assert_eq!(m.avg_days_on_memo, 12.0);
        assert_eq!(m.sales_avg_aging, 0.0);
    }

    #[test]
    fn test_leaves_carry_paths() {
        let mut root = Bucket::new("");
        root.insert(&["Rings".into(), "1.40-1.69".into()], &stats(1, 0, 0));
        root.insert(&["Studs".into(), "0.70-0.79".into()], &stats(2, 0, 0));
        let ctx = MetricContext {
            days_in_period: 365,
            ideal_turn: 1.0,
        };
        let node = MetricNode::from_bucket(&root, &ctx);
        let leaves = node.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[1].0, vec!["Studs", "0.70-0.79"]);
        assert_eq!(leaves[1].1.metrics.inventory.count, 2);
        assert_eq!(node.metrics.inventory.count, 3);
    }
}
