//! Aggregation filters, metric formulas and output shapes

pub mod filter;
pub mod formatter;
pub mod metrics;

pub use filter::{AggregationFilter, DayRange, MemoStatus, MetricRange, MetricRanges, ReportWindow};
pub use formatter::{GridView, LeafDetailView, MetricRecord, TableRow, TableView};
pub use metrics::{CellMetrics, MetricContext, MetricNode};
