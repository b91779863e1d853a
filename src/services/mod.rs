//! Services Layer
//!
//! Business logic shared by the scheduler and the command line. Services are
//! stateless unit structs; everything they need comes in through `AppState`.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ──┐
//!             ├──> IngestionService ──> ReconcileService ──> ItemStore
//! CLI ────────┘          │
//!                        └──> SalesDetectionService
//!
//! Reports ──> AggregationService ──> ItemStore (read-only)
//! ```
//!
//! # Services
//!
//! - `IngestionService` - Run a feed end to end and record the run
//! - `ReconcileService` - Match feed rows to stored items
//! - `SalesDetectionService` - Infer sales from items missing in the feed
//! - `AggregationService` - Grids, table and leaf detail
//! - `SavedReportService` - Named filter presets

pub mod aggregation_service;
pub mod ingestion_service;
pub mod reconcile_service;
pub mod sales_detection_service;
pub mod saved_report_service;

pub use aggregation_service::AggregationService;
pub use ingestion_service::IngestionService;
pub use reconcile_service::{plan_transition, ReconcileReport, ReconcileService};
pub use sales_detection_service::{SalesDetectionService, SweepReport};
pub use saved_report_service::SavedReportService;
