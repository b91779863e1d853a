//! Scheduler module for Stockturn
//!
//! Handles scheduled tasks:
//! - Periodic feed sync per account

mod feed_sync;

pub use feed_sync::{is_due, FeedSyncScheduler, POLL_INTERVAL};
