//! SQLite database models

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ingestion run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    /// Completed and failed runs are immutable
    pub fn is_final(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "processing" => Ok(RunStatus::Processing),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(AppError::Validation(format!("Unknown run status: {}", other))),
        }
    }
}

/// Counters reported by an ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounts {
    pub total_records: u64,
    pub processed_records: u64,
    pub new_items: u64,
    pub updated_items: u64,
    pub sold_items: u64,
    pub error_count: u64,
}

/// One feed-processing execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionRun {
    pub id: String,
    pub account_id: String,
    pub status: RunStatus,
    pub filename: Option<String>,
    pub feed_sha256: Option<String>,
    #[serde(flatten)]
    pub counts: RunCounts,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Per-account ingestion settings. Unset values fall back to the global config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    pub account_id: String,
    pub feed_location: Option<String>,
    pub sync_interval_minutes: Option<u32>,
    pub stale_after_minutes: Option<u32>,
    pub ideal_turn: Option<f64>,
    pub enabled: bool,
}

impl AccountSettings {
    pub fn new(account_id: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            feed_location: None,
            sync_interval_minutes: None,
            stale_after_minutes: None,
            ideal_turn: None,
            enabled: true,
        }
    }
}

/// Named filter preset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedReport {
    pub id: i64,
    pub account_id: String,
    pub name: String,
    /// Serialized aggregation filter
    pub filter: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
