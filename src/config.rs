//! Runtime configuration
//!
//! Everything is read from `STOCKTURN_*` environment variables. Unset
//! variables take their defaults; set but unparsable ones are an error.

use crate::error::{AppError, Result};
use crate::inventory::CaratBands;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TYPE_ORDER: [&str; 6] =
    ["Studs", "Rings", "Bracelets", "Necklaces", "Pendants", "Huggies"];

/// Global settings. Per-account values in `account_settings` override the
/// ingestion defaults here.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_pool_size: u32,
    pub query_timeout: Duration,
    pub ideal_turn: f64,
    pub stale_after_minutes: u32,
    pub sync_interval_minutes: u32,
    pub max_detail_items: usize,
    pub sweep_alert_ratio: f64,
    pub carat_bands: CaratBands,
    /// Preferred ordering of item types on grid axes
    pub type_order: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            db_pool_size: 8,
            query_timeout: Duration::from_secs(30),
            ideal_turn: 1.4,
            stale_after_minutes: 120,
            sync_interval_minutes: 60,
            max_detail_items: 10_000,
            sweep_alert_ratio: 0.25,
            carat_bands: CaratBands::standard(),
            type_order: DEFAULT_TYPE_ORDER.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; used directly by tests
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvLookup(lookup);
        let defaults = Self::default();

        let config = Self {
            data_dir: env
                .get("STOCKTURN_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            db_pool_size: env.parse("STOCKTURN_DB_POOL_SIZE", defaults.db_pool_size)?,
            query_timeout: Duration::from_secs(
                env.parse("STOCKTURN_QUERY_TIMEOUT_SECS", defaults.query_timeout.as_secs())?,
            ),
            ideal_turn: env.parse("STOCKTURN_IDEAL_TURN", defaults.ideal_turn)?,
            stale_after_minutes: env
                .parse("STOCKTURN_STALE_AFTER_MINUTES", defaults.stale_after_minutes)?,
            sync_interval_minutes: env
                .parse("STOCKTURN_SYNC_INTERVAL_MINUTES", defaults.sync_interval_minutes)?,
            max_detail_items: env.parse("STOCKTURN_MAX_DETAIL_ITEMS", defaults.max_detail_items)?,
            sweep_alert_ratio: env
                .parse("STOCKTURN_SWEEP_ALERT_RATIO", defaults.sweep_alert_ratio)?,
            carat_bands: match env.get("STOCKTURN_CARAT_BANDS") {
                Some(raw) => CaratBands::from_labels(&split_list(&raw))?,
                None => defaults.carat_bands,
            },
            type_order: env
                .get("STOCKTURN_TYPE_ORDER")
                .map(|raw| split_list(&raw))
                .unwrap_or(defaults.type_order),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !(self.ideal_turn.is_finite() && self.ideal_turn > 0.0) {
            return Err(AppError::Config(format!(
                "STOCKTURN_IDEAL_TURN must be positive, got {}",
                self.ideal_turn
            )));
        }
        if self.stale_after_minutes == 0 || self.sync_interval_minutes == 0 {
            return Err(AppError::Config(
                "Staleness threshold and sync interval must be at least one minute".to_string(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(AppError::Config("Query timeout must be non-zero".to_string()));
        }
        if !(self.sweep_alert_ratio.is_finite() && self.sweep_alert_ratio >= 0.0) {
            return Err(AppError::Config(format!(
                "STOCKTURN_SWEEP_ALERT_RATIO must be non-negative, got {}",
                self.sweep_alert_ratio
            )));
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("stockturn.db")
    }
}

/// Trimmed, non-empty variable lookup
struct EnvLookup<F>(F);

impl<F: Fn(&str) -> Option<String>> EnvLookup<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    /// Parse `key` as `T`, or `default` when unset
    fn parse<T: FromStr>(&self, key: &str, default: T) -> Result<T> {
        match self.get(key) {
            Some(value) => value
                .parse()
                .map_err(|_| AppError::Config(format!("Invalid value for {}: '{}'", key, value))),
            None => Ok(default),
        }
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
