//! Application state management

use crate::config::AppConfig;
use crate::db::sqlite::{AccountSettings, SqliteDb};
use crate::error::{AppError, Result};
use crate::store::ItemStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

/// Account settings with global defaults filled in
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveSettings {
    pub account_id: String,
    pub feed_location: Option<String>,
    pub sync_interval: Duration,
    pub stale_after: Duration,
    pub ideal_turn: f64,
    pub enabled: bool,
}

/// Application state shared across services
pub struct AppState {
    /// SQLite database (runs, settings, saved reports)
    pub db: Arc<SqliteDb>,

    /// Item store the core reads and writes inventory through
    pub store: Arc<dyn ItemStore>,

    pub config: AppConfig,

    /// Ingestions in flight (account id -> start time)
    pub in_flight: DashMap<String, DateTime<Utc>>,
}

impl AppState {
    /// Open the on-disk database under the configured data directory
    pub fn new(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            AppError::Config(format!(
                "Cannot create data directory {}: {}",
                config.data_dir.display(),
                e
            ))
        })?;

        let db = Arc::new(SqliteDb::new(&config.database_path(), config.db_pool_size)?);
        tracing::info!("Database opened at {}", config.database_path().display());

        Ok(Self::with_db(db, config))
    }

    /// State over a private in-memory database
    pub fn in_memory(config: AppConfig) -> Result<Self> {
        let db = Arc::new(SqliteDb::open_in_memory()?);
        Ok(Self::with_db(db, config))
    }

    /// SQLite serves as the item store as well
    pub fn with_db(db: Arc<SqliteDb>, config: AppConfig) -> Self {
        let store: Arc<dyn ItemStore> = db.clone();
        Self::with_store(db, store, config)
    }

    /// Inject a separate item store
    pub fn with_store(db: Arc<SqliteDb>, store: Arc<dyn ItemStore>, config: AppConfig) -> Self {
        Self {
            db,
            store,
            config,
            in_flight: DashMap::new(),
        }
    }

    /// Settings for an account, falling back to the global config
    pub async fn settings_for(&self, account_id: &str) -> Result<EffectiveSettings> {
        let stored = self
            .db
            .get_account_settings(account_id)
            .await?
            .unwrap_or_else(|| AccountSettings::new(account_id));
        Ok(self.resolve_settings(stored))
    }

    pub fn resolve_settings(&self, settings: AccountSettings) -> EffectiveSettings {
        let minutes = |value: Option<u32>, default: u32| Duration::minutes(value.unwrap_or(default) as i64);

        EffectiveSettings {
            sync_interval: minutes(settings.sync_interval_minutes, self.config.sync_interval_minutes),
            stale_after: minutes(settings.stale_after_minutes, self.config.stale_after_minutes),
            ideal_turn: settings
                .ideal_turn
                .filter(|t| t.is_finite() && *t > 0.0)
                .unwrap_or(self.config.ideal_turn),
            feed_location: settings.feed_location,
            enabled: settings.enabled,
            account_id: settings.account_id,
        }
    }
}
