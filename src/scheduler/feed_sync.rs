//! Periodic feed sync
//!
//! Wakes once a minute and starts `sync_account` for every enabled account
//! whose last run began more than its sync interval ago. A failed sync is
//! logged and picked up again on a later poll.

use crate::error::Result;
use crate::services::IngestionService;
use crate::state::{AppState, EffectiveSettings};
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// How often the scheduler looks for due accounts
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

/// Whether an account last synced at `last_started` is due again at `now`
pub fn is_due(last_started: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    match last_started {
        Some(started) => now - started >= interval,
        None => true,
    }
}

/// Feed sync scheduler
pub struct FeedSyncScheduler {
    state: Arc<AppState>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl FeedSyncScheduler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            handle: Mutex::new(None),
        }
    }

    /// Start polling on the tokio runtime. A second call is a no-op.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            warn!("Feed sync scheduler already running");
            return;
        }

        let state = self.state.clone();
        *handle = Some(tokio::spawn(async move {
            info!(
                "Feed sync scheduler started (poll every {}s)",
                POLL_INTERVAL.as_secs()
            );
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = Self::poll_once(&state, Utc::now()).await {
                    error!("Feed sync poll failed: {}", e);
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            info!("Feed sync scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Spawn a sync for every due account; returns the handles of the started syncs
    pub async fn poll_once(state: &Arc<AppState>, now: DateTime<Utc>) -> Result<Vec<JoinHandle<()>>> {
        let due = Self::due_accounts(state, now).await?;
        let mut started = Vec::with_capacity(due.len());

        for settings in due {
            let state = state.clone();
            let account_id = settings.account_id;
            info!("Starting scheduled sync for account {}", account_id);
            started.push(tokio::spawn(async move {
                match IngestionService::sync_account(&state, &account_id, Utc::now()).await {
                    Ok(run) => debug!("Scheduled sync {} for account {} finished", run.id, account_id),
                    Err(e) => error!("Scheduled sync for account {} failed: {}", account_id, e),
                }
            }));
        }

        Ok(started)
    }

    /// Enabled accounts with a feed location that are due and not already running
    pub async fn due_accounts(state: &AppState, now: DateTime<Utc>) -> Result<Vec<EffectiveSettings>> {
        let mut due = Vec::new();

        for stored in state.db.list_syncable_accounts().await? {
            let settings = state.resolve_settings(stored);
            if IngestionService::is_running(state, &settings.account_id) {
                continue;
            }
            let last_started = state
                .db
                .latest_run(&settings.account_id)
                .await?
                .map(|run| run.started_at.unwrap_or(run.created_at));
            if is_due(last_started, settings.sync_interval, now) {
                due.push(settings);
            }
        }

        Ok(due)
    }
}

impl Drop for FeedSyncScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
