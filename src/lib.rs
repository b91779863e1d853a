//! Stockturn - Jewelry Inventory Reconciliation and Stock-Turn Analytics
//!
//! Ingests point-of-sale inventory feeds per account, keeps an item store in
//! step with them, infers sales from items that drop out of the feed, and
//! aggregates stock-turn metrics over a type / carat / code / quality
//! hierarchy.

pub mod analytics;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod inventory;
pub mod scheduler;
pub mod services;
pub mod state;
pub mod store;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use config::AppConfig;
use scheduler::FeedSyncScheduler;
use services::IngestionService;
use state::AppState;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stockturn=info,stockturn_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Command line interface
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "stockturn: jewelry inventory reconciliation and stock-turn analytics",
    long_about = None
)]
pub struct Cli {
    /// Defaults to `serve`
    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }
}

/// Command line actions
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the feed sync scheduler until interrupted
    Serve,
    /// Ingest one feed file for an account
    Ingest {
        /// Account the feed belongs to
        account: String,
        /// Feed file to read
        file: PathBuf,
        /// Mark stale in-stock items as sold after a non-empty feed
        #[arg(long)]
        sweep: bool,
    },
}

/// Run a command against the configured data directory
pub async fn run(command: Command) -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    let state = Arc::new(AppState::new(config).context("opening database")?);

    match command {
        Command::Serve => {
            tracing::info!("Starting Stockturn...");
            let scheduler = FeedSyncScheduler::new(state);
            scheduler.start();

            tokio::signal::ctrl_c()
                .await
                .context("waiting for shutdown signal")?;
            tracing::info!("Shutting down");
            scheduler.stop();
        }
        Command::Ingest {
            account,
            file,
            sweep,
        } => {
            let bytes = tokio::fs::read(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| file.display().to_string());

            let run = IngestionService::ingest_upload(
                &state,
                &account,
                &filename,
                bytes,
                sweep,
                Utc::now(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&run)?);
        }
    }

    Ok(())
}
