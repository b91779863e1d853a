//! Feed sources
//!
//! Where a scheduled ingestion pulls its feed from. A location is either a
//! local path (file or drop directory) or an HTTP(S) URL.

use crate::error::{AppError, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info};
use url::Url;

/// Raw feed as fetched
#[derive(Debug, Clone)]
pub struct FeedPayload {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Anything that can hand over the latest feed for an account
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Human-readable location for logs
    fn describe(&self) -> String;

    /// Fetch the latest feed. Every failure is `FeedUnreadable`.
    async fn fetch(&self) -> Result<FeedPayload>;
}

/// Build the source for a configured location string
pub fn source_for_location(location: &str) -> Result<Box<dyn FeedSource>> {
    let location = location.trim();
    if location.is_empty() {
        return Err(AppError::Config("Feed location is empty".to_string()));
    }

    match Url::parse(location) {
        Ok(url) => match url.scheme() {
            "http" | "https" => Ok(Box::new(HttpFeedSource::new(url)?)),
            "file" => {
                let path = url
                    .to_file_path()
                    .map_err(|_| AppError::Config(format!("Bad file URL '{}'", location)))?;
                Ok(Box::new(DirectoryFeedSource::new(path)))
            }
            other => Err(AppError::Config(format!(
                "Unsupported feed scheme '{}' in '{}'",
                other, location
            ))),
        },
        // Plain paths (including Windows drive paths that parse oddly) are local
        Err(_) => Ok(Box::new(DirectoryFeedSource::new(PathBuf::from(location)))),
    }
}

/// Local file, or the newest `*.csv` in a drop directory
pub struct DirectoryFeedSource {
    path: PathBuf,
}

impl DirectoryFeedSource {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn latest_csv(dir: &Path) -> Result<PathBuf> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            AppError::FeedUnreadable(format!("cannot list {}: {}", dir.display(), e))
        })?;

        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_csv = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
            if !is_csv || !path.is_file() {
                continue;
            }

            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);

            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, path));
            }
        }

        newest.map(|(_, path)| path).ok_or_else(|| {
            AppError::FeedUnreadable(format!("no CSV files found in {}", dir.display()))
        })
    }
}

#[async_trait]
impl FeedSource for DirectoryFeedSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn fetch(&self) -> Result<FeedPayload> {
        let path = if self.path.is_dir() {
            Self::latest_csv(&self.path)?
        } else {
            self.path.clone()
        };

        debug!("Reading feed from {}", path.display());

        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            AppError::FeedUnreadable(format!("cannot read {}: {}", path.display(), e))
        })?;

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(FeedPayload { filename, bytes })
    }
}

/// Feed published at a URL
pub struct HttpFeedSource {
    client: Client,
    url: Url,
}

impl HttpFeedSource {
    pub fn new(url: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| AppError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn fetch(&self) -> Result<FeedPayload> {
        info!("Fetching feed from {}", self.url);

        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| AppError::FeedUnreadable(format!("GET {} failed: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::FeedUnreadable(format!(
                "GET {} returned {}",
                self.url, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AppError::FeedUnreadable(format!("reading {} failed: {}", self.url, e)))?
            .to_vec();

        let filename = self
            .url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or("feed.csv")
            .to_string();

        Ok(FeedPayload { filename, bytes })
    }
}
