//! Application error types

use crate::inventory::lifecycle::{ItemState, LifecycleEvent};
use serde::Serialize;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Item store (or run/settings tables) could not serve the request.
    /// Fatal for the current call; retrying is the caller's job.
    #[error("Item store unavailable: {0}")]
    StoreUnavailable(String),

    /// The feed as a whole could not be read. Fails the ingestion run.
    #[error("Feed unreadable: {0}")]
    FeedUnreadable(String),

    #[error("Illegal state transition: cannot {event} an item in state {from}")]
    StateTransition {
        from: ItemState,
        event: LifecycleEvent,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::StoreUnavailable(format!("sqlite: {}", err))
    }
}

impl From<r2d2::Error> for AppError {
    fn from(err: r2d2::Error) -> Self {
        AppError::StoreUnavailable(format!("connection pool: {}", err))
    }
}

impl AppError {
    /// Stable machine-readable code for the presentation layer
    pub fn code(&self) -> &'static str {
        match self {
            AppError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            AppError::FeedUnreadable(_) => "FEED_UNREADABLE",
            AppError::StateTransition { .. } => "STATE_TRANSITION_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// A recoverable failure tied to one feed row.
///
/// Row errors are collected into the run report and never abort a feed.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[error("row {row}: {message}")]
pub struct RowError {
    /// 1-based line number in the feed (the header is line 1)
    pub row: u64,
    pub serial_number: Option<String>,
    pub message: String,
}

impl RowError {
    pub fn new(row: u64, serial_number: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            row,
            serial_number: serial_number.map(str::to_string),
            message: message.into(),
        }
    }
}

/// Serializable error response for the presentation layer
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        ErrorResponse {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        let response = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        response.serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_errors_surface_as_store_unavailable() {
        let err: AppError = rusqlite::Error::InvalidQuery.into();
        assert_eq!(err.code(), "STORE_UNAVAILABLE");
    }

    #[test]
    fn test_error_response_carries_code_and_message() {
        let response = ErrorResponse::from(AppError::StateTransition {
            from: ItemState::Sales,
            event: LifecycleEvent::ActivateJob,
        });
        assert_eq!(response.code, "STATE_TRANSITION_ERROR");
        assert!(response.message.contains("activateJob"));
        assert!(response.message.contains("sales"));
    }

    #[test]
    fn test_row_error_display() {
        let err = RowError::new(7, Some("1001"), "missing serial number");
        assert_eq!(err.to_string(), "row 7: missing serial number");
    }
}
