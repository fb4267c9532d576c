//! Error types for fitsync-core

use thiserror::Error;

/// Main error type for the fitsync-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Backfill range inputs contradict each other
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Non-retryable vendor API response, or retries exhausted
    #[error("remote error (HTTP {status}): {body}")]
    Remote { status: u16, body: String },

    /// Missing credentials or failed token exchange
    #[error("auth error: {0}")]
    Auth(String),

    /// Post-run guardrail tripped on suspicious data
    #[error("data quality check failed: {0}")]
    DataQuality(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writing error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for fitsync-core
pub type Result<T> = std::result::Result<T, Error>;
