//! Common error types for TFB

use crate::schedule::ScheduleError;
use thiserror::Error;

/// Common result type for TFB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across TFB crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV read/write error (vote log, schedule source)
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encode/decode error (schedule cache)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML configuration could not be parsed
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Schedule failed to build or validate
    #[error("Schedule error: {0}")]
    Schedule(#[from] ScheduleError),

    /// Invalid input (malformed log line, unknown vote category, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
