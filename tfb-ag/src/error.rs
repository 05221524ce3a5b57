//! Error types for tfb-ag
//!
//! Defines service-level error types using thiserror for clear error propagation.

use crate::sink::SinkError;
use thiserror::Error;

/// Main error type for the aggregator service
#[derive(Error, Debug)]
pub enum Error {
    /// Errors from shared code (vote log, schedule, config)
    #[error(transparent)]
    Common(#[from] tfb_common::Error),

    /// Tally sink (spreadsheet) errors
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Convenience Result type using tfb-ag Error
pub type Result<T> = std::result::Result<T, Error>;
