//! Error types for NextStat

use thiserror::Error;

/// NextStat error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid input detected at construction time (names, ranges, lengths)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Analysis setup that cannot produce a hypothesis test
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Numerical failure that cannot be absorbed locally
    #[error("Computation error: {0}")]
    Computation(String),

    /// Not implemented
    #[error("Not implemented: {0}")]
    NotImplemented(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
