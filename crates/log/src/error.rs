//! Logging setup errors

use thiserror::Error;

/// Result type for logger setup.
pub type LogResult<T> = Result<T, LogError>;

/// Logger setup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The level directive could not be parsed.
    #[error("invalid filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("failed to install subscriber: {0}")]
    Init(String),
}
