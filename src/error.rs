//! Error types for the tile widget subsystem

use thiserror::Error;

/// Result type alias for widget operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing tiles or resolving their icons.
///
/// None of these reach the widget host: the host contract has no error
/// channel, so the boundary methods log them and degrade instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Stored tile data could not be parsed
    #[error("Persisted tile data is corrupt: {0}")]
    PersistenceCorrupt(String),

    /// Icon lookup did not answer in time
    #[error("Icon lookup timed out after {0}ms")]
    IconTimeout(u64),

    /// Icon lookup raised an error
    #[error("Icon lookup failed: {0}")]
    IconLookupFailure(String),

    /// Host asked for a row outside the current snapshot
    #[error("Row {position} is out of range (count {count})")]
    OutOfRangePosition { position: usize, count: usize },

    /// A resource was torn down twice
    #[error("Resource already destroyed: {0}")]
    ResourceAlreadyDestroyed(&'static str),

    /// Key-value backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// An execution context stopped accepting work
    #[error("Execution context closed: {0}")]
    ContextClosed(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::PersistenceCorrupt(err.to_string())
    }
}
