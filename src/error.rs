//! Error types for the clickstream crate

use thiserror::Error;

/// Main error type for the clickstream library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error from the local event store
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Network/upload error
    #[error("network error: {0}")]
    Network(String),
}

/// Result type alias for the clickstream library
pub type Result<T> = std::result::Result<T, Error>;
