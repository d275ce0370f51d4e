//! Error types shared across the stylist crates.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by local (non-network) operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Persistent storage could not be read or written.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A stored blob could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageUnavailable(message.into())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
