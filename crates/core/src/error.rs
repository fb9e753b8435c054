//! Error types for txkv
//!
//! Errors cover collaborator failures (coordinator, storage tier) and bad
//! configuration. Per-key protocol outcomes such as `Blocked` or `Conflict`
//! are not errors; see [`crate::status`].
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use thiserror::Error;

/// Result type alias for txkv operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for txkv
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, config loading, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Key or range not owned by this instance
    #[error("Partition error: {0}")]
    Partition(String),

    /// Failure reaching a downstream collaborator
    #[error("Network error: {0}")]
    Network(String),

    /// Durable backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored data could not be decoded
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// Invalid operation or state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),
}
