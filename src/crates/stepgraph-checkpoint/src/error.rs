//! Error types for checkpoint and channel operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint and channel operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// No checkpoint exists for the requested run
    #[error("Checkpoint not found: {0}")]
    NotFound(String),

    /// More than one value was staged for a field whose channel cannot merge
    #[error("Write conflict on field '{0}': multiple values staged for a last-value channel")]
    Conflict(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid checkpoint contents
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// Custom error
    #[error("{0}")]
    Custom(String),
}
