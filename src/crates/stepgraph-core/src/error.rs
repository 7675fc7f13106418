//! Error types for graph construction and execution.
//!
//! Structural problems (malformed graphs, misconfiguration, persistence
//! failures) surface as [`GraphError`] at the call boundary. Failures inside
//! node executables do not: the scheduler folds those into the terminal
//! [`RunOutcome`](crate::run::RunOutcome) so callers can inspect the last
//! committed state and decide whether to resume.

use stepgraph_checkpoint::CheckpointError;
use thiserror::Error;

/// Result type for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// Boxed error type produced by node executables.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while building or driving a graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// Graph failed validation before any run started
    #[error("Compile error: {0}")]
    Compile(String),

    /// The scheduler hit an inconsistency while driving a run
    #[error("Execution error: {0}")]
    Execution(String),

    /// Concurrent writers staged multiple values for a field with no
    /// declared reducer
    #[error("Reducer conflict on field '{field}': concurrent writes to a field with no declared reducer")]
    ReducerConflict {
        /// Field that received conflicting writes
        field: String,
    },

    /// A run surface was used without the collaborator it needs
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Persistence backend failure during save or load
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Cross-run store failure
    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GraphError {
    /// Compile-error constructor used by the validator.
    pub fn compile(msg: impl Into<String>) -> Self {
        GraphError::Compile(msg.into())
    }
}
