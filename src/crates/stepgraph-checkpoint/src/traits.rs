//! The `CheckpointSaver` trait: the persistence seam between the scheduler
//! and whatever storage backs it.
//!
//! The engine depends only on this put/get contract. The in-memory saver in
//! [`crate::memory`] is the reference implementation; a production backend
//! (Postgres, SQLite, Redis, object storage) implements the same four
//! methods against its own store.
//!
//! # Example: custom backend skeleton
//!
//! ```rust,no_run
//! use stepgraph_checkpoint::{Checkpoint, CheckpointSaver, Result};
//! use async_trait::async_trait;
//!
//! struct FileSaver { root: std::path::PathBuf }
//!
//! #[async_trait]
//! impl CheckpointSaver for FileSaver {
//!     async fn save(&self, run_id: &str, checkpoint: Checkpoint) -> Result<()> {
//!         // serialize to self.root.join(run_id)
//!         # let _ = (run_id, checkpoint);
//!         Ok(())
//!     }
//!
//!     async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>> {
//!         # let _ = run_id;
//!         Ok(None)
//!     }
//!
//!     async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>> {
//!         # let _ = run_id;
//!         Ok(Vec::new())
//!     }
//!
//!     async fn delete(&self, run_id: &str) -> Result<()> {
//!         # let _ = run_id;
//!         Ok(())
//!     }
//! }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Storage backend for run snapshots, keyed by run id.
///
/// Implementations must be `Send + Sync`; the scheduler saves from inside an
/// async loop and callers may resume from another task. A run id maps to the
/// history of snapshots taken for that run; `load` returns the most recent.
#[async_trait]
pub trait CheckpointSaver: Send + Sync {
    /// Append a snapshot to the run's history.
    async fn save(&self, run_id: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Most recent snapshot for the run, or `None` if the run is unknown.
    async fn load(&self, run_id: &str) -> Result<Option<Checkpoint>>;

    /// Full snapshot history for the run, oldest first.
    async fn list(&self, run_id: &str) -> Result<Vec<Checkpoint>>;

    /// Drop all snapshots for the run.
    async fn delete(&self, run_id: &str) -> Result<()>;
}
