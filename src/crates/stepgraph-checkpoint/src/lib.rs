//! # stepgraph-checkpoint - State Persistence for Superstep Execution
//!
//! Trait-based checkpoint abstractions, reducer-backed state channels, and an
//! in-memory reference saver for the stepgraph engine.
//!
//! ## Overview
//!
//! A checkpoint is a snapshot of a run taken at a superstep boundary: the
//! committed field values plus the pending-task bookkeeping (frontier, defer
//! counters, visit counts, gated actions). Checkpoints enable:
//!
//! - **Suspension** - halt a run on a gated action and resume it later
//! - **Crash recovery** - restart from the last durable superstep
//! - **Inspection** - audit the state a run committed at each round
//!
//! ## Pieces
//!
//! - [`Channel`] and its implementations ([`LastValueChannel`],
//!   [`AppendChannel`], [`ReducerChannel`]) - per-field storage and merge
//!   policy
//! - [`Checkpoint`], [`PendingTask`], [`GatedAction`] - the serializable
//!   snapshot model
//! - [`CheckpointSaver`] - the abstract put/get persistence contract
//! - [`InMemoryCheckpointSaver`] - reference backend for tests and
//!   single-process use
//!
//! ## Quick start
//!
//! ```rust
//! use stepgraph_checkpoint::{Checkpoint, CheckpointSaver, InMemoryCheckpointSaver};
//! use std::collections::HashMap;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let saver = InMemoryCheckpointSaver::new();
//!
//! let mut values = HashMap::new();
//! values.insert("count".to_string(), serde_json::json!(1));
//! saver.save("run-1", Checkpoint::new(0, values)).await?;
//!
//! let latest = saver.load("run-1").await?;
//! assert_eq!(latest.unwrap().superstep, 0);
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod checkpoint;
pub mod error;
pub mod memory;
pub mod traits;

pub use channels::{AppendChannel, Channel, LastValueChannel, ReducerChannel, ReducerFn};
pub use checkpoint::{Checkpoint, GatedAction, PendingTask};
pub use error::{CheckpointError, Result};
pub use memory::InMemoryCheckpointSaver;
pub use traits::CheckpointSaver;
