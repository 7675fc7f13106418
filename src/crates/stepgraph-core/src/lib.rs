//! # stepgraph-core - Directed-Graph Superstep Execution
//!
//! An execution engine that coordinates asynchronous task units ("nodes")
//! over a shared, typed state object. Four composition idioms are first
//! class:
//!
//! - **Linear chains** - unconditional edges between nodes
//! - **Static branches** - conditional edges resolved by a router function
//! - **Bounded cycles** - edges or directives pointing backward, guarded by
//!   engine-enforced iteration ceilings
//! - **Dynamic fan-out/fan-in** - runtime-sized spawn directives joined by
//!   defer nodes with pending-predecessor counters
//!
//! ## Execution model
//!
//! Runs proceed in **supersteps**: barrier-synchronized rounds in which
//! every frontier task reads the previous round's committed snapshot, runs
//! concurrently, and stages writes that merge through per-field reducers at
//! the barrier. Task completion order within a round is unspecified and
//! never observable in the committed result.
//!
//! A run ends in one of five terminal states, always carrying the context a
//! caller needs to inspect partial progress: `Completed`, `Suspended` (gated
//! action awaiting a decision), `Failed` (a task raised), `BoundExceeded`
//! (iteration ceiling - "did not converge", not "crashed"), or `Cancelled`.
//!
//! ## Quick start
//!
//! ```rust
//! use stepgraph_core::{GraphBuilder, NodeOutput, RunOutcome};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> stepgraph_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! builder.add_node("a", |_ctx| {
//!     Box::pin(async move { Ok(NodeOutput::update(json!({"field1": "x"}))) })
//! });
//! builder.add_node("b", |ctx| {
//!     Box::pin(async move {
//!         let field1 = ctx.state["field1"].as_str().unwrap_or_default();
//!         Ok(NodeOutput::update(json!({"field2": format!("{field1}y")})))
//!     })
//! });
//! builder.set_entry("a");
//! builder.add_edge("a", "b");
//!
//! let compiled = builder.compile()?;
//! let outcome = compiled.start(json!({}), "run-1").await?;
//! match outcome {
//!     RunOutcome::Completed { state } => assert_eq!(state["field2"], "xy"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Collaborators
//!
//! Persistence and cross-run memory are injected, never assumed: a
//! [`CheckpointSaver`](stepgraph_checkpoint::CheckpointSaver) enables
//! suspension, resumption, and crash recovery; a [`Store`] gives nodes a
//! durable KV surface the engine does not interpret.

pub mod builder;
pub mod compiled;
pub mod error;
pub mod graph;
pub mod output;
pub mod run;
pub(crate) mod scheduler;
pub(crate) mod state;
pub mod store;
pub mod stream;

pub use builder::GraphBuilder;
pub use compiled::CompiledGraph;
pub use error::{BoxError, GraphError, Result};
pub use graph::{NodeContext, NodeFuture, NodeId, Reducer, END, START};
pub use output::{Goto, NodeOutput, SpawnTask};
pub use run::{CancelToken, GateDecision, GateDescriptor, RunLimits, RunOutcome, RunStatus};
pub use store::{InMemoryStore, Store, StoreError};
pub use stream::{NodeWrite, StepDelta, StepStream};

// Re-exported so downstream users configure persistence without adding the
// checkpoint crate explicitly.
pub use stepgraph_checkpoint::{
    Checkpoint, CheckpointError, CheckpointSaver, InMemoryCheckpointSaver,
};
