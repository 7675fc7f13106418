//! The compiled graph and its invocation surface.
//!
//! `compile()` on a builder produces a [`CompiledGraph`]: the immutable
//! definition plus injected collaborators (checkpoint saver, cross-run
//! store, run limits). A compiled graph is cheap to clone and safe to share;
//! each `start` drives an independent run.
//!
//! # Example
//!
//! ```rust
//! use stepgraph_core::{GraphBuilder, NodeOutput, RunOutcome};
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> stepgraph_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! builder.add_node("double", |ctx| {
//!     Box::pin(async move {
//!         let n = ctx.state["n"].as_i64().unwrap_or(0);
//!         Ok(NodeOutput::update(json!({"n": n * 2})))
//!     })
//! });
//! builder.set_entry("double");
//! let compiled = builder.compile()?;
//!
//! let outcome = compiled.start(json!({"n": 21}), "run-1").await?;
//! match outcome {
//!     RunOutcome::Completed { state } => assert_eq!(state["n"], 42),
//!     other => panic!("unexpected outcome: {other:?}"),
//! }
//! # Ok(())
//! # }
//! ```

use crate::error::Result;
use crate::graph::{Graph, NodeId};
use crate::run::{CancelToken, GateDecision, RunLimits, RunOutcome};
use crate::scheduler::RunLoop;
use crate::store::Store;
use crate::stream::StepStream;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use stepgraph_checkpoint::CheckpointSaver;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// An immutable, executable graph.
#[derive(Clone)]
pub struct CompiledGraph {
    pub(crate) graph: Arc<Graph>,
    /// Defer nodes reachable from each node, precomputed at compile time.
    pub(crate) defer_reach: Arc<HashMap<NodeId, Vec<NodeId>>>,
    pub(crate) checkpointer: Option<Arc<dyn CheckpointSaver>>,
    pub(crate) store: Option<Arc<dyn Store>>,
    pub(crate) limits: RunLimits,
}

impl std::fmt::Debug for CompiledGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledGraph")
            .field("nodes", &self.graph.nodes.len())
            .field("limits", &self.limits)
            .field("checkpointer", &self.checkpointer.as_ref().map(|_| "<saver>"))
            .field("store", &self.store.as_ref().map(|_| "<store>"))
            .finish()
    }
}

impl CompiledGraph {
    pub(crate) fn new(graph: Graph, defer_reach: HashMap<NodeId, Vec<NodeId>>) -> Self {
        Self {
            graph: Arc::new(graph),
            defer_reach: Arc::new(defer_reach),
            checkpointer: None,
            store: None,
            limits: RunLimits::default(),
        }
    }

    /// Attach a checkpoint saver. Required for suspension and resumption;
    /// when present, a checkpoint is also saved after every superstep for
    /// crash recovery.
    pub fn with_checkpointer(mut self, saver: Arc<dyn CheckpointSaver>) -> Self {
        self.checkpointer = Some(saver);
        self
    }

    /// Attach a cross-run store, surfaced to nodes through their context.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Override the default iteration ceilings.
    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Execute a run to a terminal outcome.
    pub async fn start(&self, input: Value, run_id: impl Into<String>) -> Result<RunOutcome> {
        self.start_with_cancel(input, run_id, CancelToken::new())
            .await
    }

    /// Execute a run with an external cancellation token. Cancellation is
    /// honored at superstep boundaries; in-flight tasks finish first.
    pub async fn start_with_cancel(
        &self,
        input: Value,
        run_id: impl Into<String>,
        cancel: CancelToken,
    ) -> Result<RunOutcome> {
        self.run_internal(input, run_id.into(), cancel).await
    }

    #[tracing::instrument(skip(self, input, cancel), fields(node_count = self.graph.nodes.len()))]
    async fn run_internal(
        &self,
        input: Value,
        run_id: String,
        cancel: CancelToken,
    ) -> Result<RunOutcome> {
        tracing::info!("starting run");
        RunLoop::new(self.clone(), run_id, cancel).start(input).await
    }

    /// Resume a run from its last durable checkpoint. A suspended run takes
    /// one decision per pending gated action, in the order the descriptors
    /// were emitted; a run that stopped without gates (a task failure, a
    /// crashed process) takes an empty decision vector and picks up the
    /// pending work as-is.
    #[tracing::instrument(skip(self, decisions))]
    pub async fn resume(&self, run_id: &str, decisions: Vec<GateDecision>) -> Result<RunOutcome> {
        RunLoop::new(self.clone(), run_id.to_string(), CancelToken::new())
            .resume(decisions)
            .await
    }

    /// Lazy, finite, non-restartable sequence of per-superstep deltas for
    /// a fresh run under a generated run id. The terminal outcome is
    /// discarded; callers that need it use [`start`](Self::start).
    pub fn stream(&self, input: Value) -> StepStream {
        self.stream_with_run_id(input, uuid::Uuid::new_v4().to_string())
    }

    /// As [`stream`](Self::stream), under a caller-chosen run id.
    pub fn stream_with_run_id(&self, input: Value, run_id: impl Into<String>) -> StepStream {
        let (sender, receiver) = mpsc::channel(16);
        let compiled = self.clone();
        let run_id = run_id.into();
        tokio::spawn(async move {
            let outcome = RunLoop::new(compiled, run_id.clone(), CancelToken::new())
                .with_delta_sender(sender)
                .start(input)
                .await;
            if let Err(error) = outcome {
                tracing::error!(run_id = %run_id, error = %error, "streamed run aborted");
            }
        });
        Box::pin(ReceiverStream::new(receiver))
    }
}
