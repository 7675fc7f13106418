//! The superstep loop.
//!
//! Execution proceeds in barrier-synchronized rounds:
//!
//! ```text
//!   +--------------------------------------------------------------+
//!   | loop:                                                        |
//!   |   frontier empty?  ------------------> Completed             |
//!   |   cancellation requested? -----------> Cancelled             |
//!   |   iteration ceiling hit? ------------> BoundExceeded         |
//!   |                                                              |
//!   |   run all frontier tasks concurrently (join_all barrier)     |
//!   |   any task errored? -----------------> Failed                |
//!   |   commit staged writes through the field reducers            |
//!   |   compute next frontier (edges, directives, spawned tasks,   |
//!   |     defer joins released when their pending count is zero)   |
//!   |   gated action held? ----------------> checkpoint, Suspended |
//!   |   save checkpoint, emit stream delta                         |
//!   +--------------------------------------------------------------+
//! ```
//!
//! Every task in a round reads the snapshot committed by the previous
//! round; spawned instances read their partial state instead. Writes are
//! staged during the round and merged only at the barrier, in deterministic
//! task order, so completion order never affects the committed result.
//!
//! Defer joins are tracked with pending counters owned by this
//! single-threaded loop: scheduling a task increments the counter of every
//! defer node the task could still reach, completion decrements it, and an
//! armed defer node runs once its counter returns to zero. Gated tasks keep
//! their decrement until the caller's decision is applied at resume, so a
//! join downstream of a gate cannot fire early.

use crate::compiled::CompiledGraph;
use crate::error::{GraphError, Result};
use crate::graph::{Edge, NodeContext, NodeId, START};
use crate::output::{Goto, NodeOutput};
use crate::run::{CancelToken, GateDecision, GateDescriptor, RunOutcome};
use crate::state::{StagedWrite, StateStore};
use crate::stream::{NodeWrite, StepDelta};
use futures::future::join_all;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use stepgraph_checkpoint::{Checkpoint, CheckpointError, GatedAction, PendingTask};
use tokio::sync::mpsc;

/// One scheduled invocation. `input` is `None` for statically scheduled
/// tasks (they read the committed snapshot) and `Some` for spawned
/// instances.
#[derive(Debug, Clone)]
pub(crate) struct Task {
    pub node: NodeId,
    pub input: Option<Value>,
}

/// Per-run execution state driving the superstep loop.
pub(crate) struct RunLoop {
    compiled: CompiledGraph,
    run_id: String,
    state: StateStore,
    frontier: Vec<Task>,
    /// Defer nodes that have been targeted but are withheld.
    armed: BTreeSet<NodeId>,
    /// Outstanding predecessor counts per defer node.
    pending: HashMap<NodeId, usize>,
    visits: HashMap<NodeId, usize>,
    superstep: usize,
    cancel: CancelToken,
    deltas: Option<mpsc::Sender<StepDelta>>,
}

impl RunLoop {
    pub(crate) fn new(compiled: CompiledGraph, run_id: String, cancel: CancelToken) -> Self {
        let state = StateStore::new(&compiled.graph.reducers);
        Self {
            compiled,
            run_id,
            state,
            frontier: Vec::new(),
            armed: BTreeSet::new(),
            pending: HashMap::new(),
            visits: HashMap::new(),
            superstep: 0,
            cancel,
            deltas: None,
        }
    }

    pub(crate) fn with_delta_sender(mut self, sender: mpsc::Sender<StepDelta>) -> Self {
        self.deltas = Some(sender);
        self
    }

    /// Seed the state from the initial input, schedule the entry frontier,
    /// and drive the loop to a terminal outcome.
    pub(crate) async fn start(mut self, input: Value) -> Result<RunOutcome> {
        let mut writes = Vec::new();
        StateStore::stage_object(0, input, &mut writes)?;
        self.state.commit(writes)?;

        let snapshot = self.state.snapshot();
        let entry = self.static_successors(START, &snapshot)?;
        self.schedule(entry, Vec::new());
        self.run().await
    }

    /// Rebuild a run from its last durable checkpoint, apply the caller's
    /// decisions, and continue. Suspended runs take one decision per held
    /// gate; a run that stopped without gates (a task failure, a crashed
    /// process) resumes with an empty decision vector from the work the
    /// checkpoint left pending.
    pub(crate) async fn resume(mut self, decisions: Vec<GateDecision>) -> Result<RunOutcome> {
        let saver = self.compiled.checkpointer.clone().ok_or_else(|| {
            GraphError::Configuration("resume requires a checkpoint saver".to_string())
        })?;
        let checkpoint = saver
            .load(&self.run_id)
            .await?
            .ok_or_else(|| GraphError::Checkpoint(CheckpointError::NotFound(self.run_id.clone())))?;

        if decisions.len() != checkpoint.gates.len() {
            return Err(GraphError::Configuration(format!(
                "expected {} decisions for run '{}', got {}",
                checkpoint.gates.len(),
                self.run_id,
                decisions.len()
            )));
        }
        if checkpoint.gates.is_empty()
            && checkpoint.frontier.is_empty()
            && checkpoint.armed.is_empty()
        {
            return Err(GraphError::Configuration(format!(
                "run '{}' has nothing left to resume",
                self.run_id
            )));
        }

        self.state.restore(checkpoint.channel_values)?;
        self.superstep = checkpoint.superstep;
        self.visits = checkpoint.node_visits;
        self.pending = checkpoint.pending_counters;
        self.armed = checkpoint.armed.into_iter().collect();
        self.frontier = checkpoint
            .frontier
            .into_iter()
            .map(|task| Task {
                node: task.node,
                input: task.input,
            })
            .collect();

        // Each decision commits as the gated node's update: the proposed
        // action verbatim, a substituted value, or nothing.
        let mut writes = Vec::new();
        for (ordinal, (gate, decision)) in checkpoint.gates.iter().zip(&decisions).enumerate() {
            match decision {
                GateDecision::Approve => {
                    StateStore::stage_object(ordinal, gate.action.clone(), &mut writes)?;
                }
                GateDecision::Modify(value) => {
                    StateStore::stage_object(ordinal, value.clone(), &mut writes)?;
                }
                GateDecision::Reject => {}
            }
        }
        self.state.commit(writes)?;
        tracing::info!(run_id = %self.run_id, decisions = decisions.len(), "resumed run from checkpoint");

        // The gated tasks' pending decrements were held back at suspension.
        for gate in &checkpoint.gates {
            self.settle_pending(&gate.node);
        }

        // Gated nodes now follow their compiled edges, evaluated against
        // the post-decision snapshot.
        let snapshot = self.state.snapshot();
        let mut targets: BTreeSet<NodeId> = BTreeSet::new();
        for gate in &checkpoint.gates {
            targets.extend(self.static_successors(&gate.node, &snapshot)?);
        }
        targets.retain(|target| {
            !self
                .frontier
                .iter()
                .any(|task| task.input.is_none() && &task.node == target)
        });
        self.schedule(targets, Vec::new());
        self.run().await
    }

    async fn run(mut self) -> Result<RunOutcome> {
        loop {
            if self.frontier.is_empty() && self.armed.is_empty() {
                let state = self.state.snapshot();
                tracing::info!(run_id = %self.run_id, superstep = self.superstep, "run completed");
                return Ok(RunOutcome::Completed { state });
            }

            if self.cancel.is_cancelled() {
                tracing::info!(run_id = %self.run_id, superstep = self.superstep, "run cancelled");
                return Ok(RunOutcome::Cancelled {
                    state: self.state.snapshot(),
                });
            }

            if self.superstep >= self.compiled.limits.max_supersteps {
                tracing::warn!(
                    run_id = %self.run_id,
                    superstep = self.superstep,
                    "superstep ceiling reached"
                );
                return Ok(RunOutcome::BoundExceeded {
                    state: self.state.snapshot(),
                    superstep: self.superstep,
                });
            }
            if let Some(max_visits) = self.compiled.limits.max_node_visits {
                if let Some(task) = self
                    .frontier
                    .iter()
                    .find(|task| self.visits.get(&task.node).copied().unwrap_or(0) >= max_visits)
                {
                    tracing::warn!(
                        run_id = %self.run_id,
                        node = %task.node,
                        superstep = self.superstep,
                        "per-node visit ceiling reached"
                    );
                    return Ok(RunOutcome::BoundExceeded {
                        state: self.state.snapshot(),
                        superstep: self.superstep,
                    });
                }
            }

            if let Some(terminal) = self.execute_superstep().await? {
                return Ok(terminal);
            }
        }
    }

    /// One barrier-synchronized round. Returns a terminal outcome when the
    /// round ended the run.
    async fn execute_superstep(&mut self) -> Result<Option<RunOutcome>> {
        let tasks = std::mem::take(&mut self.frontier);
        let snapshot = self.state.snapshot();
        tracing::debug!(
            run_id = %self.run_id,
            superstep = self.superstep,
            tasks = tasks.len(),
            "executing superstep"
        );

        let futures = tasks.iter().map(|task| {
            let executor = self
                .compiled
                .graph
                .node(&task.node)
                .map(|spec| spec.executor.clone());
            let node = task.node.clone();
            let context = NodeContext {
                state: task.input.clone().unwrap_or_else(|| snapshot.clone()),
                run_id: self.run_id.clone(),
                superstep: self.superstep,
                store: self.compiled.store.clone(),
            };
            async move {
                match executor {
                    Some(executor) => executor(context).await,
                    None => Err(format!("task targets unknown node '{node}'").into()),
                }
            }
        });
        let results = join_all(futures).await;

        for task in &tasks {
            *self.visits.entry(task.node.clone()).or_insert(0) += 1;
        }

        // Barrier: a raised error discards the round's staged writes and
        // ends the run with the last fully committed state.
        let mut outputs = Vec::with_capacity(results.len());
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Ok(output) => outputs.push(output),
                Err(error) => {
                    tracing::error!(
                        run_id = %self.run_id,
                        node = %task.node,
                        error = %error,
                        "node execution failed"
                    );
                    return Ok(Some(RunOutcome::Failed {
                        node: task.node.clone(),
                        error: error.to_string(),
                        state: snapshot,
                    }));
                }
            }
        }

        // Stage updates and collect gated actions.
        let mut writes: Vec<StagedWrite> = Vec::new();
        let mut delta_writes: Vec<NodeWrite> = Vec::new();
        let mut gates: Vec<GateDescriptor> = Vec::new();
        for (ordinal, (task, output)) in tasks.iter().zip(&outputs).enumerate() {
            match output {
                NodeOutput::Update(update) | NodeOutput::Route { update, .. } => {
                    StateStore::stage_object(ordinal, update.clone(), &mut writes)?;
                    delta_writes.push(NodeWrite {
                        node: task.node.clone(),
                        update: update.clone(),
                    });
                }
                NodeOutput::Spawn(_) => {}
                NodeOutput::Gate { action } => {
                    gates.push(GateDescriptor {
                        node: task.node.clone(),
                        action: action.clone(),
                    });
                }
            }
        }
        self.state.commit(writes)?;
        let committed = self.state.snapshot();

        // Completion decrements, except for gated tasks: those settle when
        // the caller's decision is applied at resume.
        for (task, output) in tasks.iter().zip(&outputs) {
            if !matches!(output, NodeOutput::Gate { .. }) {
                self.settle_pending(&task.node);
            }
        }

        // Successors for the next round.
        let mut static_targets: BTreeSet<NodeId> = BTreeSet::new();
        let mut spawned: Vec<Task> = Vec::new();
        for (task, output) in tasks.iter().zip(&outputs) {
            match output {
                NodeOutput::Update(_) => {
                    static_targets.extend(self.static_successors(&task.node, &committed)?);
                }
                NodeOutput::Route { goto, .. } => match goto {
                    Goto::Node(target) => {
                        self.check_runtime_target(&task.node, target)?;
                        static_targets.insert(target.clone());
                    }
                    Goto::Nodes(nodes) => {
                        for target in nodes {
                            self.check_runtime_target(&task.node, target)?;
                            static_targets.insert(target.clone());
                        }
                    }
                    Goto::End => {}
                },
                NodeOutput::Spawn(instances) => {
                    for instance in instances {
                        self.check_runtime_target(&task.node, &instance.node)?;
                        spawned.push(Task {
                            node: instance.node.clone(),
                            input: Some(instance.input.clone()),
                        });
                    }
                }
                NodeOutput::Gate { .. } => {}
            }
        }

        let executed_superstep = self.superstep;
        self.superstep += 1;
        self.schedule(static_targets, spawned);

        if !gates.is_empty() {
            return self.suspend(gates).await.map(Some);
        }

        if let Some(saver) = &self.compiled.checkpointer {
            saver.save(&self.run_id, self.build_checkpoint(&[])).await?;
        }

        if let Some(sender) = &self.deltas {
            let delta = StepDelta {
                superstep: executed_superstep,
                writes: delta_writes,
                state: committed,
                committed_at: chrono::Utc::now(),
            };
            // A dropped receiver stops nobody; the run finishes either way.
            let _ = sender.send(delta).await;
        }

        Ok(None)
    }

    /// Persist the full run and hand the pending descriptors to the caller.
    async fn suspend(&mut self, gates: Vec<GateDescriptor>) -> Result<RunOutcome> {
        let saver = self.compiled.checkpointer.clone().ok_or_else(|| {
            GraphError::Configuration(
                "gated actions require a checkpoint saver to suspend".to_string(),
            )
        })?;
        saver
            .save(&self.run_id, self.build_checkpoint(&gates))
            .await?;
        tracing::info!(
            run_id = %self.run_id,
            gates = gates.len(),
            superstep = self.superstep,
            "run suspended on gated actions"
        );
        Ok(RunOutcome::Suspended {
            run_id: self.run_id.clone(),
            pending: gates,
        })
    }

    fn build_checkpoint(&self, gates: &[GateDescriptor]) -> Checkpoint {
        Checkpoint::new(self.superstep, self.state.checkpoint_values())
            .with_frontier(
                self.frontier
                    .iter()
                    .map(|task| PendingTask {
                        node: task.node.clone(),
                        input: task.input.clone(),
                    })
                    .collect(),
            )
            .with_pending_counters(self.pending.clone())
            .with_armed(self.armed.iter().cloned().collect())
            .with_node_visits(self.visits.clone())
            .with_gates(
                gates
                    .iter()
                    .map(|gate| GatedAction {
                        node: gate.node.clone(),
                        action: gate.action.clone(),
                    })
                    .collect(),
            )
    }

    /// Add targets and spawned instances to the frontier, maintaining the
    /// defer bookkeeping: targeted defer nodes are armed rather than
    /// scheduled, every scheduled task bumps the counters of the defer
    /// nodes it could reach, and armed nodes whose counter is back to zero
    /// are released.
    fn schedule(&mut self, static_targets: BTreeSet<NodeId>, spawned: Vec<Task>) {
        let mut fresh: Vec<Task> = Vec::new();
        for target in static_targets {
            let defer = self
                .compiled
                .graph
                .node(&target)
                .map_or(false, |spec| spec.defer);
            if defer {
                self.armed.insert(target);
            } else {
                fresh.push(Task {
                    node: target,
                    input: None,
                });
            }
        }
        fresh.extend(spawned);

        for task in &fresh {
            self.raise_pending(&task.node);
        }
        self.frontier.extend(fresh);
        self.release_armed();
    }

    /// Move armed defer nodes whose pending count reached zero into the
    /// frontier. Counters are balanced by construction: every scheduled
    /// task raises them once and settles them once (at completion, or at
    /// resume for gated tasks), so an armed node is always released by the
    /// barrier after its last possible predecessor finishes.
    ///
    /// A withheld defer node is itself a possible predecessor of any defer
    /// node downstream of it, but contributes no pending count while armed.
    /// Release therefore also requires that no other armed node can still
    /// reach the candidate; once the upstream join runs, its own raise and
    /// settle keep the downstream counter honest.
    fn release_armed(&mut self) {
        let ready: Vec<NodeId> = self
            .armed
            .iter()
            .filter(|node| {
                self.pending.get(*node).copied().unwrap_or(0) == 0
                    && !self.armed.iter().any(|upstream| {
                        upstream != *node
                            && self
                                .compiled
                                .defer_reach
                                .get(upstream)
                                .map_or(false, |reach| reach.contains(*node))
                    })
            })
            .cloned()
            .collect();
        for node in ready {
            self.armed.remove(&node);
            self.raise_pending(&node);
            self.frontier.push(Task { node, input: None });
        }
    }

    fn raise_pending(&mut self, node: &str) {
        if let Some(reachable) = self.compiled.defer_reach.get(node) {
            for defer in reachable {
                *self.pending.entry(defer.clone()).or_insert(0) += 1;
            }
        }
    }

    fn settle_pending(&mut self, node: &str) {
        if let Some(reachable) = self.compiled.defer_reach.get(node) {
            for defer in reachable {
                if let Some(count) = self.pending.get_mut(defer) {
                    *count = count.saturating_sub(1);
                }
            }
        }
    }

    /// Resolve a node's compiled edges against a committed snapshot.
    fn static_successors(&self, node: &str, state: &Value) -> Result<BTreeSet<NodeId>> {
        let mut targets = BTreeSet::new();
        let Some(edges) = self.compiled.graph.edges.get(node) else {
            return Ok(targets);
        };
        for edge in edges {
            match edge {
                Edge::Direct(target) => {
                    if target != crate::graph::END {
                        targets.insert(target.clone());
                    }
                }
                Edge::Conditional { router, branches } => {
                    let key = router(state);
                    let target = branches.get(&key).ok_or_else(|| {
                        GraphError::Execution(format!(
                            "router for '{node}' returned unknown branch key '{key}'"
                        ))
                    })?;
                    if target != crate::graph::END {
                        targets.insert(target.clone());
                    }
                }
            }
        }
        Ok(targets)
    }

    fn check_runtime_target(&self, source: &str, target: &str) -> Result<()> {
        if self.compiled.graph.node(target).is_none() {
            return Err(GraphError::Execution(format!(
                "directive from '{source}' targets unknown node '{target}'"
            )));
        }
        Ok(())
    }
}
