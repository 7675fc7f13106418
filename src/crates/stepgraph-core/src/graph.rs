//! Graph definition: nodes, edges, reducers, and fail-fast validation.
//!
//! A graph is built through [`GraphBuilder`](crate::builder::GraphBuilder)
//! and frozen by `compile()`. Everything the scheduler needs to know
//! statically lives here:
//!
//! ```text
//!            __start__
//!                |
//!            [classify]---(conditional: router -> branch key)---+
//!                |                                              |
//!            [path_a]                                       [path_b]
//!                 \                                            /
//!                  +----------->[join: defer]<----------------+
//!                                    |
//!                                 __end__
//! ```
//!
//! Edges are compiled once: unconditional (`Direct`) or statically
//! conditional (`Conditional`, a router function mapping the committed
//! snapshot to a branch key, then a branch table to a target). Successors a
//! node decides at runtime (routing or spawn directives) are invisible to
//! the edge table; builders declare them as dynamic edges so validation and
//! defer bookkeeping can still see every possible path.

use crate::error::{BoxError, GraphError, Result};
use crate::output::NodeOutput;
use crate::store::Store;
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Node identifier type
pub type NodeId = String;

/// Entry sentinel: edges from `START` form the initial frontier.
pub const START: &str = "__start__";
/// Terminal marker: an edge or directive targeting `END` schedules nothing.
pub const END: &str = "__end__";

/// Future returned by a node executable.
pub type NodeFuture =
    Pin<Box<dyn Future<Output = std::result::Result<NodeOutput, BoxError>> + Send>>;

/// A node's executable unit. Receives the invocation context, returns one
/// [`NodeOutput`]. Bodies are opaque to the engine and may perform arbitrary
/// I/O.
pub type NodeExecutor = Arc<dyn Fn(NodeContext) -> NodeFuture + Send + Sync>;

/// Router function for a conditional edge: committed snapshot in, branch
/// key out.
pub type RouterFn = Arc<dyn Fn(&Value) -> String + Send + Sync>;

/// Everything a node invocation gets to see.
///
/// `state` is the last committed snapshot for statically scheduled tasks,
/// or the spawned partial state for dynamic fan-out instances. The store,
/// when configured, is node-authored durable memory shared across runs; the
/// engine never interprets it.
#[derive(Clone)]
pub struct NodeContext {
    pub state: Value,
    pub run_id: String,
    pub superstep: usize,
    pub store: Option<Arc<dyn Store>>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext")
            .field("state", &self.state)
            .field("run_id", &self.run_id)
            .field("superstep", &self.superstep)
            .field("store", &self.store.as_ref().map(|_| "<store>"))
            .finish()
    }
}

/// Merge policy for one state field, fixed at compile time.
#[derive(Clone)]
pub enum Reducer {
    /// Single writer per superstep; a second concurrent write is a conflict.
    LastValue,
    /// Accumulate every write into a list.
    Append,
    /// Caller-supplied merge function. Must be associative and commutative;
    /// staged writes are folded in deterministic task order.
    Custom(stepgraph_checkpoint::ReducerFn),
}

impl Reducer {
    /// Custom reducer from a plain closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(Value, Value) -> Value + Send + Sync + 'static,
    {
        Reducer::Custom(Arc::new(f))
    }

    pub(crate) fn is_last_value(&self) -> bool {
        matches!(self, Reducer::LastValue)
    }
}

impl std::fmt::Debug for Reducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Reducer::LastValue => write!(f, "LastValue"),
            Reducer::Append => write!(f, "Append"),
            Reducer::Custom(_) => write!(f, "Custom(<function>)"),
        }
    }
}

/// Static node definition.
#[derive(Clone)]
pub struct NodeSpec {
    pub name: NodeId,
    pub executor: NodeExecutor,
    /// Join semantics: withhold this node until every task that could still
    /// reach it, including dynamically spawned ones, has completed.
    pub defer: bool,
    /// Fields this node writes, declared for the compile-time reducer
    /// coverage check. Empty means undeclared; conflicts are then caught
    /// defensively at merge time.
    pub writes: Vec<String>,
}

impl std::fmt::Debug for NodeSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSpec")
            .field("name", &self.name)
            .field("executor", &"<function>")
            .field("defer", &self.defer)
            .field("writes", &self.writes)
            .finish()
    }
}

/// Compiled edge out of a node.
#[derive(Clone)]
pub enum Edge {
    /// Unconditional successor.
    Direct(NodeId),
    /// Router function evaluated against the committed snapshot; the branch
    /// key it returns selects the successor from the branch table.
    Conditional {
        router: RouterFn,
        branches: HashMap<String, NodeId>,
    },
}

impl std::fmt::Debug for Edge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Edge::Direct(target) => write!(f, "Direct({target})"),
            Edge::Conditional { branches, .. } => {
                write!(f, "Conditional(<router>, {branches:?})")
            }
        }
    }
}

/// Immutable graph definition shared by every run.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) nodes: HashMap<NodeId, NodeSpec>,
    pub(crate) edges: HashMap<NodeId, Vec<Edge>>,
    /// Runtime-determined successors (routing or spawn directives) declared
    /// for validation and defer bookkeeping.
    pub(crate) dynamic_edges: HashMap<NodeId, Vec<NodeId>>,
    pub(crate) reducers: HashMap<String, Reducer>,
}

impl Graph {
    pub(crate) fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    /// Every statically knowable successor of `node`: direct targets,
    /// all conditional branches, and declared dynamic targets.
    fn all_successors(&self, node: &str) -> BTreeSet<&str> {
        let mut successors: BTreeSet<&str> = BTreeSet::new();
        if let Some(edges) = self.edges.get(node) {
            for edge in edges {
                match edge {
                    Edge::Direct(target) => {
                        successors.insert(target.as_str());
                    }
                    Edge::Conditional { branches, .. } => {
                        successors.extend(branches.values().map(String::as_str));
                    }
                }
            }
        }
        if let Some(targets) = self.dynamic_edges.get(node) {
            successors.extend(targets.iter().map(String::as_str));
        }
        successors.remove(END);
        successors
    }

    /// Fail-fast structural validation, run once by `compile()`.
    pub(crate) fn validate(&self) -> Result<()> {
        // Edge endpoints name real nodes (or END as a target).
        for (source, edges) in &self.edges {
            if source != START && !self.nodes.contains_key(source) {
                return Err(GraphError::compile(format!(
                    "edge source '{source}' is not a node"
                )));
            }
            for edge in edges {
                match edge {
                    Edge::Direct(target) => self.check_target(source, target)?,
                    Edge::Conditional { branches, .. } => {
                        if branches.is_empty() {
                            return Err(GraphError::compile(format!(
                                "conditional edges from '{source}' have an empty branch table"
                            )));
                        }
                        for target in branches.values() {
                            self.check_target(source, target)?;
                        }
                    }
                }
            }
        }
        for (source, targets) in &self.dynamic_edges {
            if !self.nodes.contains_key(source) {
                return Err(GraphError::compile(format!(
                    "dynamic edge source '{source}' is not a node"
                )));
            }
            for target in targets {
                self.check_target(source, target)?;
            }
        }

        // An entry point exists.
        if self.edges.get(START).map_or(true, Vec::is_empty) {
            return Err(GraphError::compile(
                "graph has no entry point: add an edge from START",
            ));
        }

        // Every node is reachable from the entry point.
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(START);
        while let Some(current) = queue.pop_front() {
            for successor in self.all_successors(current) {
                if visited.insert(successor) {
                    queue.push_back(successor);
                }
            }
        }
        for name in self.nodes.keys() {
            if !visited.contains(name.as_str()) {
                return Err(GraphError::compile(format!(
                    "node '{name}' is not reachable from the entry point"
                )));
            }
        }

        // Reducer coverage: a field declared as written by two or more
        // nodes needs a merge policy other than last-value.
        let mut writer_counts: HashMap<&str, usize> = HashMap::new();
        for spec in self.nodes.values() {
            for field in &spec.writes {
                *writer_counts.entry(field.as_str()).or_insert(0) += 1;
            }
        }
        for (field, writers) in writer_counts {
            if writers < 2 {
                continue;
            }
            let reduced = self
                .reducers
                .get(field)
                .map_or(false, |reducer| !reducer.is_last_value());
            if !reduced {
                return Err(GraphError::compile(format!(
                    "field '{field}' is written by {writers} nodes but has no declared reducer"
                )));
            }
        }

        Ok(())
    }

    fn check_target(&self, source: &str, target: &str) -> Result<()> {
        if target != END && !self.nodes.contains_key(target) {
            return Err(GraphError::compile(format!(
                "edge from '{source}' targets unknown node '{target}'"
            )));
        }
        Ok(())
    }

    /// For each node, the defer nodes it can still reach. Computed once at
    /// compile time; the scheduler uses it to keep the pending-predecessor
    /// counters.
    pub(crate) fn defer_reachability(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut reach = HashMap::new();
        for name in self.nodes.keys() {
            let mut visited: BTreeSet<&str> = BTreeSet::new();
            let mut queue: VecDeque<&str> = VecDeque::new();
            queue.push_back(name.as_str());
            while let Some(current) = queue.pop_front() {
                for successor in self.all_successors(current) {
                    if visited.insert(successor) {
                        queue.push_back(successor);
                    }
                }
            }
            let defers: Vec<NodeId> = visited
                .into_iter()
                .filter(|candidate| {
                    *candidate != name && self.nodes.get(*candidate).map_or(false, |s| s.defer)
                })
                .map(String::from)
                .collect();
            reach.insert(name.clone(), defers);
        }
        reach
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::GraphBuilder;
    use crate::output::NodeOutput;
    use serde_json::json;

    fn noop() -> impl Fn(NodeContext) -> NodeFuture + Send + Sync + 'static {
        |_ctx| Box::pin(async move { Ok(NodeOutput::update(json!({}))) })
    }

    #[test]
    fn missing_edge_target_fails_compile() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        builder.set_entry("a");
        builder.add_edge("a", "ghost");
        let err = builder.compile().unwrap_err();
        assert!(matches!(err, GraphError::Compile(msg) if msg.contains("ghost")));
    }

    #[test]
    fn unreachable_node_fails_compile() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        builder.add_node("island", noop());
        builder.set_entry("a");
        let err = builder.compile().unwrap_err();
        assert!(matches!(err, GraphError::Compile(msg) if msg.contains("island")));
    }

    #[test]
    fn missing_entry_fails_compile() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        let err = builder.compile().unwrap_err();
        assert!(matches!(err, GraphError::Compile(msg) if msg.contains("entry")));
    }

    #[test]
    fn unreduced_multi_writer_field_fails_compile() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        builder.add_node("b", noop());
        builder.set_entry("a");
        builder.add_edge("a", "b");
        builder.declare_writes("a", ["results"]);
        builder.declare_writes("b", ["results"]);
        let err = builder.compile().unwrap_err();
        assert!(matches!(err, GraphError::Compile(msg) if msg.contains("results")));
    }

    #[test]
    fn declared_reducer_satisfies_multi_writer_check() {
        let mut builder = GraphBuilder::new();
        builder.add_node("a", noop());
        builder.add_node("b", noop());
        builder.set_entry("a");
        builder.add_edge("a", "b");
        builder.declare_writes("a", ["results"]);
        builder.declare_writes("b", ["results"]);
        builder.add_field("results", Reducer::Append);
        assert!(builder.compile().is_ok());
    }

    #[test]
    fn dynamic_edges_count_for_reachability() {
        let mut builder = GraphBuilder::new();
        builder.add_node("fan_out", noop());
        builder.add_node("worker", noop());
        builder.set_entry("fan_out");
        builder.add_dynamic_edges("fan_out", ["worker"]);
        assert!(builder.compile().is_ok());
    }

    #[test]
    fn defer_reachability_sees_dynamic_paths() {
        let mut builder = GraphBuilder::new();
        builder.add_node("fan_out", noop());
        builder.add_node("worker", noop());
        builder.add_defer_node("join", noop());
        builder.set_entry("fan_out");
        builder.add_dynamic_edges("fan_out", ["worker"]);
        builder.add_edge("worker", "join");
        let graph = builder.graph();
        let reach = graph.defer_reachability();
        assert_eq!(reach["fan_out"], vec!["join".to_string()]);
        assert_eq!(reach["worker"], vec!["join".to_string()]);
        assert!(reach["join"].is_empty());
    }
}
