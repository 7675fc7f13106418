//! Fluent graph construction.
//!
//! `GraphBuilder` collects nodes, edges, and field reducers, then
//! `compile()` runs the fail-fast validator and freezes everything into a
//! [`CompiledGraph`]. Nothing executes before `compile()` succeeds.
//!
//! # Example
//!
//! ```rust
//! use stepgraph_core::{GraphBuilder, NodeOutput};
//! use serde_json::json;
//!
//! # fn main() -> stepgraph_core::Result<()> {
//! let mut builder = GraphBuilder::new();
//! builder.add_node("greet", |ctx| {
//!     Box::pin(async move {
//!         let name = ctx.state["name"].as_str().unwrap_or("world").to_string();
//!         Ok(NodeOutput::update(json!({"greeting": format!("hello {name}")})))
//!     })
//! });
//! builder.set_entry("greet");
//! let compiled = builder.compile()?;
//! # let _ = compiled;
//! # Ok(())
//! # }
//! ```

use crate::compiled::CompiledGraph;
use crate::error::Result;
use crate::graph::{
    Edge, Graph, NodeContext, NodeExecutor, NodeFuture, NodeId, NodeSpec, Reducer, RouterFn, START,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Builder for a superstep execution graph.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with an async executable.
    pub fn add_node<F>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.insert_node(id.into(), Arc::new(executor), false)
    }

    /// Add a join node: withheld until every task that could still reach
    /// it, including dynamically spawned instances, has completed.
    pub fn add_defer_node<F>(&mut self, id: impl Into<NodeId>, executor: F) -> &mut Self
    where
        F: Fn(NodeContext) -> NodeFuture + Send + Sync + 'static,
    {
        self.insert_node(id.into(), Arc::new(executor), true)
    }

    fn insert_node(&mut self, id: NodeId, executor: NodeExecutor, defer: bool) -> &mut Self {
        let spec = NodeSpec {
            name: id.clone(),
            executor,
            defer,
            writes: Vec::new(),
        };
        self.graph.nodes.insert(id, spec);
        self
    }

    /// Unconditional edge. `source` may be [`START`](crate::START); `target`
    /// may be [`END`](crate::END).
    pub fn add_edge(&mut self, source: impl Into<NodeId>, target: impl Into<NodeId>) -> &mut Self {
        self.graph
            .edges
            .entry(source.into())
            .or_default()
            .push(Edge::Direct(target.into()));
        self
    }

    /// Statically conditional edges: `router` maps the committed snapshot
    /// to a branch key, the branch table maps the key to a target.
    pub fn add_conditional_edges<R, K, T>(
        &mut self,
        source: impl Into<NodeId>,
        router: R,
        branches: impl IntoIterator<Item = (K, T)>,
    ) -> &mut Self
    where
        R: Fn(&serde_json::Value) -> String + Send + Sync + 'static,
        K: Into<String>,
        T: Into<NodeId>,
    {
        let router: RouterFn = Arc::new(router);
        let branches: HashMap<String, NodeId> = branches
            .into_iter()
            .map(|(key, target)| (key.into(), target.into()))
            .collect();
        self.graph
            .edges
            .entry(source.into())
            .or_default()
            .push(Edge::Conditional { router, branches });
        self
    }

    /// Declare successors `source` may name at runtime through routing or
    /// spawn directives. Dynamic edges never schedule anything themselves;
    /// they exist so reachability validation and defer bookkeeping can see
    /// every possible path.
    pub fn add_dynamic_edges<T>(
        &mut self,
        source: impl Into<NodeId>,
        targets: impl IntoIterator<Item = T>,
    ) -> &mut Self
    where
        T: Into<NodeId>,
    {
        self.graph
            .dynamic_edges
            .entry(source.into())
            .or_default()
            .extend(targets.into_iter().map(Into::into));
        self
    }

    /// Fix a field's merge policy. Undeclared fields default to
    /// [`Reducer::LastValue`].
    pub fn add_field(&mut self, name: impl Into<String>, reducer: Reducer) -> &mut Self {
        self.graph.reducers.insert(name.into(), reducer);
        self
    }

    /// Declare the fields a node writes, feeding the compile-time reducer
    /// coverage check. Optional; undeclared writers are still caught
    /// defensively at merge time.
    pub fn declare_writes<F>(
        &mut self,
        node: impl Into<NodeId>,
        fields: impl IntoIterator<Item = F>,
    ) -> &mut Self
    where
        F: Into<String>,
    {
        let node = node.into();
        if let Some(spec) = self.graph.nodes.get_mut(&node) {
            spec.writes.extend(fields.into_iter().map(Into::into));
        }
        self
    }

    /// Set the entry node. Sugar for `add_edge(START, node)`.
    pub fn set_entry(&mut self, node: impl Into<NodeId>) -> &mut Self {
        self.add_edge(START, node.into())
    }

    #[cfg(test)]
    pub(crate) fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Validate and freeze the graph. All structural errors surface here,
    /// before any run starts.
    pub fn compile(self) -> Result<CompiledGraph> {
        self.graph.validate()?;
        let defer_reach = self.graph.defer_reachability();
        Ok(CompiledGraph::new(self.graph, defer_reach))
    }
}
