//! Node outputs: updates, routing directives, spawn directives, gates.
//!
//! A node executable finishes a superstep by returning exactly one
//! [`NodeOutput`] variant. The variant is a tagged union rather than a
//! convention over the state object, so the scheduler never has to sniff
//! magic keys out of an update:
//!
//! - [`NodeOutput::Update`] - partial state merged through the field
//!   reducers; successors come from the compiled edges
//! - [`NodeOutput::Route`] - partial state plus an explicit [`Goto`] that
//!   replaces the compiled edges for this invocation
//! - [`NodeOutput::Spawn`] - a runtime-sized list of task instances to run
//!   in the next superstep; the spawning node names no static successor
//! - [`NodeOutput::Gate`] - a proposed action held for an external
//!   decision; the run suspends at the superstep boundary
//!
//! A routing decision is made by the node against the snapshot it received
//! as input. The `update` it carries is merged before the successor runs,
//! but plays no part in choosing that successor.
//!
//! # Example: classifier with a routing directive
//!
//! ```rust
//! use stepgraph_core::{NodeOutput, Goto};
//! use serde_json::json;
//!
//! let output = NodeOutput::route("path_b", json!({"classification": "category_b"}));
//! match &output {
//!     NodeOutput::Route { goto: Goto::Node(target), .. } => assert_eq!(target, "path_b"),
//!     _ => unreachable!(),
//! }
//! ```
//!
//! # Example: dynamic fan-out
//!
//! ```rust
//! use stepgraph_core::{NodeOutput, SpawnTask};
//! use serde_json::json;
//!
//! let items = vec!["a", "b", "c"];
//! let output = NodeOutput::spawn(
//!     items
//!         .iter()
//!         .map(|item| SpawnTask::new("worker", json!({"item": item})))
//!         .collect(),
//! );
//! ```

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Explicit successor instruction carried by a routing directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Goto {
    /// A single successor node
    Node(NodeId),
    /// Several successors, scheduled in parallel next superstep
    Nodes(Vec<NodeId>),
    /// The terminal marker: this invocation has no successors
    End,
}

impl From<&str> for Goto {
    fn from(node: &str) -> Self {
        Goto::Node(node.to_string())
    }
}

impl From<String> for Goto {
    fn from(node: String) -> Self {
        Goto::Node(node)
    }
}

impl From<Vec<&str>> for Goto {
    fn from(nodes: Vec<&str>) -> Self {
        Goto::Nodes(nodes.into_iter().map(String::from).collect())
    }
}

impl From<Vec<String>> for Goto {
    fn from(nodes: Vec<String>) -> Self {
        Goto::Nodes(nodes)
    }
}

/// One instance of a dynamic fan-out: the node to run and the partial state
/// it receives as its input slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnTask {
    pub node: NodeId,
    pub input: Value,
}

impl SpawnTask {
    pub fn new(node: impl Into<NodeId>, input: Value) -> Self {
        Self {
            node: node.into(),
            input,
        }
    }
}

/// What a node invocation produced.
#[derive(Debug, Clone)]
pub enum NodeOutput {
    /// Partial state update; successors follow the compiled edges.
    Update(Value),
    /// Partial state update plus an explicit successor instruction that
    /// overrides the compiled edges for this invocation.
    Route { goto: Goto, update: Value },
    /// Runtime-sized fan-out into independent task instances.
    Spawn(Vec<SpawnTask>),
    /// Proposed action requiring an external decision before it commits.
    Gate { action: Value },
}

impl NodeOutput {
    /// Partial state update.
    pub fn update(update: Value) -> Self {
        NodeOutput::Update(update)
    }

    /// Update that touches no fields.
    pub fn empty() -> Self {
        NodeOutput::Update(Value::Object(serde_json::Map::new()))
    }

    /// Routing directive to a single successor.
    pub fn route(target: impl Into<Goto>, update: Value) -> Self {
        NodeOutput::Route {
            goto: target.into(),
            update,
        }
    }

    /// Routing directive naming the terminal marker: merge the update, then
    /// stop this path.
    pub fn end(update: Value) -> Self {
        NodeOutput::Route {
            goto: Goto::End,
            update,
        }
    }

    /// Dynamic fan-out over the given task instances.
    pub fn spawn(tasks: Vec<SpawnTask>) -> Self {
        NodeOutput::Spawn(tasks)
    }

    /// Hold the proposed action for an external decision.
    pub fn gate(action: Value) -> Self {
        NodeOutput::Gate { action }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn goto_from_str_and_vec() {
        assert_eq!(Goto::from("a"), Goto::Node("a".to_string()));
        assert_eq!(
            Goto::from(vec!["a", "b"]),
            Goto::Nodes(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn route_constructor_carries_update() {
        let output = NodeOutput::route("next", json!({"k": 1}));
        match output {
            NodeOutput::Route { goto, update } => {
                assert_eq!(goto, Goto::Node("next".to_string()));
                assert_eq!(update, json!({"k": 1}));
            }
            _ => panic!("expected route"),
        }
    }

    #[test]
    fn end_routes_to_terminal_marker() {
        match NodeOutput::end(json!({})) {
            NodeOutput::Route { goto, .. } => assert_eq!(goto, Goto::End),
            _ => panic!("expected route"),
        }
    }

    #[test]
    fn spawn_preserves_instance_order() {
        let output = NodeOutput::spawn(vec![
            SpawnTask::new("worker", json!({"item": "a"})),
            SpawnTask::new("worker", json!({"item": "b"})),
        ]);
        match output {
            NodeOutput::Spawn(tasks) => {
                assert_eq!(tasks.len(), 2);
                assert_eq!(tasks[0].input, json!({"item": "a"}));
                assert_eq!(tasks[1].input, json!({"item": "b"}));
            }
            _ => panic!("expected spawn"),
        }
    }
}
