//! The durable snapshot of a run at a superstep boundary.
//!
//! A [`Checkpoint`] captures everything a scheduler needs to pick a run back
//! up: the committed field values plus the pending-task bookkeeping (frontier,
//! defer counters, per-node visit counts, and any actions held for external
//! decisions). Merge functions live in the graph definition and are
//! re-attached on restore, so a checkpoint is plain serializable data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// One task waiting in a persisted frontier.
///
/// `input` is `None` for statically scheduled tasks (they read the committed
/// snapshot) and `Some` for spawned instances carrying their partial state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTask {
    pub node: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
}

impl PendingTask {
    pub fn new(node: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            input: None,
        }
    }

    pub fn with_input(node: impl Into<String>, input: Value) -> Self {
        Self {
            node: node.into(),
            input: Some(input),
        }
    }
}

/// A proposed action held pending an external decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatedAction {
    /// Node that proposed the action.
    pub node: String,
    /// Proposed parameters, committed verbatim on approval.
    pub action: Value,
}

/// Durable snapshot of a run at a superstep boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Unique id for this snapshot.
    pub id: String,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
    /// Index of the next superstep to execute.
    pub superstep: usize,
    /// Committed value of every field that has one.
    pub channel_values: HashMap<String, Value>,
    /// Tasks scheduled for the next superstep.
    #[serde(default)]
    pub frontier: Vec<PendingTask>,
    /// Outstanding predecessor counts per defer node.
    #[serde(default)]
    pub pending_counters: HashMap<String, usize>,
    /// Defer nodes that have been targeted but are still withheld.
    #[serde(default)]
    pub armed: Vec<String>,
    /// How many times each node has executed in this run.
    #[serde(default)]
    pub node_visits: HashMap<String, usize>,
    /// Actions awaiting external decisions, in task order.
    #[serde(default)]
    pub gates: Vec<GatedAction>,
}

impl Checkpoint {
    pub fn new(superstep: usize, channel_values: HashMap<String, Value>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            superstep,
            channel_values,
            frontier: Vec::new(),
            pending_counters: HashMap::new(),
            armed: Vec::new(),
            node_visits: HashMap::new(),
            gates: Vec::new(),
        }
    }

    pub fn with_frontier(mut self, frontier: Vec<PendingTask>) -> Self {
        self.frontier = frontier;
        self
    }

    pub fn with_pending_counters(mut self, counters: HashMap<String, usize>) -> Self {
        self.pending_counters = counters;
        self
    }

    pub fn with_armed(mut self, armed: Vec<String>) -> Self {
        self.armed = armed;
        self
    }

    pub fn with_node_visits(mut self, visits: HashMap<String, usize>) -> Self {
        self.node_visits = visits;
        self
    }

    pub fn with_gates(mut self, gates: Vec<GatedAction>) -> Self {
        self.gates = gates;
        self
    }

    /// Whether this snapshot is waiting on external decisions.
    pub fn is_suspended(&self) -> bool {
        !self.gates.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn checkpoint_serde_round_trip() {
        let mut values = HashMap::new();
        values.insert("field1".to_string(), json!("x"));

        let checkpoint = Checkpoint::new(3, values)
            .with_frontier(vec![
                PendingTask::new("b"),
                PendingTask::with_input("worker", json!({"item": "a"})),
            ])
            .with_gates(vec![GatedAction {
                node: "approve".to_string(),
                action: json!({"amount": 10}),
            }]);

        let encoded = serde_json::to_string(&checkpoint).unwrap();
        let decoded: Checkpoint = serde_json::from_str(&encoded).unwrap();

        assert_eq!(decoded.id, checkpoint.id);
        assert_eq!(decoded.superstep, 3);
        assert_eq!(decoded.frontier, checkpoint.frontier);
        assert_eq!(decoded.gates, checkpoint.gates);
        assert!(decoded.is_suspended());
    }

    #[test]
    fn fresh_checkpoint_is_not_suspended() {
        let checkpoint = Checkpoint::new(0, HashMap::new());
        assert!(!checkpoint.is_suspended());
        assert!(checkpoint.frontier.is_empty());
    }
}
