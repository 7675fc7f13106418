//! Per-superstep streaming.
//!
//! `stream()` on a compiled graph yields one [`StepDelta`] per committed
//! superstep: the updates each task staged and the snapshot that resulted.
//! The sequence is lazy, finite, and not restartable; it ends when the run
//! reaches a terminal status.

use crate::graph::NodeId;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::pin::Pin;

/// One task's committed contribution to a superstep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeWrite {
    pub node: NodeId,
    pub update: Value,
}

/// What one superstep committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDelta {
    /// Index of the superstep that just committed.
    pub superstep: usize,
    /// Per-task staged updates, in deterministic task order. Spawn and
    /// gate outputs stage nothing and do not appear.
    pub writes: Vec<NodeWrite>,
    /// Committed snapshot after the barrier.
    pub state: Value,
    pub committed_at: DateTime<Utc>,
}

/// Lazy, finite sequence of per-superstep deltas.
pub type StepStream = Pin<Box<dyn Stream<Item = StepDelta> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delta_serde_round_trip() {
        let delta = StepDelta {
            superstep: 2,
            writes: vec![NodeWrite {
                node: "b".to_string(),
                update: json!({"field2": "xy"}),
            }],
            state: json!({"field1": "x", "field2": "xy"}),
            committed_at: Utc::now(),
        };
        let encoded = serde_json::to_string(&delta).unwrap();
        let decoded: StepDelta = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, delta);
    }
}
