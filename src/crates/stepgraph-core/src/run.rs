//! Run lifecycle types: statuses, terminal outcomes, limits, cancellation,
//! and gated-action decisions.

use crate::graph::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lifecycle status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// In flight between superstep boundaries. Reserved for progress
    /// introspection surfaces; [`RunOutcome::status`] only maps settled
    /// runs and never returns it.
    Running,
    Suspended,
    Completed,
    Failed,
    /// An iteration ceiling fired: "did not converge", not "crashed".
    BoundExceeded,
    Cancelled,
}

/// A proposed action held for an external decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDescriptor {
    /// Node that proposed the action.
    pub node: NodeId,
    /// Proposed parameters.
    pub action: Value,
}

/// One decision for one pending [`GateDescriptor`], supplied in the same
/// order the descriptors were emitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateDecision {
    /// Commit the proposed action verbatim as the node's update.
    Approve,
    /// Commit this value instead of the proposed action.
    Modify(Value),
    /// Commit nothing for this action.
    Reject,
}

/// How a run ended. Every variant carries the context a caller needs to
/// inspect partial progress; task failures never escape as bare errors.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Terminal marker reached with no further ready nodes.
    Completed { state: Value },
    /// Halted on gated actions; resume with one decision per descriptor.
    Suspended {
        run_id: String,
        pending: Vec<GateDescriptor>,
    },
    /// A task raised; the last fully committed state is preserved.
    Failed {
        node: NodeId,
        error: String,
        state: Value,
    },
    /// A per-node or per-run iteration ceiling fired.
    BoundExceeded { state: Value, superstep: usize },
    /// External cancellation observed at a superstep boundary.
    Cancelled { state: Value },
}

impl RunOutcome {
    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed { .. } => RunStatus::Completed,
            RunOutcome::Suspended { .. } => RunStatus::Suspended,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::BoundExceeded { .. } => RunStatus::BoundExceeded,
            RunOutcome::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    /// The frozen state snapshot, when the outcome carries one.
    pub fn state(&self) -> Option<&Value> {
        match self {
            RunOutcome::Completed { state }
            | RunOutcome::Failed { state, .. }
            | RunOutcome::BoundExceeded { state, .. }
            | RunOutcome::Cancelled { state } => Some(state),
            RunOutcome::Suspended { .. } => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

/// Engine-enforced iteration ceilings.
///
/// `max_supersteps` bounds the whole run; `max_node_visits`, when set,
/// bounds each node individually (spawned instances count as visits to
/// their node). Either ceiling ends the run as
/// [`RunOutcome::BoundExceeded`], independent of any completion flag a
/// node author implements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_supersteps: usize,
    pub max_node_visits: Option<usize>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_supersteps: 25,
            max_node_visits: None,
        }
    }
}

impl RunLimits {
    pub fn with_max_supersteps(mut self, max: usize) -> Self {
        self.max_supersteps = max;
        self
    }

    pub fn with_max_node_visits(mut self, max: usize) -> Self {
        self.max_node_visits = Some(max);
        self
    }
}

/// Cooperative cancellation flag, observed at superstep boundaries only.
/// In-flight tasks finish their round before the run transitions to
/// [`RunOutcome::Cancelled`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outcome_status_mapping() {
        let completed = RunOutcome::Completed { state: json!({}) };
        assert_eq!(completed.status(), RunStatus::Completed);
        assert!(completed.is_completed());

        let bound = RunOutcome::BoundExceeded {
            state: json!({}),
            superstep: 6,
        };
        assert_eq!(bound.status(), RunStatus::BoundExceeded);
        assert_ne!(bound.status(), RunStatus::Failed);
    }

    #[test]
    fn suspended_outcome_has_no_state() {
        let suspended = RunOutcome::Suspended {
            run_id: "run-1".to_string(),
            pending: vec![],
        };
        assert!(suspended.state().is_none());
    }

    #[test]
    fn cancel_token_is_shared() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn default_limits() {
        let limits = RunLimits::default();
        assert_eq!(limits.max_supersteps, 25);
        assert!(limits.max_node_visits.is_none());

        let tightened = limits.with_max_supersteps(6).with_max_node_visits(6);
        assert_eq!(tightened.max_supersteps, 6);
        assert_eq!(tightened.max_node_visits, Some(6));
    }
}
