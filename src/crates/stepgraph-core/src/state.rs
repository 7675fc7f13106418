//! The shared state store: snapshot, stage, commit.
//!
//! Tasks never touch state directly. Each superstep reads one committed
//! snapshot, stages writes as `(task ordinal, field, value)` tuples, and the
//! scheduler commits the whole batch at the barrier. Commit sorts staged
//! writes by task ordinal before handing them to the field channels, so the
//! merged result is a function of the frontier, not of the order tasks
//! happened to finish in.

use crate::error::{GraphError, Result};
use crate::graph::Reducer;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use stepgraph_checkpoint::{AppendChannel, Channel, CheckpointError, LastValueChannel, ReducerChannel};

/// One staged field write, tagged with the ordinal of the task that
/// produced it within its superstep.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    pub task: usize,
    pub field: String,
    pub value: Value,
}

/// Committed state as a map of field channels.
pub(crate) struct StateStore {
    channels: HashMap<String, Box<dyn Channel>>,
    reducers: HashMap<String, Reducer>,
}

impl StateStore {
    /// Empty store with channels pre-created for every declared field.
    pub(crate) fn new(reducers: &HashMap<String, Reducer>) -> Self {
        let mut store = Self {
            channels: HashMap::new(),
            reducers: reducers.clone(),
        };
        let fields: Vec<String> = reducers.keys().cloned().collect();
        for field in fields {
            store.ensure_channel(&field);
        }
        store
    }

    fn ensure_channel(&mut self, field: &str) {
        if self.channels.contains_key(field) {
            return;
        }
        let channel: Box<dyn Channel> = match self.reducers.get(field) {
            None | Some(Reducer::LastValue) => Box::new(LastValueChannel::new(field)),
            Some(Reducer::Append) => Box::new(AppendChannel::new()),
            Some(Reducer::Custom(f)) => Box::new(ReducerChannel::new(f.clone())),
        };
        self.channels.insert(field.to_string(), channel);
    }

    /// Committed value of one field.
    pub(crate) fn read(&self, field: &str) -> Option<Value> {
        self.channels.get(field).and_then(|channel| channel.get())
    }

    /// Committed snapshot of every field that has a value, as one JSON
    /// object.
    pub(crate) fn snapshot(&self) -> Value {
        let mut object = serde_json::Map::new();
        for (field, channel) in &self.channels {
            if let Some(value) = channel.get() {
                object.insert(field.clone(), value);
            }
        }
        Value::Object(object)
    }

    /// Apply one superstep's staged writes through the field reducers.
    ///
    /// Writes are sorted by task ordinal and grouped per field, so the
    /// outcome is deterministic under any task-completion order. Returns
    /// the names of the fields that changed.
    pub(crate) fn commit(&mut self, mut writes: Vec<StagedWrite>) -> Result<Vec<String>> {
        writes.sort_by(|a, b| a.task.cmp(&b.task).then_with(|| a.field.cmp(&b.field)));

        let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for write in writes {
            grouped.entry(write.field).or_default().push(write.value);
        }

        let mut updated = Vec::new();
        for (field, values) in grouped {
            self.ensure_channel(&field);
            let channel = self
                .channels
                .get_mut(&field)
                .ok_or_else(|| GraphError::Execution(format!("no channel for field '{field}'")))?;
            let changed = channel.update(values).map_err(|err| match err {
                CheckpointError::Conflict(field) => GraphError::ReducerConflict { field },
                other => GraphError::Checkpoint(other),
            })?;
            if changed {
                updated.push(field);
            }
        }
        Ok(updated)
    }

    /// Decompose a partial-state object into staged writes for `task`.
    pub(crate) fn stage_object(
        task: usize,
        update: Value,
        writes: &mut Vec<StagedWrite>,
    ) -> Result<()> {
        match update {
            Value::Object(fields) => {
                for (field, value) in fields {
                    writes.push(StagedWrite { task, field, value });
                }
                Ok(())
            }
            Value::Null => Ok(()),
            other => Err(GraphError::Execution(format!(
                "state update must be a JSON object, got {other}"
            ))),
        }
    }

    /// Serializable committed values for a checkpoint.
    pub(crate) fn checkpoint_values(&self) -> HashMap<String, Value> {
        self.channels
            .iter()
            .filter_map(|(field, channel)| {
                channel.checkpoint().map(|value| (field.clone(), value))
            })
            .collect()
    }

    /// Rebuild committed values from a checkpoint, re-attaching the merge
    /// policies from the graph definition.
    pub(crate) fn restore(&mut self, values: HashMap<String, Value>) -> Result<()> {
        for (field, value) in values {
            self.ensure_channel(&field);
            let channel = self
                .channels
                .get_mut(&field)
                .ok_or_else(|| GraphError::Execution(format!("no channel for field '{field}'")))?;
            channel.restore(value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn append_store() -> StateStore {
        let mut reducers = HashMap::new();
        reducers.insert("results".to_string(), Reducer::Append);
        StateStore::new(&reducers)
    }

    fn write(task: usize, field: &str, value: Value) -> StagedWrite {
        StagedWrite {
            task,
            field: field.to_string(),
            value,
        }
    }

    #[test]
    fn commit_applies_last_value_write() {
        let mut store = StateStore::new(&HashMap::new());
        let updated = store
            .commit(vec![write(0, "field1", json!("x"))])
            .unwrap();
        assert_eq!(updated, vec!["field1".to_string()]);
        assert_eq!(store.read("field1"), Some(json!("x")));
    }

    #[test]
    fn concurrent_writes_to_unreduced_field_conflict() {
        let mut store = StateStore::new(&HashMap::new());
        let err = store
            .commit(vec![write(0, "field1", json!("a")), write(1, "field1", json!("b"))])
            .unwrap_err();
        assert!(matches!(err, GraphError::ReducerConflict { field } if field == "field1"));
    }

    #[test]
    fn commit_is_deterministic_under_permuted_stage_order() {
        let writes = vec![
            write(2, "results", json!(["c"])),
            write(0, "results", json!(["a"])),
            write(1, "results", json!(["b"])),
        ];

        let mut forward = append_store();
        forward.commit(writes.clone()).unwrap();

        let mut reversed = append_store();
        let mut shuffled = writes;
        shuffled.reverse();
        reversed.commit(shuffled).unwrap();

        assert_eq!(forward.read("results"), Some(json!(["a", "b", "c"])));
        assert_eq!(forward.read("results"), reversed.read("results"));
    }

    #[test]
    fn snapshot_collects_committed_fields_only() {
        let mut store = append_store();
        assert_eq!(store.snapshot(), json!({}));
        store.commit(vec![write(0, "results", json!(["a"]))]).unwrap();
        assert_eq!(store.snapshot(), json!({"results": ["a"]}));
    }

    #[test]
    fn stage_object_rejects_non_object_update() {
        let mut writes = Vec::new();
        let err = StateStore::stage_object(0, json!("scalar"), &mut writes).unwrap_err();
        assert!(matches!(err, GraphError::Execution(_)));
    }

    #[test]
    fn checkpoint_and_restore_round_trip() {
        let mut store = append_store();
        store
            .commit(vec![write(0, "results", json!(["a"])), write(0, "status", json!("ok"))])
            .unwrap();
        let values = store.checkpoint_values();

        let mut reducers = HashMap::new();
        reducers.insert("results".to_string(), Reducer::Append);
        let mut restored = StateStore::new(&reducers);
        restored.restore(values).unwrap();

        assert_eq!(restored.read("results"), Some(json!(["a"])));
        assert_eq!(restored.read("status"), Some(json!("ok")));

        // The restored append channel keeps accumulating.
        restored
            .commit(vec![write(0, "results", json!(["b"]))])
            .unwrap();
        assert_eq!(restored.read("results"), Some(json!(["a", "b"])));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // Merged state for a reducer-backed field is identical no
            // matter how the staged batch is permuted.
            #[test]
            fn append_merge_ignores_stage_order(
                items in proptest::collection::vec("[a-z]{1,6}", 1..8),
                seed in any::<u64>(),
            ) {
                let writes: Vec<StagedWrite> = items
                    .iter()
                    .enumerate()
                    .map(|(task, item)| write(task, "results", json!([item])))
                    .collect();

                let mut permuted = writes.clone();
                // Cheap deterministic shuffle from the seed.
                let len = permuted.len();
                let mut s = seed;
                for i in (1..len).rev() {
                    s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                    let j = (s % (i as u64 + 1)) as usize;
                    permuted.swap(i, j);
                }

                let mut ordered_store = append_store();
                ordered_store.commit(writes).unwrap();
                let mut permuted_store = append_store();
                permuted_store.commit(permuted).unwrap();

                prop_assert_eq!(
                    ordered_store.read("results"),
                    permuted_store.read("results")
                );
            }
        }
    }
}
