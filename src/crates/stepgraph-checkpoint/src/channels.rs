//! Reducer-backed state channels.
//!
//! A channel is the container behind one named state field. All writes a
//! superstep produces for a field are handed to its channel in a single
//! `update` call at the commit barrier; the channel merges them according to
//! its policy and exposes the merged value through `get`.
//!
//! Three policies cover the engine's needs:
//!
//! - [`LastValueChannel`] - plain single value; rejects more than one staged
//!   write per superstep rather than dropping data silently
//! - [`AppendChannel`] - accumulates every write into a list
//! - [`ReducerChannel`] - folds writes into the current value with a caller
//!   supplied merge function
//!
//! Channels serialize to plain JSON through `checkpoint`/`restore` so a run
//! can be persisted at a superstep boundary and rebuilt later. Merge
//! functions are not serialized; they are re-attached from the graph
//! definition when a checkpoint is restored.

use crate::error::{CheckpointError, Result};
use serde_json::Value;
use std::sync::Arc;

/// A single state field's storage and merge policy.
///
/// `update` receives every value staged for the field in one superstep and
/// returns whether the stored value changed. Implementations must be safe to
/// call with an empty vector (a superstep that touched other fields only).
pub trait Channel: Send + Sync {
    /// Current committed value, if the field has ever been written.
    fn get(&self) -> Option<Value>;

    /// Merge one superstep's staged writes into the committed value.
    fn update(&mut self, values: Vec<Value>) -> Result<bool>;

    /// Serializable snapshot of the committed value.
    fn checkpoint(&self) -> Option<Value>;

    /// Restore the committed value from a checkpoint snapshot.
    fn restore(&mut self, value: Value) -> Result<()>;

    fn clone_box(&self) -> Box<dyn Channel>;
}

impl Clone for Box<dyn Channel> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

impl std::fmt::Debug for Box<dyn Channel> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Channel({:?})", self.get())
    }
}

/// Single-value channel: the default policy for an undeclared field.
///
/// Exactly one task may write the field per superstep. A second staged value
/// is a write conflict, surfaced as [`CheckpointError::Conflict`] so the
/// engine can refuse the commit instead of losing a write.
#[derive(Debug, Clone, Default)]
pub struct LastValueChannel {
    name: String,
    value: Option<Value>,
}

impl LastValueChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }
}

impl Channel for LastValueChannel {
    fn get(&self) -> Option<Value> {
        self.value.clone()
    }

    fn update(&mut self, mut values: Vec<Value>) -> Result<bool> {
        match values.len() {
            0 => Ok(false),
            1 => {
                self.value = values.pop();
                Ok(true)
            }
            _ => Err(CheckpointError::Conflict(self.name.clone())),
        }
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, value: Value) -> Result<()> {
        self.value = Some(value);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Append channel: accumulates every staged write into a JSON array.
///
/// A staged array is flattened into the accumulator, a staged scalar is
/// pushed as one element. Order within one superstep follows the
/// deterministic staging order the engine commits in, so repeated runs
/// produce the same list.
#[derive(Debug, Clone, Default)]
pub struct AppendChannel {
    values: Vec<Value>,
}

impl AppendChannel {
    pub fn new() -> Self {
        Self { values: Vec::new() }
    }
}

impl Channel for AppendChannel {
    fn get(&self) -> Option<Value> {
        if self.values.is_empty() {
            None
        } else {
            Some(Value::Array(self.values.clone()))
        }
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        for value in values {
            match value {
                Value::Array(items) => self.values.extend(items),
                other => self.values.push(other),
            }
        }
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.get()
    }

    fn restore(&mut self, value: Value) -> Result<()> {
        match value {
            Value::Array(items) => {
                self.values = items;
                Ok(())
            }
            other => Err(CheckpointError::Invalid(format!(
                "append channel expects an array, got {other}"
            ))),
        }
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}

/// Shared merge function for [`ReducerChannel`].
pub type ReducerFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Accumulator channel folding staged writes with a caller-supplied reducer.
///
/// The reducer must be associative and commutative: the engine serializes
/// staged writes in a deterministic order, but nodes complete in any order
/// and a reducer that depends on argument order breaks the merge contract.
#[derive(Clone)]
pub struct ReducerChannel {
    value: Option<Value>,
    reducer: ReducerFn,
}

impl ReducerChannel {
    pub fn new(reducer: ReducerFn) -> Self {
        Self {
            value: None,
            reducer,
        }
    }

    /// Numeric sum reducer. Non-numeric operands resolve to the new value.
    pub fn sum() -> Self {
        Self::new(Arc::new(|old, new| {
            match (old.as_f64(), new.as_f64()) {
                (Some(a), Some(b)) => {
                    let total = a + b;
                    serde_json::Number::from_f64(total)
                        .map(Value::Number)
                        .unwrap_or(new)
                }
                _ => new,
            }
        }))
    }
}

impl std::fmt::Debug for ReducerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReducerChannel")
            .field("value", &self.value)
            .field("reducer", &"<function>")
            .finish()
    }
}

impl Channel for ReducerChannel {
    fn get(&self) -> Option<Value> {
        self.value.clone()
    }

    fn update(&mut self, values: Vec<Value>) -> Result<bool> {
        if values.is_empty() {
            return Ok(false);
        }
        let mut merged = self.value.take();
        for value in values {
            merged = Some(match merged {
                Some(old) => (self.reducer)(old, value),
                None => value,
            });
        }
        self.value = merged;
        Ok(true)
    }

    fn checkpoint(&self) -> Option<Value> {
        self.value.clone()
    }

    fn restore(&mut self, value: Value) -> Result<()> {
        self.value = Some(value);
        Ok(())
    }

    fn clone_box(&self) -> Box<dyn Channel> {
        Box::new(self.clone())
    }
}
