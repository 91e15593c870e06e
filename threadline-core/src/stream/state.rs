//! Shared message state
//!
//! `update-state` frames carry a batch of [`StateOperation`]s applied to
//! `metadata.unstable_state`, a free-form JSON document that starts as
//! `null`. Paths are lists of object keys; a segment that addresses an array
//! is read as an index, and an index equal to the array length appends.
//!
//! Components publish their state under `components/<instance id>` with a
//! numeric `seq`. A batch carrying a `seq` that is not newer than the stored
//! one is stale for that instance, and every operation of the batch touching
//! that instance is dropped. Operations on other instances still apply.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};

const COMPONENTS: &str = "components";
const SEQ: &str = "seq";

/// One edit of the shared state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StateOperation {
    /// Replace the value at `path`, creating objects along the way
    Set { path: Vec<String>, value: Value },
    /// Append to the string at `path`; a missing value counts as `""`
    AppendText { path: Vec<String>, value: String },
}

impl StateOperation {
    pub fn path(&self) -> &[String] {
        match self {
            StateOperation::Set { path, .. } | StateOperation::AppendText { path, .. } => path,
        }
    }

    /// Component instance this operation writes to, if any
    fn component(&self) -> Option<&str> {
        match self.path() {
            [root, instance, ..] if root == COMPONENTS && !instance.is_empty() => {
                Some(instance.as_str())
            }
            _ => None,
        }
    }

    /// `(instance, seq)` when this sets a component's sequence number
    fn component_seq(&self) -> Option<(&str, f64)> {
        let StateOperation::Set { path, value } = self else {
            return None;
        };
        match path.as_slice() {
            [root, instance, field]
                if root == COMPONENTS && field == SEQ && !instance.is_empty() =>
            {
                value.as_f64().map(|seq| (instance.as_str(), seq))
            }
            _ => None,
        }
    }
}

/// Apply a batch to `state`, returning the new state.
///
/// Operations that cannot apply (appending to a non-string, indexing past the
/// end of an array) are skipped with a warning.
pub fn apply_operations(state: &Value, operations: &[StateOperation]) -> Value {
    let stale = stale_components(state, operations);
    let mut next = state.clone();

    for operation in operations {
        if operation.component().is_some_and(|c| stale.contains(c)) {
            continue;
        }
        if let Err(reason) = apply(&mut next, operation) {
            tracing::warn!(
                path = ?operation.path(),
                reason,
                "Skipping state operation"
            );
        }
    }

    next
}

fn stale_components<'a>(state: &Value, operations: &'a [StateOperation]) -> HashSet<&'a str> {
    let incoming: HashMap<&str, f64> = operations
        .iter()
        .filter_map(StateOperation::component_seq)
        .collect();

    incoming
        .into_iter()
        .filter(|(instance, seq)| {
            state
                .get(COMPONENTS)
                .and_then(|c| c.get(*instance))
                .and_then(|c| c.get(SEQ))
                .and_then(Value::as_f64)
                .is_some_and(|current| *seq <= current)
        })
        .map(|(instance, _)| instance)
        .collect()
}

fn apply(state: &mut Value, operation: &StateOperation) -> Result<(), &'static str> {
    match operation {
        StateOperation::Set { path, value } => {
            *slot(state, path)? = value.clone();
        }
        StateOperation::AppendText { path, value } => {
            let target = slot(state, path)?;
            match target {
                Value::Null => *target = Value::String(value.clone()),
                Value::String(text) => text.push_str(value),
                _ => return Err("append-text target is not a string"),
            }
        }
    }
    Ok(())
}

/// Mutable slot at `path`, created as `null` if missing
fn slot<'v>(state: &'v mut Value, path: &[String]) -> Result<&'v mut Value, &'static str> {
    let mut current = state;
    for segment in path {
        current = match current {
            Value::Array(items) => {
                let index: usize = segment.parse().map_err(|_| "array index is not a number")?;
                if index == items.len() {
                    items.push(Value::Null);
                }
                items.get_mut(index).ok_or("array index out of range")?
            }
            other => {
                if !other.is_object() {
                    *other = Value::Object(Map::new());
                }
                match other {
                    Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
                    _ => return Err("path does not resolve to an object"),
                }
            }
        };
    }
    Ok(current)
}
