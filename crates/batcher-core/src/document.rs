//! Opaque job-description documents.
//!
//! The template's shape is owned by the execution engine, so the core never
//! parses it into a typed schema. A [`JobDocument`] is a JSON tree with a
//! path lookup and a path-set operation; overrides are applied by locating a
//! target node and a field inside it.
//!
//! An override `(target, field, value)` resolves, in order, to:
//!
//! 1. `target/<field path>` when `field` contains `/` (explicit path),
//! 2. `target/inputs/field` (node-graph documents keep tunables in `inputs`),
//! 3. `target/field`.
//!
//! Only existing leaves are replaced; an override that resolves nowhere is
//! reported back to the caller and the document is left untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::task::{Combination, Override};

/// Key under which node-graph documents keep a node's tunable fields.
pub const INPUTS_KEY: &str = "inputs";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDocument(Value);

impl JobDocument {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Look up the node at `path`. Array elements are addressed by index.
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        path.iter().try_fold(&self.0, |node, key| match node {
            Value::Object(map) => map.get(*key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        })
    }

    fn get_path_mut(&mut self, path: &[&str]) -> Option<&mut Value> {
        path.iter().try_fold(&mut self.0, |node, key| match node {
            Value::Object(map) => map.get_mut(*key),
            Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get_mut(i)),
            _ => None,
        })
    }

    /// Replace the existing value at `path`. Returns `false` (and changes
    /// nothing) if the path does not resolve or is empty.
    pub fn set_path(&mut self, path: &[&str], value: Value) -> bool {
        if path.is_empty() {
            return false;
        }
        match self.get_path_mut(path) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Apply a single override; see the module docs for path resolution.
    pub fn apply_override(&mut self, ov: &Override) -> bool {
        for path in candidate_paths(ov) {
            if self.get_path(&path).is_some() {
                return self.set_path(&path, ov.value.clone());
            }
        }
        false
    }

    /// Produce a concrete job from this template and one combination.
    ///
    /// Returns the new document plus the overrides that could not be applied.
    pub fn with_overrides<'a>(&self, combination: &'a Combination) -> (JobDocument, Vec<&'a Override>) {
        let mut job = self.clone();
        let missed = combination
            .overrides()
            .iter()
            .filter(|ov| !job.apply_override(ov))
            .collect();
        (job, missed)
    }
}

impl From<Value> for JobDocument {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn candidate_paths(ov: &Override) -> Vec<Vec<&str>> {
    let target = ov.target_id.as_str();
    if ov.field.contains('/') {
        let mut path = vec![target];
        path.extend(ov.field.split('/').filter(|s| !s.is_empty()));
        return vec![path];
    }
    vec![
        vec![target, INPUTS_KEY, ov.field.as_str()],
        vec![target, ov.field.as_str()],
    ]
}
