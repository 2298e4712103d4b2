//! The request-scoped variable store and the reference syntax nodes use to read it.
//!
//! A [`VariableStore`] is created fresh for every invocation, seeded with the
//! caller's input, and written only by the executor. Nodes borrow it read-only.

mod operand;
mod template;

pub use operand::{Operand, REFERENCE_SENTINEL};
pub use template::{PromptEntry, PromptTemplate};

use crate::errors::{NodeflowError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Suffix appended to a streamed output name to hold the current chunk only.
pub const SEGMENT_SUFFIX: &str = "#seg";

/// Caller-supplied input used to seed a fresh store.
pub type Seed = Map<String, Value>;

/// Returns the segment variant of an output name (`answer` -> `answer#seg`).
#[must_use]
pub fn segment_name(name: &str) -> String {
    format!("{name}{SEGMENT_SUFFIX}")
}

/// A mapping from variable name to value.
///
/// Values are overwritten, never versioned.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableStore {
    vars: Map<String, Value>,
}

impl VariableStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the caller's input fields.
    #[must_use]
    pub fn seeded(seed: Seed) -> Self {
        Self { vars: seed }
    }

    /// Gets a variable.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Gets a variable, failing with `UnresolvedVariable` if it is absent.
    ///
    /// `node` is the label of the node doing the read.
    pub fn resolve(&self, node: &str, name: &str) -> Result<&Value> {
        self.vars
            .get(name)
            .ok_or_else(|| NodeflowError::unresolved(node, name))
    }

    /// Gets a variable that must be a string.
    pub fn resolve_str(&self, node: &str, name: &str) -> Result<&str> {
        self.resolve(node, name)?
            .as_str()
            .ok_or_else(|| NodeflowError::VariableType {
                node: node.to_string(),
                name: name.to_string(),
                expected: "a string".to_string(),
            })
    }

    /// Checks if a variable exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Sets a variable, overwriting any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Merges entries into the store, overwriting existing names.
    pub fn merge(&mut self, entries: Seed) {
        self.vars.extend(entries);
    }

    /// Returns the number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if the store holds no variables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates over all variables.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    /// Returns the variable names.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.vars.keys().cloned().collect()
    }

    /// Converts the store into a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::Object(self.vars.clone())
    }

    /// Consumes the store, returning the underlying map.
    #[must_use]
    pub fn into_inner(self) -> Map<String, Value> {
        self.vars
    }
}

impl From<Seed> for VariableStore {
    fn from(seed: Seed) -> Self {
        Self::seeded(seed)
    }
}
