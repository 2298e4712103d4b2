//! Literal-or-reference configuration values.

use super::VariableStore;
use crate::errors::{NodeflowError, Result};
use serde_json::Value;

/// Marker that turns a string field into a variable reference.
pub const REFERENCE_SENTINEL: char = '$';

/// A configured field value, parsed once at build time.
///
/// A string that starts with [`REFERENCE_SENTINEL`] names a variable to read
/// from the store; anything else is used verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// A value used as-is.
    Literal(Value),
    /// The name of a variable to resolve.
    Variable(String),
}

impl Operand {
    /// Parses a configured value.
    ///
    /// # Errors
    ///
    /// Returns `InvalidNodeConfig` for a bare sentinel with no name.
    pub fn parse(node: &str, value: &Value) -> Result<Self> {
        match value.as_str().and_then(|s| s.strip_prefix(REFERENCE_SENTINEL)) {
            Some("") => Err(NodeflowError::invalid_config(
                node,
                format!("reference `{REFERENCE_SENTINEL}` is missing a variable name"),
            )),
            Some(name) => Ok(Self::Variable(name.to_string())),
            None => Ok(Self::Literal(value.clone())),
        }
    }

    /// Returns the referenced variable name, if this is a reference.
    #[must_use]
    pub fn variable(&self) -> Option<&str> {
        match self {
            Self::Variable(name) => Some(name),
            Self::Literal(_) => None,
        }
    }

    /// Resolves the operand against the store.
    pub fn resolve(&self, node: &str, store: &VariableStore) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Variable(name) => store.resolve(node, name).cloned(),
        }
    }

    /// Resolves the operand, requiring a string.
    pub fn resolve_string(&self, node: &str, store: &VariableStore) -> Result<String> {
        match self {
            Self::Literal(Value::String(s)) => Ok(s.clone()),
            Self::Literal(other) => Err(NodeflowError::invalid_config(
                node,
                format!("expected a string, got {other}"),
            )),
            Self::Variable(name) => store.resolve_str(node, name).map(str::to_string),
        }
    }
}
