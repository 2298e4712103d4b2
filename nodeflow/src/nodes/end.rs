//! The `End` node: publishes the pipeline's final output.

use super::NodeMeta;
use crate::errors::{NodeflowError, Result};
use crate::store::{segment_name, Operand, VariableStore};
use serde_json::{Map, Value};

/// Name of the variable the `End` node writes.
pub const FINAL_OUTPUT: &str = "final_output";

/// Resolves its `final_output` field and writes it under [`FINAL_OUTPUT`].
///
/// In streaming context, a reference to a streamed variable resolves to the
/// variable's current segment, so each pass publishes only the new chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct EndNode {
    pub(crate) meta: NodeMeta,
    final_output: Operand,
}

impl EndNode {
    /// Builds the node from its configuration.
    pub fn from_config(label: &str, config: &Map<String, Value>) -> Result<Self> {
        let field = config
            .get(FINAL_OUTPUT)
            .ok_or_else(|| NodeflowError::invalid_config(label, "`final_output` is required"))?;
        Ok(Self {
            meta: NodeMeta::parse(label, config, Some(&[FINAL_OUTPUT]))?.require_arity(1)?,
            final_output: Operand::parse(label, field)?,
        })
    }

    /// Returns the configured final-output operand.
    #[must_use]
    pub fn final_output(&self) -> &Operand {
        &self.final_output
    }

    pub(crate) fn execute(&self, store: &VariableStore, streaming: bool) -> Result<Vec<Value>> {
        if streaming {
            if let Some(value) = self
                .final_output
                .variable()
                .and_then(|name| store.get(&segment_name(name)))
            {
                return Ok(vec![value.clone()]);
            }
        }
        Ok(vec![self.final_output.resolve(&self.meta.label, store)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn end(field: Value) -> EndNode {
        let mut config = Map::new();
        config.insert(FINAL_OUTPUT.into(), field);
        EndNode::from_config("3:End", &config).unwrap()
    }

    #[test]
    fn test_resolves_reference() {
        let mut store = VariableStore::new();
        store.set("answer", json!("42"));
        assert_eq!(end(json!("$answer")).execute(&store, false).unwrap(), vec![json!("42")]);
        assert_eq!(end(json!("$answer")).meta.outputs, vec![FINAL_OUTPUT]);
    }

    #[test]
    fn test_literal_final_output() {
        let node = end(json!("done"));
        assert_eq!(node.execute(&VariableStore::new(), false).unwrap(), vec![json!("done")]);
    }

    #[test]
    fn test_streaming_prefers_segment() {
        let mut store = VariableStore::new();
        store.set("answer", json!("ab"));
        store.set("answer#seg", json!("b"));
        let node = end(json!("$answer"));

        assert_eq!(node.execute(&store, true).unwrap(), vec![json!("b")]);
        assert_eq!(node.execute(&store, false).unwrap(), vec![json!("ab")]);
    }

    #[test]
    fn test_streaming_without_segment_uses_plain_variable() {
        let mut store = VariableStore::new();
        store.set("input", json!("hi"));
        assert_eq!(end(json!("$input")).execute(&store, true).unwrap(), vec![json!("hi")]);
    }

    #[test]
    fn test_missing_field_and_variable() {
        assert_eq!(
            EndNode::from_config("3:End", &Map::new()).unwrap_err().code(),
            "INVALID_NODE_CONFIG"
        );
        let err = end(json!("$answer")).execute(&VariableStore::new(), false).unwrap_err();
        assert_eq!(err.code(), "UNRESOLVED_VARIABLE");
    }
}
