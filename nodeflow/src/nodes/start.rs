//! The `Start` node: passes seed variables through.

use super::NodeMeta;
use crate::errors::Result;
use crate::store::VariableStore;
use serde_json::{Map, Value};

/// Copies the variables named by its outputs out of the seeded store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartNode {
    pub(crate) meta: NodeMeta,
}

impl StartNode {
    /// Builds the node from its configuration.
    pub fn from_config(label: &str, config: &Map<String, Value>) -> Result<Self> {
        Ok(Self {
            meta: NodeMeta::parse(label, config, None)?,
        })
    }

    pub(crate) fn execute(&self, store: &VariableStore) -> Result<Vec<Value>> {
        self.meta
            .outputs
            .iter()
            .map(|name| store.resolve(&self.meta.label, name).cloned())
            .collect()
    }
}
