//! Construction of nodes from type tags.

use super::{EndNode, HistoryLookupNode, ModelInvokeNode, Node, NodeKind, StartNode};
use crate::backends::{ModelBackend, SessionStore};
use crate::errors::{NodeflowError, Result};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

/// Builds [`Node`]s from a type tag and a configuration mapping.
///
/// The factory performs no I/O. It only hands the collaborator handles it was
/// given to the node constructors, which validate their configuration eagerly.
#[derive(Clone, Default)]
pub struct NodeFactory {
    model_backend: Option<Arc<dyn ModelBackend>>,
    session_store: Option<Arc<dyn SessionStore>>,
}

impl NodeFactory {
    /// Creates a factory with no collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model backend handed to `ModelInvoke` nodes.
    #[must_use]
    pub fn with_model_backend(mut self, backend: Arc<dyn ModelBackend>) -> Self {
        self.model_backend = Some(backend);
        self
    }

    /// Sets the session store handed to `HistoryLookup` nodes.
    #[must_use]
    pub fn with_session_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.session_store = Some(store);
        self
    }

    /// Returns the session store, if any.
    #[must_use]
    pub fn session_store(&self) -> Option<&Arc<dyn SessionStore>> {
        self.session_store.as_ref()
    }

    /// Creates a node.
    ///
    /// # Errors
    ///
    /// Returns `UnknownNodeType` for an unrecognized tag and
    /// `InvalidNodeConfig` for a bad configuration.
    pub fn create(&self, tag: &str, label: &str, config: &Map<String, Value>) -> Result<Node> {
        let kind = NodeKind::from_tag(tag).ok_or_else(|| NodeflowError::UnknownNodeType {
            tag: tag.to_string(),
        })?;

        let node = match kind {
            NodeKind::Start => Node::Start(StartNode::from_config(label, config)?),
            NodeKind::End => Node::End(EndNode::from_config(label, config)?),
            NodeKind::ModelInvoke => {
                let backend = self.model_backend.clone().ok_or_else(|| {
                    NodeflowError::invalid_config(label, "no model backend is configured")
                })?;
                Node::ModelInvoke(ModelInvokeNode::from_config(label, config, backend)?)
            }
            NodeKind::HistoryLookup => {
                let sessions = self.session_store.clone().ok_or_else(|| {
                    NodeflowError::invalid_config(label, "no session store is configured")
                })?;
                Node::HistoryLookup(HistoryLookupNode::from_config(label, config, sessions)?)
            }
        };

        Ok(node)
    }
}

impl fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeFactory")
            .field("model_backend", &self.model_backend.is_some())
            .field("session_store", &self.session_store.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{EchoModelBackend, InMemorySessionStore};
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn factory() -> NodeFactory {
        NodeFactory::new()
            .with_model_backend(Arc::new(EchoModelBackend::new()))
            .with_session_store(Arc::new(InMemorySessionStore::new()))
    }

    #[test]
    fn test_creates_each_kind() {
        let f = factory();
        let start = f.create("Start", "0:Start", &config(json!({"outputs": ["input"]}))).unwrap();
        assert_eq!(start.kind(), NodeKind::Start);

        let memory = f.create("Memory", "1:Memory", &config(json!({"n": 2}))).unwrap();
        assert_eq!(memory.kind(), NodeKind::HistoryLookup);
        assert_eq!(memory.outputs(), ["_history"]);

        let llm = f
            .create(
                "LLM",
                "2:LLM",
                &config(json!({
                    "model_id": "m",
                    "prompts": [{"role": "user", "prompt": "{input}"}],
                    "outputs": ["answer"]
                })),
            )
            .unwrap();
        assert!(llm.is_streaming_producer());

        let end = f.create("End", "3:End", &config(json!({"final_output": "$answer"}))).unwrap();
        assert_eq!(end.label(), "3:End");
        assert!(!end.is_streaming_producer());
    }

    #[test]
    fn test_unknown_tag() {
        let err = factory().create("Foo", "0:Foo", &Map::new()).unwrap_err();
        assert!(matches!(err, NodeflowError::UnknownNodeType { ref tag } if tag == "Foo"));
    }

    #[test]
    fn test_missing_collaborators_fail_fast() {
        let bare = NodeFactory::new();
        let err = bare.create("Memory", "1:Memory", &config(json!({"n": 1}))).unwrap_err();
        assert_eq!(err.code(), "INVALID_NODE_CONFIG");
        assert!(bare.session_store().is_none());
    }
}
