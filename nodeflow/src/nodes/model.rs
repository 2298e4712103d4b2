//! The `ModelInvoke` node: renders a prompt and calls the model backend.

use super::{ChunkStream, NodeMeta};
use crate::backends::{ChatMessage, ModelBackend};
use crate::errors::{NodeflowError, Result};
use crate::store::{Operand, PromptTemplate, VariableStore};
use futures::StreamExt;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Default variable holding session history for `use_history`.
pub const DEFAULT_HISTORY_VARIABLE: &str = "_history";

/// Calls the model backend with a prompt rendered from the store.
///
/// This is the canonical streaming producer. Set `streaming: false` to keep a
/// model call out of the streaming topology.
pub struct ModelInvokeNode {
    pub(crate) meta: NodeMeta,
    model_id: Operand,
    prompts: PromptTemplate,
    history: Option<String>,
    streaming: bool,
    backend: Arc<dyn ModelBackend>,
}

impl ModelInvokeNode {
    /// Builds the node from its configuration.
    pub fn from_config(
        label: &str,
        config: &Map<String, Value>,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self> {
        let model_id = config
            .get("model_id")
            .ok_or_else(|| NodeflowError::invalid_config(label, "`model_id` is required"))?;
        let prompts = config
            .get("prompts")
            .ok_or_else(|| NodeflowError::invalid_config(label, "`prompts` is required"))?;

        let use_history = optional_bool(label, config, "use_history", false)?;
        let history = if use_history {
            let name = match config.get("history") {
                Some(value) => Operand::parse(label, value)?
                    .variable()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        NodeflowError::invalid_config(label, "`history` must be a `$variable` reference")
                    })?,
                None => DEFAULT_HISTORY_VARIABLE.to_string(),
            };
            Some(name)
        } else {
            None
        };

        Ok(Self {
            meta: NodeMeta::parse(label, config, None)?.require_arity(1)?,
            model_id: Operand::parse(label, model_id)?,
            prompts: PromptTemplate::parse(label, prompts)?,
            history,
            streaming: optional_bool(label, config, "streaming", true)?,
            backend,
        })
    }

    /// Returns true if the node is marked as the streaming producer.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Returns the history variable read when `use_history` is on.
    #[must_use]
    pub fn history_variable(&self) -> Option<&str> {
        self.history.as_deref()
    }

    fn prepare(&self, store: &VariableStore) -> Result<(String, Vec<ChatMessage>)> {
        let label = &self.meta.label;
        let model_id = self.model_id.resolve_string(label, store)?;

        let history = match &self.history {
            Some(name) => {
                let value = store.resolve(label, name)?;
                let turns: Vec<ChatMessage> =
                    serde_json::from_value(value.clone()).map_err(|_| NodeflowError::VariableType {
                        node: label.clone(),
                        name: name.clone(),
                        expected: "a list of {role, content} turns".to_string(),
                    })?;
                Some(turns)
            }
            None => None,
        };

        let messages = self.prompts.render(label, store, history)?;
        debug!(node = %label, model_id = %model_id, messages = messages.len(), "Rendered prompt");
        Ok((model_id, messages))
    }

    pub(crate) async fn execute(&self, store: &VariableStore) -> Result<Vec<Value>> {
        let (model_id, messages) = self.prepare(store)?;
        let reply = self.backend.invoke(&model_id, &messages).await?;
        Ok(vec![Value::String(reply.trim().to_string())])
    }

    pub(crate) async fn execute_as_stream(&self, store: &VariableStore) -> Result<ChunkStream> {
        let (model_id, messages) = self.prepare(store)?;
        let chunks = self.backend.stream(&model_id, &messages).await?;
        Ok(chunks
            .map(|chunk| {
                chunk
                    .map(|text| vec![Value::String(text)])
                    .map_err(NodeflowError::from)
            })
            .boxed())
    }
}

impl fmt::Debug for ModelInvokeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelInvokeNode")
            .field("label", &self.meta.label)
            .field("outputs", &self.meta.outputs)
            .field("model_id", &self.model_id)
            .field("history", &self.history)
            .field("streaming", &self.streaming)
            .finish_non_exhaustive()
    }
}

fn optional_bool(label: &str, config: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(other) => Err(NodeflowError::invalid_config(
            label,
            format!("`{key}` must be a boolean, got {other}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedModelBackend;
    use futures::TryStreamExt;
    use serde_json::json;

    fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    fn llm_config() -> Value {
        json!({
            "model_id": "$model",
            "prompts": [
                {"role": "system", "prompt": "You are terse."},
                {"role": "user", "prompt": "{input}"}
            ],
            "outputs": ["answer"]
        })
    }

    fn store() -> VariableStore {
        let mut store = VariableStore::new();
        store.set("model", json!("m-1"));
        store.set("input", json!("hi"));
        store
    }

    #[tokio::test]
    async fn test_invoke_trims_reply_and_records_prompt() {
        let backend = Arc::new(ScriptedModelBackend::new().with_reply("  hello  "));
        let node = ModelInvokeNode::from_config("2:LLM", &config(llm_config()), backend.clone())
            .unwrap();

        assert_eq!(node.execute(&store()).await.unwrap(), vec![json!("hello")]);

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].model_id, "m-1");
        assert_eq!(calls[0].prompt[1], ChatMessage::new("user", "hi"));
    }

    #[tokio::test]
    async fn test_stream_emits_single_value_sets() {
        let backend = Arc::new(ScriptedModelBackend::new().with_chunks(["a", "b"]));
        let node = ModelInvokeNode::from_config("2:LLM", &config(llm_config()), backend).unwrap();

        let chunks: Vec<Vec<Value>> = node
            .execute_as_stream(&store())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(chunks, vec![vec![json!("a")], vec![json!("b")]]);
    }

    #[tokio::test]
    async fn test_history_is_inserted_and_validated() {
        let mut cfg = llm_config();
        cfg["use_history"] = json!(true);
        let backend = Arc::new(ScriptedModelBackend::new().with_reply("ok"));
        let node = ModelInvokeNode::from_config("2:LLM", &config(cfg), backend.clone()).unwrap();
        assert_eq!(node.history_variable(), Some(DEFAULT_HISTORY_VARIABLE));

        let mut with_history = store();
        with_history.set("_history", json!([{"role": "user", "content": "before"}]));
        node.execute(&with_history).await.unwrap();
        let contents: Vec<String> =
            backend.calls()[0].prompt.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, vec!["You are terse.", "before", "hi"]);

        let err = node.execute(&store()).await.unwrap_err();
        assert_eq!(err.code(), "UNRESOLVED_VARIABLE");

        let mut bad = store();
        bad.set("_history", json!("not a list"));
        assert_eq!(node.execute(&bad).await.unwrap_err().code(), "VARIABLE_TYPE");
    }

    #[test]
    fn test_config_validation() {
        let backend: Arc<dyn ModelBackend> = Arc::new(ScriptedModelBackend::new());

        let mut missing_model = llm_config();
        missing_model.as_object_mut().unwrap().remove("model_id");
        assert!(ModelInvokeNode::from_config("n", &config(missing_model), backend.clone()).is_err());

        let mut two_outputs = llm_config();
        two_outputs["outputs"] = json!(["a", "b"]);
        assert!(ModelInvokeNode::from_config("n", &config(two_outputs), backend.clone()).is_err());

        let mut bad_flag = llm_config();
        bad_flag["streaming"] = json!("yes");
        assert!(ModelInvokeNode::from_config("n", &config(bad_flag), backend.clone()).is_err());

        let mut not_streaming = llm_config();
        not_streaming["streaming"] = json!(false);
        let node = ModelInvokeNode::from_config("n", &config(not_streaming), backend).unwrap();
        assert!(!node.is_streaming());
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let backend = Arc::new(ScriptedModelBackend::new().failing("quota exceeded"));
        let node = ModelInvokeNode::from_config("2:LLM", &config(llm_config()), backend).unwrap();
        let err = node.execute(&store()).await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_INVOCATION");
    }
}
