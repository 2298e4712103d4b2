//! The `HistoryLookup` node: reads recent turns from the session store.

use super::NodeMeta;
use crate::backends::SessionStore;
use crate::errors::{NodeflowError, Result};
use crate::store::{Operand, VariableStore};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

/// Default output variable of the lookup.
pub const DEFAULT_HISTORY_OUTPUT: &str = "_history";

/// Default session id variable.
pub const DEFAULT_SESSION_VARIABLE: &str = "session_id";

/// Fetches the last `n` turns of a session as a single list value.
pub struct HistoryLookupNode {
    pub(crate) meta: NodeMeta,
    session_id: Operand,
    n: usize,
    sessions: Arc<dyn SessionStore>,
}

impl HistoryLookupNode {
    /// Builds the node from its configuration.
    pub fn from_config(
        label: &str,
        config: &Map<String, Value>,
        sessions: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let n = match config.get("n") {
            Some(Value::Number(number)) => number.as_u64().ok_or_else(|| {
                NodeflowError::invalid_config(label, "# of historical messages should be >= 0")
            })?,
            Some(other) => {
                return Err(NodeflowError::invalid_config(
                    label,
                    format!("`n` must be a non-negative integer, got {other}"),
                ))
            }
            None => return Err(NodeflowError::invalid_config(label, "`n` is required")),
        };
        let n = usize::try_from(n)
            .map_err(|_| NodeflowError::invalid_config(label, "`n` is too large"))?;

        let session_id = match config.get("session_id") {
            Some(value) => Operand::parse(label, value)?,
            None => Operand::Variable(DEFAULT_SESSION_VARIABLE.to_string()),
        };

        Ok(Self {
            meta: NodeMeta::parse(label, config, Some(&[DEFAULT_HISTORY_OUTPUT]))?.require_arity(1)?,
            session_id,
            n,
            sessions,
        })
    }

    /// Returns how many turns the node fetches.
    #[must_use]
    pub fn n(&self) -> usize {
        self.n
    }

    pub(crate) async fn execute(&self, store: &VariableStore) -> Result<Vec<Value>> {
        let session_id = self.session_id.resolve_string(&self.meta.label, store)?;
        let turns = self.sessions.latest_n(&session_id, self.n).await?;
        let history = turns
            .into_iter()
            .map(|turn| json!({"content": turn.content, "role": turn.role}))
            .collect();
        Ok(vec![Value::Array(history)])
    }
}

impl fmt::Debug for HistoryLookupNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryLookupNode")
            .field("label", &self.meta.label)
            .field("outputs", &self.meta.outputs)
            .field("session_id", &self.session_id)
            .field("n", &self.n)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemorySessionStore, MockSessionStore};
    use crate::errors::BackendError;

    fn config(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    async fn sessions_with(turns: usize) -> Arc<InMemorySessionStore> {
        let sessions = Arc::new(InMemorySessionStore::new());
        for i in 0..turns {
            let role = if i % 2 == 0 { "user" } else { "ai" };
            sessions.append("s-1", &format!("m{i}"), role, None).await.unwrap();
        }
        sessions
    }

    #[tokio::test]
    async fn test_returns_latest_turns_chronologically() {
        let sessions = sessions_with(5).await;
        let node = HistoryLookupNode::from_config("1:Memory", &config(json!({"n": 2})), sessions)
            .unwrap();

        let mut store = VariableStore::new();
        store.set("session_id", json!("s-1"));

        let values = node.execute(&store).await.unwrap();
        assert_eq!(
            values,
            vec![json!([
                {"content": "m3", "role": "ai"},
                {"content": "m4", "role": "user"}
            ])]
        );
        assert_eq!(node.meta.outputs, vec![DEFAULT_HISTORY_OUTPUT]);
    }

    #[tokio::test]
    async fn test_literal_session_and_zero_turns() {
        let sessions = sessions_with(3).await;
        let node = HistoryLookupNode::from_config(
            "1:Memory",
            &config(json!({"n": 0, "session_id": "s-1", "mode": "window"})),
            sessions,
        )
        .unwrap();

        assert_eq!(node.execute(&VariableStore::new()).await.unwrap(), vec![json!([])]);
    }

    #[tokio::test]
    async fn test_missing_session_variable() {
        let sessions = sessions_with(1).await;
        let node = HistoryLookupNode::from_config("1:Memory", &config(json!({"n": 1})), sessions)
            .unwrap();
        let err = node.execute(&VariableStore::new()).await.unwrap_err();
        assert_eq!(err.code(), "UNRESOLVED_VARIABLE");
    }

    #[tokio::test]
    async fn test_store_failure_is_backend_error() {
        let mut mock = MockSessionStore::new();
        mock.expect_latest_n()
            .returning(|_, _| Err(BackendError::session("connection refused")));
        let node =
            HistoryLookupNode::from_config("1:Memory", &config(json!({"n": 1})), Arc::new(mock))
                .unwrap();

        let mut store = VariableStore::new();
        store.set("session_id", json!("s-1"));
        let err = node.execute(&store).await.unwrap_err();
        assert_eq!(err.code(), "BACKEND_INVOCATION");
    }

    #[test]
    fn test_invalid_n() {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        for bad in [json!({"n": -1}), json!({"n": "2"}), json!({}), json!({"n": 1.5})] {
            let err = HistoryLookupNode::from_config("1:Memory", &config(bad), sessions.clone())
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_NODE_CONFIG");
        }
    }
}
