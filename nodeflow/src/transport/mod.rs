//! Request and response types shared with HTTP transports.
//!
//! A [`TextRequest`] becomes the seed of a run. A finished store is wrapped
//! in an [`AiMessage`]; a failed run becomes an [`ErrorReply`].

use crate::errors::{ErrorInfo, NodeflowError};
use crate::nodes::FINAL_OUTPUT;
use crate::store::{Seed, VariableStore};
use crate::utils;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The body of a pipeline request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    /// The user input.
    pub input: String,
    /// Free-form request configuration.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Extra arguments; `session_id` and `timestamp` are read from here.
    #[serde(default)]
    pub kwargs: Map<String, Value>,
}

impl TextRequest {
    /// Creates a request with empty `config` and `kwargs`.
    #[must_use]
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            config: Map::new(),
            kwargs: Map::new(),
        }
    }

    /// Adds a `kwargs` entry.
    #[must_use]
    pub fn with_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.kwargs.insert(key.into(), value);
        self
    }

    /// Returns the session id of the request.
    ///
    /// An explicit `kwargs.session_id` wins. Otherwise the id is derived from
    /// `kwargs.timestamp`, so repeated timestamps continue one conversation.
    #[must_use]
    pub fn session_id(&self) -> String {
        if let Some(Value::String(id)) = self.kwargs.get("session_id") {
            if !id.is_empty() {
                return id.clone();
            }
        }
        let timestamp = match self.kwargs.get("timestamp") {
            Some(Value::String(ts)) => ts.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        utils::session_id("", &timestamp)
    }

    /// Converts the request into a run seed: `input`, `config`, `kwargs` and
    /// the derived `session_id`.
    #[must_use]
    pub fn into_seed(self) -> Seed {
        let session_id = self.session_id();
        let mut seed = Seed::new();
        seed.insert("input".into(), Value::String(self.input));
        seed.insert("config".into(), Value::Object(self.config));
        seed.insert("kwargs".into(), Value::Object(self.kwargs));
        seed.insert("session_id".into(), Value::String(session_id));
        seed
    }
}

/// The reply carrying a run's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiMessage {
    /// The store's `final_output`, or null.
    pub content: Value,
    /// The whole store.
    pub additional_kwargs: VariableStore,
    /// Always `"ai"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Set on streamed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_stream: Option<bool>,
}

impl AiMessage {
    /// Wraps a finished store.
    #[must_use]
    pub fn from_store(store: VariableStore) -> Self {
        Self {
            content: store.get(FINAL_OUTPUT).cloned().unwrap_or(Value::Null),
            additional_kwargs: store,
            kind: "ai".to_string(),
            is_stream: None,
        }
    }

    /// Wraps one streamed snapshot.
    #[must_use]
    pub fn partial(store: VariableStore) -> Self {
        Self {
            is_stream: Some(true),
            ..Self::from_store(store)
        }
    }
}

/// The reply for a failed request: `{"error": {code, message}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// The error summary.
    pub error: ErrorInfo,
}

impl From<&NodeflowError> for ErrorReply {
    fn from(error: &NodeflowError) -> Self {
        Self {
            error: error.info(),
        }
    }
}

/// Maps an error to an HTTP status code.
///
/// Build and configuration faults are client-side (400); collaborator
/// failures are 502; anything else is 500.
#[must_use]
pub fn status_for(error: &NodeflowError) -> u16 {
    match error {
        e if e.is_build_time() => 400,
        NodeflowError::Backend(_) => 502,
        _ => 500,
    }
}
