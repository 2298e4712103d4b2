//! Error types for the nodeflow engine.
//!
//! Errors fall into two groups. Build-time errors (bad node configuration,
//! unknown node types, ambiguous streaming topology) fail the registration of a
//! single pipeline. Per-invocation errors (unresolved variables, arity faults,
//! backend failures) abort one invocation and are handed back to the caller.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for nodeflow operations.
#[derive(Debug, Clone, Error)]
pub enum NodeflowError {
    /// A node configuration is missing a required field or holds a bad value.
    #[error("Invalid config for node '{node}': {message}")]
    InvalidNodeConfig {
        /// The node label.
        node: String,
        /// What is wrong with the configuration.
        message: String,
    },

    /// The node type tag is not one of the known kinds.
    #[error("Unknown node type: {tag}")]
    UnknownNodeType {
        /// The unrecognized tag.
        tag: String,
    },

    /// A node referenced a variable that is absent from the store.
    #[error("Node '{node}' references variable '{name}' which is not in the store")]
    UnresolvedVariable {
        /// The node label.
        node: String,
        /// The missing variable name.
        name: String,
    },

    /// A node produced a different number of values than it declares outputs.
    #[error("Node '{node}' produced {actual} values but declares {expected} outputs")]
    OutputArityMismatch {
        /// The node label.
        node: String,
        /// Number of declared outputs.
        expected: usize,
        /// Number of produced values.
        actual: usize,
    },

    /// The chain has zero or several streaming producers where exactly one is required.
    #[error("Streaming topology error: {message}")]
    StreamingTopology {
        /// Description of the topology fault.
        message: String,
        /// Labels of the producer nodes found.
        producers: Vec<String>,
    },

    /// A pipeline definition is structurally invalid.
    #[error("Invalid pipeline '{workflow}': {message}")]
    InvalidPipeline {
        /// The workflow id.
        workflow: String,
        /// What is wrong.
        message: String,
    },

    /// A resolved variable does not have the shape the node needs.
    #[error("Node '{node}' expected variable '{name}' to be {expected}")]
    VariableType {
        /// The node label.
        node: String,
        /// The variable name.
        name: String,
        /// Description of the expected shape.
        expected: String,
    },

    /// A streamed chunk cannot be accumulated onto the running value.
    #[error("Cannot accumulate streamed chunk for '{name}': {message}")]
    InvalidStreamChunk {
        /// The output variable name.
        name: String,
        /// Why accumulation failed.
        message: String,
    },

    /// An external collaborator (model backend, session store) failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// A definition file could not be read or parsed.
    #[error("Config error: {0}")]
    Config(String),
}

impl NodeflowError {
    /// Creates an invalid node config error.
    #[must_use]
    pub fn invalid_config(node: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidNodeConfig {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Creates an unresolved variable error.
    #[must_use]
    pub fn unresolved(node: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UnresolvedVariable {
            node: node.into(),
            name: name.into(),
        }
    }

    /// Creates an invalid pipeline error.
    #[must_use]
    pub fn invalid_pipeline(workflow: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPipeline {
            workflow: workflow.into(),
            message: message.into(),
        }
    }

    /// Creates a streaming topology error.
    #[must_use]
    pub fn streaming_topology(message: impl Into<String>, producers: Vec<String>) -> Self {
        Self::StreamingTopology {
            message: message.into(),
            producers,
        }
    }

    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidNodeConfig { .. } => "INVALID_NODE_CONFIG",
            Self::UnknownNodeType { .. } => "UNKNOWN_NODE_TYPE",
            Self::UnresolvedVariable { .. } => "UNRESOLVED_VARIABLE",
            Self::OutputArityMismatch { .. } => "OUTPUT_ARITY_MISMATCH",
            Self::StreamingTopology { .. } => "STREAMING_TOPOLOGY",
            Self::InvalidPipeline { .. } => "INVALID_PIPELINE",
            Self::VariableType { .. } => "VARIABLE_TYPE",
            Self::InvalidStreamChunk { .. } => "INVALID_STREAM_CHUNK",
            Self::Backend(_) => "BACKEND_INVOCATION",
            Self::Config(_) => "CONFIG",
        }
    }

    /// Returns true if the error can only arise while building a pipeline.
    #[must_use]
    pub fn is_build_time(&self) -> bool {
        matches!(
            self,
            Self::InvalidNodeConfig { .. }
                | Self::UnknownNodeType { .. }
                | Self::StreamingTopology { .. }
                | Self::InvalidPipeline { .. }
                | Self::Config(_)
        )
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), serde_json::json!(self.code()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));
        if let Some(hint) = ErrorSuggestions::get(self.code()) {
            map.insert("fix_hint".to_string(), serde_json::json!(hint));
        }
        map
    }

    /// Returns a serializable summary of the error.
    #[must_use]
    pub fn info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code().to_string(),
            message: self.to_string(),
            fix_hint: ErrorSuggestions::get(self.code()).map(str::to_string),
        }
    }
}

/// Serializable error summary handed to transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code.
    pub code: String,
    /// Human readable message.
    pub message: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

/// Errors reported by external collaborators.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The model backend failed.
    #[error("Model backend error for '{model_id}': {message}")]
    Model {
        /// The model identifier.
        model_id: String,
        /// The failure reason.
        message: String,
    },

    /// The session store failed.
    #[error("Session store error: {message}")]
    Session {
        /// The failure reason.
        message: String,
    },
}

impl BackendError {
    /// Creates a model backend error.
    #[must_use]
    pub fn model(model_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Model {
            model_id: model_id.into(),
            message: message.into(),
        }
    }

    /// Creates a session store error.
    #[must_use]
    pub fn session(message: impl Into<String>) -> Self {
        Self::Session {
            message: message.into(),
        }
    }
}

/// Provides default suggestions for common error codes.
pub struct ErrorSuggestions;

impl ErrorSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            "UNKNOWN_NODE_TYPE" => Some(
                "Use one of Start, End, ModelInvoke (LLM) or HistoryLookup (Memory).",
            ),
            "UNRESOLVED_VARIABLE" => Some(
                "Make sure an earlier node declares the variable in its outputs, \
                 or that the request seeds it.",
            ),
            "STREAMING_TOPOLOGY" => Some(
                "Mark exactly one ModelInvoke node as the streaming producer; \
                 set `streaming: false` on the others.",
            ),
            "INVALID_PIPELINE" => Some(
                "Pipelines are an ordered list of single-key mappings ending with an End node.",
            ),
            _ => None,
        }
    }
}

/// Convenience result alias.
pub type Result<T, E = NodeflowError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            NodeflowError::unresolved("1:End", "answer").code(),
            "UNRESOLVED_VARIABLE"
        );
        assert_eq!(
            NodeflowError::UnknownNodeType { tag: "Foo".into() }.code(),
            "UNKNOWN_NODE_TYPE"
        );
    }

    #[test]
    fn test_build_time_classification() {
        assert!(NodeflowError::invalid_config("n", "missing").is_build_time());
        assert!(NodeflowError::streaming_topology("two", vec![]).is_build_time());
        assert!(!NodeflowError::unresolved("n", "x").is_build_time());
        assert!(!NodeflowError::from(BackendError::session("down")).is_build_time());
    }

    #[test]
    fn test_unresolved_message_names_variable() {
        let err = NodeflowError::unresolved("2:LLM", "question");
        assert!(err.to_string().contains("question"));
        assert!(err.to_string().contains("2:LLM"));
    }

    #[test]
    fn test_to_dict_includes_hint() {
        let dict = NodeflowError::UnknownNodeType { tag: "Foo".into() }.to_dict();
        assert_eq!(dict.get("code").unwrap(), "UNKNOWN_NODE_TYPE");
        assert!(dict.contains_key("fix_hint"));

        let dict = NodeflowError::Config("bad yaml".into()).to_dict();
        assert!(!dict.contains_key("fix_hint"));
    }

    #[test]
    fn test_backend_error_converts() {
        let err: NodeflowError = BackendError::model("m1", "timeout").into();
        assert_eq!(err.code(), "BACKEND_INVOCATION");
        assert!(err.to_string().contains("m1"));
    }
}
