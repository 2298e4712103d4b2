//! Pipeline nodes.
//!
//! A [`Node`] is one configured step of a chain. It reads its inputs from a
//! borrowed [`VariableStore`] and returns one value per declared output; the
//! executor, not the node, writes those values back into the store.
//!
//! The set of node kinds is closed: [`Node`] is an enum selected once at build
//! time by the [`NodeFactory`].

mod end;
mod factory;
mod history;
mod model;
mod start;

pub use end::{EndNode, FINAL_OUTPUT};
pub use factory::NodeFactory;
pub use history::{HistoryLookupNode, DEFAULT_HISTORY_OUTPUT, DEFAULT_SESSION_VARIABLE};
pub use model::{ModelInvokeNode, DEFAULT_HISTORY_VARIABLE};
pub use start::StartNode;

use crate::errors::{NodeflowError, Result};
use crate::store::VariableStore;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A lazy sequence of partial value sets emitted by a streaming producer.
pub type ChunkStream = BoxStream<'static, Result<Vec<Value>>>;

/// The kind of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// Copies seed variables through.
    Start,
    /// Publishes the final output.
    End,
    /// Calls the model backend.
    ModelInvoke,
    /// Reads recent session turns.
    HistoryLookup,
}

impl NodeKind {
    /// Parses a configuration type tag, including the legacy aliases.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "Start" => Some(Self::Start),
            "End" => Some(Self::End),
            "ModelInvoke" | "LLM" => Some(Self::ModelInvoke),
            "HistoryLookup" | "Memory" | "memory" => Some(Self::HistoryLookup),
            _ => None,
        }
    }

    /// Returns the canonical tag.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Start => "Start",
            Self::End => "End",
            Self::ModelInvoke => "ModelInvoke",
            Self::HistoryLookup => "HistoryLookup",
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured pipeline node.
#[derive(Debug)]
pub enum Node {
    /// See [`StartNode`].
    Start(StartNode),
    /// See [`EndNode`].
    End(EndNode),
    /// See [`ModelInvokeNode`].
    ModelInvoke(ModelInvokeNode),
    /// See [`HistoryLookupNode`].
    HistoryLookup(HistoryLookupNode),
}

impl Node {
    /// Returns the node kind.
    #[must_use]
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Start(_) => NodeKind::Start,
            Self::End(_) => NodeKind::End,
            Self::ModelInvoke(_) => NodeKind::ModelInvoke,
            Self::HistoryLookup(_) => NodeKind::HistoryLookup,
        }
    }

    fn meta(&self) -> &NodeMeta {
        match self {
            Self::Start(n) => &n.meta,
            Self::End(n) => &n.meta,
            Self::ModelInvoke(n) => &n.meta,
            Self::HistoryLookup(n) => &n.meta,
        }
    }

    /// Returns the label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.meta().label
    }

    /// Returns the declared output names.
    #[must_use]
    pub fn outputs(&self) -> &[String] {
        &self.meta().outputs
    }

    /// Returns true if this node is the chain's streaming producer.
    #[must_use]
    pub fn is_streaming_producer(&self) -> bool {
        match self {
            Self::ModelInvoke(n) => n.is_streaming(),
            _ => false,
        }
    }

    /// Executes the node once against the store.
    ///
    /// `streaming` is set when the node runs downstream of a streaming producer,
    /// once per emitted chunk.
    pub async fn execute(&self, store: &VariableStore, streaming: bool) -> Result<Vec<Value>> {
        match self {
            Self::Start(n) => n.execute(store),
            Self::End(n) => n.execute(store, streaming),
            Self::ModelInvoke(n) => n.execute(store).await,
            Self::HistoryLookup(n) => n.execute(store).await,
        }
    }

    /// Executes the node as a stream of partial value sets.
    ///
    /// # Errors
    ///
    /// Returns `StreamingTopology` if the node is not a streaming producer.
    pub async fn execute_as_stream(&self, store: &VariableStore) -> Result<ChunkStream> {
        match self {
            Self::ModelInvoke(n) if n.is_streaming() => n.execute_as_stream(store).await,
            _ => Err(NodeflowError::streaming_topology(
                format!("node '{}' is not a streaming producer", self.label()),
                Vec::new(),
            )),
        }
    }
}

/// Label and declared outputs shared by every node kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NodeMeta {
    pub(crate) label: String,
    pub(crate) outputs: Vec<String>,
}

impl NodeMeta {
    /// Reads `outputs` (or its alias `output_mappings`) from the config.
    ///
    /// Falls back to `default` when absent; a node without a default must
    /// declare at least one output.
    pub(crate) fn parse(
        label: &str,
        config: &Map<String, Value>,
        default: Option<&[&str]>,
    ) -> Result<Self> {
        let configured = config.get("outputs").or_else(|| config.get("output_mappings"));

        let outputs = match (configured, default) {
            (Some(value), _) => parse_names(label, value)?,
            (None, Some(default)) => default.iter().map(|s| (*s).to_string()).collect(),
            (None, None) => {
                return Err(NodeflowError::invalid_config(label, "`outputs` is required"));
            }
        };

        if outputs.is_empty() {
            return Err(NodeflowError::invalid_config(label, "`outputs` must not be empty"));
        }

        Ok(Self {
            label: label.to_string(),
            outputs,
        })
    }

    /// Fails unless exactly `count` outputs are declared.
    pub(crate) fn require_arity(self, count: usize) -> Result<Self> {
        if self.outputs.len() == count {
            Ok(self)
        } else {
            Err(NodeflowError::invalid_config(
                &self.label,
                format!(
                    "produces {count} value(s) but declares {} outputs",
                    self.outputs.len()
                ),
            ))
        }
    }
}

fn parse_names(label: &str, value: &Value) -> Result<Vec<String>> {
    let items = value
        .as_array()
        .ok_or_else(|| NodeflowError::invalid_config(label, "`outputs` must be a list of names"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| {
                    NodeflowError::invalid_config(label, format!("invalid output name {item}"))
                })
        })
        .collect()
}
