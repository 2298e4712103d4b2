//! Materialized chains.

use super::definition::{Components, PipelineDefinition};
use crate::errors::{NodeflowError, Result};
use crate::nodes::{EndNode, Node, NodeFactory, NodeKind};
use tracing::{debug, info};

/// The built, ordered node sequence of one pipeline.
///
/// A chain holds no per-request state. It is shared read-only (behind an
/// `Arc`) by every concurrent invocation of its pipeline.
#[derive(Debug)]
pub struct Chain {
    workflow: String,
    version: Option<String>,
    nodes: Vec<Node>,
    producer: Option<usize>,
}

impl Chain {
    /// Builds a chain from a definition.
    ///
    /// # Errors
    ///
    /// Fails on the first node that cannot be created, on a tree-shaped
    /// definition, and on any error [`Chain::new`] reports.
    pub fn build(definition: &PipelineDefinition, factory: &NodeFactory) -> Result<Self> {
        let Components::Linear(configs) = &definition.components else {
            return Err(NodeflowError::invalid_pipeline(
                &definition.id,
                "tree topologies are not supported; `components` must be a list",
            ));
        };

        let nodes = configs
            .iter()
            .enumerate()
            .map(|(i, config)| {
                let label = config
                    .name()
                    .map_or_else(|| format!("{i}:{}", config.node_type), str::to_string);
                let node = factory.create(&config.node_type, &label, &config.fields)?;
                debug!(workflow = %definition.id, node = %label, kind = %node.kind(), "Built node");
                Ok(node)
            })
            .collect::<Result<Vec<_>>>()?;

        let chain = Self::new(&definition.id, nodes)?.with_version(definition.version.clone());
        info!(
            workflow = %chain.workflow,
            nodes = chain.len(),
            producer = ?chain.producer().map(Node::label),
            "Built chain"
        );
        Ok(chain)
    }

    /// Validates and wraps an already-built node list.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPipeline` for an empty chain or an `End` node that is
    /// not last, and `StreamingTopology` when more than one node is a
    /// streaming producer.
    pub fn new(workflow: impl Into<String>, nodes: Vec<Node>) -> Result<Self> {
        let workflow = workflow.into();
        if nodes.is_empty() {
            return Err(NodeflowError::invalid_pipeline(&workflow, "the chain has no nodes"));
        }

        let last = nodes.len() - 1;
        if let Some(pos) = nodes.iter().position(|n| n.kind() == NodeKind::End) {
            if pos != last {
                return Err(NodeflowError::invalid_pipeline(
                    &workflow,
                    format!("End node '{}' must be the last node", nodes[pos].label()),
                ));
            }
        }

        let producers: Vec<usize> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_streaming_producer())
            .map(|(i, _)| i)
            .collect();
        if producers.len() > 1 {
            return Err(NodeflowError::streaming_topology(
                format!(
                    "workflow '{workflow}' marks {} nodes as streaming producers; at most one is allowed",
                    producers.len()
                ),
                producers.iter().map(|&i| nodes[i].label().to_string()).collect(),
            ));
        }

        Ok(Self {
            workflow,
            version: None,
            producer: producers.first().copied(),
            nodes,
        })
    }

    #[must_use]
    fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }

    /// Returns the workflow id.
    #[must_use]
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// Returns the definition version, if declared.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Returns the nodes in execution order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; an empty chain cannot be built.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the position of the streaming producer.
    #[must_use]
    pub fn producer_index(&self) -> Option<usize> {
        self.producer
    }

    /// Returns the streaming producer.
    #[must_use]
    pub fn producer(&self) -> Option<&Node> {
        self.producer.map(|i| &self.nodes[i])
    }

    /// Returns the terminal `End` node, if the chain has one.
    #[must_use]
    pub fn end_node(&self) -> Option<&EndNode> {
        match self.nodes.last() {
            Some(Node::End(end)) => Some(end),
            _ => None,
        }
    }

    /// Returns true if the chain ends with an `End` node.
    #[must_use]
    pub fn has_end(&self) -> bool {
        self.end_node().is_some()
    }
}
