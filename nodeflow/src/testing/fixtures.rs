//! Test fixtures for pipeline testing.

use serde_json::Value;
use std::sync::Arc;

use crate::errors::Result;
use crate::nodes::NodeFactory;
use crate::pipeline::{Chain, PipelineDefinition, PipelineExecutor, SessionRecorder};
use crate::store::Seed;

/// Parses a YAML definition and builds its chain.
pub fn chain_from_yaml(yaml: &str, factory: &NodeFactory) -> Result<Chain> {
    Chain::build(&PipelineDefinition::from_yaml_str(yaml)?, factory)
}

/// Builds an executor from a YAML definition.
///
/// When the factory has a session store, the executor records turns into it.
pub fn executor_from_yaml(yaml: &str, factory: &NodeFactory) -> Result<PipelineExecutor> {
    let executor = PipelineExecutor::new(Arc::new(chain_from_yaml(yaml, factory)?));
    Ok(match factory.session_store() {
        Some(sessions) => executor.with_recorder(SessionRecorder::new(Arc::clone(sessions))),
        None => executor,
    })
}

/// Converts a JSON object into a seed. Anything else yields an empty seed.
#[must_use]
pub fn seed(value: Value) -> Seed {
    match value {
        Value::Object(map) => map,
        _ => Seed::new(),
    }
}
