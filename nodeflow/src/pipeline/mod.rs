//! Pipeline definition, building and execution.
//!
//! This module provides:
//! - Pipeline definitions and the YAML config loader
//! - Chain building and validation
//! - The synchronous and streaming executor
//! - Post-run session recording
//! - The registry of built pipelines and endpoints

mod chain;
mod definition;
mod executor;
mod recorder;
mod registry;

pub use chain::Chain;
pub use definition::{
    Components, ConfigLoader, EndpointBinding, EndpointKind, NodeConfig, PipelineDefinition,
    DEFAULT_CONFIG_DIR,
};
pub use executor::{PipelineExecutor, StoreStream};
pub use recorder::{RecordOutcome, SessionRecorder, DEFAULT_INPUT_VARIABLE};
pub use registry::{
    BuildFailure, BuildFailureInfo, Endpoint, PipelineRegistry, RegistryResources, HEALTH_PATH,
};
