//! Testing utilities for nodeflow pipelines.
//!
//! This module provides:
//! - Scripted and failing model backends
//! - Fixtures building chains and executors from YAML

mod fixtures;
mod mocks;

pub use fixtures::{chain_from_yaml, executor_from_yaml, seed};
pub use mocks::{FailingModelBackend, RecordedCall, ScriptedModelBackend};
