//! Building every configured pipeline and resolving its endpoints.

use super::chain::Chain;
use super::definition::{EndpointKind, PipelineDefinition};
use super::executor::PipelineExecutor;
use super::recorder::SessionRecorder;
use crate::errors::{ErrorInfo, NodeflowError};
use crate::events::{EventSink, NoOpEventSink};
use crate::nodes::NodeFactory;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{error, info};

/// A route bound to a built pipeline.
#[derive(Debug, Clone)]
pub struct Endpoint {
    /// The route path.
    pub path: String,
    /// Sync or stream delivery.
    pub kind: EndpointKind,
    /// The pipeline serving the route.
    pub executor: Arc<PipelineExecutor>,
}

/// A pipeline or endpoint binding that failed to build.
#[derive(Debug, Clone)]
pub struct BuildFailure {
    /// The workflow id.
    pub workflow: String,
    /// The endpoint path, when only one binding failed.
    pub path: Option<String>,
    /// The build error.
    pub error: NodeflowError,
}

/// Serializable view of a [`BuildFailure`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailureInfo {
    /// The workflow id.
    pub workflow: String,
    /// The endpoint path, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// The error summary.
    pub error: ErrorInfo,
}

impl BuildFailure {
    /// Returns the serializable view.
    #[must_use]
    pub fn info(&self) -> BuildFailureInfo {
        BuildFailureInfo {
            workflow: self.workflow.clone(),
            path: self.path.clone(),
            error: self.error.info(),
        }
    }
}

/// Path reserved for the health endpoint.
pub const HEALTH_PATH: &str = "/healthz";

/// Checks that an endpoint path is a static route.
///
/// Endpoints take their input from the request body, so paths carry no
/// captures or wildcards.
fn check_path(path: &str) -> std::result::Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    if path == HEALTH_PATH {
        return Err("is reserved");
    }
    if path.contains(['{', '}']) {
        return Err("must not contain captures");
    }
    if path
        .split('/')
        .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
    {
        return Err("must not contain ':' or '*' segments");
    }
    Ok(())
}

/// Collaborators shared by every pipeline the registry builds.
#[derive(Clone)]
pub struct RegistryResources {
    /// Creates the nodes.
    pub factory: NodeFactory,
    /// Receives execution events from every executor.
    pub sink: Arc<dyn EventSink>,
}

impl RegistryResources {
    /// Uses `factory` and a no-op event sink.
    #[must_use]
    pub fn new(factory: NodeFactory) -> Self {
        Self {
            factory,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }
}

/// The set of built pipelines and their endpoints.
///
/// Each pipeline builds independently: a failing definition is recorded in
/// [`failures`](Self::failures) and the others stay available.
#[derive(Debug, Default)]
pub struct PipelineRegistry {
    pipelines: BTreeMap<String, Arc<PipelineExecutor>>,
    endpoints: Vec<Endpoint>,
    failures: Vec<BuildFailure>,
}

impl PipelineRegistry {
    /// Builds every definition and binds its endpoints.
    #[must_use]
    pub fn build(
        definitions: impl IntoIterator<Item = PipelineDefinition>,
        resources: &RegistryResources,
    ) -> Self {
        let mut registry = Self::default();
        let mut paths = HashSet::new();

        for definition in definitions {
            if registry.pipelines.contains_key(&definition.id) {
                registry.fail(
                    &definition.id,
                    None,
                    NodeflowError::invalid_pipeline(&definition.id, "duplicate workflow id"),
                );
                continue;
            }

            let chain = match Chain::build(&definition, &resources.factory) {
                Ok(chain) => Arc::new(chain),
                Err(e) => {
                    registry.fail(&definition.id, None, e);
                    continue;
                }
            };

            let mut executor =
                PipelineExecutor::new(chain).with_event_sink(Arc::clone(&resources.sink));
            if let Some(sessions) = resources.factory.session_store() {
                executor = executor.with_recorder(SessionRecorder::new(Arc::clone(sessions)));
            }
            let executor = Arc::new(executor);

            for binding in &definition.endpoints {
                if let Err(reason) = check_path(&binding.path) {
                    registry.fail(
                        &definition.id,
                        Some(&binding.path),
                        NodeflowError::invalid_pipeline(
                            &definition.id,
                            format!("endpoint path '{}' {reason}", binding.path),
                        ),
                    );
                    continue;
                }
                if binding.kind == EndpointKind::Stream && !executor.supports_streaming() {
                    registry.fail(
                        &definition.id,
                        Some(&binding.path),
                        NodeflowError::streaming_topology(
                            format!(
                                "stream endpoint '{}' needs a streaming producer in workflow '{}'",
                                binding.path, definition.id
                            ),
                            Vec::new(),
                        ),
                    );
                    continue;
                }
                if !paths.insert(binding.path.clone()) {
                    registry.fail(
                        &definition.id,
                        Some(&binding.path),
                        NodeflowError::invalid_pipeline(
                            &definition.id,
                            format!("endpoint path '{}' is already bound", binding.path),
                        ),
                    );
                    continue;
                }

                info!(path = %binding.path, kind = %binding.kind, workflow = %definition.id, "Bound endpoint");
                registry.endpoints.push(Endpoint {
                    path: binding.path.clone(),
                    kind: binding.kind,
                    executor: Arc::clone(&executor),
                });
            }

            registry.pipelines.insert(definition.id.clone(), executor);
        }

        info!(
            pipelines = registry.pipelines.len(),
            endpoints = registry.endpoints.len(),
            failures = registry.failures.len(),
            "Pipeline registry built"
        );
        registry
    }

    fn fail(&mut self, workflow: &str, path: Option<&str>, error: NodeflowError) {
        error!(workflow, path, error = %error, "Failed to build pipeline");
        self.failures.push(BuildFailure {
            workflow: workflow.to_string(),
            path: path.map(str::to_string),
            error,
        });
    }

    /// Returns a built pipeline by workflow id.
    #[must_use]
    pub fn get(&self, workflow: &str) -> Option<&Arc<PipelineExecutor>> {
        self.pipelines.get(workflow)
    }

    /// Returns the ids of the built pipelines, sorted.
    #[must_use]
    pub fn workflows(&self) -> Vec<&str> {
        self.pipelines.keys().map(String::as_str).collect()
    }

    /// Returns the bound endpoints in definition order.
    #[must_use]
    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// Returns the build failures.
    #[must_use]
    pub fn failures(&self) -> &[BuildFailure] {
        &self.failures
    }
}
