//! # Nodeflow
//!
//! Linear node pipelines ("workflows") over a request-scoped variable store.
//!
//! Nodeflow provides:
//!
//! - **Typed nodes**: `Start`, `End`, `ModelInvoke` and `HistoryLookup`, built
//!   from YAML definitions by a [`NodeFactory`](nodes::NodeFactory)
//! - **Variable references**: `$name` fields resolved against the store of the
//!   current invocation, never against shared state
//! - **Streaming re-propagation**: one node may stream partial results, and
//!   every downstream node re-runs once per chunk
//! - **Injected observation**: execution events go to an
//!   [`EventSink`](events::EventSink)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use nodeflow::prelude::*;
//!
//! let factory = NodeFactory::new().with_model_backend(Arc::new(EchoModelBackend::new()));
//! let definition = PipelineDefinition::from_yaml_str(yaml)?;
//! let executor = PipelineExecutor::new(Arc::new(Chain::build(&definition, &factory)?));
//!
//! let store = executor.run(TextRequest::new("hi").into_seed()).await?;
//! let mut snapshots = executor.run_stream(TextRequest::new("hi").into_seed())?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backends;
pub mod errors;
pub mod events;
pub mod nodes;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod testing;
pub mod transport;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backends::{
        ChatMessage, EchoModelBackend, InMemorySessionStore, ModelBackend, SessionStore,
    };
    pub use crate::errors::{BackendError, NodeflowError, Result};
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::nodes::{Node, NodeFactory, NodeKind};
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{
        Chain, ConfigLoader, EndpointKind, PipelineDefinition, PipelineExecutor,
        PipelineRegistry, RegistryResources, SessionRecorder, StoreStream,
    };
    pub use crate::store::{Seed, VariableStore};
    pub use crate::transport::{AiMessage, ErrorReply, TextRequest};
    pub use std::sync::Arc;
}
