//! Execution events.
//!
//! The executor reports what it does to an injected [`EventSink`]. Nodes never
//! emit events; observation stays outside node logic.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by the executor and recorder.
pub mod event_types {
    /// A run began.
    pub const PIPELINE_STARTED: &str = "pipeline.started";
    /// A run finished successfully.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run failed.
    pub const PIPELINE_FAILED: &str = "pipeline.failed";
    /// A node is about to execute.
    pub const NODE_STARTED: &str = "node.started";
    /// A node returned its values.
    pub const NODE_COMPLETED: &str = "node.completed";
    /// A node returned an error.
    pub const NODE_FAILED: &str = "node.failed";
    /// The streaming producer emitted a chunk.
    pub const STREAM_CHUNK: &str = "stream.chunk";
    /// Session turns were appended (or failed to be).
    pub const SESSION_RECORDED: &str = "session.recorded";
}
