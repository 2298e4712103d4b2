//! The linear-chain executor.
//!
//! [`PipelineExecutor::run`] walks the chain once against a fresh store.
//! [`PipelineExecutor::run_stream`] runs the nodes before the streaming
//! producer once, then re-runs every downstream node for each chunk the
//! producer emits, yielding the store after each pass.

use super::chain::Chain;
use super::recorder::{RecordOutcome, SessionRecorder};
use crate::errors::{NodeflowError, Result};
use crate::events::{event_types, EventSink, NoOpEventSink};
use crate::nodes::{ChunkStream, Node, FINAL_OUTPUT};
use crate::store::{segment_name, Seed, VariableStore};
use crate::utils::generate_run_id;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The lazy sequence of store snapshots produced by a streaming run.
///
/// Not restartable. Dropping it cancels the run and the producer's backend call.
pub type StoreStream = BoxStream<'static, Result<VariableStore>>;

/// Executes one chain. Cheap to clone; holds no per-request state.
#[derive(Clone)]
pub struct PipelineExecutor {
    chain: Arc<Chain>,
    recorder: Option<SessionRecorder>,
    sink: Arc<dyn EventSink>,
}

impl PipelineExecutor {
    /// Creates an executor with no recorder and a no-op event sink.
    #[must_use]
    pub fn new(chain: Arc<Chain>) -> Self {
        Self {
            chain,
            recorder: None,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Records session turns after each full synchronous run.
    #[must_use]
    pub fn with_recorder(mut self, recorder: SessionRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Reports execution events to `sink`.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the chain.
    #[must_use]
    pub fn chain(&self) -> &Arc<Chain> {
        &self.chain
    }

    /// Returns the workflow id.
    #[must_use]
    pub fn workflow(&self) -> &str {
        self.chain.workflow()
    }

    /// Returns true if [`run_stream`](Self::run_stream) can be used.
    #[must_use]
    pub fn supports_streaming(&self) -> bool {
        self.chain.producer_index().is_some()
    }

    fn observer(&self) -> RunObserver {
        RunObserver {
            sink: Arc::clone(&self.sink),
            workflow: self.chain.workflow().to_string(),
            run_id: generate_run_id(),
        }
    }

    /// Runs every node once, in order, against a store seeded with `seed`.
    ///
    /// On success the session turns are recorded (best effort) and the final
    /// store is returned.
    ///
    /// # Errors
    ///
    /// Returns the first node error; the partially filled store is discarded.
    pub async fn run(&self, seed: Seed) -> Result<VariableStore> {
        let observer = self.observer();
        let started = Instant::now();
        observer.pipeline_started("sync").await;

        let mut store = VariableStore::seeded(seed);
        if let Err(e) = run_nodes(self.chain.nodes(), &mut store, false, &observer).await {
            observer.pipeline_failed(&e).await;
            return Err(e);
        }

        self.record_session(&store).await;
        info!(
            workflow = %observer.workflow,
            run_id = %observer.run_id,
            duration_ms = started.elapsed().as_secs_f64() * 1000.0,
            "Pipeline completed"
        );
        observer.pipeline_completed(json!({"variables": store.len()})).await;
        Ok(store)
    }

    /// Starts a streaming run.
    ///
    /// The returned stream runs the nodes before the producer when first
    /// polled, then yields one store snapshot per producer chunk. After
    /// chunk *m* the producer's outputs hold the concatenation of the first
    /// *m* chunks and their `#seg` variants hold chunk *m*. The first error
    /// ends the stream; snapshots already yielded stand.
    ///
    /// # Errors
    ///
    /// Returns `StreamingTopology` if the chain has no streaming producer.
    pub fn run_stream(&self, seed: Seed) -> Result<StoreStream> {
        let producer = self.chain.producer_index().ok_or_else(|| {
            NodeflowError::streaming_topology(
                format!("workflow '{}' has no streaming producer", self.chain.workflow()),
                Vec::new(),
            )
        })?;

        let start = StreamRun::start(Arc::clone(&self.chain), producer, seed, self.observer());
        Ok(stream::once(start)
            .map_ok(|run| stream::try_unfold(run, StreamRun::advance))
            .try_flatten()
            .boxed())
    }

    /// Records the turns of a finished run, if a recorder is configured and
    /// the chain ends with an `End` node.
    ///
    /// The reply is the variable the `End` node references, which after a
    /// streaming run holds the full concatenated text rather than the last
    /// segment. Failures are logged and reported as events, never returned.
    pub async fn record_session(&self, store: &VariableStore) {
        let Some(recorder) = &self.recorder else {
            return;
        };
        let Some(end) = self.chain.end_node() else {
            debug!(workflow = %self.chain.workflow(), "No End node; not recording session");
            return;
        };

        let reply = end
            .final_output()
            .variable()
            .and_then(|name| store.get(name))
            .or_else(|| store.get(FINAL_OUTPUT))
            .cloned()
            .unwrap_or(Value::Null);

        match recorder.record(store, &reply).await {
            Ok(RecordOutcome::Recorded { session_id }) => {
                self.sink
                    .emit(
                        event_types::SESSION_RECORDED,
                        Some(json!({
                            "workflow": self.chain.workflow(),
                            "session_id": session_id,
                            "status": "recorded",
                        })),
                    )
                    .await;
            }
            Ok(RecordOutcome::Skipped { reason }) => {
                debug!(workflow = %self.chain.workflow(), reason, "Session recording skipped");
            }
            Err(e) => {
                warn!(workflow = %self.chain.workflow(), error = %e, "Session recording failed");
                self.sink
                    .emit(
                        event_types::SESSION_RECORDED,
                        Some(json!({
                            "workflow": self.chain.workflow(),
                            "status": "failed",
                            "error": e.to_string(),
                        })),
                    )
                    .await;
            }
        }
    }
}

impl fmt::Debug for PipelineExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineExecutor")
            .field("chain", &self.chain)
            .field("recorder", &self.recorder)
            .finish_non_exhaustive()
    }
}

/// Per-run event reporting.
#[derive(Clone)]
struct RunObserver {
    sink: Arc<dyn EventSink>,
    workflow: String,
    run_id: Uuid,
}

impl RunObserver {
    fn payload(&self, extra: Value) -> Value {
        let mut data = json!({
            "workflow": self.workflow,
            "run_id": self.run_id.to_string(),
        });
        if let (Some(data), Value::Object(extra)) = (data.as_object_mut(), extra) {
            data.extend(extra);
        }
        data
    }

    async fn emit(&self, event_type: &str, extra: Value) {
        self.sink.emit(event_type, Some(self.payload(extra))).await;
    }

    async fn pipeline_started(&self, mode: &str) {
        info!(workflow = %self.workflow, run_id = %self.run_id, mode, "Pipeline started");
        self.emit(event_types::PIPELINE_STARTED, json!({"mode": mode})).await;
    }

    async fn pipeline_completed(&self, extra: Value) {
        self.emit(event_types::PIPELINE_COMPLETED, extra).await;
    }

    async fn pipeline_failed(&self, error: &NodeflowError) {
        warn!(workflow = %self.workflow, run_id = %self.run_id, error = %error, "Pipeline failed");
        self.emit(event_types::PIPELINE_FAILED, json!({"error": error.info()}))
            .await;
    }

    async fn node_started(&self, node: &Node, streaming: bool) {
        self.emit(
            event_types::NODE_STARTED,
            json!({"node": node.label(), "kind": node.kind(), "streaming": streaming}),
        )
        .await;
    }

    async fn node_completed(&self, node: &Node) {
        self.emit(
            event_types::NODE_COMPLETED,
            json!({"node": node.label(), "outputs": node.outputs()}),
        )
        .await;
    }

    async fn node_failed(&self, node: &Node, error: &NodeflowError) {
        self.emit(
            event_types::NODE_FAILED,
            json!({"node": node.label(), "error": error.info()}),
        )
        .await;
    }

    async fn chunk(&self, index: usize) {
        self.emit(event_types::STREAM_CHUNK, json!({"chunk": index})).await;
    }
}

async fn run_nodes(
    nodes: &[Node],
    store: &mut VariableStore,
    streaming: bool,
    observer: &RunObserver,
) -> Result<()> {
    for node in nodes {
        observer.node_started(node, streaming).await;
        let outcome = match node.execute(store, streaming).await {
            Ok(values) => write_outputs(node, values, store),
            Err(e) => Err(e),
        };
        match outcome {
            Ok(()) => {
                debug!(
                    workflow = %observer.workflow,
                    run_id = %observer.run_id,
                    node = %node.label(),
                    outputs = ?node.outputs(),
                    "Node updated store"
                );
                observer.node_completed(node).await;
            }
            Err(e) => {
                observer.node_failed(node, &e).await;
                return Err(e);
            }
        }
    }
    Ok(())
}

fn check_arity(node: &Node, actual: usize) -> Result<()> {
    let expected = node.outputs().len();
    if actual == expected {
        Ok(())
    } else {
        Err(NodeflowError::OutputArityMismatch {
            node: node.label().to_string(),
            expected,
            actual,
        })
    }
}

fn write_outputs(node: &Node, values: Vec<Value>, store: &mut VariableStore) -> Result<()> {
    check_arity(node, values.len())?;
    for (name, value) in node.outputs().iter().zip(values) {
        store.set(name.clone(), value);
    }
    Ok(())
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

/// Appends `chunk` to the running value of output `name`.
fn accumulate(name: &str, total: Option<Value>, chunk: &Value) -> Result<Value> {
    match (total, chunk) {
        (None, Value::String(_) | Value::Array(_)) => Ok(chunk.clone()),
        (Some(Value::String(mut acc)), Value::String(text)) => {
            acc.push_str(text);
            Ok(Value::String(acc))
        }
        (Some(Value::Array(mut acc)), Value::Array(items)) => {
            acc.extend(items.iter().cloned());
            Ok(Value::Array(acc))
        }
        (None, other) => Err(NodeflowError::InvalidStreamChunk {
            name: name.to_string(),
            message: format!("chunks must be strings or lists, got {}", value_kind(other)),
        }),
        (Some(acc), other) => Err(NodeflowError::InvalidStreamChunk {
            name: name.to_string(),
            message: format!("cannot append {} to {}", value_kind(other), value_kind(&acc)),
        }),
    }
}

/// State of one streaming run between two chunks.
struct StreamRun {
    chain: Arc<Chain>,
    producer: usize,
    store: VariableStore,
    chunks: ChunkStream,
    totals: Vec<Option<Value>>,
    emitted: usize,
    observer: RunObserver,
}

impl StreamRun {
    async fn start(
        chain: Arc<Chain>,
        producer: usize,
        seed: Seed,
        observer: RunObserver,
    ) -> Result<Self> {
        observer.pipeline_started("stream").await;
        match Self::prepare(chain, producer, seed, observer.clone()).await {
            Ok(run) => Ok(run),
            Err(e) => {
                observer.pipeline_failed(&e).await;
                Err(e)
            }
        }
    }

    async fn prepare(
        chain: Arc<Chain>,
        producer: usize,
        seed: Seed,
        observer: RunObserver,
    ) -> Result<Self> {
        let mut store = VariableStore::seeded(seed);
        run_nodes(&chain.nodes()[..producer], &mut store, false, &observer).await?;

        let node = &chain.nodes()[producer];
        observer.node_started(node, false).await;
        let chunks = match node.execute_as_stream(&store).await {
            Ok(chunks) => chunks,
            Err(e) => {
                observer.node_failed(node, &e).await;
                return Err(e);
            }
        };
        let totals = vec![None; node.outputs().len()];

        Ok(Self {
            chain,
            producer,
            store,
            chunks,
            totals,
            emitted: 0,
            observer,
        })
    }

    async fn advance(mut self) -> Result<Option<(VariableStore, Self)>> {
        let Some(chunk) = self.chunks.next().await else {
            self.observer
                .node_completed(&self.chain.nodes()[self.producer])
                .await;
            info!(
                workflow = %self.observer.workflow,
                run_id = %self.observer.run_id,
                chunks = self.emitted,
                "Stream completed"
            );
            self.observer
                .pipeline_completed(json!({"chunks": self.emitted}))
                .await;
            return Ok(None);
        };

        if let Err(e) = self.absorb(chunk).await {
            self.observer.pipeline_failed(&e).await;
            return Err(e);
        }
        Ok(Some((self.store.clone(), self)))
    }

    async fn absorb(&mut self, chunk: Result<Vec<Value>>) -> Result<()> {
        let chain = Arc::clone(&self.chain);
        let producer = &chain.nodes()[self.producer];

        let written = chunk.and_then(|values| {
            check_arity(producer, values.len())?;
            for ((name, total), value) in producer
                .outputs()
                .iter()
                .zip(self.totals.iter_mut())
                .zip(values)
            {
                let cumulative = accumulate(name, total.take(), &value)?;
                self.store.set(name.clone(), cumulative.clone());
                *total = Some(cumulative);
                self.store.set(segment_name(name), value);
            }
            Ok(())
        });
        if let Err(e) = written {
            self.observer.node_failed(producer, &e).await;
            return Err(e);
        }

        self.emitted += 1;
        debug!(
            workflow = %self.observer.workflow,
            run_id = %self.observer.run_id,
            chunk = self.emitted,
            "Propagating chunk"
        );
        self.observer.chunk(self.emitted).await;

        run_nodes(
            &chain.nodes()[self.producer + 1..],
            &mut self.store,
            true,
            &self.observer,
        )
        .await
    }
}
