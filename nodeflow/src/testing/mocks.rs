//! Model backends for testing.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::backends::{ChatMessage, ModelBackend, TextStream};
use crate::errors::BackendError;

/// One call received by a [`ScriptedModelBackend`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    /// The resolved model id.
    pub model_id: String,
    /// The rendered prompt.
    pub prompt: Vec<ChatMessage>,
    /// True for `stream`, false for `invoke`.
    pub streamed: bool,
}

/// A model backend that replays a fixed script and records its calls.
///
/// `invoke` returns the reply (or the concatenated chunks when no reply is
/// set); `stream` yields the chunks lazily, one per poll.
#[derive(Debug, Default)]
pub struct ScriptedModelBackend {
    reply: Option<String>,
    chunks: Vec<String>,
    failure: Option<String>,
    fail_after: Option<usize>,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
    emitted: Arc<AtomicUsize>,
}

impl ScriptedModelBackend {
    /// Creates a backend replying with an empty string.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the synchronous reply.
    #[must_use]
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Sets the streamed chunks.
    #[must_use]
    pub fn with_chunks<I, S>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.chunks = chunks.into_iter().map(Into::into).collect();
        self
    }

    /// Waits before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes every call fail with `message`.
    #[must_use]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Makes streams fail with `message` after `count` chunks.
    #[must_use]
    pub fn fail_after(mut self, count: usize, message: impl Into<String>) -> Self {
        self.fail_after = Some(count);
        self.failure = Some(message.into());
        self
    }

    /// Returns the calls received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }

    /// Returns the number of calls received.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Returns the number of chunks consumers have pulled from streams.
    #[must_use]
    pub fn chunks_emitted(&self) -> usize {
        self.emitted.load(Ordering::SeqCst)
    }

    async fn begin(&self, model_id: &str, prompt: &[ChatMessage], streamed: bool) {
        self.calls.lock().push(RecordedCall {
            model_id: model_id.to_string(),
            prompt: prompt.to_vec(),
            streamed,
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ModelBackend for ScriptedModelBackend {
    async fn invoke(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<String, BackendError> {
        self.begin(model_id, prompt, false).await;
        if let (Some(message), None) = (&self.failure, self.fail_after) {
            return Err(BackendError::model(model_id, message));
        }
        Ok(self.reply.clone().unwrap_or_else(|| self.chunks.concat()))
    }

    async fn stream(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<TextStream, BackendError> {
        self.begin(model_id, prompt, true).await;
        let mut items: Vec<Result<String, BackendError>> = match (&self.failure, self.fail_after) {
            (Some(message), None) => return Err(BackendError::model(model_id, message)),
            (_, Some(count)) => self.chunks.iter().take(count).cloned().map(Ok).collect(),
            (None, None) => self.chunks.iter().cloned().map(Ok).collect(),
        };
        if let (Some(message), Some(_)) = (&self.failure, self.fail_after) {
            items.push(Err(BackendError::model(model_id, message)));
        }

        let emitted = Arc::clone(&self.emitted);
        Ok(stream::iter(items)
            .inspect(move |item| {
                if item.is_ok() {
                    emitted.fetch_add(1, Ordering::SeqCst);
                }
            })
            .boxed())
    }
}

/// A model backend whose every call fails.
#[derive(Debug, Clone)]
pub struct FailingModelBackend {
    message: String,
}

impl FailingModelBackend {
    /// Creates a backend failing with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for FailingModelBackend {
    fn default() -> Self {
        Self::new("model unavailable")
    }
}

#[async_trait]
impl ModelBackend for FailingModelBackend {
    async fn invoke(&self, model_id: &str, _prompt: &[ChatMessage]) -> Result<String, BackendError> {
        Err(BackendError::model(model_id, &self.message))
    }

    async fn stream(&self, model_id: &str, _prompt: &[ChatMessage]) -> Result<TextStream, BackendError> {
        Err(BackendError::model(model_id, &self.message))
    }
}
