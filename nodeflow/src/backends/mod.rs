//! Interfaces to the external collaborators: the model backend and the session store.
//!
//! The engine depends only on the traits here. Concrete backends live in the
//! submodules; the HTTP model backend is behind the `http-backend` feature.

mod echo;
#[cfg(feature = "http-backend")]
mod http;
mod session;

pub use echo::EchoModelBackend;
#[cfg(feature = "http-backend")]
pub use http::HttpModelBackend;
pub use session::{InMemorySessionStore, SessionRecord};

use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

/// A lazy sequence of text chunks produced by a streaming model call.
pub type TextStream = BoxStream<'static, Result<String, BackendError>>;

/// One conversation turn, as sent to a model or read back from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// The speaker role (`system`, `user`, `ai`, ...).
    pub role: String,
    /// The message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a new message.
    #[must_use]
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A model-invocation backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Invokes the model and returns the full reply.
    async fn invoke(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<String, BackendError>;

    /// Invokes the model and returns its reply as a stream of chunks.
    ///
    /// Dropping the returned stream must release whatever the call holds.
    async fn stream(&self, model_id: &str, prompt: &[ChatMessage]) -> Result<TextStream, BackendError>;
}

/// A store of conversation turns keyed by session id.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Appends a turn to the session.
    async fn append(
        &self,
        session_id: &str,
        text: &str,
        role: &str,
        source: Option<String>,
    ) -> Result<(), BackendError>;

    /// Returns the last `n` turns of the session in chronological order.
    async fn latest_n(&self, session_id: &str, n: usize) -> Result<Vec<ChatMessage>, BackendError>;
}
