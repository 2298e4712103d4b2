//! Offline model backend that echoes the prompt back.

use super::{ChatMessage, ModelBackend, TextStream};
use crate::errors::BackendError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

/// Deterministic backend that replies with the last `user` message.
///
/// Streams split the reply after each space, so the concatenated chunks equal
/// the synchronous reply.
#[derive(Debug, Clone, Default)]
pub struct EchoModelBackend {
    prefix: String,
}

impl EchoModelBackend {
    /// Creates a new echo backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepends a fixed prefix to every reply.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn reply(&self, prompt: &[ChatMessage]) -> String {
        let last_user = prompt
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map_or("", |m| m.content.as_str());
        format!("{}{}", self.prefix, last_user)
    }
}

#[async_trait]
impl ModelBackend for EchoModelBackend {
    async fn invoke(&self, _model_id: &str, prompt: &[ChatMessage]) -> Result<String, BackendError> {
        Ok(self.reply(prompt))
    }

    async fn stream(&self, _model_id: &str, prompt: &[ChatMessage]) -> Result<TextStream, BackendError> {
        let chunks: Vec<Result<String, BackendError>> = self
            .reply(prompt)
            .split_inclusive(' ')
            .map(|chunk| Ok(chunk.to_string()))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }
}
