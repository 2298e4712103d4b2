//! In-memory session store.

use super::{ChatMessage, SessionStore};
use crate::errors::BackendError;
use crate::utils::message_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// A persisted conversation turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Owning session.
    pub session_id: String,
    /// Record time.
    pub timestamp: DateTime<Utc>,
    /// Derived from session, content and timestamp.
    pub message_id: String,
    /// The turn text.
    pub content: String,
    /// `user` or `ai`.
    pub role: String,
    /// Record type; always `text`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Where the turn came from, if known.
    pub source: Option<String>,
}

impl SessionRecord {
    /// Creates a text record stamped with the current time.
    #[must_use]
    pub fn text(session_id: &str, content: &str, role: &str, source: Option<String>) -> Self {
        let timestamp = Utc::now();
        Self {
            session_id: session_id.to_string(),
            message_id: message_id(session_id, content, &timestamp),
            timestamp,
            content: content.to_string(),
            role: role.to_string(),
            kind: "text".to_string(),
            source,
        }
    }

    /// Returns the `{role, content}` view of the record.
    #[must_use]
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage::new(self.role.clone(), self.content.clone())
    }
}

/// Session store kept in process memory.
///
/// Records of a session are kept in append order, which is record-time order.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Vec<SessionRecord>>>,
}

impl InMemorySessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every record of a session.
    #[must_use]
    pub fn records(&self, session_id: &str) -> Vec<SessionRecord> {
        self.sessions
            .read()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns the number of sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn append(
        &self,
        session_id: &str,
        text: &str,
        role: &str,
        source: Option<String>,
    ) -> Result<(), BackendError> {
        let record = SessionRecord::text(session_id, text, role, source);
        debug!(session_id, role, message_id = %record.message_id, "Saving session message");
        self.sessions
            .write()
            .entry(session_id.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn latest_n(&self, session_id: &str, n: usize) -> Result<Vec<ChatMessage>, BackendError> {
        let sessions = self.sessions.read();
        let records = sessions.get(session_id).map(Vec::as_slice).unwrap_or_default();
        let start = records.len().saturating_sub(n);
        Ok(records[start..].iter().map(SessionRecord::to_message).collect())
    }
}
