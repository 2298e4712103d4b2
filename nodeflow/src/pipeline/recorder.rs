//! Post-run session recording.

use crate::backends::SessionStore;
use crate::errors::BackendError;
use crate::nodes::DEFAULT_SESSION_VARIABLE;
use crate::store::VariableStore;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Variable holding the user's turn.
pub const DEFAULT_INPUT_VARIABLE: &str = "input";

/// Result of a recording attempt that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Both turns were appended.
    Recorded {
        /// The session the turns went to.
        session_id: String,
    },
    /// Nothing was appended.
    Skipped {
        /// Why recording did not apply.
        reason: &'static str,
    },
}

/// Appends the user turn and the reply of a finished run to the session store.
#[derive(Clone)]
pub struct SessionRecorder {
    sessions: Arc<dyn SessionStore>,
    input_variable: String,
    session_variable: String,
}

impl SessionRecorder {
    /// Creates a recorder writing to `sessions`.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            sessions,
            input_variable: DEFAULT_INPUT_VARIABLE.to_string(),
            session_variable: DEFAULT_SESSION_VARIABLE.to_string(),
        }
    }

    /// Reads the user turn from another variable.
    #[must_use]
    pub fn with_input_variable(mut self, name: impl Into<String>) -> Self {
        self.input_variable = name.into();
        self
    }

    /// Reads the session id from another variable.
    #[must_use]
    pub fn with_session_variable(mut self, name: impl Into<String>) -> Self {
        self.session_variable = name.into();
        self
    }

    /// Appends `input` as a `user` turn, then `reply` as an `ai` turn.
    ///
    /// Skips when the store has no string session id or no input.
    ///
    /// # Errors
    ///
    /// Returns the session store's error. The `user` turn may already have
    /// been appended when the `ai` append fails.
    pub async fn record(
        &self,
        store: &VariableStore,
        reply: &Value,
    ) -> Result<RecordOutcome, BackendError> {
        let Some(session_id) = store.get(&self.session_variable).and_then(Value::as_str) else {
            return Ok(RecordOutcome::Skipped {
                reason: "no session id",
            });
        };
        let Some(input) = store.get(&self.input_variable) else {
            return Ok(RecordOutcome::Skipped { reason: "no input" });
        };

        self.sessions
            .append(session_id, &turn_text(input), "user", None)
            .await?;
        self.sessions
            .append(session_id, &turn_text(reply), "ai", Some(String::new()))
            .await?;

        debug!(session_id, "Recorded session turns");
        Ok(RecordOutcome::Recorded {
            session_id: session_id.to_string(),
        })
    }
}

impl fmt::Debug for SessionRecorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRecorder")
            .field("input_variable", &self.input_variable)
            .field("session_variable", &self.session_variable)
            .finish_non_exhaustive()
    }
}

fn turn_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
