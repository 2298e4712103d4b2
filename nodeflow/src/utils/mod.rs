//! Identifier helpers for sessions, messages and runs.

mod ids;

pub use ids::{generate_run_id, message_id, session_id, upper_md5};
