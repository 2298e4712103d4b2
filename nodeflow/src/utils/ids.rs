//! Hash-derived session and message identifiers.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use uuid::Uuid;

/// Returns the uppercase hex MD5 digest of `plain`.
#[must_use]
pub fn upper_md5(plain: &str) -> String {
    format!("{:X}", Md5::digest(plain.as_bytes()))
}

/// Derives a session id from the client address and the session timestamp.
///
/// The same pair always yields the same id, so a client that repeats its
/// session timestamp continues the same conversation.
#[must_use]
pub fn session_id(client: &str, session_timestamp: &str) -> String {
    format!("s-{}", upper_md5(&format!("{client}#{session_timestamp}")))
}

/// Derives a message id from the session, the content and the record time.
#[must_use]
pub fn message_id(session_id: &str, content: &str, at: &DateTime<Utc>) -> String {
    let stamp = at.timestamp_micros();
    format!("msg-{}", upper_md5(&format!("{session_id}#{content}#{stamp}")))
}

/// Generates an id for one pipeline invocation.
#[must_use]
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_md5_known_value() {
        assert_eq!(upper_md5("abc"), "900150983CD24FB0D6963F7D28E17F72");
    }

    #[test]
    fn test_session_id_is_stable() {
        let a = session_id("", "1700000000");
        let b = session_id("", "1700000000");
        assert_eq!(a, b);
        assert!(a.starts_with("s-"));
        assert_eq!(a.len(), 2 + 32);
        assert_ne!(a, session_id("", "1700000001"));
    }

    #[test]
    fn test_message_id_depends_on_time() {
        let t1 = Utc::now();
        let t2 = t1 + chrono::Duration::microseconds(1);
        assert_ne!(message_id("s", "hi", &t1), message_id("s", "hi", &t2));
        assert!(message_id("s", "hi", &t1).starts_with("msg-"));
    }

    #[test]
    fn test_run_ids_unique() {
        assert_ne!(generate_run_id(), generate_run_id());
    }
}
