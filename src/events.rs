//! Server-sent events for the chat stream.
//!
//! One exchange produces, in order:
//! - `session` with the session identifier
//! - one or more `message.delta` events revealing the answer
//! - zero or more `citation` events
//! - `done`
//!
//! or, when the exchange fails, `error` followed by `done`.
//!
//! # Example
//!
//! ```rust
//! use god_chatbot::events::{ChatEvent, sse_event};
//!
//! let event = ChatEvent::MessageDelta {
//!     text: "Hare Krishna".to_string(),
//! };
//! let sse = sse_event(&event);
//! assert!(sse.contains("message.delta"));
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::vertex::Citation;

/// Events emitted on the chat stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum ChatEvent {
    /// Identifies the session the exchange belongs to.
    #[serde(rename = "session")]
    Session { session_id: String },

    /// Text to append to the bot bubble.
    #[serde(rename = "message.delta")]
    MessageDelta { text: String },

    /// A grounding source for the answer.
    #[serde(rename = "citation")]
    Citation(Citation),

    /// The exchange failed; the question stays unanswered.
    #[serde(rename = "error")]
    Error { kind: String, message: String },

    /// No further events follow.
    #[serde(rename = "done")]
    Done,
}

impl From<&ChatError> for ChatEvent {
    fn from(err: &ChatError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Get the SSE event name for a [`ChatEvent`].
pub fn event_name(evt: &ChatEvent) -> &'static str {
    match evt {
        ChatEvent::Session { .. } => "session",
        ChatEvent::MessageDelta { .. } => "message.delta",
        ChatEvent::Citation(_) => "citation",
        ChatEvent::Error { .. } => "error",
        ChatEvent::Done => "done",
    }
}

/// Convert a [`ChatEvent`] to an SSE-formatted string.
///
/// The output carries both an `event:` line (for `EventSource` listeners)
/// and a `data:` line with the JSON payload.
pub fn sse_event(evt: &ChatEvent) -> String {
    let json = serde_json::to_string(evt).unwrap_or_else(|e| {
        serde_json::json!({ "type": "error", "data": { "kind": "internal", "message": e.to_string() } })
            .to_string()
    });

    format!("event: {}\ndata: {json}\n\n", event_name(evt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_delta_serialization() {
        let event = ChatEvent::MessageDelta {
            text: "Hello".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("message.delta"));
        assert!(json.contains("Hello"));
    }

    #[test]
    fn test_sse_event_format() {
        let sse = sse_event(&ChatEvent::Done);
        assert!(sse.starts_with("event: done\n"));
        assert!(sse.contains("data: "));
        assert!(sse.ends_with("\n\n"));
    }

    #[test]
    fn test_error_event_from_chat_error() {
        let event = ChatEvent::from(&ChatError::EmptyReply);
        let sse = sse_event(&event);
        assert!(sse.starts_with("event: error\n"));
        assert!(sse.contains("empty_reply"));
    }

    #[test]
    fn test_citation_serialization() {
        let event = ChatEvent::Citation(Citation {
            index: 0,
            uri: "gs://qa/1.txt".to_string(),
            title: Some("Q&A 1".to_string()),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "citation");
        assert_eq!(json["data"]["uri"], "gs://qa/1.txt");
    }
}
