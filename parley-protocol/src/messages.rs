//! Outbound message kinds

use crate::types::SessionId;

/// A line the relay sends to a client
///
/// `Display` renders the exact wire text, without the trailing newline
/// (the codec appends it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Private greeting sent only to a newly connected session
    Welcome { id: SessionId },
    /// A session joined the room
    Entered { id: SessionId },
    /// A session left the room
    Left { id: SessionId },
    /// A chat line from a session
    Chat { id: SessionId, content: String },
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::Welcome { id } => write!(f, "Welcome {} to chat room!", id),
            Notice::Entered { id } => write!(f, "{} has entered the chat room!", id),
            Notice::Left { id } => write!(f, "{} has left the chat room!", id),
            Notice::Chat { id, content } => write!(f, "{}: {}", id, content),
        }
    }
}

impl From<Notice> for String {
    fn from(notice: Notice) -> Self {
        notice.to_string()
    }
}

// ==================== Echo Endpoint ====================

/// Body served at the echo endpoint's index
pub const ECHO_INDEX_BODY: &str = "hello";

/// Fixed acknowledgment sent back over the websocket
pub const ECHO_REPLY: &str = "hello websocket client";

/// The acknowledgment encoded as a JSON text frame payload
pub fn echo_reply_json() -> String {
    serde_json::Value::String(ECHO_REPLY.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn fixed_id() -> SessionId {
        SessionId::from_uuid(Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap())
    }

    #[test]
    fn test_wire_text() {
        let id = fixed_id();
        assert_eq!(
            Notice::Welcome { id }.to_string(),
            "Welcome 00000000-0000-4000-8000-000000000001 to chat room!"
        );
        assert_eq!(
            Notice::Entered { id }.to_string(),
            "00000000-0000-4000-8000-000000000001 has entered the chat room!"
        );
        assert_eq!(
            Notice::Left { id }.to_string(),
            "00000000-0000-4000-8000-000000000001 has left the chat room!"
        );
        assert_eq!(
            Notice::Chat {
                id,
                content: "hi".into()
            }
            .to_string(),
            "00000000-0000-4000-8000-000000000001: hi"
        );
    }

    #[test]
    fn test_chat_keeps_content_verbatim() {
        let id = fixed_id();
        let line: String = Notice::Chat {
            id,
            content: "  a: b  ".into(),
        }
        .into();
        assert!(line.ends_with(":   a: b  "));
    }

    #[test]
    fn test_echo_reply_is_json_string() {
        assert_eq!(echo_reply_json(), "\"hello websocket client\"");
    }
}
