use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// The author of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message typed by the user.
    User,
    /// A message produced by the chat service.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message in a conversation transcript.
///
/// Turns are immutable once superseded.  Only the last turn of a transcript is
/// ever rewritten, and only by growing its content while a reply streams in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTurn {
    /// Who wrote the turn.
    pub role: Role,

    /// Text of the turn.
    pub content: String,

    /// When the turn was created.  Client-assigned for live turns.
    #[serde(with = "crate::utils::time")]
    pub created_at: OffsetDateTime,

    /// Set when the service reported an error while this turn was pending.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,

    /// Set when the reply this turn stood in for has terminated.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub complete: bool,
}

impl ChatTurn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self::at(role, content, OffsetDateTime::now_utc())
    }

    /// Create a turn with an explicit timestamp.
    pub fn at(role: Role, content: impl Into<String>, created_at: OffsetDateTime) -> Self {
        Self {
            role,
            content: content.into(),
            created_at,
            failed: false,
            complete: false,
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Create the empty assistant turn that stands in for a reply in flight.
    pub fn placeholder() -> Self {
        Self::assistant(String::new())
    }

    /// Mark this turn as finished, even if it is empty.
    pub fn completed(mut self) -> Self {
        self.complete = true;
        self
    }

    /// True for an empty assistant turn still waiting on its reply.
    pub fn is_pending(&self) -> bool {
        self.role == Role::Assistant && self.content.is_empty() && !self.failed && !self.complete
    }

    /// Return a copy of this turn with `text` appended.
    pub fn extended(&self, text: &str) -> Self {
        let mut turn = self.clone();
        turn.content.push_str(text);
        turn
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    #[test]
    fn chat_turn_serialization() {
        let turn = ChatTurn::at(Role::User, "hello", datetime!(2025-01-02 03:04:05 UTC));
        assert_eq!(
            serde_json::to_value(&turn).unwrap(),
            json!({
                "role": "user",
                "content": "hello",
                "createdAt": "2025-01-02T03:04:05Z"
            })
        );
    }

    #[test]
    fn failed_flag_round_trips_when_set() {
        let mut turn = ChatTurn::at(Role::Assistant, "", datetime!(2025-01-02 03:04:05 UTC));
        turn.failed = true;
        let value = serde_json::to_value(&turn).unwrap();
        assert_eq!(value["failed"], json!(true));
        let back: ChatTurn = serde_json::from_value(value).unwrap();
        assert!(back.failed);
        assert!(!back.is_pending());
    }

    #[test]
    fn placeholder_is_pending_until_filled() {
        let placeholder = ChatTurn::placeholder();
        assert!(placeholder.is_pending());
        let filled = placeholder.extended("Hi");
        assert!(!filled.is_pending());
        assert_eq!(filled.content, "Hi");
        assert_eq!(filled.created_at, placeholder.created_at);
        assert!(!ChatTurn::user("").is_pending());
    }

    #[test]
    fn completed_empty_reply_is_not_pending() {
        let done = ChatTurn::placeholder().completed();
        assert!(done.complete);
        assert!(!done.is_pending());
        assert_eq!(done.content, "");
    }
}
