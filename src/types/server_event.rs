use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::types::{ChatModel, ConversationRef};

/// Handshake acknowledgment carrying the authoritative model catalog.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeAckEvent {
    /// The conversation the service bound this connection to, if any.
    #[serde(default)]
    pub chat_id: Option<ConversationRef>,

    /// Models the client may select.
    pub models: Vec<ChatModel>,

    /// Service send time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// Assigns the identifier of a just-created conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatAckEvent {
    /// The new conversation's identifier.
    pub chat_id: ConversationRef,

    /// Service send time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// A partial or final chunk of the assistant's reply.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyEvent {
    /// Text to append verbatim to the pending turn.
    #[serde(default)]
    pub text: Option<String>,

    /// Terminal marker for the reply.
    #[serde(default)]
    pub done: bool,

    /// Service send time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// The service generated or changed the conversation's title.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTitleEvent {
    /// The conversation the title belongs to.
    #[serde(default)]
    pub chat_id: Option<ConversationRef>,

    /// The title text.
    pub title: String,

    /// Service send time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// An unrecoverable failure of the in-flight operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEvent {
    /// Machine-readable error code.
    pub code: String,

    /// Human-readable detail.
    pub detail: String,

    /// Service send time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// An event received from the chat service.
///
/// Parsing never fails: frames that are not valid events become
/// [`ServerEvent::Unparseable`] and events with an unrecognized `type` become
/// [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `initialize_ack`
    InitializeAck(InitializeAckEvent),
    /// `new_chat_ack`
    NewChatAck(NewChatAckEvent),
    /// `reply`
    Reply(ReplyEvent),
    /// `chat_title`
    ChatTitle(ChatTitleEvent),
    /// `error`
    Error(ErrorEvent),
    /// A well-formed event of a type this client does not know.
    Unknown {
        /// The unrecognized discriminator.
        event_type: String,
    },
    /// A frame that could not be parsed as an event.
    Unparseable {
        /// Why parsing failed.
        reason: String,
    },
}

impl ServerEvent {
    /// Parse one inbound text frame.
    pub fn parse(frame: &str) -> Self {
        let value: Value = match serde_json::from_str(frame) {
            Ok(value) => value,
            Err(err) => {
                return ServerEvent::Unparseable {
                    reason: format!("invalid JSON: {err}"),
                };
            }
        };
        let Some(event_type) = value.get("type").and_then(Value::as_str) else {
            return ServerEvent::Unparseable {
                reason: "missing event type".to_string(),
            };
        };
        let event_type = event_type.to_string();
        let parsed = match event_type.as_str() {
            "initialize_ack" => serde_json::from_value(value).map(ServerEvent::InitializeAck),
            "new_chat_ack" => serde_json::from_value(value).map(ServerEvent::NewChatAck),
            "reply" => serde_json::from_value(value).map(ServerEvent::Reply),
            "chat_title" => serde_json::from_value(value).map(ServerEvent::ChatTitle),
            "error" => serde_json::from_value(value).map(ServerEvent::Error),
            _ => return ServerEvent::Unknown { event_type },
        };
        parsed.unwrap_or_else(|err| ServerEvent::Unparseable {
            reason: format!("invalid {event_type} event: {err}"),
        })
    }

    /// The wire discriminator, or a placeholder for unparseable frames.
    pub fn event_type(&self) -> &str {
        match self {
            ServerEvent::InitializeAck(_) => "initialize_ack",
            ServerEvent::NewChatAck(_) => "new_chat_ack",
            ServerEvent::Reply(_) => "reply",
            ServerEvent::ChatTitle(_) => "chat_title",
            ServerEvent::Error(_) => "error",
            ServerEvent::Unknown { event_type } => event_type,
            ServerEvent::Unparseable { .. } => "<unparseable>",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_initialize_ack() {
        let event = ServerEvent::parse(
            r#"{"type":"initialize_ack","chatId":null,"models":[{"id":"a","label":"A","isDefault":true}]}"#,
        );
        let ServerEvent::InitializeAck(ack) = event else {
            panic!("expected initialize_ack, got {event:?}");
        };
        assert_eq!(ack.chat_id, None);
        assert_eq!(ack.models, vec![ChatModel::new("a", "A").with_default(true)]);
    }

    #[test]
    fn parses_new_chat_ack() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"new_chat_ack","chatId":"c1"}"#),
            ServerEvent::NewChatAck(NewChatAckEvent {
                chat_id: "c1".into(),
                ts: None,
            })
        );
    }

    #[test]
    fn reply_fields_default() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"reply","done":true}"#),
            ServerEvent::Reply(ReplyEvent {
                text: None,
                done: true,
                ts: None,
            })
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"reply","text":"Hel"}"#),
            ServerEvent::Reply(ReplyEvent {
                text: Some("Hel".to_string()),
                done: false,
                ts: None,
            })
        );
    }

    #[test]
    fn parses_server_timestamps_without_zone() {
        let ServerEvent::Reply(reply) =
            ServerEvent::parse(r#"{"type":"reply","text":"x","ts":"2025-05-01T10:00:00.5"}"#)
        else {
            panic!("expected reply");
        };
        assert!(reply.ts.is_some());
    }

    #[test]
    fn invalid_timestamp_does_not_drop_the_chunk() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"reply","text":"x","ts":123}"#),
            ServerEvent::Reply(ReplyEvent {
                text: Some("x".to_string()),
                done: false,
                ts: None,
            })
        );
        assert_eq!(
            ServerEvent::parse(r#"{"type":"reply","done":true,"ts":"whenever"}"#),
            ServerEvent::Reply(ReplyEvent {
                text: None,
                done: true,
                ts: None,
            })
        );
    }

    #[test]
    fn parses_error_and_title() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"error","code":"no_session","detail":"nope"}"#),
            ServerEvent::Error(ErrorEvent {
                code: "no_session".to_string(),
                detail: "nope".to_string(),
                ts: None,
            })
        );
        let event = ServerEvent::parse(r#"{"type":"chat_title","chatId":"c1","title":"Greetings"}"#);
        assert_eq!(event.event_type(), "chat_title");
    }

    #[test]
    fn unknown_types_are_not_errors() {
        assert_eq!(
            ServerEvent::parse(r#"{"type":"typing","who":"assistant"}"#),
            ServerEvent::Unknown {
                event_type: "typing".to_string()
            }
        );
    }

    #[test]
    fn malformed_frames_are_unparseable() {
        assert!(matches!(
            ServerEvent::parse("not json"),
            ServerEvent::Unparseable { .. }
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"text":"no type"}"#),
            ServerEvent::Unparseable { .. }
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"error","code":"x"}"#),
            ServerEvent::Unparseable { .. }
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"reply","text":42}"#),
            ServerEvent::Unparseable { .. }
        ));
    }
}
