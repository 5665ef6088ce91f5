use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::Result;
use crate::types::ConversationRef;

/// Declares which conversation, if any, a freshly opened connection operates on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeEvent {
    /// The conversation being resumed; absent for a new one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<ConversationRef>,

    /// Client send time.
    #[serde(
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<OffsetDateTime>,
}

/// Asks the service to create a conversation and answer its first turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatEvent {
    /// The user's first message.
    pub message: String,

    /// Model to answer with.  The service uses its default when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Client send time.
    #[serde(
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<OffsetDateTime>,
}

/// Appends a user turn to an existing conversation and requests a reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendEvent {
    /// The conversation to append to.
    pub chat_id: ConversationRef,

    /// The user's message.
    pub message: String,

    /// Model to answer with; `null` asks for the service default.
    pub model: Option<String>,

    /// Client send time.
    #[serde(
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub ts: Option<OffsetDateTime>,
}

/// An event sent from the client to the chat service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Handshake, sent once per connection open.
    Initialize(InitializeEvent),
    /// First message of a conversation that has no identifier yet.
    NewChat(NewChatEvent),
    /// Subsequent message of an identified conversation.
    Send(SendEvent),
}

impl ClientEvent {
    /// Build a handshake event.
    pub fn initialize(chat_id: Option<ConversationRef>) -> Self {
        ClientEvent::Initialize(InitializeEvent {
            chat_id,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    /// Build a `new_chat` event.
    pub fn new_chat(message: impl Into<String>, model: Option<String>) -> Self {
        ClientEvent::NewChat(NewChatEvent {
            message: message.into(),
            model,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    /// Build a `send` event.
    pub fn send(chat_id: ConversationRef, message: impl Into<String>, model: Option<String>) -> Self {
        ClientEvent::Send(SendEvent {
            chat_id,
            message: message.into(),
            model,
            ts: Some(OffsetDateTime::now_utc()),
        })
    }

    /// The wire discriminator of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClientEvent::Initialize(_) => "initialize",
            ClientEvent::NewChat(_) => "new_chat",
            ClientEvent::Send(_) => "send",
        }
    }

    /// Encode as a single-line JSON text frame.
    pub fn to_frame(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
