// Public modules
pub mod auth;
pub mod chat_model;
pub mod chat_record;
pub mod chat_turn;
pub mod client_event;
pub mod conversation_ref;
pub mod server_event;

// Re-exports
pub use auth::{AuthSession, AuthUser};
pub use chat_model::ChatModel;
pub use chat_record::{AgentQuery, ChatEntry, ChatRecord, ChatSummary};
pub use chat_turn::{ChatTurn, Role};
pub use client_event::{ClientEvent, InitializeEvent, NewChatEvent, SendEvent};
pub use conversation_ref::ConversationRef;
pub use server_event::{
    ChatTitleEvent, ErrorEvent, InitializeAckEvent, NewChatAckEvent, ReplyEvent, ServerEvent,
};
