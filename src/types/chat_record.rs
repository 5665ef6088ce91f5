use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::types::{ConversationRef, Role};

/// The most recent prompt submitted to a conversation and, once answered, its result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQuery {
    /// The user prompt.
    pub prompt: String,

    /// Model the prompt was answered with.
    #[serde(default)]
    pub model: Option<String>,

    /// The reply text, once the query completed.
    #[serde(default)]
    pub result: Option<String>,

    /// Submission time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// A persisted turn as returned by the conversation-retrieval endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    /// Who wrote the turn.
    pub role: Role,

    /// Text of the turn.
    pub content: String,

    /// When the turn was written, if recorded.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,
}

/// A conversation record from `GET /api/chats/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    /// Conversation identifier.
    pub id: ConversationRef,

    /// Owner of the conversation.
    pub user_id: String,

    /// Generated title, if any.
    #[serde(default)]
    pub title: Option<String>,

    /// Model last used in the conversation.
    #[serde(default)]
    pub model: Option<String>,

    /// Persisted turns, oldest first.
    #[serde(default)]
    pub history: Option<Vec<ChatEntry>>,

    /// The prompt most recently submitted.
    #[serde(default)]
    pub cur_query: Option<AgentQuery>,

    /// Whether the reply to `cur_query` is still being produced.
    #[serde(default)]
    pub pending: bool,

    /// Creation time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,

    /// Last modification time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub updated_at: Option<OffsetDateTime>,
}

/// One row of `GET /api/chats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    /// Conversation identifier.
    pub id: ConversationRef,

    /// Generated title, if any.
    #[serde(default)]
    pub title: Option<String>,

    /// Creation time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub ts: Option<OffsetDateTime>,

    /// Last modification time.
    #[serde(default, with = "crate::utils::time::lenient")]
    pub updated_at: Option<OffsetDateTime>,
}
