//! Loading persisted conversations into the transcript.
//!
//! [`reconcile`] turns a conversation record into transcript turns.  A record
//! whose history is empty but which shows a prompt in flight yields that prompt
//! as a user turn, followed by an empty assistant placeholder when the reply is
//! still pending, so an interrupted stream resumes into the right slot once the
//! live connection reattaches.
//!
//! [`HistoryLoader`] fetches and reconciles a record but never writes the
//! store.  The protocol client applies the result, and only while the view it
//! was fetched for is still current.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::client::ChatApi;
use crate::error::Result;
use crate::observability::{HISTORY_LOAD_ERRORS, HISTORY_LOADS};
use crate::types::{ChatRecord, ChatTurn, ConversationRef, Role};

/// Source of persisted conversation records.
#[async_trait::async_trait]
pub trait ChatRecordSource: Send + Sync {
    /// Fetch the record of conversation `id`.
    async fn fetch_chat(&self, token: &str, id: &ConversationRef) -> Result<ChatRecord>;
}

#[async_trait::async_trait]
impl ChatRecordSource for ChatApi {
    async fn fetch_chat(&self, token: &str, id: &ConversationRef) -> Result<ChatRecord> {
        self.get_chat(token, id).await
    }
}

/// Convert a conversation record into transcript turns.
pub fn reconcile(record: &ChatRecord) -> Vec<ChatTurn> {
    let now = OffsetDateTime::now_utc();
    let history = record.history.as_deref().unwrap_or_default();
    if !history.is_empty() {
        // Persisted turns have terminated, even when empty.
        return history
            .iter()
            .map(|entry| {
                ChatTurn::at(entry.role, entry.content.clone(), entry.ts.unwrap_or(now)).completed()
            })
            .collect();
    }
    let Some(query) = &record.cur_query else {
        return Vec::new();
    };
    let mut turns = vec![ChatTurn::at(
        Role::User,
        query.prompt.clone(),
        query.ts.unwrap_or(now),
    )];
    if record.pending {
        turns.push(ChatTurn::at(Role::Assistant, String::new(), now));
    }
    turns
}

/// A reconciled conversation, ready to replace a transcript.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedHistory {
    /// The turns, oldest first.
    pub turns: Vec<ChatTurn>,
    /// The conversation title, when one has been generated.
    pub title: Option<String>,
}

impl LoadedHistory {
    /// True when the last turn awaits a reply still streaming on the service.
    pub fn reply_pending(&self) -> bool {
        self.turns.last().is_some_and(ChatTurn::is_pending)
    }
}

/// Fetches conversation records and reconciles them into turns.
pub struct HistoryLoader {
    source: Arc<dyn ChatRecordSource>,
}

impl HistoryLoader {
    /// Create a loader reading from `source`.
    pub fn new(source: Arc<dyn ChatRecordSource>) -> Self {
        Self { source }
    }

    /// Fetch conversation `id` and reconcile it.
    pub async fn load(&self, token: &str, id: &ConversationRef) -> Result<LoadedHistory> {
        HISTORY_LOADS.click();
        let record = match self.source.fetch_chat(token, id).await {
            Ok(record) => record,
            Err(err) => {
                HISTORY_LOAD_ERRORS.click();
                tracing::warn!(chat_id = %id, error = %err, "history load failed");
                return Err(err);
            }
        };
        let turns = reconcile(&record);
        tracing::debug!(chat_id = %id, turns = turns.len(), pending = record.pending, "history fetched");
        Ok(LoadedHistory {
            turns,
            title: record.title,
        })
    }
}

impl std::fmt::Debug for HistoryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryLoader").finish_non_exhaustive()
    }
}
