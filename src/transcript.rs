//! The transcript store.
//!
//! [`TranscriptStore`] owns the ordered list of chat turns plus the derived
//! `loading`, `sending`, and `connected` flags.  It performs no I/O.  Every
//! mutation goes through [`TranscriptStore::update`], which applies a batch of
//! changes and publishes them as exactly one new revision, so an observer can
//! never see half of a multi-field change (for example a user turn without the
//! placeholder that follows it).
//!
//! Turns are held behind [`Arc`] so that rewriting the last turn while a reply
//! streams leaves every earlier turn pointer-identical, which lets renderers
//! skip unchanged rows cheaply.

use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;
use crate::types::{ChatTurn, Role};

/// A snapshot of the transcript and its flags at one revision.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    revision: u64,
    history: Vec<Arc<ChatTurn>>,
    title: Option<String>,
    loading: bool,
    sending: bool,
    connected: bool,
    last_error: Option<Error>,
}

impl Transcript {
    /// Monotonic revision counter; bumped once per [`TranscriptStore::update`].
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The turns, oldest first.
    pub fn history(&self) -> &[Arc<ChatTurn>] {
        &self.history
    }

    /// The most recent turn.
    pub fn last_turn(&self) -> Option<&ChatTurn> {
        self.history.last().map(Arc::as_ref)
    }

    /// The conversation title, when known.
    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    /// True between opening a connection and receiving the handshake acknowledgment.
    pub fn loading(&self) -> bool {
        self.loading
    }

    /// True while a message is in flight and its reply has not terminated.
    pub fn sending(&self) -> bool {
        self.sending
    }

    /// True while the live connection is open.
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// The most recent error surfaced by the service, if not yet cleared.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// True when the last turn is an empty assistant placeholder.
    pub fn reply_pending(&self) -> bool {
        self.last_turn().is_some_and(ChatTurn::is_pending)
    }

    /// Replace the whole transcript.
    pub fn set_history(&mut self, turns: impl IntoIterator<Item = ChatTurn>) {
        self.history = turns.into_iter().map(Arc::new).collect();
    }

    /// Remove every turn.
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Append one turn.
    pub fn append_turn(&mut self, turn: ChatTurn) {
        self.history.push(Arc::new(turn));
    }

    /// Swap the last turn for `turn`, keeping every earlier turn as-is.
    ///
    /// Returns false, and changes nothing, when the transcript is empty.
    fn replace_last(&mut self, turn: ChatTurn) -> bool {
        match self.history.last_mut() {
            Some(last) => {
                *last = Arc::new(turn);
                true
            }
            None => false,
        }
    }

    /// Append `text` to the streaming assistant turn.
    ///
    /// When the last turn is not an assistant turn a new assistant turn is
    /// started so that no text is lost.
    pub fn append_reply_text(&mut self, text: &str) {
        match self.last_turn() {
            Some(last) if last.role == Role::Assistant => {
                let extended = last.extended(text);
                self.replace_last(extended);
            }
            _ => self.append_turn(ChatTurn::assistant(text)),
        }
    }

    /// Mark a pending placeholder as failed.  Returns whether one was marked.
    pub fn fail_pending_reply(&mut self) -> bool {
        match self.last_turn() {
            Some(last) if last.is_pending() => {
                let mut failed = last.clone();
                failed.failed = true;
                self.replace_last(failed)
            }
            _ => false,
        }
    }

    /// Mark a pending placeholder as finished, leaving it empty.  Returns
    /// whether one was marked.
    pub fn complete_pending_reply(&mut self) -> bool {
        match self.last_turn() {
            Some(last) if last.is_pending() => {
                let complete = last.clone().completed();
                self.replace_last(complete)
            }
            _ => false,
        }
    }

    /// Set or clear the title.
    pub fn set_title(&mut self, title: Option<String>) {
        self.title = title;
    }

    /// Set the `loading` flag.
    pub fn set_loading(&mut self, loading: bool) {
        self.loading = loading;
    }

    /// Set the `sending` flag.
    pub fn set_sending(&mut self, sending: bool) {
        self.sending = sending;
    }

    /// Set the `connected` flag.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Record or clear the surfaced error.
    pub fn set_last_error(&mut self, error: Option<Error>) {
        self.last_error = error;
    }
}

/// Explicitly constructed container for the transcript of one chat view.
///
/// The store is shared by handle (`Arc<TranscriptStore>`) between the
/// protocol client, the history loader, and whatever renders the transcript.
#[derive(Debug)]
pub struct TranscriptStore {
    state: watch::Sender<Transcript>,
}

impl TranscriptStore {
    /// Create an empty store at revision zero.
    pub fn new() -> Self {
        let (state, _) = watch::channel(Transcript::default());
        Self { state }
    }

    /// Apply `f` as one atomic change and return the new revision.
    pub fn update<F>(&self, f: F) -> u64
    where
        F: FnOnce(&mut Transcript),
    {
        let mut revision = 0;
        self.state.send_modify(|transcript| {
            f(transcript);
            transcript.revision += 1;
            revision = transcript.revision;
        });
        revision
    }

    /// A copy of the current state.  Turns are shared, not deep-copied.
    pub fn snapshot(&self) -> Transcript {
        self.state.borrow().clone()
    }

    /// Observe future revisions.
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use palaver::{ChatTurn, TranscriptStore};
    ///
    /// let store = TranscriptStore::new();
    /// let mut rx = store.subscribe();
    /// store.append_turn(ChatTurn::user("hi"));
    /// rx.changed().await.unwrap();
    /// assert_eq!(rx.borrow_and_update().history().len(), 1);
    /// # });
    /// ```
    pub fn subscribe(&self) -> watch::Receiver<Transcript> {
        self.state.subscribe()
    }

    /// The current revision.
    pub fn revision(&self) -> u64 {
        self.state.borrow().revision
    }

    /// The current turns.
    pub fn history(&self) -> Vec<Arc<ChatTurn>> {
        self.state.borrow().history.clone()
    }

    /// Current `loading` flag.
    pub fn loading(&self) -> bool {
        self.state.borrow().loading
    }

    /// Current `sending` flag.
    pub fn sending(&self) -> bool {
        self.state.borrow().sending
    }

    /// Current `connected` flag.
    pub fn connected(&self) -> bool {
        self.state.borrow().connected
    }

    /// Replace the whole transcript.
    pub fn set_history(&self, turns: Vec<ChatTurn>) -> u64 {
        self.update(|t| t.set_history(turns))
    }

    /// Remove every turn.
    pub fn clear_history(&self) -> u64 {
        self.update(Transcript::clear_history)
    }

    /// Append one turn.
    pub fn append_turn(&self, turn: ChatTurn) -> u64 {
        self.update(|t| t.append_turn(turn))
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_store_is_empty() {
        let store = TranscriptStore::new();
        let snapshot = store.snapshot();
        assert_eq!(snapshot.revision(), 0);
        assert!(snapshot.history().is_empty());
        assert!(!snapshot.loading());
        assert!(!snapshot.sending());
        assert!(!snapshot.connected());
        assert!(!snapshot.reply_pending());
    }

    #[test]
    fn append_grows_by_one_and_preserves_identity() {
        let store = TranscriptStore::new();
        for i in 0..5 {
            let before = store.history();
            store.append_turn(ChatTurn::user(format!("message {i}")));
            let after = store.history();
            assert_eq!(after.len(), before.len() + 1);
            for (old, new) in before.iter().zip(after.iter()) {
                assert!(Arc::ptr_eq(old, new));
            }
            assert_eq!(after.last().unwrap().content, format!("message {i}"));
        }
    }

    #[test]
    fn update_publishes_one_revision() {
        let store = TranscriptStore::new();
        let mut rx = store.subscribe();
        let revision = store.update(|t| {
            t.append_turn(ChatTurn::user("hi"));
            t.append_turn(ChatTurn::placeholder());
            t.set_sending(true);
        });
        assert_eq!(revision, 1);
        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen.revision(), 1);
        assert_eq!(seen.history().len(), 2);
        assert!(seen.reply_pending());
        assert!(seen.sending());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn replace_last_keeps_earlier_turns() {
        let store = TranscriptStore::new();
        store.update(|t| {
            t.append_turn(ChatTurn::user("hi"));
            t.append_turn(ChatTurn::placeholder());
        });
        let before = store.history();
        store.update(|t| t.append_reply_text("Hel"));
        store.update(|t| t.append_reply_text("lo"));
        let after = store.history();
        assert!(Arc::ptr_eq(&before[0], &after[0]));
        assert!(!Arc::ptr_eq(&before[1], &after[1]));
        assert_eq!(after[1].content, "Hello");
        assert_eq!(after[1].created_at, before[1].created_at);
    }

    #[test]
    fn reply_text_without_placeholder_starts_assistant_turn() {
        let store = TranscriptStore::new();
        store.append_turn(ChatTurn::user("hi"));
        store.update(|t| t.append_reply_text("Hello"));
        let history = store.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, "Hello");
    }

    #[test]
    fn fail_pending_reply_only_touches_placeholders() {
        let mut transcript = Transcript::default();
        assert!(!transcript.fail_pending_reply());
        transcript.append_turn(ChatTurn::user("hi"));
        transcript.append_turn(ChatTurn::placeholder());
        assert!(transcript.fail_pending_reply());
        assert!(transcript.last_turn().unwrap().failed);
        assert!(!transcript.reply_pending());
        assert!(!transcript.fail_pending_reply());
    }

    #[test]
    fn completing_an_empty_reply_resolves_it() {
        let mut transcript = Transcript::default();
        transcript.append_turn(ChatTurn::user("hi"));
        transcript.append_turn(ChatTurn::placeholder());
        assert!(transcript.complete_pending_reply());
        assert!(!transcript.reply_pending());
        assert_eq!(transcript.last_turn().unwrap().content, "");
        assert!(!transcript.last_turn().unwrap().failed);
        assert!(!transcript.complete_pending_reply());
    }

    #[test]
    fn clear_and_set_history() {
        let store = TranscriptStore::new();
        store.set_history(vec![ChatTurn::user("a"), ChatTurn::assistant("b")]);
        assert_eq!(store.history().len(), 2);
        store.clear_history();
        assert!(store.history().is_empty());
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn replace_last_on_empty_is_a_no_op() {
        let mut transcript = Transcript::default();
        assert!(!transcript.replace_last(ChatTurn::user("x")));
        assert!(transcript.history().is_empty());
    }
}
