//! The protocol state machine.
//!
//! [`ProtocolMachine::reduce`] folds one [`Input`] (a transport lifecycle
//! callback, an inbound frame, a user intent, or a timer) into the machine
//! state and the transcript store, and returns the [`Command`]s the driver must
//! carry out.  It performs no I/O, so every ordering rule of the session
//! protocol can be tested without a socket.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::history::LoadedHistory;
use crate::identity::Route;
use crate::models::ModelSelector;
use crate::observability::{
    HISTORY_LOADS_DISCARDED, MALFORMED_FRAMES, PROTOCOL_ERRORS, REPLY_CHUNKS, UNKNOWN_EVENTS,
};
use crate::protocol::ReconnectPolicy;
use crate::transcript::TranscriptStore;
use crate::types::{ChatTurn, ClientEvent, ConversationRef, ServerEvent};

/// Lifecycle of the live connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection is wanted: no credential, or shut down.
    #[default]
    Idle,
    /// The transport is being opened.
    Connecting,
    /// The transport is open and the handshake has been sent.
    Open,
    /// The transport closed unexpectedly; a reconnect may be scheduled.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => write!(f, "idle"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Open => write!(f, "open"),
            ConnectionState::Closed => write!(f, "closed"),
        }
    }
}

/// Everything that can happen to a protocol client.
#[derive(Debug, Clone)]
pub enum Input {
    /// The view was mounted on, or navigated to, `route`.
    Mount(Route),
    /// The credential changed; `None` forbids an open connection.
    CredentialChanged(Option<String>),
    /// The transport reported "open".
    TransportOpened,
    /// The transport closed, failed, or could not be opened.
    TransportClosed,
    /// A text frame arrived.
    FrameReceived(String),
    /// A scheduled reconnect is due.
    ReconnectDue,
    /// A history fetch requested by [`Command::LoadHistory`] finished.
    HistoryLoaded {
        /// The generation the load was issued with.
        generation: u64,
        /// The reconciled conversation, or why it could not be fetched.
        result: Result<LoadedHistory>,
    },
    /// The user submitted a message.
    SendMessage(String),
    /// The user started a new conversation.
    StartNewChat,
    /// The user picked a model.
    SetModel(String),
    /// Tear the session down.
    Shutdown,
}

/// Side effects requested by the machine, executed in order by the driver.
#[derive(Debug, Clone)]
pub enum Command {
    /// Open the transport with `token`.  Replaces any current connection and
    /// cancels any scheduled reconnect.
    Connect {
        /// Credential to parameterize the connection URL with.
        token: String,
    },
    /// Write one event to the open transport.
    SendFrame(ClientEvent),
    /// Feed [`Input::ReconnectDue`] back after `delay`.
    ScheduleReconnect(Duration),
    /// Close the transport without reporting [`Input::TransportClosed`].
    Disconnect,
    /// Move the view to `route`.
    Navigate(Route),
    /// Fetch the persisted transcript of a conversation and report it back
    /// as [`Input::HistoryLoaded`].
    LoadHistory {
        /// The conversation to load.
        conversation: ConversationRef,
        /// Bearer credential for the fetch.
        token: String,
        /// Echoed in the result so that superseded loads can be told apart.
        generation: u64,
    },
    /// Report an error to the user.
    Surface(Error),
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Command::Connect { token: a }, Command::Connect { token: b }) => a == b,
            (Command::SendFrame(a), Command::SendFrame(b)) => a == b,
            (Command::ScheduleReconnect(a), Command::ScheduleReconnect(b)) => a == b,
            (Command::Disconnect, Command::Disconnect) => true,
            (Command::Navigate(a), Command::Navigate(b)) => a == b,
            (
                Command::LoadHistory {
                    conversation: c1,
                    token: t1,
                    generation: g1,
                },
                Command::LoadHistory {
                    conversation: c2,
                    token: t2,
                    generation: g2,
                },
            ) => c1 == c2 && t1 == t2 && g1 == g2,
            // Errors carry opaque sources; compare what the user would see.
            (Command::Surface(a), Command::Surface(b)) => a.to_string() == b.to_string(),
            _ => false,
        }
    }
}

/// State of one protocol client.
#[derive(Debug, Clone)]
pub struct ProtocolMachine {
    state: ConnectionState,
    route: Route,
    conversation: Option<ConversationRef>,
    credential: Option<String>,
    history_wanted: bool,
    history_generation: u64,
    history_pending: Option<u64>,
    streaming: bool,
    attempt: u32,
    policy: ReconnectPolicy,
    models: ModelSelector,
}

impl ProtocolMachine {
    /// Create an idle machine that reconnects according to `policy`.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Idle,
            route: Route::Home,
            conversation: None,
            credential: None,
            history_wanted: false,
            history_generation: 0,
            history_pending: None,
            streaming: false,
            attempt: 0,
            policy,
            models: ModelSelector::new(),
        }
    }

    /// The connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The route the view is on.
    pub fn route(&self) -> &Route {
        &self.route
    }

    /// The conversation this client operates on, if one has been assigned.
    pub fn conversation(&self) -> Option<&ConversationRef> {
        self.conversation.as_ref()
    }

    /// The model catalog and selection.
    pub fn models(&self) -> &ModelSelector {
        &self.models
    }

    /// True while the history of the current conversation is being fetched.
    /// The handshake is held back and sends are refused until it resolves.
    pub fn history_loading(&self) -> bool {
        self.history_pending.is_some()
    }

    /// Apply `input` and return the resulting side effects.
    pub fn reduce(&mut self, store: &TranscriptStore, input: Input) -> Vec<Command> {
        match input {
            Input::Mount(route) => self.mount(store, route),
            Input::CredentialChanged(credential) => self.credential_changed(store, credential),
            Input::TransportOpened => self.transport_opened(store),
            Input::TransportClosed => self.transport_closed(store),
            Input::FrameReceived(frame) => self.frame_received(store, &frame),
            Input::ReconnectDue => self.reconnect_due(),
            Input::HistoryLoaded { generation, result } => {
                self.history_loaded(store, generation, result)
            }
            Input::SendMessage(message) => self.send_message(store, message),
            Input::StartNewChat => self.start_new_chat(store),
            Input::SetModel(id) => match self.models.set_model(&id) {
                Ok(model) => {
                    tracing::debug!(model = %model.id, "model selected");
                    Vec::new()
                }
                Err(err) => vec![Command::Surface(err)],
            },
            Input::Shutdown => {
                let was_connected = self.has_transport();
                self.state = ConnectionState::Idle;
                store.update(|t| t.set_connected(false));
                if was_connected {
                    vec![Command::Disconnect]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn mount(&mut self, store: &TranscriptStore, route: Route) -> Vec<Command> {
        let conversation = route.conversation().cloned();
        self.route = route;
        if conversation == self.conversation {
            return Vec::new();
        }
        self.conversation = conversation;
        self.history_wanted = self.conversation.is_some();
        self.history_pending = None;
        self.streaming = false;
        store.update(|t| {
            t.clear_history();
            t.set_title(None);
            t.set_sending(false);
            t.set_last_error(None);
        });
        let mut commands = self.history_commands();
        commands.extend(self.handshake());
        commands
    }

    fn credential_changed(
        &mut self,
        store: &TranscriptStore,
        credential: Option<String>,
    ) -> Vec<Command> {
        if credential == self.credential {
            return Vec::new();
        }
        self.credential = credential;
        self.attempt = 0;
        let Some(token) = self.credential.clone() else {
            let was_connected = self.has_transport();
            self.state = ConnectionState::Idle;
            store.update(|t| {
                t.set_connected(false);
                t.set_loading(false);
            });
            return if was_connected {
                vec![Command::Disconnect]
            } else {
                Vec::new()
            };
        };
        let mut commands = self.history_commands();
        if self.has_transport() {
            store.update(|t| t.set_connected(false));
            commands.push(Command::Disconnect);
        }
        self.state = ConnectionState::Connecting;
        commands.push(Command::Connect { token });
        commands
    }

    fn transport_opened(&mut self, store: &TranscriptStore) -> Vec<Command> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Open;
        self.attempt = 0;
        store.update(|t| {
            t.set_connected(true);
            t.set_loading(true);
        });
        self.handshake().into_iter().collect()
    }

    fn transport_closed(&mut self, store: &TranscriptStore) -> Vec<Command> {
        if !self.has_transport() {
            return Vec::new();
        }
        self.state = ConnectionState::Closed;
        store.update(|t| t.set_connected(false));
        if self.credential.is_none() {
            return Vec::new();
        }
        match self.policy.delay(self.attempt) {
            Some(delay) => {
                self.attempt = self.attempt.saturating_add(1);
                vec![Command::ScheduleReconnect(delay)]
            }
            None => Vec::new(),
        }
    }

    fn reconnect_due(&mut self) -> Vec<Command> {
        match (&self.state, &self.credential) {
            (ConnectionState::Closed, Some(token)) => {
                let token = token.clone();
                self.state = ConnectionState::Connecting;
                vec![Command::Connect { token }]
            }
            _ => Vec::new(),
        }
    }

    fn history_loaded(
        &mut self,
        store: &TranscriptStore,
        generation: u64,
        result: Result<LoadedHistory>,
    ) -> Vec<Command> {
        if self.history_pending != Some(generation) {
            HISTORY_LOADS_DISCARDED.click();
            tracing::debug!(generation, "discarding superseded history load");
            return Vec::new();
        }
        self.history_pending = None;
        let mut commands = Vec::new();
        match result {
            Ok(loaded) => {
                let pending = loaded.reply_pending();
                store.update(|t| {
                    t.set_history(loaded.turns);
                    t.set_title(loaded.title);
                    if pending {
                        t.set_sending(true);
                    }
                });
            }
            Err(err) => {
                store.update(|t| t.set_last_error(Some(err.clone())));
                commands.push(Command::Surface(err));
            }
        }
        commands.extend(self.handshake());
        commands
    }

    fn frame_received(&mut self, store: &TranscriptStore, frame: &str) -> Vec<Command> {
        match ServerEvent::parse(frame) {
            ServerEvent::InitializeAck(ack) => {
                self.models.set_models(ack.models);
                store.update(|t| t.set_loading(false));
                Vec::new()
            }
            ServerEvent::NewChatAck(ack) => match &self.conversation {
                None => {
                    self.conversation = Some(ack.chat_id.clone());
                    self.route = Route::Chat(ack.chat_id.clone());
                    vec![Command::Navigate(Route::Chat(ack.chat_id))]
                }
                Some(current) if *current == ack.chat_id => Vec::new(),
                Some(current) => {
                    tracing::warn!(
                        current = %current,
                        acked = %ack.chat_id,
                        "ignoring new_chat_ack for a different conversation"
                    );
                    Vec::new()
                }
            },
            ServerEvent::Reply(reply) => {
                let snapshot = store.snapshot();
                if !self.streaming && !snapshot.sending() && !snapshot.reply_pending() {
                    tracing::debug!("dropping reply with no pending turn");
                    return Vec::new();
                }
                REPLY_CHUNKS.click();
                self.streaming = !reply.done;
                store.update(|t| {
                    if let Some(text) = reply.text.as_deref().filter(|s| !s.is_empty()) {
                        t.append_reply_text(text);
                    }
                    if reply.done {
                        t.complete_pending_reply();
                        t.set_sending(false);
                    }
                });
                Vec::new()
            }
            ServerEvent::ChatTitle(title) => {
                let ours = match (&title.chat_id, &self.conversation) {
                    (None, _) => true,
                    (Some(id), Some(current)) => id == current,
                    (Some(_), None) => false,
                };
                if ours {
                    store.update(|t| t.set_title(Some(title.title)));
                }
                Vec::new()
            }
            ServerEvent::Error(event) => {
                PROTOCOL_ERRORS.click();
                let err = Error::protocol(event.code, event.detail);
                tracing::warn!(error = %err, "service reported an error");
                self.streaming = false;
                store.update(|t| {
                    t.fail_pending_reply();
                    t.set_sending(false);
                    t.set_loading(false);
                    t.set_last_error(Some(err.clone()));
                });
                vec![Command::Surface(err)]
            }
            ServerEvent::Unknown { event_type } => {
                UNKNOWN_EVENTS.click();
                tracing::debug!(event_type, "ignoring unknown event");
                Vec::new()
            }
            ServerEvent::Unparseable { reason } => {
                MALFORMED_FRAMES.click();
                tracing::warn!(reason, "dropping malformed frame");
                Vec::new()
            }
        }
    }

    fn send_message(&mut self, store: &TranscriptStore, message: String) -> Vec<Command> {
        if message.trim().is_empty() {
            return Vec::new();
        }
        if self.history_loading() {
            return vec![Command::Surface(Error::validation(
                "conversation is still loading; message not sent",
                None,
            ))];
        }
        if self.state != ConnectionState::Open {
            let err = Error::transport("not connected; message not sent", None);
            store.update(|t| {
                t.append_turn(ChatTurn::user(message.clone()));
                t.append_turn(ChatTurn::placeholder());
                t.fail_pending_reply();
                t.set_last_error(Some(err.clone()));
            });
            return vec![Command::Surface(err)];
        }
        store.update(|t| {
            t.append_turn(ChatTurn::user(message.clone()));
            t.append_turn(ChatTurn::placeholder());
            t.set_sending(true);
            t.set_last_error(None);
        });
        let model = self.models.selected_id().map(str::to_string);
        let event = match &self.conversation {
            Some(id) => ClientEvent::send(id.clone(), message, model),
            None => ClientEvent::new_chat(message, model),
        };
        vec![Command::SendFrame(event)]
    }

    fn start_new_chat(&mut self, store: &TranscriptStore) -> Vec<Command> {
        self.conversation = None;
        self.route = Route::Home;
        self.history_wanted = false;
        self.history_pending = None;
        self.streaming = false;
        store.update(|t| {
            t.clear_history();
            t.set_title(None);
            t.set_sending(false);
            t.set_last_error(None);
        });
        let mut commands = vec![Command::Navigate(Route::Home)];
        commands.extend(self.handshake());
        commands
    }

    fn has_transport(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Open
        )
    }

    fn handshake(&self) -> Option<Command> {
        (self.state == ConnectionState::Open && self.history_pending.is_none())
            .then(|| Command::SendFrame(ClientEvent::initialize(self.conversation.clone())))
    }

    fn history_commands(&mut self) -> Vec<Command> {
        match (&self.conversation, &self.credential) {
            (Some(conversation), Some(token)) if self.history_wanted => {
                self.history_wanted = false;
                self.history_generation += 1;
                self.history_pending = Some(self.history_generation);
                vec![Command::LoadHistory {
                    conversation: conversation.clone(),
                    token: token.clone(),
                    generation: self.history_generation,
                }]
            }
            _ => Vec::new(),
        }
    }
}

impl Default for ProtocolMachine {
    fn default() -> Self {
        Self::new(ReconnectPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;
    use serde_json::json;

    fn frame(value: serde_json::Value) -> Input {
        Input::FrameReceived(value.to_string())
    }

    fn sent_frames(commands: &[Command]) -> Vec<&ClientEvent> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::SendFrame(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    /// A machine with an open connection and a handshake already acknowledged.
    fn open_machine(store: &TranscriptStore) -> ProtocolMachine {
        let mut machine = ProtocolMachine::default();
        let commands = machine.reduce(store, Input::CredentialChanged(Some("tok".into())));
        assert_eq!(
            commands,
            vec![Command::Connect {
                token: "tok".into()
            }]
        );
        machine.reduce(store, Input::TransportOpened);
        machine.reduce(
            store,
            frame(json!({
                "type": "initialize_ack",
                "models": [
                    {"id": "a", "label": "A", "isDefault": true},
                    {"id": "b", "label": "B"}
                ]
            })),
        );
        machine
    }

    #[test]
    fn does_not_connect_without_credential() {
        let store = TranscriptStore::new();
        let mut machine = ProtocolMachine::default();
        assert!(machine.reduce(&store, Input::Mount(Route::Home)).is_empty());
        assert!(machine.reduce(&store, Input::ReconnectDue).is_empty());
        assert_eq!(machine.state(), ConnectionState::Idle);
    }

    #[test]
    fn open_sends_handshake_and_ack_clears_loading() {
        let store = TranscriptStore::new();
        let mut machine = ProtocolMachine::default();
        machine.reduce(&store, Input::CredentialChanged(Some("tok".into())));
        assert_eq!(machine.state(), ConnectionState::Connecting);

        let commands = machine.reduce(&store, Input::TransportOpened);
        let frames = sent_frames(&commands);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], ClientEvent::Initialize(init) if init.chat_id.is_none()));
        assert!(store.connected());
        assert!(store.loading());

        machine.reduce(
            &store,
            frame(json!({"type": "initialize_ack", "models": [{"id": "a", "label": "A"}]})),
        );
        assert!(!store.loading());
        assert_eq!(machine.models().selected_id(), Some("a"));
    }

    #[test]
    fn new_chat_then_ack_then_send() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);

        let commands = machine.reduce(&store, Input::SendMessage("hi".into()));
        let frames = sent_frames(&commands);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            ClientEvent::NewChat(event) => {
                assert_eq!(event.message, "hi");
                assert_eq!(event.model.as_deref(), Some("a"));
            }
            other => panic!("expected new_chat, got {other:?}"),
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.history().len(), 2);
        assert!(snapshot.reply_pending());
        assert!(snapshot.sending());

        let commands = machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c1"})));
        assert_eq!(commands, vec![Command::Navigate(Route::Chat("c1".into()))]);
        assert_eq!(machine.conversation(), Some(&ConversationRef::from("c1")));

        // Navigating to the acknowledged conversation must not reload it.
        assert!(machine.reduce(&store, Input::Mount(Route::Chat("c1".into()))).is_empty());

        machine.reduce(&store, frame(json!({"type": "reply", "text": "hello", "done": true})));
        for message in ["second", "third"] {
            let commands = machine.reduce(&store, Input::SendMessage(message.into()));
            let frames = sent_frames(&commands);
            assert_eq!(frames.len(), 1);
            match frames[0] {
                ClientEvent::Send(event) => {
                    assert_eq!(event.chat_id.as_str(), "c1");
                    assert_eq!(event.message, message);
                }
                other => panic!("expected send, got {other:?}"),
            }
            machine.reduce(&store, frame(json!({"type": "reply", "done": true})));
        }
    }

    #[test]
    fn ack_never_reassigns_conversation() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c1"})));
        let commands = machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c2"})));
        assert!(commands.is_empty());
        assert_eq!(machine.conversation(), Some(&ConversationRef::from("c1")));
    }

    #[test]
    fn streamed_reply_concatenates_and_done_clears_sending() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        machine.reduce(&store, frame(json!({"type": "reply", "text": "Hel"})));
        assert!(store.sending());
        machine.reduce(&store, frame(json!({"type": "reply", "text": "lo"})));
        machine.reduce(&store, frame(json!({"type": "reply", "done": true})));

        let snapshot = store.snapshot();
        let last = snapshot.last_turn().unwrap();
        assert_eq!(last.role, Role::Assistant);
        assert_eq!(last.content, "Hello");
        assert!(!snapshot.sending());
        assert_eq!(snapshot.history().len(), 2);
    }

    #[test]
    fn done_without_text_leaves_empty_reply() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        machine.reduce(&store, frame(json!({"type": "reply", "done": true})));
        let snapshot = store.snapshot();
        assert!(!snapshot.sending());
        assert!(!snapshot.reply_pending());
        assert_eq!(snapshot.last_turn().unwrap().content, "");

        // The reply is over; a stray chunk has nowhere to go.
        let revision = store.revision();
        machine.reduce(&store, frame(json!({"type": "reply", "text": "late"})));
        assert_eq!(store.revision(), revision);
        assert_eq!(store.snapshot().last_turn().unwrap().content, "");
    }

    #[test]
    fn reply_into_placeholder_without_sending_flag() {
        let store = TranscriptStore::new();
        store.update(|t| {
            t.append_turn(ChatTurn::user("hi"));
            t.append_turn(ChatTurn::placeholder());
        });
        let mut machine = open_machine(&store);
        machine.reduce(&store, frame(json!({"type": "reply", "text": "Hel"})));
        machine.reduce(&store, frame(json!({"type": "reply", "text": "lo"})));
        machine.reduce(&store, frame(json!({"type": "reply", "done": true})));
        let snapshot = store.snapshot();
        assert_eq!(snapshot.last_turn().unwrap().content, "Hello");
        assert!(!snapshot.sending());
    }

    #[test]
    fn new_chat_while_sending_resets_everything() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c1"})));
        machine.reduce(&store, frame(json!({"type": "reply", "text": "partial"})));
        assert!(store.sending());

        let commands = machine.reduce(&store, Input::StartNewChat);
        assert_eq!(commands[0], Command::Navigate(Route::Home));
        let frames = sent_frames(&commands);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], ClientEvent::Initialize(init) if init.chat_id.is_none()));

        let snapshot = store.snapshot();
        assert!(snapshot.history().is_empty());
        assert!(!snapshot.sending());
        assert!(machine.conversation().is_none());

        // The abandoned stream must not leak into the fresh transcript.
        machine.reduce(&store, frame(json!({"type": "reply", "text": "late"})));
        assert!(store.history().is_empty());
    }

    #[test]
    fn malformed_frames_change_nothing() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        let before = store.snapshot();
        for bad in ["not json", "{}", r#"{"type": "reply", "done": "yes"}"#, "[1,2]"] {
            let commands = machine.reduce(&store, Input::FrameReceived(bad.to_string()));
            assert!(commands.is_empty());
        }
        let after = store.snapshot();
        assert_eq!(after.revision(), before.revision());
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn unknown_events_are_ignored() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        let revision = store.revision();
        let commands = machine.reduce(&store, frame(json!({"type": "typing", "who": "assistant"})));
        assert!(commands.is_empty());
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn error_event_fails_placeholder_and_clears_sending() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        let commands = machine.reduce(
            &store,
            frame(json!({"type": "error", "code": "upstream", "detail": "model unavailable"})),
        );
        assert!(matches!(&commands[..], [Command::Surface(err)] if err.is_protocol()));
        let snapshot = store.snapshot();
        assert!(!snapshot.sending());
        assert!(snapshot.last_turn().unwrap().failed);
        assert!(snapshot.last_error().unwrap().is_protocol());

        // The user may retry.
        let commands = machine.reduce(&store, Input::SendMessage("again".into()));
        assert_eq!(sent_frames(&commands).len(), 1);
        assert!(store.snapshot().last_error().is_none());
    }

    #[test]
    fn every_reopen_replays_the_handshake() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c1"})));

        // Each failed connect is another close, so the delay keeps growing.
        for attempt in 0..3u32 {
            let commands = machine.reduce(&store, Input::TransportClosed);
            assert!(!store.connected());
            let expected = ReconnectPolicy::default().delay(attempt).unwrap();
            assert_eq!(commands, vec![Command::ScheduleReconnect(expected)]);
            let commands = machine.reduce(&store, Input::ReconnectDue);
            assert!(matches!(&commands[..], [Command::Connect { .. }]));
        }
        let commands = machine.reduce(&store, Input::TransportOpened);
        let frames = sent_frames(&commands);
        assert!(
            matches!(frames[..], [ClientEvent::Initialize(init)] if init.chat_id.as_ref().map(|c| c.as_str()) == Some("c1"))
        );
        assert!(store.connected());

        // Backoff resets after a successful open.
        let commands = machine.reduce(&store, Input::TransportClosed);
        assert_eq!(
            commands,
            vec![Command::ScheduleReconnect(
                ReconnectPolicy::default().delay(0).unwrap()
            )]
        );
    }

    #[test]
    fn close_does_not_reset_sending() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::SendMessage("hi".into()));
        machine.reduce(&store, Input::TransportClosed);
        assert!(store.sending());
        assert!(store.snapshot().reply_pending());
    }

    #[test]
    fn send_while_disconnected_fails_the_turn() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::TransportClosed);
        let commands = machine.reduce(&store, Input::SendMessage("hi".into()));
        assert!(matches!(&commands[..], [Command::Surface(err)] if err.is_transport()));
        let snapshot = store.snapshot();
        assert!(!snapshot.sending());
        assert_eq!(snapshot.history().len(), 2);
        assert!(snapshot.last_turn().unwrap().failed);
    }

    fn resumed(title: &str) -> Result<LoadedHistory> {
        Ok(LoadedHistory {
            turns: vec![ChatTurn::user("hi"), ChatTurn::placeholder()],
            title: Some(title.to_string()),
        })
    }

    #[test]
    fn mount_on_conversation_holds_handshake_until_history_loads() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        let commands = machine.reduce(&store, Input::Mount(Route::Chat("c9".into())));
        assert_eq!(
            commands,
            vec![Command::LoadHistory {
                conversation: "c9".into(),
                token: "tok".into(),
                generation: 1,
            }]
        );
        assert!(machine.history_loading());

        let commands = machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 1,
                result: resumed("Resumed"),
            },
        );
        assert!(matches!(
            &commands[..],
            [Command::SendFrame(ClientEvent::Initialize(init))] if init.chat_id == Some("c9".into())
        ));
        assert!(!machine.history_loading());
        let snapshot = store.snapshot();
        assert_eq!(snapshot.history().len(), 2);
        assert_eq!(snapshot.title(), Some("Resumed"));
        assert!(snapshot.sending());
    }

    #[test]
    fn failed_history_is_surfaced_and_handshake_still_sent() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::Mount(Route::Chat("gone".into())));
        let commands = machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 1,
                result: Err(Error::not_found("Chat not found", None, None)),
            },
        );
        assert_eq!(commands.len(), 2);
        assert!(matches!(&commands[0], Command::Surface(err) if err.is_not_found()));
        assert!(matches!(&commands[1], Command::SendFrame(ClientEvent::Initialize(_))));
        assert!(store.snapshot().last_error().is_some_and(Error::is_not_found));
    }

    #[test]
    fn superseded_history_load_is_discarded() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::Mount(Route::Chat("c1".into())));
        let commands = machine.reduce(&store, Input::StartNewChat);
        // Leaving the conversation releases the held handshake.
        assert!(matches!(
            sent_frames(&commands)[..],
            [ClientEvent::Initialize(init)] if init.chat_id.is_none()
        ));
        assert!(!machine.history_loading());

        let revision = store.revision();
        let commands = machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 1,
                result: resumed("Stale"),
            },
        );
        assert!(commands.is_empty());
        assert_eq!(store.revision(), revision);
        assert!(store.history().is_empty());
        assert_eq!(store.snapshot().title(), None);

        // Only the newest of two overlapping loads lands.
        machine.reduce(&store, Input::Mount(Route::Chat("c2".into())));
        machine.reduce(&store, Input::Mount(Route::Chat("c3".into())));
        machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 2,
                result: resumed("c2"),
            },
        );
        assert!(machine.history_loading());
        machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 3,
                result: resumed("c3"),
            },
        );
        assert_eq!(store.snapshot().title(), Some("c3"));
    }

    #[test]
    fn send_while_history_loads_is_refused() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, Input::Mount(Route::Chat("c9".into())));
        let revision = store.revision();
        let commands = machine.reduce(&store, Input::SendMessage("hi".into()));
        assert!(matches!(&commands[..], [Command::Surface(err)] if err.is_validation()));
        assert_eq!(store.revision(), revision);
    }

    #[test]
    fn mount_before_credential_defers_history() {
        let store = TranscriptStore::new();
        let mut machine = ProtocolMachine::default();
        assert!(machine.reduce(&store, Input::Mount(Route::Chat("c9".into()))).is_empty());
        let commands = machine.reduce(&store, Input::CredentialChanged(Some("tok".into())));
        assert_eq!(
            commands,
            vec![
                Command::LoadHistory {
                    conversation: "c9".into(),
                    token: "tok".into(),
                    generation: 1,
                },
                Command::Connect {
                    token: "tok".into()
                },
            ]
        );
        // Opening before the history arrives holds the handshake back.
        assert!(machine.reduce(&store, Input::TransportOpened).is_empty());
        assert!(store.connected());
        let commands = machine.reduce(
            &store,
            Input::HistoryLoaded {
                generation: 1,
                result: resumed("Resumed"),
            },
        );
        assert!(matches!(
            sent_frames(&commands)[..],
            [ClientEvent::Initialize(init)] if init.chat_id == Some("c9".into())
        ));
    }

    #[test]
    fn credential_change_reconnects_and_logout_disconnects() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        let commands = machine.reduce(&store, Input::CredentialChanged(Some("tok2".into())));
        assert_eq!(
            commands,
            vec![
                Command::Disconnect,
                Command::Connect {
                    token: "tok2".into()
                }
            ]
        );
        machine.reduce(&store, Input::TransportOpened);

        let commands = machine.reduce(&store, Input::CredentialChanged(None));
        assert_eq!(commands, vec![Command::Disconnect]);
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert!(!store.connected());
        assert!(machine.reduce(&store, Input::ReconnectDue).is_empty());
    }

    #[test]
    fn never_policy_does_not_reconnect() {
        let store = TranscriptStore::new();
        let mut machine = ProtocolMachine::new(ReconnectPolicy::never());
        machine.reduce(&store, Input::CredentialChanged(Some("tok".into())));
        machine.reduce(&store, Input::TransportOpened);
        assert!(machine.reduce(&store, Input::TransportClosed).is_empty());
        assert_eq!(machine.state(), ConnectionState::Closed);
    }

    #[test]
    fn chat_title_applies_to_current_conversation_only() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        machine.reduce(&store, frame(json!({"type": "new_chat_ack", "chatId": "c1"})));
        machine.reduce(&store, frame(json!({"type": "chat_title", "chatId": "c2", "title": "Other"})));
        assert_eq!(store.snapshot().title(), None);
        machine.reduce(&store, frame(json!({"type": "chat_title", "chatId": "c1", "title": "Mine"})));
        assert_eq!(store.snapshot().title(), Some("Mine"));
    }

    #[test]
    fn set_model_validates_against_catalog() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        assert!(machine.reduce(&store, Input::SetModel("b".into())).is_empty());
        assert_eq!(machine.models().selected_id(), Some("b"));
        let commands = machine.reduce(&store, Input::SetModel("zzz".into()));
        assert!(matches!(&commands[..], [Command::Surface(err)] if err.is_validation()));

        // The explicit choice survives a handshake replay with the same catalog.
        machine.reduce(
            &store,
            frame(json!({
                "type": "initialize_ack",
                "models": [{"id": "a", "label": "A", "isDefault": true}, {"id": "b", "label": "B"}]
            })),
        );
        let commands = machine.reduce(&store, Input::SendMessage("hi".into()));
        match sent_frames(&commands)[0] {
            ClientEvent::NewChat(event) => assert_eq!(event.model.as_deref(), Some("b")),
            other => panic!("expected new_chat, got {other:?}"),
        }
    }

    #[test]
    fn shutdown_disconnects() {
        let store = TranscriptStore::new();
        let mut machine = open_machine(&store);
        assert_eq!(machine.reduce(&store, Input::Shutdown), vec![Command::Disconnect]);
        assert_eq!(machine.state(), ConnectionState::Idle);
        assert!(machine.reduce(&store, Input::TransportClosed).is_empty());
    }
}
