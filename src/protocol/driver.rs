//! The asynchronous side of the protocol client.
//!
//! [`ProtocolClient`] owns the transport and runs the event loop: it turns
//! transport callbacks, credential changes, timers, and user intents into
//! [`Input`]s, feeds them through the [`ProtocolMachine`], and executes the
//! resulting [`Command`]s in order.  [`ChatHandle`] is the cloneable front end
//! used by the view layer.
//!
//! Opening a connection and fetching history run as spawned tasks whose
//! outcome comes back through the loop as another [`Input`], so a slow
//! service never delays a user intent.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::history::HistoryLoader;
use crate::identity::{Credential, Route};
use crate::models::ModelSelector;
use crate::observability::{
    CONNECT_FAILURES, CONNECTS, FRAMES_RECEIVED, FRAMES_SENT, RECONNECT_BACKOFF, RECONNECTS,
};
use crate::protocol::machine::{Command, ConnectionState, Input, ProtocolMachine};
use crate::protocol::transport::{Connection, Transport};
use crate::transcript::TranscriptStore;
use crate::types::ConversationRef;

const ERROR_CHANNEL_CAPACITY: usize = 16;

/// What the view layer can observe about a session besides its transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionStatus {
    /// Lifecycle of the live connection.
    pub connection: ConnectionState,
    /// The route the view should be on.
    pub route: Route,
    /// The conversation the client operates on.
    pub conversation: Option<ConversationRef>,
    /// The model catalog and selection.
    pub models: ModelSelector,
    /// Whether the conversation's history is still being fetched.
    pub history_loading: bool,
}

impl SessionStatus {
    fn of(machine: &ProtocolMachine) -> Self {
        Self {
            connection: machine.state(),
            route: machine.route().clone(),
            conversation: machine.conversation().cloned(),
            models: machine.models().clone(),
            history_loading: machine.history_loading(),
        }
    }
}

/// Drives one chat session over a [`Transport`].
pub struct ProtocolClient {
    machine: ProtocolMachine,
    config: ClientConfig,
    store: Arc<TranscriptStore>,
    transport: Arc<dyn Transport>,
    history: Arc<HistoryLoader>,
    credentials: watch::Receiver<Option<Credential>>,
    intents: mpsc::UnboundedReceiver<Input>,
    completions_tx: mpsc::UnboundedSender<Input>,
    completions: mpsc::UnboundedReceiver<Input>,
    status: watch::Sender<SessionStatus>,
    errors: broadcast::Sender<Error>,
    connection: Option<Box<dyn Connection>>,
    connecting: Option<JoinHandle<Result<Box<dyn Connection>>>>,
    reconnect_at: Option<Instant>,
}

impl ProtocolClient {
    /// Create a client and the handle that controls it.
    ///
    /// Nothing happens until [`ProtocolClient::run`] is polled.
    pub fn new(
        config: ClientConfig,
        store: Arc<TranscriptStore>,
        transport: Arc<dyn Transport>,
        history: Arc<HistoryLoader>,
        credentials: watch::Receiver<Option<Credential>>,
    ) -> (Self, ChatHandle) {
        let machine = ProtocolMachine::new(config.reconnect);
        let (intents_tx, intents) = mpsc::unbounded_channel();
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (status, status_rx) = watch::channel(SessionStatus::of(&machine));
        let (errors, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        let handle = ChatHandle {
            intents: intents_tx,
            status: status_rx,
            errors: errors.clone(),
            store: store.clone(),
        };
        let client = Self {
            machine,
            config,
            store,
            transport,
            history,
            credentials,
            intents,
            completions_tx,
            completions,
            status,
            errors,
            connection: None,
            connecting: None,
            reconnect_at: None,
        };
        (client, handle)
    }

    /// Run until shut down or until every [`ChatHandle`] is dropped.
    pub async fn run(mut self) -> Result<()> {
        let token = current_token(&mut self.credentials);
        self.dispatch(Input::CredentialChanged(token)).await;
        let mut credentials_open = true;
        loop {
            let input = tokio::select! {
                inbound = next_frame(&mut self.connection) => match inbound {
                    Some(Ok(frame)) => {
                        FRAMES_RECEIVED.click();
                        Input::FrameReceived(frame)
                    }
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "connection failed");
                        self.connection = None;
                        Input::TransportClosed
                    }
                    None => {
                        tracing::info!("connection closed by peer");
                        self.connection = None;
                        Input::TransportClosed
                    }
                },
                connected = join_connect(&mut self.connecting) => match connected {
                    Ok(connection) => {
                        CONNECTS.click();
                        self.connection = Some(connection);
                        Input::TransportOpened
                    }
                    Err(err) => {
                        CONNECT_FAILURES.click();
                        tracing::warn!(error = %err, "connect failed");
                        Input::TransportClosed
                    }
                },
                Some(completion) = self.completions.recv() => completion,
                intent = self.intents.recv() => intent.unwrap_or(Input::Shutdown),
                changed = self.credentials.changed(), if credentials_open => match changed {
                    Ok(()) => Input::CredentialChanged(current_token(&mut self.credentials)),
                    Err(_) => {
                        credentials_open = false;
                        continue;
                    }
                },
                _ = sleep_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    RECONNECTS.click();
                    Input::ReconnectDue
                }
            };
            let shutdown = matches!(input, Input::Shutdown);
            self.dispatch(input).await;
            if shutdown {
                tracing::debug!("protocol client shut down");
                return Ok(());
            }
        }
    }

    async fn dispatch(&mut self, input: Input) {
        let mut inputs = VecDeque::from([input]);
        while let Some(input) = inputs.pop_front() {
            for command in self.machine.reduce(&self.store, input) {
                if let Some(next) = self.execute(command).await {
                    inputs.push_back(next);
                }
            }
        }
        let next = SessionStatus::of(&self.machine);
        self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    async fn execute(&mut self, command: Command) -> Option<Input> {
        match command {
            Command::Connect { token } => {
                self.reconnect_at = None;
                self.abort_connect();
                self.close_connection();
                let url = match self.config.ws_url(&token) {
                    Ok(url) => url,
                    Err(err) => {
                        self.surface(err);
                        return Some(Input::TransportClosed);
                    }
                };
                let transport = self.transport.clone();
                let timeout = self.config.timeout;
                self.connecting = Some(tokio::spawn(async move {
                    tokio::time::timeout(timeout, transport.connect(&url))
                        .await
                        .unwrap_or_else(|_| {
                            Err(Error::timeout(
                                "websocket connect timed out",
                                Some(timeout.as_secs_f64()),
                            ))
                        })
                }));
                None
            }
            Command::SendFrame(event) => {
                let Some(connection) = self.connection.as_mut() else {
                    tracing::warn!(event_type = event.event_type(), "not connected; frame dropped");
                    return None;
                };
                let frame = match event.to_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        self.surface(err);
                        return None;
                    }
                };
                tracing::debug!(event_type = event.event_type(), "sending frame");
                match connection.send(frame).await {
                    Ok(()) => {
                        FRAMES_SENT.click();
                        None
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "send failed");
                        self.connection = None;
                        Some(Input::TransportClosed)
                    }
                }
            }
            Command::ScheduleReconnect(delay) => {
                tracing::info!(delay_ms = delay.as_millis() as u64, "reconnect scheduled");
                RECONNECT_BACKOFF.add(delay.as_secs_f64());
                self.reconnect_at = Some(Instant::now() + delay);
                None
            }
            Command::Disconnect => {
                self.reconnect_at = None;
                self.abort_connect();
                self.close_connection();
                None
            }
            Command::Navigate(route) => {
                tracing::debug!(%route, "navigate");
                None
            }
            Command::LoadHistory {
                conversation,
                token,
                generation,
            } => {
                let history = self.history.clone();
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    let result = history.load(&token, &conversation).await;
                    // A stopped client no longer wants the result.
                    let _ = completions.send(Input::HistoryLoaded { generation, result });
                });
                None
            }
            Command::Surface(err) => {
                self.surface(err);
                None
            }
        }
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }

    fn close_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            tokio::spawn(async move {
                if let Err(err) = connection.close().await {
                    tracing::debug!(error = %err, "error closing connection");
                }
            });
        }
    }

    fn surface(&self, err: Error) {
        tracing::debug!(error = %err, "surfacing error");
        // No subscribers is fine; the store keeps the last error too.
        let _ = self.errors.send(err);
    }
}

impl std::fmt::Debug for ProtocolClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolClient")
            .field("machine", &self.machine)
            .field("connected", &self.connection.is_some())
            .field("connecting", &self.connecting.is_some())
            .field("reconnect_at", &self.reconnect_at)
            .finish()
    }
}

fn current_token(credentials: &mut watch::Receiver<Option<Credential>>) -> Option<String> {
    credentials
        .borrow_and_update()
        .as_ref()
        .map(|credential| credential.token.clone())
}

async fn next_frame(connection: &mut Option<Box<dyn Connection>>) -> Option<Result<String>> {
    match connection {
        Some(connection) => connection.recv().await,
        None => std::future::pending().await,
    }
}

async fn join_connect(
    connecting: &mut Option<JoinHandle<Result<Box<dyn Connection>>>>,
) -> Result<Box<dyn Connection>> {
    let Some(task) = connecting.as_mut() else {
        return std::future::pending().await;
    };
    let joined = task.await;
    *connecting = None;
    match joined {
        Ok(result) => result,
        Err(err) => Err(Error::connection("connect task failed", Some(Box::new(err)))),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Cloneable control surface of a running [`ProtocolClient`].
#[derive(Debug, Clone)]
pub struct ChatHandle {
    intents: mpsc::UnboundedSender<Input>,
    status: watch::Receiver<SessionStatus>,
    errors: broadcast::Sender<Error>,
    store: Arc<TranscriptStore>,
}

impl ChatHandle {
    /// Send a user message.
    ///
    /// Callers must not send while [`TranscriptStore::sending`] is true.
    pub fn send_message(&self, message: impl Into<String>) -> Result<()> {
        self.submit(Input::SendMessage(message.into()))
    }

    /// Clear the transcript and start a new conversation.
    pub fn start_new_chat(&self) -> Result<()> {
        self.submit(Input::StartNewChat)
    }

    /// Select a model from the current catalog.
    pub fn set_model(&self, id: &str) -> Result<()> {
        let known = self
            .status
            .borrow()
            .models
            .models()
            .iter()
            .any(|model| model.id == id);
        if !known {
            return Err(Error::validation(
                format!("unknown model '{id}'"),
                Some("model".to_string()),
            ));
        }
        self.submit(Input::SetModel(id.to_string()))
    }

    /// Mount the view on `route`, loading its history when it names a conversation.
    ///
    /// Returns once the intent is queued; watch [`SessionStatus::history_loading`]
    /// to learn when the history has landed.
    pub fn open(&self, route: Route) -> Result<()> {
        self.submit(Input::Mount(route))
    }

    /// Disconnect and stop the client.
    pub fn shutdown(&self) -> Result<()> {
        self.submit(Input::Shutdown)
    }

    /// The latest session status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Observe session status changes.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Receive errors surfaced from now on.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<Error> {
        self.errors.subscribe()
    }

    /// The transcript this session writes to.
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    fn submit(&self, input: Input) -> Result<()> {
        self.intents
            .send(input)
            .map_err(|_| Error::closed("protocol client has stopped"))
    }
}
