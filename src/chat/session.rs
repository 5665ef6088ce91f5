//! Core chat session management.
//!
//! [`ChatSession`] wires the HTTP client, identity resolver, transcript
//! store, history loader, and protocol client together for the REPL, and
//! follows streamed replies into a [`Renderer`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::task::JoinHandle;

use crate::chat::config::ChatConfig;
use crate::chat::render::{Renderer, TranscriptCursor};
use crate::client::ChatApi;
use crate::error::{Error, Result};
use crate::history::HistoryLoader;
use crate::identity::{Credential, IdentityResolver, Route};
use crate::protocol::{ChatHandle, ConnectionState, ProtocolClient, WebSocketTransport};
use crate::transcript::TranscriptStore;
use crate::types::{ChatModel, ChatSummary, ConversationRef};

/// How often a reply being followed checks for Ctrl+C.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// A chat session bound to one chat service deployment.
pub struct ChatSession {
    api: Arc<ChatApi>,
    identity: Arc<IdentityResolver>,
    handle: ChatHandle,
    errors: broadcast::Receiver<Error>,
    cursor: TranscriptCursor,
    task: JoinHandle<Result<()>>,
}

/// A summary of the session for `/status`.
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Lifecycle of the live connection.
    pub connection: ConnectionState,
    /// The conversation in use, if one has been assigned.
    pub conversation: Option<ConversationRef>,
    /// The conversation title, when known.
    pub title: Option<String>,
    /// Number of turns in the transcript.
    pub turn_count: usize,
    /// The selected model.
    pub model: Option<String>,
    /// Whether the model was picked explicitly.
    pub user_selected_model: bool,
    /// Whether a reply is in flight.
    pub sending: bool,
    /// Whether a credential is held.
    pub signed_in: bool,
}

impl ChatSession {
    /// Sign in, start the protocol client, and mount the configured route.
    pub async fn connect(config: ChatConfig) -> Result<Self> {
        let api = Arc::new(ChatApi::new(config.client.clone())?);
        let preset = config.client.auth_token.clone().map(Credential::preset);
        let identity = Arc::new(IdentityResolver::new(api.clone(), preset));
        identity.ensure().await?;

        let store = Arc::new(TranscriptStore::new());
        let history = Arc::new(HistoryLoader::new(api.clone()));
        let (client, handle) = ProtocolClient::new(
            config.client,
            store,
            Arc::new(WebSocketTransport::new()),
            history,
            identity.subscribe(),
        );
        let errors = handle.subscribe_errors();
        let task = tokio::spawn(client.run());
        let session = Self {
            api,
            identity,
            handle,
            errors,
            cursor: TranscriptCursor::new(),
            task,
        };
        session.mount(config.route).await?;
        Ok(session)
    }

    /// The protocol client handle.
    pub fn handle(&self) -> &ChatHandle {
        &self.handle
    }

    /// The transcript store.
    pub fn store(&self) -> &Arc<TranscriptStore> {
        self.handle.store()
    }

    /// Mount `route` and print its transcript.
    pub async fn open(&mut self, route: Route, renderer: &mut dyn Renderer) -> Result<()> {
        self.mount(route).await?;
        let transcript = self.store().snapshot();
        self.cursor = TranscriptCursor::new();
        self.cursor.render(&transcript, true, renderer);
        if !transcript.history().is_empty() {
            renderer.finish_response();
        }
        self.drain_errors(renderer);
        Ok(())
    }

    async fn mount(&self, route: Route) -> Result<()> {
        self.handle.open(route.clone())?;
        let mut status = self.handle.watch_status();
        status
            .wait_for(|status| status.route == route && !status.history_loading)
            .await
            .map_err(|_| Error::closed("protocol client has stopped"))?;
        Ok(())
    }

    /// Send `message` and print the reply as it streams in.
    ///
    /// Returns once the reply terminates, or early when `interrupted` is
    /// raised; the reply then keeps streaming into the transcript.
    pub async fn send_streaming(
        &mut self,
        message: &str,
        renderer: &mut dyn Renderer,
        interrupted: Arc<AtomicBool>,
    ) -> Result<()> {
        if self.identity.credential().is_none() {
            return Err(Error::authentication("signed out; restart to sign in again"));
        }
        if self.store().sending() {
            return Err(Error::validation(
                "a reply is still streaming; wait for it or start a /new chat",
                None,
            ));
        }
        let mut rx = self.store().subscribe();
        let start_len = {
            let snapshot = rx.borrow_and_update();
            self.cursor.skip_to_end(&snapshot);
            snapshot.history().len()
        };
        self.handle.send_message(message)?;

        let mut appended = false;
        loop {
            tokio::select! {
                changed = rx.changed() => {
                    changed.map_err(|_| Error::closed("transcript store dropped"))?;
                }
                _ = tokio::time::sleep(INTERRUPT_POLL) => {
                    if interrupted.load(Ordering::Relaxed) {
                        renderer.print_interrupted();
                        return Ok(());
                    }
                    continue;
                }
            }
            let snapshot = rx.borrow_and_update().clone();
            self.cursor.render(&snapshot, false, renderer);
            appended |= snapshot.history().len() > start_len;
            if appended && !snapshot.sending() {
                renderer.finish_response();
                break;
            }
        }
        self.drain_errors(renderer);
        Ok(())
    }

    /// Start a new conversation.
    pub fn new_chat(&mut self) -> Result<()> {
        self.handle.start_new_chat()?;
        self.cursor = TranscriptCursor::new();
        Ok(())
    }

    /// Select model `id`.
    pub fn set_model(&self, id: &str) -> Result<()> {
        self.handle.set_model(id)
    }

    /// The model catalog and the selected id.
    pub fn models(&self) -> (Vec<ChatModel>, Option<String>) {
        let status = self.handle.status();
        (
            status.models.models().to_vec(),
            status.models.selected_id().map(str::to_string),
        )
    }

    /// List the user's conversations.
    pub async fn list_chats(&self) -> Result<Vec<ChatSummary>> {
        let token = self
            .identity
            .token()
            .ok_or_else(|| Error::authentication("signed out"))?;
        self.api.list_chats(&token).await
    }

    /// Sign out.  The protocol client disconnects and stays disconnected.
    pub async fn logout(&self) -> Result<()> {
        self.identity.logout().await
    }

    /// Print errors surfaced since the last call.
    pub fn drain_errors(&mut self, renderer: &mut dyn Renderer) {
        loop {
            match self.errors.try_recv() {
                Ok(err) => renderer.print_error(&err.to_string()),
                Err(TryRecvError::Lagged(n)) => {
                    renderer.print_error(&format!("{n} earlier errors were dropped"))
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Session statistics.
    pub fn stats(&self) -> SessionStats {
        let status = self.handle.status();
        let transcript = self.store().snapshot();
        SessionStats {
            connection: status.connection,
            conversation: status.conversation,
            title: transcript.title().map(str::to_string),
            turn_count: transcript.history().len(),
            model: status.models.selected_id().map(str::to_string),
            user_selected_model: status.models.user_selected(),
            sending: transcript.sending(),
            signed_in: self.identity.credential().is_some(),
        }
    }

    /// Stop the protocol client and wait for it to disconnect.
    pub async fn shutdown(self) -> Result<()> {
        // The client may already have stopped; joining reports how.
        let _ = self.handle.shutdown();
        self.task
            .await
            .map_err(|e| Error::closed(format!("protocol client task failed: {e}")))?
    }
}
