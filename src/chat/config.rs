//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and the resolved
//! configuration the REPL runs with.

use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::config::ClientConfig;
use crate::error::Result;
use crate::identity::Route;
use crate::protocol::ReconnectPolicy;

/// Command-line arguments for the palaver-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Base URL of the chat service.
    #[arrrg(optional, "Service base URL (default: $PALAVER_BASE_URL or http://127.0.0.1:8000/)", "URL")]
    pub base_url: Option<String>,

    /// Existing bearer token; an anonymous sign-in happens when absent.
    #[arrrg(optional, "Bearer token to use instead of signing in anonymously", "TOKEN")]
    pub token: Option<String>,

    /// Conversation to resume.
    #[arrrg(optional, "Conversation id to resume", "ID")]
    pub chat: Option<String>,

    /// WebSocket path relative to the base URL.
    #[arrrg(optional, "WebSocket path (default: ws/chat)", "PATH")]
    pub ws_path: Option<String>,

    /// HTTP request timeout in seconds.
    #[arrrg(optional, "HTTP timeout in seconds (default: 30)", "SECONDS")]
    pub timeout: Option<u64>,

    /// Do not reconnect after the connection drops.
    #[arrrg(flag, "Do not reconnect after the connection drops")]
    pub no_reconnect: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,
}

/// Configuration for a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// Service endpoints, timeouts, and the preset credential.
    pub client: ClientConfig,

    /// The view to mount at startup.
    pub route: Route,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,
}

impl ChatConfig {
    /// Resolve a configuration from the environment and local defaults.
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: ClientConfig::from_env()?,
            route: Route::Home,
            use_color: true,
        })
    }

    /// Sets the startup route.
    pub fn with_route(mut self, route: Route) -> Self {
        self.route = route;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }
}

impl TryFrom<ChatArgs> for ChatConfig {
    type Error = crate::error::Error;

    fn try_from(args: ChatArgs) -> Result<Self> {
        let mut client = match &args.base_url {
            Some(base_url) => ClientConfig::new(base_url)?,
            None => ClientConfig::from_env()?,
        };
        if let Some(ws_path) = args.ws_path {
            client = client.with_ws_path(ws_path);
        }
        if let Some(timeout) = args.timeout {
            client = client.with_timeout(Duration::from_secs(timeout));
        }
        if args.no_reconnect {
            client = client.with_reconnect(ReconnectPolicy::never());
        }
        client = client.with_auth_token(args.token);
        let route = match args.chat {
            Some(id) => Route::Chat(id.into()),
            None => Route::Home,
        };
        Ok(ChatConfig {
            client,
            route,
            use_color: !args.no_color,
        })
    }
}
