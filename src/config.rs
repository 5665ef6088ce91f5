//! Client configuration.
//!
//! [`ClientConfig`] names the deployment (base URL and WebSocket path), the
//! HTTP timeout, and the reconnect policy.  The live connection URL is derived
//! from the base URL: `http` becomes `ws`, `https` becomes `wss`, and the
//! credential travels as the `token` query parameter.

use std::env;
use std::time::Duration;

use url::Url;

use crate::error::{Error, Result};
use crate::protocol::ReconnectPolicy;

/// Environment variable consulted when no base URL is given.
pub const BASE_URL_ENV: &str = "PALAVER_BASE_URL";

/// Base URL used when neither an argument nor the environment supplies one.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/";

/// Path of the chat WebSocket, relative to the base URL.
pub const DEFAULT_WS_PATH: &str = "ws/chat";

/// Default HTTP request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration shared by the HTTP client and the protocol client.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Base URL of the deployment; always ends in `/`.
    pub base_url: Url,

    /// Path of the chat WebSocket relative to `base_url`.
    pub ws_path: String,

    /// Timeout applied to each HTTP request.
    pub timeout: Duration,

    /// How the live connection is re-established after an unexpected close.
    pub reconnect: ReconnectPolicy,

    /// A credential to use instead of signing in anonymously.
    pub auth_token: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for `base_url`.
    pub fn new(base_url: &str) -> Result<Self> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            ws_path: DEFAULT_WS_PATH.to_string(),
            timeout: DEFAULT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
            auth_token: None,
        })
    }

    /// Create a configuration from `PALAVER_BASE_URL`, or the local default.
    pub fn from_env() -> Result<Self> {
        let base_url = env::var(BASE_URL_ENV).unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        Self::new(&base_url)
    }

    /// Sets the WebSocket path.
    pub fn with_ws_path(mut self, ws_path: impl Into<String>) -> Self {
        self.ws_path = ws_path.into();
        self
    }

    /// Sets the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the reconnect policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets a preset credential.
    pub fn with_auth_token(mut self, auth_token: Option<String>) -> Self {
        self.auth_token = auth_token;
        self
    }

    /// Resolve an API path against the base URL.
    pub fn api_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// The live connection URL carrying `token`.
    pub fn ws_url(&self, token: &str) -> Result<Url> {
        let mut url = self.base_url.join(&self.ws_path)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::validation(
                    format!("unsupported URL scheme '{other}'"),
                    Some("base_url".to_string()),
                ));
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            Error::validation(
                format!("cannot use scheme '{scheme}' for {url}"),
                Some("base_url".to_string()),
            )
        })?;
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

fn normalize_base_url(base_url: &str) -> Result<Url> {
    let mut base_url = base_url.trim().to_string();
    if !base_url.ends_with('/') {
        base_url.push('/');
    }
    Ok(Url::parse(&base_url)?)
}
