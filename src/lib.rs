// Public modules
pub mod chat;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod identity;
pub mod models;
pub mod observability;
pub mod protocol;
pub mod transcript;
pub mod types;
pub mod utils;

// Re-exports
pub use client::ChatApi;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use history::{ChatRecordSource, HistoryLoader, LoadedHistory, reconcile};
pub use identity::{Credential, CredentialIssuer, IdentityResolver, Route};
pub use models::ModelSelector;
pub use observability::register_biometrics;
pub use protocol::{
    ChatHandle, Connection, ConnectionState, ProtocolClient, ReconnectPolicy, SessionStatus,
    Transport, WebSocketTransport,
};
pub use transcript::{Transcript, TranscriptStore};
pub use types::*;
