//! Chat application module for interactive conversations.
//!
//! This module provides a streaming REPL chat interface built on top of the
//! palaver client library. It supports:
//!
//! - Streaming replies with incremental display
//! - Resuming conversations by id
//! - Slash commands for session control
//! - Selecting a model from the service's catalog
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`session`]: Wiring of the protocol client for the REPL
//! - [`commands`]: Slash command parsing
//! - [`render`]: Terminal output and incremental transcript rendering

mod commands;
mod config;
mod render;
mod session;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use render::{PlainTextRenderer, Renderer, TranscriptCursor};
pub use session::{ChatSession, SessionStats};
