//! Slash command parsing for the chat application.
//!
//! This module handles parsing of special commands that start with `/`,
//! allowing users to control the chat session without sending messages
//! to the service.

use crate::identity::Route;

/// A parsed chat command.
///
/// These commands control the chat session and are not sent to the service.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatCommand {
    /// Start a new conversation.
    New,

    /// Select a model from the service's catalog.
    Model(String),

    /// List the models the service offers.
    Models,

    /// List the user's conversations.
    Chats,

    /// Switch to another conversation or back to the home view.
    Open(Route),

    /// Sign out and disconnect.
    Logout,

    /// Show the connection and conversation state.
    Status,

    /// Display help information.
    Help,

    /// Exit the chat application.
    Quit,

    /// Report a parsing error back to the caller.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ChatCommand)` if the input is a valid command,
/// or `None` if it should be treated as a regular message.
///
/// # Examples
///
/// ```
/// # use palaver::chat::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model gpt-4o").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ChatCommand> {
    let input = input.trim();
    let rest = input.strip_prefix('/')?;

    let mut parts = rest.splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" | "clear" => ChatCommand::New,
        "model" => match argument {
            Some(model) => ChatCommand::Model(model.to_string()),
            None => ChatCommand::Invalid("/model requires a model id".to_string()),
        },
        "models" => ChatCommand::Models,
        "chats" | "list" => ChatCommand::Chats,
        "open" => match argument {
            Some(arg) if arg.starts_with('/') => match Route::parse(arg) {
                Ok(route) => ChatCommand::Open(route),
                Err(err) => ChatCommand::Invalid(format!("/open: {err}")),
            },
            Some(arg) if arg.contains('/') => {
                ChatCommand::Invalid("/open expects a conversation id".to_string())
            }
            Some(arg) => ChatCommand::Open(Route::Chat(arg.into())),
            None => ChatCommand::Invalid("/open requires a conversation id".to_string()),
        },
        "logout" => ChatCommand::Logout,
        "status" | "stats" => ChatCommand::Status,
        "help" | "?" => ChatCommand::Help,
        "quit" | "exit" | "q" => ChatCommand::Quit,
        _ => ChatCommand::Invalid(format!("Unknown command: /{}", command)),
    };

    Some(result)
}

/// Returns help text describing available commands.
pub fn help_text() -> &'static str {
    r#"Available commands:
  /new                   Start a new conversation
  /model <id>            Select a model (see /models)
  /models                List available models
  /chats                 List your conversations
  /open <id>             Resume a conversation (or /open / for a new one)
  /logout                Sign out and disconnect
  /status                Show connection and conversation state
  /help                  Show this help message
  /quit                  Exit the chat"#
}
