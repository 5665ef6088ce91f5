//! Interactive chat application for conversing with a chat service.
//!
//! This binary provides a streaming REPL over the palaver session protocol.
//!
//! # Usage
//!
//! ```bash
//! # Sign in anonymously against the service in $PALAVER_BASE_URL
//! palaver-chat
//!
//! # Resume a conversation
//! palaver-chat --chat 6f1c2d
//!
//! # Point at another deployment with an existing token
//! palaver-chat --base-url https://chat.example.com --token "$TOKEN"
//!
//! # Disable colors (useful for piping output)
//! palaver-chat --no-color
//! ```
//!
//! Logging goes to stderr and is controlled by `PALAVER_LOG` (for example
//! `PALAVER_LOG=palaver=debug`).
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/new` - Start a new conversation
//! - `/model <id>` - Change the model
//! - `/open <id>` - Resume a conversation
//! - `/status` - Show session state
//! - `/quit` - Exit the application

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tracing_subscriber::EnvFilter;

use palaver::chat::{
    ChatArgs, ChatCommand, ChatConfig, ChatSession, PlainTextRenderer, Renderer, help_text,
    parse_command,
};

/// Environment variable holding the log filter.
const LOG_ENV: &str = "PALAVER_LOG";

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Main entry point for the palaver-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (args, _) = ChatArgs::from_command_line_relaxed("palaver-chat [OPTIONS]");
    let config = ChatConfig::try_from(args)?;
    let use_color = config.use_color;
    let base_url = config.client.base_url.clone();

    let mut renderer = PlainTextRenderer::with_color(use_color);
    let mut session = ChatSession::connect(config).await?;
    let mut rl = DefaultEditor::new()?;

    // Flag for interrupt handling while a reply streams
    let interrupted = Arc::new(AtomicBool::new(false));

    // Set up Ctrl+C handler
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    println!("Palaver Chat ({base_url})");
    println!("Type /help for commands, /quit to exit");
    let route = session.handle().status().route;
    if let Err(e) = session.open(route, &mut renderer).await {
        renderer.print_error(&e.to_string());
    }
    println!();

    loop {
        // Reset interrupt flag before each input
        interrupted.store(false, Ordering::Relaxed);
        session.drain_errors(&mut renderer);

        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::New => match session.new_chat() {
                            Ok(()) => renderer.print_info("Started a new conversation."),
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {}", line);
                            }
                        }
                        ChatCommand::Model(id) => match session.set_model(&id) {
                            Ok(()) => renderer.print_info(&format!("Model changed to: {id}")),
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Models => print_models(&session),
                        ChatCommand::Chats => match session.list_chats().await {
                            Ok(chats) if chats.is_empty() => {
                                renderer.print_info("No conversations yet.")
                            }
                            Ok(chats) => {
                                println!("    Conversations:");
                                for chat in chats {
                                    println!(
                                        "      {}  {}",
                                        chat.id,
                                        chat.title.as_deref().unwrap_or("(untitled)")
                                    );
                                }
                            }
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Open(route) => {
                            if let Err(err) = session.open(route, &mut renderer).await {
                                renderer.print_error(&err.to_string());
                            }
                        }
                        ChatCommand::Logout => match session.logout().await {
                            Ok(()) => renderer.print_info("Signed out."),
                            Err(err) => renderer.print_error(&err.to_string()),
                        },
                        ChatCommand::Status => print_status(&session),
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                // Regular message - send to the service
                if let Err(e) = session
                    .send_streaming(line, &mut renderer, interrupted.clone())
                    .await
                {
                    renderer.print_error(&e.to_string());
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {}", err));
                break;
            }
        }
    }

    session.shutdown().await?;
    Ok(())
}

fn print_status(session: &ChatSession) {
    let stats = session.stats();
    println!("    Session Status:");
    println!("      Connection: {}", stats.connection);
    println!(
        "      Signed in: {}",
        if stats.signed_in { "yes" } else { "no" }
    );
    match stats.conversation {
        Some(ref id) => println!("      Conversation: {id}"),
        None => println!("      Conversation: (new)"),
    }
    if let Some(title) = stats.title.as_deref() {
        println!("      Title: {title}");
    }
    println!("      Turns: {}", stats.turn_count);
    match stats.model {
        Some(ref model) if stats.user_selected_model => println!("      Model: {model}"),
        Some(ref model) => println!("      Model: {model} (default)"),
        None => println!("      Model: (service default)"),
    }
    if stats.sending {
        println!("      A reply is streaming.");
    }
}

fn print_models(session: &ChatSession) {
    let (models, selected) = session.models();
    if models.is_empty() {
        println!("    No model catalog received yet.");
        return;
    }
    println!("    Models:");
    for model in models {
        let marker = if selected.as_deref() == Some(model.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!("    {marker} {}  {}", model.id, model.label);
    }
}
