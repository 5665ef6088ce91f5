//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction plus
//! [`TranscriptCursor`], which turns successive transcript snapshots into
//! incremental renderer calls so streamed replies print as they grow.

use std::io::{self, Stdout, Write};

use crate::transcript::Transcript;
use crate::types::{ChatTurn, Role};

/// ANSI escape code for dim text (used for user turns replayed from history).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for failed replies).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Called when a turn starts printing.
    fn start_turn(&mut self, role: Role);

    /// Print a chunk of turn text.
    ///
    /// This is called incrementally as reply text streams in.
    fn print_text(&mut self, text: &str);

    /// Called when the reply to a turn failed.
    fn print_failed(&mut self);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a response is complete.
    fn finish_response(&mut self);

    /// Called when following a reply is interrupted by the user.
    fn print_interrupted(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    styled: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer writing to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            styled: false,
        }
    }

    /// Consumes the renderer, returning its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn style(&mut self, code: &str) {
        if self.use_color {
            self.write(code);
            self.styled = true;
        }
    }

    fn reset_styles(&mut self) {
        if self.styled {
            self.write(ANSI_RESET);
            self.styled = false;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn start_turn(&mut self, role: Role) {
        self.reset_styles();
        match role {
            Role::User => {
                self.write("\nYou: ");
                self.style(ANSI_DIM);
            }
            Role::Assistant => {
                self.write("\n");
                self.style(ANSI_CYAN);
                self.write("Assistant:");
                self.reset_styles();
                self.write(" ");
            }
        }
    }

    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_failed(&mut self) {
        self.reset_styles();
        self.style(ANSI_RED);
        self.write("[no reply]");
        self.reset_styles();
    }

    fn print_error(&mut self, error: &str) {
        self.reset_styles();
        eprintln!("\nError: {error}");
    }

    fn print_info(&mut self, info: &str) {
        self.reset_styles();
        self.write(info);
        self.write("\n");
    }

    fn finish_response(&mut self) {
        self.reset_styles();
        self.write("\n");
    }

    fn print_interrupted(&mut self) {
        self.reset_styles();
        self.write("\n[interrupted; the reply continues in the background]\n");
    }
}

/// Tracks how much of a transcript has been rendered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TranscriptCursor {
    turns: usize,
    printed: usize,
    failed: bool,
}

impl TranscriptCursor {
    /// Create a cursor that has rendered nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark everything in `transcript` as already rendered.
    pub fn skip_to_end(&mut self, transcript: &Transcript) {
        let history = transcript.history();
        self.turns = history.len();
        self.printed = history.last().map_or(0, |turn| turn.content.len());
        self.failed = history.last().is_some_and(|turn| turn.failed);
    }

    /// Render whatever `transcript` holds beyond what was rendered before.
    ///
    /// New user turns are shown only when `show_user` is set; the REPL does
    /// not echo what the user just typed.  A transcript that shrank was
    /// replaced, so it is rendered again from the start.
    pub fn render(&mut self, transcript: &Transcript, show_user: bool, renderer: &mut dyn Renderer) {
        let history = transcript.history();
        if history.len() < self.turns {
            *self = Self::default();
        }
        if let Some(turn) = self.turns.checked_sub(1).and_then(|idx| history.get(idx)) {
            self.continue_turn(turn, renderer);
        }
        for turn in &history[self.turns..] {
            if turn.role == Role::Assistant || show_user {
                renderer.start_turn(turn.role);
            }
            self.turns += 1;
            self.printed = 0;
            self.failed = false;
            if turn.role == Role::Assistant || show_user {
                self.continue_turn(turn, renderer);
            } else {
                self.printed = turn.content.len();
            }
        }
    }

    fn continue_turn(&mut self, turn: &ChatTurn, renderer: &mut dyn Renderer) {
        if let Some(delta) = turn.content.get(self.printed..) {
            if !delta.is_empty() {
                renderer.print_text(delta);
            }
        }
        self.printed = turn.content.len();
        if turn.failed && !self.failed {
            renderer.print_failed();
            self.failed = true;
        }
    }
}
