//! Line-oriented terminal renderer

use std::io::{self, Write};

use super::{Change, MessageState, Renderer, Role, Transcript};

const USER_PREFIX: &str = "you  > ";
const ASSISTANT_PREFIX: &str = "memo > ";

/// Writes the conversation to a terminal as it streams
///
/// New messages start a line; streamed deltas are written in place and the
/// line is closed when the reply finalizes. Mood, status and retry notes
/// that arrive mid-reply are held until the line closes.
pub struct TerminalRenderer<W> {
    out: W,
    open: bool,
    held: Vec<Change>,
}

impl TerminalRenderer<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out,
            open: false,
            held: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, transcript: &Transcript, change: &Change) -> io::Result<()> {
        match change {
            Change::Added(index) => {
                let Some(message) = transcript.messages().get(*index) else {
                    return Ok(());
                };
                let prefix = match message.role {
                    Role::User => USER_PREFIX,
                    Role::Assistant => ASSISTANT_PREFIX,
                };
                if self.open {
                    writeln!(self.out)?;
                }
                write!(self.out, "{prefix}{}", message.text)?;
                self.open = message.state == MessageState::Streaming;
                if !self.open {
                    writeln!(self.out)?;
                    self.release(transcript)?;
                }
            }
            Change::Grew { delta, .. } => write!(self.out, "{delta}")?,
            Change::Finalized(_) => {
                if self.open {
                    writeln!(self.out)?;
                    self.open = false;
                }
                self.release(transcript)?;
            }
            Change::Mood | Change::Status | Change::Retry if self.open => {
                if !self.held.contains(change) {
                    self.held.push(change.clone());
                }
            }
            Change::Mood | Change::Status | Change::Retry => self.note(transcript, change)?,
            Change::Reset => {
                if self.open {
                    writeln!(self.out)?;
                    self.open = false;
                }
                self.held.clear();
                writeln!(self.out, "-- new conversation --")?;
                for message in transcript.messages() {
                    let prefix = match message.role {
                        Role::User => USER_PREFIX,
                        Role::Assistant => ASSISTANT_PREFIX,
                    };
                    writeln!(self.out, "{prefix}{}", message.text)?;
                }
            }
        }
        self.out.flush()
    }

    /// Print notes held back while a reply was streaming
    fn release(&mut self, transcript: &Transcript) -> io::Result<()> {
        for change in std::mem::take(&mut self.held) {
            self.note(transcript, &change)?;
        }
        Ok(())
    }

    fn note(&mut self, transcript: &Transcript, change: &Change) -> io::Result<()> {
        match change {
            Change::Mood => {
                if let Some(mood) = transcript.mood() {
                    writeln!(self.out, "       [{mood}]")?;
                }
            }
            Change::Status => {
                if let Some(status) = transcript.status() {
                    writeln!(self.out, "  ... {status}")?;
                }
            }
            Change::Retry => {
                if transcript.retry_available() {
                    writeln!(self.out, "  (type /retry to try again)")?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl<W: Write + Send> Renderer for TerminalRenderer<W> {
    fn render(&mut self, transcript: &Transcript, change: &Change) {
        if let Err(e) = self.write(transcript, change) {
            tracing::debug!(error = %e, "terminal write failed");
        }
    }
}
