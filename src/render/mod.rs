//! Conversation rendering
//!
//! [`Transcript`] is the whole visible state of the conversation: messages,
//! the mood indicator, a status line and the retry affordance. Every mutation
//! returns a [`Change`] describing what moved, and a [`Renderer`] projects
//! the transcript for that change. Streaming text is appended in place to the
//! open assistant message rather than re-rendering history.

mod terminal;

use serde::{Deserialize, Serialize};

use crate::error::FailureKind;

pub use terminal::TerminalRenderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageState {
    #[default]
    Final,
    /// Assistant reply still arriving
    Streaming,
    /// Assistant-role error report
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(skip)]
    pub state: MessageState,
}

impl Message {
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            state: MessageState::Final,
        }
    }
}

/// What a transcript mutation changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Message at this index was added
    Added(usize),
    /// Text was appended to the streaming message at this index
    Grew { index: usize, delta: String },
    /// Message at this index stopped streaming
    Finalized(usize),
    Mood,
    Status,
    /// Retry affordance appeared or went away
    Retry,
    /// Everything was replaced
    Reset,
}

/// Projects the transcript for display
pub trait Renderer: Send {
    fn render(&mut self, transcript: &Transcript, change: &Change);
}

/// Renderer that shows nothing
#[derive(Debug, Default)]
pub struct NullRenderer;

impl Renderer for NullRenderer {
    fn render(&mut self, _transcript: &Transcript, _change: &Change) {}
}

/// Visible conversation state
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    mood: Option<String>,
    status: Option<String>,
    retry: bool,
}

impl Transcript {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted state
    #[must_use]
    pub fn restore(messages: Vec<Message>, mood: Option<String>) -> Self {
        Self {
            messages,
            mood,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    #[must_use]
    pub fn mood(&self) -> Option<&str> {
        self.mood.as_deref()
    }

    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Whether the one-shot retry affordance is showing
    #[must_use]
    pub const fn retry_available(&self) -> bool {
        self.retry
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Index of the assistant message currently streaming
    #[must_use]
    pub fn streaming_index(&self) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.state == MessageState::Streaming)
    }

    /// Completed, non-empty messages, most recent `limit`, for persistence
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Message> {
        let settled: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| m.state == MessageState::Final && !m.text.is_empty())
            .collect();
        let skip = settled.len().saturating_sub(limit);
        settled.into_iter().skip(skip).cloned().collect()
    }

    pub fn push(&mut self, message: Message) -> Change {
        self.messages.push(message);
        Change::Added(self.messages.len() - 1)
    }

    /// Open an empty assistant message to stream into
    pub fn begin_reply(&mut self) -> Change {
        self.push(Message {
            role: Role::Assistant,
            text: String::new(),
            state: MessageState::Streaming,
        })
    }

    /// Append streamed text to the open assistant message
    pub fn append(&mut self, delta: &str) -> Option<Change> {
        let index = self.streaming_index()?;
        self.messages[index].text.push_str(delta);
        Some(Change::Grew {
            index,
            delta: delta.to_string(),
        })
    }

    /// Close the open assistant message
    pub fn finish_reply(&mut self) -> Option<Change> {
        let index = self.streaming_index()?;
        self.messages[index].state = MessageState::Final;
        Some(Change::Finalized(index))
    }

    /// Report a failed exchange as an assistant message
    ///
    /// An empty streaming reply is replaced by the report; partial text is
    /// kept and the report follows it. Recoverable kinds show the retry
    /// affordance.
    pub fn fail(&mut self, kind: FailureKind) -> Vec<Change> {
        let mut changes = Vec::new();
        let report = Message {
            role: Role::Assistant,
            text: kind.user_message(),
            state: MessageState::Failed,
        };

        match self.streaming_index() {
            Some(index) if self.messages[index].text.is_empty() => {
                self.messages[index] = report;
                changes.push(Change::Grew {
                    index,
                    delta: self.messages[index].text.clone(),
                });
                changes.push(Change::Finalized(index));
            }
            Some(index) => {
                self.messages[index].state = MessageState::Final;
                changes.push(Change::Finalized(index));
                changes.push(self.push(report));
            }
            None => changes.push(self.push(report)),
        }

        if kind.is_recoverable() {
            self.retry = true;
            changes.push(Change::Retry);
        }
        changes
    }

    /// Consume the retry affordance; false if it was not showing
    pub fn take_retry(&mut self) -> bool {
        std::mem::take(&mut self.retry)
    }

    /// Hide the retry affordance without using it
    pub fn clear_retry(&mut self) -> Option<Change> {
        self.take_retry().then_some(Change::Retry)
    }

    pub fn set_mood(&mut self, mood: impl Into<String>) -> Change {
        self.mood = Some(mood.into());
        Change::Mood
    }

    pub fn set_status(&mut self, status: impl Into<String>) -> Change {
        self.status = Some(status.into());
        Change::Status
    }

    pub fn clear_status(&mut self) -> Option<Change> {
        self.status.take().map(|_| Change::Status)
    }

    /// Forget everything
    pub fn clear(&mut self) -> Change {
        *self = Self::default();
        Change::Reset
    }
}
