//! Incremental server-sent-event decoding
//!
//! Bytes are buffered until a blank line closes an event block, so a block
//! split across reads (even inside a multi-byte character) decodes the same as
//! one delivered whole.

use super::StreamEvent;
use crate::{Error, Result};

/// Payload the backend sends to mark the end of a reply
pub const END_MARKER: &str = "[DONE]";

/// Default event type when a block has no `event:` line
const DEFAULT_EVENT: &str = "message";

/// Decodes an SSE byte stream into [`StreamEvent`]s
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    finished: bool,
}

impl SseDecoder {
    /// Create a decoder with an empty buffer
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes, returning every event completed by it
    ///
    /// Carriage returns are dropped on arrival so CRLF framing is handled
    /// without caring where a chunk boundary falls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamAnomaly`] if a completed block is not valid UTF-8
    /// or bytes arrive after [`finish`](Self::finish)
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Err(Error::StreamAnomaly("data after end of stream".to_string()));
        }

        self.buffer.extend(chunk.iter().copied().filter(|&b| b != b'\r'));

        let mut events = Vec::new();
        while let Some(end) = find_block_end(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..end + 2).collect();
            if let Some(event) = decode_block(&block[..end])? {
                events.push(event);
            }
        }

        Ok(events)
    }

    /// Signal end of the byte stream
    ///
    /// An unterminated trailing block is decoded as if it had been closed,
    /// then [`StreamEvent::Done`] is emitted. Later calls return nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamAnomaly`] if the trailing block is not valid UTF-8
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>> {
        if self.finished {
            return Ok(Vec::new());
        }
        self.finished = true;

        let rest = std::mem::take(&mut self.buffer);
        let mut events = Vec::new();
        if !rest.iter().all(u8::is_ascii_whitespace) {
            tracing::debug!(bytes = rest.len(), "decoding unterminated trailing block");
            if let Some(event) = decode_block(&rest)? {
                events.push(event);
            }
        }
        events.push(StreamEvent::Done);
        Ok(events)
    }

    /// Bytes buffered but not yet part of a complete block
    #[must_use]
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn find_block_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

/// Decode one event block (without its terminating blank line)
fn decode_block(block: &[u8]) -> Result<Option<StreamEvent>> {
    let text = std::str::from_utf8(block)
        .map_err(|e| Error::StreamAnomaly(format!("invalid utf-8 in event block: {e}")))?;

    let mut event_type: Option<&str> = None;
    let mut data: Option<String> = None;

    for line in text.split('\n') {
        if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            let value = value.strip_prefix(' ').unwrap_or(value);
            match data.as_mut() {
                Some(existing) => {
                    existing.push('\n');
                    existing.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        } else if !line.is_empty() && !line.starts_with(':') {
            tracing::trace!(line, "ignoring unknown sse field");
        }
    }

    let event_type = event_type.filter(|t| !t.is_empty()).unwrap_or(DEFAULT_EVENT);
    let Some(payload) = data.filter(|d| !d.is_empty()) else {
        return Ok(None);
    };

    let event = match event_type {
        "session-id" | "session_id" => {
            let id = payload.trim();
            if id.is_empty() {
                None
            } else {
                Some(StreamEvent::SessionId(id.to_string()))
            }
        }
        "mood" => Some(StreamEvent::Mood(payload.trim().to_string())),
        DEFAULT_EVENT if payload.trim() == END_MARKER => None,
        DEFAULT_EVENT => Some(StreamEvent::TextDelta(text_of(payload))),
        other => {
            tracing::trace!(event = other, "skipping non-text event");
            None
        }
    };

    Ok(event)
}

/// Extract the text carried by a data payload
///
/// A JSON object with a string `text` field carries its text there (the server
/// uses this to send newlines safely); anything else is literal text.
fn text_of(payload: String) -> String {
    if payload.starts_with('{') {
        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(&payload) {
            if let Some(serde_json::Value::String(text)) = map.get("text") {
                return text.clone();
            }
        }
    }
    payload
}
