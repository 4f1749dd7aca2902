//! Reply stream decoding
//!
//! Turns the chat endpoint's response body into a lazy, single-pass sequence
//! of [`StreamEvent`]s that the renderer and the playback queue consume.

mod sse;

use bytes::Bytes;
use futures::{Stream, StreamExt};

use crate::{Error, Result};

pub use sse::{END_MARKER, SseDecoder};

/// One decoded item of a reply stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Text to append to the assistant message
    TextDelta(String),
    /// Backend assigned a (new) session identifier
    SessionId(String),
    /// Backend updated the mood indicator
    Mood(String),
    /// The byte stream ended
    Done,
}

/// Decode a body byte stream into events as bytes arrive
///
/// The returned stream ends after [`StreamEvent::Done`], or after the first
/// error (transport failure or malformed block).
pub fn decode<S, E>(body: S) -> impl Stream<Item = Result<StreamEvent>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<Error> + Send + 'static,
{
    async_stream::stream! {
        let mut body = Box::pin(body);
        let mut decoder = SseDecoder::new();

        while let Some(chunk) = body.next().await {
            let decoded = match chunk {
                Ok(bytes) => decoder.push(&bytes),
                Err(e) => Err(e.into()),
            };

            match decoded {
                Ok(events) => {
                    for event in events {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, pending = decoder.pending(), "reply stream failed");
                    yield Err(e);
                    return;
                }
            }
        }

        match decoder.finish() {
            Ok(events) => {
                for event in events {
                    yield Ok(event);
                }
            }
            Err(e) => yield Err(e),
        }
    }
}
