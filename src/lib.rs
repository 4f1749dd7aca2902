//! Memo client - voice and text chat with the Memo companion backend
//!
//! This library provides the client-side interaction runtime:
//! - Voice capture with silence-based end of utterance
//! - A request gate allowing one exchange at a time
//! - Incremental decoding of the streamed reply
//! - Ordered sentence-by-sentence speech playback with local fallback
//! - A transcript view-model for rendering
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  utterance  ┌──────────────┐   bytes   ┌────────────────┐
//! │   Capture    ├────────────►│ Request Gate ├──────────►│ Stream Decoder │
//! └──────────────┘             └──────────────┘           └───────┬────────┘
//!                                                                 │ events
//!                                              ┌──────────────────┴──────┐
//!                                              ▼                         ▼
//!                                      ┌──────────────┐         ┌────────────────┐
//!                                      │  Transcript  │         │ Playback Queue │
//!                                      │  + Renderer  │         │ (TTS, speaker) │
//!                                      └──────────────┘         └────────────────┘
//! ```

pub mod capture;
pub mod client;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod gate;
pub mod render;
pub mod session;
pub mod speech;
pub mod stream;

pub use client::{BackendClient, BackendSynthesizer, Greeting};
pub use config::Config;
pub use conversation::{Conversation, MuteHandle, Submission};
pub use db::{DbConn, DbPool, StateRepo};
pub use error::{Error, FailureKind, Result};
pub use gate::{AbortHandle, BusyWatch, Origin, Rejection, RequestGate};
pub use render::{Message, Renderer, Role, TerminalRenderer, Transcript};
pub use session::SessionHandle;
pub use stream::StreamEvent;
