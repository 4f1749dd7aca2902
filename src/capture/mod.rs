//! Voice capture
//!
//! Turns a recognizer's stream of interim and final results into one
//! utterance per listening session, ending on an explicit stop or after a
//! window of silence.

mod activity;
mod engine;
mod microphone;
mod recognizer;
mod transcribing;

pub use activity::{Activity, ActivityDetector};
pub use engine::{CaptureEngine, CaptureOutcome, CaptureState, Step, listen};
pub use microphone::{Microphone, SAMPLE_RATE, samples_to_wav};
pub use recognizer::{Recognizer, RecognizerEvent, RecognizerFailure, Transcriber};
pub use transcribing::TranscribingRecognizer;
