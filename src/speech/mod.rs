//! Speech output
//!
//! Streamed reply text is cut into sentences and spoken in order through a
//! [`PlaybackQueue`]. Backend synthesis is the primary path; a local command
//! voice covers segments it fails on.

mod local;
mod queue;
mod segmenter;
mod speaker;

pub use local::CommandVoice;
pub use queue::{AudioSink, LocalVoice, PlaybackControl, PlaybackQueue, Synthesizer};
pub use segmenter::SentenceSegmenter;
pub use speaker::{PLAYBACK_SAMPLE_RATE, SpeakerSink, decode_mp3};
