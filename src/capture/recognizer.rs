//! Speech recognizer seam

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;

/// Something a recognition engine reports while listening
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Unconfirmed text for the words currently being spoken; replaces any
    /// previous interim text. Empty text still counts as voice activity.
    Interim(String),
    /// Speech was heard whose words will arrive later as one `Final`
    Pending,
    /// Confirmed transcript fragment; settles one `Pending` if any is
    /// outstanding, and may be empty when that speech held no words
    Final(String),
    /// The engine stopped on its own
    Ended,
    /// The engine failed
    Failed(RecognizerFailure),
}

/// Why a recognizer failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerFailure {
    /// Microphone access refused
    PermissionDenied,
    /// Any other engine failure
    Other(String),
}

/// A speech recognition engine
///
/// Each `start` begins a fresh recognition run whose events arrive on the
/// returned channel; the channel closing is equivalent to
/// [`RecognizerEvent::Ended`]. After `stop` the engine stops listening but
/// keeps reporting results for speech it already heard, then closes the
/// channel.
pub trait Recognizer: Send {
    /// Begin recognizing
    ///
    /// # Errors
    ///
    /// Returns error if the engine cannot start
    fn start(&mut self) -> Result<mpsc::Receiver<RecognizerEvent>>;

    /// Stop recognizing; must be safe to call when not running
    fn stop(&mut self);
}

/// Backend speech-to-text for recorded audio
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio to text
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;
}
