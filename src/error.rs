//! Error types for the Memo client

use std::fmt;

use thiserror::Error;

/// Result type alias for Memo client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Memo client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Microphone access was refused
    #[error("microphone permission denied")]
    CapturePermissionDenied,

    /// Recognition engine failure
    #[error("recognizer error: {0}")]
    Recognizer(String),

    /// Capture cannot start in the current state
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(&'static str),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio playback error
    #[error("playback error: {0}")]
    Playback(String),

    /// The exchange did not complete within the request timeout
    #[error("request timed out")]
    Timeout,

    /// The exchange was cancelled by a superseding action
    #[error("request cancelled")]
    Cancelled,

    /// Backend answered 429
    #[error("rate limited by backend")]
    RateLimited,

    /// Backend answered 503
    #[error("backend overloaded")]
    Overloaded,

    /// Backend answered with another non-success status
    #[error("backend error {status}: {body}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Response body, possibly empty
        body: String,
    },

    /// Malformed event stream
    #[error("stream anomaly: {0}")]
    StreamAnomaly(String),

    /// HTTP transport error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// User-facing failure category
///
/// Every [`Error`] collapses into one of these so the renderer can pick
/// differentiated wording and decide whether to offer a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    CapturePermissionDenied,
    CaptureNoSpeech,
    NetworkTimeout,
    RateLimited,
    ServiceOverloaded,
    BackendError(u16),
    StreamParseAnomaly,
    PlaybackFailure,
    /// Transport or local failure outside the taxonomy above
    Other,
}

impl FailureKind {
    /// Whether a retry of the same utterance may succeed
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        match self {
            Self::NetworkTimeout
            | Self::RateLimited
            | Self::ServiceOverloaded
            | Self::StreamParseAnomaly
            | Self::Other => true,
            Self::BackendError(status) => status >= 500,
            Self::CapturePermissionDenied | Self::CaptureNoSpeech | Self::PlaybackFailure => false,
        }
    }

    /// Text shown to the user for this failure
    #[must_use]
    pub fn user_message(self) -> String {
        match self {
            Self::CapturePermissionDenied => {
                "I can't reach your microphone. Check the permission and try again.".to_string()
            }
            Self::CaptureNoSpeech => "I didn't hear you. Try again?".to_string(),
            Self::NetworkTimeout => {
                "That took too long, so I stopped waiting. Want me to try again?".to_string()
            }
            Self::RateLimited => {
                "I'm getting a lot of messages right now. Give me a moment and try again."
                    .to_string()
            }
            Self::ServiceOverloaded => {
                "I'm a little overwhelmed at the moment. Please try again shortly.".to_string()
            }
            Self::BackendError(status) => format!("Something went wrong on my side ({status})."),
            Self::StreamParseAnomaly => "My reply got garbled on the way to you.".to_string(),
            Self::PlaybackFailure => "I couldn't play that reply out loud.".to_string(),
            Self::Other => "I couldn't reach the server. Check your connection.".to_string(),
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CapturePermissionDenied => f.write_str("capture-permission-denied"),
            Self::CaptureNoSpeech => f.write_str("capture-no-speech"),
            Self::NetworkTimeout => f.write_str("network-timeout"),
            Self::RateLimited => f.write_str("rate-limited"),
            Self::ServiceOverloaded => f.write_str("service-overloaded"),
            Self::BackendError(status) => write!(f, "backend-error({status})"),
            Self::StreamParseAnomaly => f.write_str("stream-parse-anomaly"),
            Self::PlaybackFailure => f.write_str("playback-failure"),
            Self::Other => f.write_str("other"),
        }
    }
}

impl Error {
    /// Map an HTTP status to its semantic error
    #[must_use]
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            429 => Self::RateLimited,
            503 => Self::Overloaded,
            _ => Self::Backend { status, body },
        }
    }

    /// Failure category of this error
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::CapturePermissionDenied => FailureKind::CapturePermissionDenied,
            Self::Timeout => FailureKind::NetworkTimeout,
            Self::Http(e) if e.is_timeout() => FailureKind::NetworkTimeout,
            Self::RateLimited => FailureKind::RateLimited,
            Self::Overloaded => FailureKind::ServiceOverloaded,
            Self::Backend { status, .. } => FailureKind::BackendError(*status),
            Self::StreamAnomaly(_) => FailureKind::StreamParseAnomaly,
            Self::Playback(_) | Self::Tts(_) | Self::Audio(_) => FailureKind::PlaybackFailure,
            _ => FailureKind::Other,
        }
    }
}
