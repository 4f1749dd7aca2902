//! Configuration management for the Memo client

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result};

use file::MemoConfigFile;

/// Default backend base URL
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";

/// Memo client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend base URL, without trailing slash
    pub backend_url: String,

    /// Directory for the client database
    pub data_dir: PathBuf,

    /// Capture tuning
    pub capture: CaptureConfig,

    /// Request gate tuning
    pub gate: GateConfig,

    /// Speech output
    pub speech: SpeechConfig,
}

/// Speech capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Enable microphone capture
    pub enabled: bool,

    /// No speech for this long finalizes the utterance
    pub silence_window: Duration,

    /// RMS energy above which microphone audio counts as speech
    pub energy_threshold: f32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            silence_window: Duration::from_millis(1500),
            energy_threshold: 0.03,
        }
    }
}

/// Request gate configuration
#[derive(Debug, Clone)]
pub struct GateConfig {
    /// Minimum spacing after a voice-originated submission
    pub voice_cooldown: Duration,

    /// Minimum spacing after a typed submission
    pub typed_cooldown: Duration,

    /// Hard timeout for one exchange
    pub request_timeout: Duration,

    /// Shortest utterance (after trim) eligible for submission
    pub min_utterance_chars: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            voice_cooldown: Duration::from_millis(2000),
            typed_cooldown: Duration::from_millis(500),
            request_timeout: Duration::from_secs(60),
            min_utterance_chars: 2,
        }
    }
}

/// Speech output configuration
#[derive(Debug, Clone, Default)]
pub struct SpeechConfig {
    /// Speak replies out loud
    pub enabled: bool,

    /// Local fallback voice command; autodetected when `None`
    pub local_voice: Option<String>,
}

/// Return the default data directory: `~/.local/share/memo` on Linux
pub fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from(".local/share/memo"),
        |d| d.data_dir().join("memo"),
    )
}

impl Config {
    /// Load configuration from environment and config file
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load() -> Result<Self> {
        Self::load_with_options(false)
    }

    /// Load configuration with explicit voice disable option
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn load_with_options(disable_voice: bool) -> Result<Self> {
        let fc = file::load_config_file();
        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        if disable_voice {
            config.capture.enabled = false;
            config.speech.enabled = false;
        }

        Ok(config)
    }

    /// Resolve configuration from a parsed file and an environment lookup
    ///
    /// Precedence is env > toml > default.
    ///
    /// # Errors
    ///
    /// Returns error if a configured value is invalid
    pub fn from_sources<F>(fc: MemoConfigFile, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = env("MEMO_BACKEND_URL")
            .or(fc.backend.url)
            .unwrap_or_else(|| DEFAULT_BACKEND_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        if !backend_url.starts_with("http://") && !backend_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "backend url must be http(s): {backend_url}"
            )));
        }

        let data_dir = env("MEMO_DATA_DIR")
            .or(fc.storage.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let voice_disabled = env("MEMO_DISABLE_VOICE").is_some_and(|v| v == "1" || v == "true");

        let capture_default = CaptureConfig::default();
        let capture = CaptureConfig {
            enabled: !voice_disabled && fc.capture.enabled.unwrap_or(capture_default.enabled),
            silence_window: parse_env(&env, "MEMO_SILENCE_MS")?
                .or(fc.capture.silence_ms)
                .map_or(capture_default.silence_window, Duration::from_millis),
            energy_threshold: fc
                .capture
                .energy_threshold
                .unwrap_or(capture_default.energy_threshold),
        };

        let gate_default = GateConfig::default();
        let gate = GateConfig {
            voice_cooldown: parse_env(&env, "MEMO_VOICE_COOLDOWN_MS")?
                .or(fc.gate.voice_cooldown_ms)
                .map_or(gate_default.voice_cooldown, Duration::from_millis),
            typed_cooldown: parse_env(&env, "MEMO_TYPED_COOLDOWN_MS")?
                .or(fc.gate.typed_cooldown_ms)
                .map_or(gate_default.typed_cooldown, Duration::from_millis),
            request_timeout: parse_env(&env, "MEMO_TIMEOUT_SECS")?
                .or(fc.backend.timeout_secs)
                .map_or(gate_default.request_timeout, Duration::from_secs),
            min_utterance_chars: parse_env(&env, "MEMO_MIN_UTTERANCE_CHARS")?
                .or(fc.gate.min_utterance_chars)
                .unwrap_or(gate_default.min_utterance_chars),
        };

        if gate.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".to_string()));
        }

        let speech = SpeechConfig {
            enabled: !voice_disabled && fc.speech.enabled.unwrap_or(true),
            local_voice: env("MEMO_LOCAL_VOICE").or(fc.speech.local_voice),
        };

        Ok(Self {
            backend_url,
            data_dir,
            capture,
            gate,
            speech,
        })
    }

    /// Path of the client database file
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("memo.db")
    }
}

fn parse_env<F, T>(env: &F, key: &str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    env(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| Error::Config(format!("{key} has invalid value: {raw}")))
        })
        .transpose()
}
