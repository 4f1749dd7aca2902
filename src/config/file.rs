//! TOML configuration file loading
//!
//! Supports `~/.config/memo/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::PathBuf;

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct MemoConfigFile {
    /// Backend connection
    #[serde(default)]
    pub backend: BackendFileConfig,

    /// Speech capture tuning
    #[serde(default)]
    pub capture: CaptureFileConfig,

    /// Request gate tuning
    #[serde(default)]
    pub gate: GateFileConfig,

    /// Speech output
    #[serde(default)]
    pub speech: SpeechFileConfig,

    /// Local persistence
    #[serde(default)]
    pub storage: StorageFileConfig,
}

/// Backend connection configuration
#[derive(Debug, Default, Deserialize)]
pub struct BackendFileConfig {
    /// Base URL (e.g. "http://localhost:8000")
    pub url: Option<String>,

    /// Hard timeout for one exchange, in seconds
    pub timeout_secs: Option<u64>,
}

/// Capture configuration
#[derive(Debug, Default, Deserialize)]
pub struct CaptureFileConfig {
    /// Enable microphone capture
    pub enabled: Option<bool>,

    /// Silence window before auto-submit, in milliseconds
    pub silence_ms: Option<u64>,

    /// RMS energy above which microphone audio counts as speech
    pub energy_threshold: Option<f32>,
}

/// Gate configuration
#[derive(Debug, Default, Deserialize)]
pub struct GateFileConfig {
    /// Cooldown after a voice submission, in milliseconds
    pub voice_cooldown_ms: Option<u64>,

    /// Cooldown after a typed submission, in milliseconds
    pub typed_cooldown_ms: Option<u64>,

    /// Minimum utterance length in characters
    pub min_utterance_chars: Option<usize>,
}

/// Speech output configuration
#[derive(Debug, Default, Deserialize)]
pub struct SpeechFileConfig {
    /// Speak replies out loud
    pub enabled: Option<bool>,

    /// Local fallback voice command (e.g. "espeak-ng")
    pub local_voice: Option<String>,
}

/// Storage configuration
#[derive(Debug, Default, Deserialize)]
pub struct StorageFileConfig {
    /// Directory holding the client database
    pub data_dir: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `MemoConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> MemoConfigFile {
    let Some(path) = config_file_path() else {
        return MemoConfigFile::default();
    };

    if !path.exists() {
        return MemoConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => parse_config(&content).unwrap_or_else(|e| {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to parse config file, using defaults"
            );
            MemoConfigFile::default()
        }),
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            MemoConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for this schema
pub fn parse_config(content: &str) -> crate::Result<MemoConfigFile> {
    let config = toml::from_str(content)?;
    Ok(config)
}

/// Return the config file path: `~/.config/memo/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("memo").join("config.toml"))
}
