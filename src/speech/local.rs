//! Local fallback voice via a system speech command

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::queue::LocalVoice;
use crate::{Error, Result};

/// Commands tried in order when none is configured
const CANDIDATES: &[&str] = &["say", "espeak-ng", "espeak", "spd-say"];

/// Speaks text through a command such as `say` or `espeak-ng`
#[derive(Debug, Clone)]
pub struct CommandVoice {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandVoice {
    /// Use a specific command; extra whitespace-separated words become leading args
    ///
    /// # Errors
    ///
    /// Returns error if the program cannot be found on `PATH`
    pub fn from_command(command: &str) -> Result<Self> {
        let mut words = command.split_whitespace();
        let name = words
            .next()
            .ok_or_else(|| Error::Config("empty local voice command".to_string()))?;

        let program = which::which(name)
            .map_err(|e| Error::Config(format!("local voice {name} not found: {e}")))?;

        Ok(Self {
            program,
            args: words.map(ToString::to_string).collect(),
        })
    }

    /// Find the first available system speech command
    #[must_use]
    pub fn detect() -> Option<Self> {
        let voice = CANDIDATES.iter().find_map(|name| {
            which::which(name).ok().map(|program| Self {
                program,
                args: Vec::new(),
            })
        });

        match &voice {
            Some(v) => tracing::debug!(program = %v.program.display(), "local voice available"),
            None => tracing::debug!("no local voice command found"),
        }

        voice
    }
}

#[async_trait]
impl LocalVoice for CommandVoice {
    async fn speak(&self, text: &str) -> Result<()> {
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::Playback(format!(
                "{} exited with {status}",
                self.program.display()
            )))
        }
    }
}
