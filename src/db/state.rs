//! Persisted client state

use chrono::Utc;
use rusqlite::OptionalExtension;

use super::DbPool;
use crate::render::Message;
use crate::{Error, Result};

/// Messages kept across restarts (matches the backend's history window)
pub const MAX_HISTORY: usize = 20;

const SESSION_ID: &str = "session_id";
const MUTED: &str = "muted";
const MOOD: &str = "mood";
const MESSAGES: &str = "messages";

/// Everything restored at startup
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub session_id: Option<String>,
    pub muted: bool,
    pub mood: Option<String>,
    pub messages: Vec<Message>,
}

/// Key/value access to the `client_state` table
#[derive(Clone)]
pub struct StateRepo {
    pool: DbPool,
}

impl StateRepo {
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Read a raw value
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let value = conn
            .query_row(
                "SELECT value FROM client_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    /// Write a raw value
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO client_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
            [key, value, now.as_str()],
        )?;

        Ok(())
    }

    /// Delete a value
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn remove(&self, key: &str) -> Result<()> {
        let conn = self
            .pool
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        conn.execute("DELETE FROM client_state WHERE key = ?1", [key])?;
        Ok(())
    }

    /// Forget the conversation (session, mood and messages); keeps preferences
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn clear_conversation(&self) -> Result<()> {
        for key in [SESSION_ID, MOOD, MESSAGES] {
            self.remove(key)?;
        }
        tracing::debug!("stored conversation cleared");
        Ok(())
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn session_id(&self) -> Result<Option<String>> {
        Ok(self.get(SESSION_ID)?.filter(|id| !id.trim().is_empty()))
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_session_id(&self, id: &str) -> Result<()> {
        self.set(SESSION_ID, id)
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn muted(&self) -> Result<bool> {
        Ok(self.get(MUTED)?.is_some_and(|v| v == "true"))
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_muted(&self, muted: bool) -> Result<()> {
        self.set(MUTED, if muted { "true" } else { "false" })
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn mood(&self) -> Result<Option<String>> {
        self.get(MOOD)
    }

    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_mood(&self, mood: &str) -> Result<()> {
        self.set(MOOD, mood)
    }

    /// Stored messages, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the database fails or the stored list is corrupt
    pub fn messages(&self) -> Result<Vec<Message>> {
        match self.get(MESSAGES)? {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }

    /// Store the most recent [`MAX_HISTORY`] messages
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_messages(&self, messages: &[Message]) -> Result<()> {
        let tail = &messages[messages.len().saturating_sub(MAX_HISTORY)..];
        self.set(MESSAGES, &serde_json::to_string(tail)?)
    }

    /// Load everything, falling back to defaults for anything unreadable
    #[must_use]
    pub fn load(&self) -> Snapshot {
        Snapshot {
            session_id: or_default(self.session_id(), SESSION_ID),
            muted: or_default(self.muted(), MUTED),
            mood: or_default(self.mood(), MOOD),
            messages: or_default(self.messages(), MESSAGES),
        }
    }
}

fn or_default<T: Default>(value: Result<T>, key: &str) -> T {
    value.unwrap_or_else(|e| {
        tracing::warn!(key, error = %e, "stored state unreadable, starting fresh");
        T::default()
    })
}
