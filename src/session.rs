//! Backend session identifier

use std::sync::{Arc, RwLock};

/// Shared handle to the current session identifier
///
/// Cloned into everything that talks to the backend. The identifier is only
/// ever replaced from a backend instruction (startup response or a
/// session-id stream event), never generated locally.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<RwLock<Option<String>>>);

impl SessionHandle {
    #[must_use]
    pub fn new(id: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(id)))
    }

    #[must_use]
    pub fn get(&self) -> Option<String> {
        self.0.read().ok().and_then(|id| id.clone())
    }

    /// Adopt an identifier sent by the backend
    ///
    /// Returns true if it differs from the current one. Blank identifiers
    /// are ignored.
    pub fn adopt(&self, id: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }

        let Ok(mut current) = self.0.write() else {
            return false;
        };
        if current.as_deref() == Some(id) {
            return false;
        }

        tracing::info!(session_id = id, "session adopted");
        *current = Some(id.to_string());
        true
    }

    /// Forget the identifier (explicit reset)
    pub fn clear(&self) {
        if let Ok(mut current) = self.0.write() {
            *current = None;
        }
    }
}
