//! Error types shared by the document host adapter and its callers.

use std::time::Duration;

/// Why a document load did not produce a document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoadError {
    #[error("failed to load document: {0}")]
    Failed(String),

    #[error("document load timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Superseded by a newer load or by closing the viewer. Never shown to
    /// the user.
    #[error("document load cancelled")]
    Cancelled,
}

impl LoadError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Failures reported by a rendering engine implementation.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("document source not found: {0}")]
    NotFound(String),

    #[error("{detail}")]
    Engine { detail: String },
}

impl HostError {
    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine { detail: msg.into() }
    }
}

impl From<HostError> for LoadError {
    fn from(err: HostError) -> Self {
        LoadError::Failed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_errors_become_load_failures() {
        let err: LoadError = HostError::engine("bad xref table").into();
        assert_eq!(err, LoadError::Failed("bad xref table".into()));
        assert!(!err.is_cancelled());
        assert!(LoadError::Cancelled.is_cancelled());
    }

    #[test]
    fn timeout_message_uses_seconds() {
        let err = LoadError::Timeout(Duration::from_secs(25));
        assert_eq!(err.to_string(), "document load timed out after 25s");
    }
}
