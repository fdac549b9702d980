use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. Anything in here aborts the run before a report is written.
#[derive(Debug, Error)]
pub enum QdupError {
    /// Bad threshold, scope/mode mismatch, unreadable config and friends.
    /// Always detected before any document is loaded.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("no questions could be loaded from {}", root.display())]
    EmptyCorpus { root: PathBuf },

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to render report: {0}")]
    Render(String),
}

impl QdupError {
    pub fn config(message: impl Into<String>) -> Self {
        QdupError::Config(message.into())
    }

    /// Process exit code, so callers can tell a bad setup from an empty bank.
    pub fn exit_code(&self) -> i32 {
        match self {
            QdupError::Config(_) => 2,
            QdupError::EmptyCorpus { .. } => 3,
            QdupError::Io { .. } | QdupError::Render(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, QdupError>;

/// A document that could not be read or parsed. Non-fatal: the loader
/// records it and moves on to the next document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}

impl LoadError {
    pub fn new(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let config = QdupError::config("bad threshold");
        let empty = QdupError::EmptyCorpus {
            root: PathBuf::from("bank"),
        };
        assert_eq!(config.exit_code(), 2);
        assert_eq!(empty.exit_code(), 3);
        assert_ne!(config.exit_code(), 0);
        assert_ne!(empty.exit_code(), 0);
    }

    #[test]
    fn test_load_error_display() {
        let err = LoadError::new("bank/q1.xml", "unexpected end of stream");
        assert_eq!(err.to_string(), "bank/q1.xml: unexpected end of stream");
    }
}
