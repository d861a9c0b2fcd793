//! Error types for vigil-core.

use thiserror::Error;

/// Result type for vigil-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vigil-core.
///
/// Diagnostics such as an infinite update loop or an invalid mutation target
/// are not errors; they go through the runtime's warn channel.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Raised by a computation body, accessor, or callback.
    #[error("{0}")]
    Message(String),

    /// A value had a different type than the caller required.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// Runtime configuration could not be parsed.
    #[error("invalid runtime config: {0}")]
    Config(String),

    /// The runtime backing a handle was dropped.
    #[error("runtime has been dropped")]
    RuntimeDropped,
}

impl Error {
    /// Build a [`Error::Message`] from anything string-like.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}
