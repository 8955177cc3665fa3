//! Error types for kestrel-localizer.

use kestrel_launcher::LaunchError;

/// Result type alias using [`LocalizeError`].
pub type LocalizeResult<T> = Result<T, LocalizeError>;

/// Errors that can occur while localizing files.
#[derive(Debug, thiserror::Error)]
pub enum LocalizeError {
    /// Invalid invocation or configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// The bundle has no runnable with the requested name.
    #[error("runnable {name} not found in launch specification")]
    UnknownRunnable {
        /// Requested runnable.
        name: String,
    },

    /// An archive entry or manifest name would land outside the target
    /// directory.
    #[error("entry {name:?} escapes the target directory")]
    UnsafeEntry {
        /// Raw entry or file name.
        name: String,
    },

    /// Local filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive could not be read.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// Manifest or specification could not be decoded.
    #[error("manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    /// Fetching a file failed.
    #[error(transparent)]
    Launch(#[from] LaunchError),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LocalizeError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Returns true for errors raised before any file was touched.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::UnknownRunnable { .. })
    }
}

impl From<tokio::task::JoinError> for LocalizeError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}
