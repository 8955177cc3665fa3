//! Error types for kestrel-launcher.

use std::time::Duration;

/// Result type alias using [`LaunchError`].
pub type LaunchResult<T> = Result<T, LaunchError>;

/// Errors that can occur while packaging and launching a program.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    // ─────────────────────────────────────────────────────────────────────────
    // Configuration errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// A resource multiplier could not be used.
    #[error("invalid value for {key}: {value:?}")]
    InvalidMultiplier {
        /// Configuration key holding the multiplier.
        key: String,
        /// The rejected raw value.
        value: String,
    },

    /// The program specification has more than one runnable.
    #[error("only one runnable per launch is supported, found {count}")]
    TooManyRunnables {
        /// Number of runnables in the specification.
        count: usize,
    },

    /// Neither the requests nor the limits carry a memory quantity.
    #[error("no memory settings in the given resource requirements")]
    MissingMemory,

    // ─────────────────────────────────────────────────────────────────────────
    // I/O errors
    // ─────────────────────────────────────────────────────────────────────────
    /// Local filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Object storage operation failed.
    #[error("storage error for {uri}: {source}")]
    Storage {
        /// Location the operation targeted.
        uri: String,
        /// Underlying storage error.
        source: object_store::Error,
    },

    /// Unsupported or malformed location URI.
    #[error("invalid location {uri}: {reason}")]
    InvalidLocation {
        /// The offending URI.
        uri: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Archive creation or reading failed.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    /// JSON encoding or decoding failed.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // ─────────────────────────────────────────────────────────────────────────
    // Cluster errors
    // ─────────────────────────────────────────────────────────────────────────
    /// The cluster rejected a request.
    #[error("cluster error ({status}): {message}")]
    Cluster {
        /// HTTP status returned by the API server.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// The deployment did not become ready in time.
    #[error("deployment {name} not ready within {timeout:?}")]
    StartTimeout {
        /// Deployment name.
        name: String,
        /// The timeout that expired.
        timeout: Duration,
    },

    /// Starting the program failed. Wraps the first failure.
    #[error("unable to create cluster resources while attempting to start program: {source}")]
    Start {
        /// The failure that aborted the launch.
        source: Box<LaunchError>,
        /// Error raised by the compensating cleanup, if it also failed.
        cleanup: Option<Box<LaunchError>>,
    },

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LaunchError {
    /// Create a configuration error.
    #[must_use]
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a storage error for the given location.
    #[must_use]
    pub fn storage(uri: impl std::fmt::Display, source: object_store::Error) -> Self {
        Self::Storage {
            uri: uri.to_string(),
            source,
        }
    }

    /// Create an invalid location error.
    #[must_use]
    pub fn invalid_location(uri: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        Self::InvalidLocation {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for errors raised before any I/O was attempted.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::InvalidMultiplier { .. }
                | Self::TooManyRunnables { .. }
                | Self::MissingMemory
        )
    }
}

impl From<figment::Error> for LaunchError {
    fn from(e: figment::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<tokio::task::JoinError> for LaunchError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("blocking task failed: {e}"))
    }
}
