//! Error types shared by the backend client and the orchestration core.

use thiserror::Error;

/// Convenience alias for results produced by backend calls.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never produced a response (connect, TLS, timeout).
    #[error("request to {path} failed: {source}")]
    Transport {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// The backend answered with a non-success status.
    #[error("{path} returned {status}: {message}")]
    Status {
        path: String,
        status: u16,
        message: String,
    },

    #[error("failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("drive '{0}' not found")]
    DriveNotFound(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("unknown command '{0}'")]
    UnknownCommand(String),

    #[error("invalid server URL '{0}'")]
    InvalidUrl(String),

    #[error("invalid task identifier '{0}'")]
    InvalidUpid(String),

    /// The backend refused the command without starting a task.
    #[error("{0}")]
    Rejected(String),

    /// The simulated backend is configured to drop every request.
    #[error("backend unreachable")]
    Unreachable,
}

impl ApiError {
    /// True for failures where no response reached the client.
    pub fn is_transport(&self) -> bool {
        matches!(self, ApiError::Transport { .. } | ApiError::Unreachable)
    }
}
