//! Error types for the EchoLens pipeline.

use thiserror::Error;

/// Result type alias using EchoLens' Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for EchoLens operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Episode not found
    #[error("Episode not found: {0}")]
    EpisodeNotFound(uuid::Uuid),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Transient provider failure (network, timeout, 5xx, rate limit).
    #[error("Transient error: {0}")]
    Transient(String),

    /// Provider rejected the request and retrying will not help.
    #[error("Adapter error: {0}")]
    Adapter(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (bad credentials, dimension mismatch, missing settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conflicting state, e.g. an active job already exists for an episode
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Job was cancelled at a stage boundary
    #[error("Cancelled")]
    Cancelled,

    /// HTTP/network request failed outside an adapter
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the same call could succeed.
    ///
    /// Only transient provider failures qualify. Authentication failures,
    /// other 4xx rejections and local errors are fatal for the stage.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() || e.is_request() {
            return Error::Transient(e.to_string());
        }
        match e.status() {
            Some(status) if status.is_server_error() || status.as_u16() == 429 => {
                Error::Transient(e.to_string())
            }
            _ => Error::Request(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_not_found() {
        let err = Error::NotFound("test resource".to_string());
        assert_eq!(err.to_string(), "Not found: test resource");
    }

    #[test]
    fn test_error_display_episode_not_found() {
        let id = Uuid::nil();
        let err = Error::EpisodeNotFound(id);
        assert_eq!(err.to_string(), format!("Episode not found: {}", id));
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_transient() {
        let err = Error::Transient("503 Service Unavailable".to_string());
        assert_eq!(err.to_string(), "Transient error: 503 Service Unavailable");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("missing API key".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing API key");
    }

    #[test]
    fn test_error_display_cancelled() {
        assert_eq!(Error::Cancelled.to_string(), "Cancelled");
    }

    #[test]
    fn test_error_display_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = Error::Io(io_err);
        assert!(err.to_string().contains("I/O error:"));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(Error::Transient("timeout".into()).is_retryable());
        assert!(!Error::Adapter("bad request".into()).is_retryable());
        assert!(!Error::Config("invalid key".into()).is_retryable());
        assert!(!Error::Cancelled.is_retryable());
        assert!(!Error::Internal("boom".into()).is_retryable());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        assert!(json_err.is_err());

        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => {
                assert!(!msg.is_empty());
            }
            _ => panic!("Expected Serialization error"),
        }
    }
}
