//! Error types for SelfHeal

use thiserror::Error;

/// Result type alias using SelfHeal Error
pub type Result<T> = std::result::Result<T, Error>;

/// SelfHeal error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The repair backend call failed, timed out at the transport level, or
    /// returned a non-success status.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend answered but the payload could not be understood.
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// The visual backend is unreachable or disabled.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Operation timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Whether re-invoking the failed operation can plausibly succeed.
    ///
    /// `ServiceUnavailable` and `Cancelled` end the attempt loop immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Backend(_) | Error::MalformedResponse(_) | Error::Timeout { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unavailable => Error::ServiceUnavailable(status.message().to_string()),
            tonic::Code::DeadlineExceeded => Error::Timeout { seconds: 0 },
            tonic::Code::Cancelled => Error::Cancelled,
            code => Error::Backend(format!("{:?}: {}", code, status.message())),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(e: tonic::transport::Error) -> Self {
        Error::ServiceUnavailable(e.to_string())
    }
}
