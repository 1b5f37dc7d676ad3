//! Domain error taxonomy shared by every component

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the session bridge, lifecycle and storage layers
#[derive(Debug, Error)]
pub enum CodetainerError {
    /// Missing or invalid input, detected before any runtime call
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// No interactive session is registered for the container
    #[error("no session attached to container {0}")]
    NotAttached(String),

    /// The container engine rejected or failed an operation
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A one-shot command wrote to stderr; the payload is the stderr text
    #[error("{0}")]
    ExecFailure(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("operation timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(String),
}

impl CodetainerError {
    /// Stable error code used in the JSON error envelope
    pub fn kind(&self) -> &'static str {
        match self {
            CodetainerError::Validation(_) => "VALIDATION_ERROR",
            CodetainerError::NotFound(_) => "NOT_FOUND",
            CodetainerError::Conflict(_) => "CONFLICT",
            CodetainerError::NotAttached(_) => "NOT_ATTACHED",
            CodetainerError::Runtime(_) => "RUNTIME_ERROR",
            CodetainerError::ExecFailure(_) => "EXEC_FAILURE",
            CodetainerError::Transport(_) => "TRANSPORT_ERROR",
            CodetainerError::Parse(_) => "PARSE_ERROR",
            CodetainerError::Timeout(_) => "TIMEOUT",
            CodetainerError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        CodetainerError::Validation(message.into())
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        CodetainerError::Transport(err.to_string())
    }
}

pub type Result<T, E = CodetainerError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exec_failure_message_is_stderr() {
        let err = CodetainerError::ExecFailure("tput: unknown terminal".into());
        assert_eq!(err.to_string(), "tput: unknown terminal");
        assert_eq!(err.kind(), "EXEC_FAILURE");
    }

    #[test]
    fn test_timeout_message() {
        let err = CodetainerError::Timeout(Duration::from_secs(10));
        assert_eq!(err.to_string(), "operation timed out after 10s");
    }
}
