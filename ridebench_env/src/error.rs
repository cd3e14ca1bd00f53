//! Error types for the service client abstraction.

use thiserror::Error;

/// Errors a service call can surface to an actor.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The service answered with a status the operation does not expect
    #[error("{operation}: unexpected status {status}: {message}")]
    UnexpectedStatus {
        operation: &'static str,
        status: u16,
        message: String,
    },

    /// The response body did not satisfy the operation's contract
    #[error("{operation}: malformed response: {message}")]
    Malformed {
        operation: &'static str,
        message: String,
    },
}

impl EnvError {
    /// Creates an unexpected-status error.
    pub fn status(operation: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self::UnexpectedStatus {
            operation,
            status,
            message: message.into(),
        }
    }

    /// Creates a malformed-response error.
    pub fn malformed(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Malformed {
            operation,
            message: message.into(),
        }
    }

    /// Status code carried by the error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}
