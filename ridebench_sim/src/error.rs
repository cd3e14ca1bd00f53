//! Run-terminating errors.

use ridebench_core::{CodeError, ErrorCode, ErrorLimitExceeded};
use thiserror::Error;

/// Why a run stopped early.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorldError {
    /// A critical consistency check failed
    #[error("critical error {code}: {message}")]
    Critical { code: ErrorCode, message: String },

    /// Too many non-critical errors piled up
    #[error(transparent)]
    TooManyErrors(#[from] ErrorLimitExceeded),

    /// An actor task panicked
    #[error("actor task panicked: {0}")]
    ActorPanicked(String),

    /// The run was cancelled without a recorded cause
    #[error("run aborted")]
    Aborted,
}

impl From<&CodeError> for WorldError {
    fn from(err: &CodeError) -> Self {
        WorldError::Critical {
            code: err.code,
            message: err.message.clone(),
        }
    }
}
