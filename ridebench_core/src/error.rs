//! Error classification.
//!
//! Every failure observed while driving the service is wrapped in a
//! [`CodeError`] carrying a stable numeric [`ErrorCode`]. A fixed subset of
//! codes is critical and must abort the run; the rest are tallied by an
//! [`ErrorCounter`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Numeric classification for benchmark failures.
///
/// Discriminants are part of the report format, so new codes are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Unknown = 0,
    FailedToSendChairCoordinate,
    FailedToDepart,
    FailedToAcceptRequest,
    FailedToDenyRequest,
    FailedToEvaluate,
    FailedToCheckRequestHistory,
    FailedToCreateRequest,
    UserNotRequestingButStatusChanged,
    ChairNotAssignedButStatusChanged,
    UnexpectedUserRequestStatusTransition,
    UnexpectedChairRequestStatusTransition,
    FailedToActivate,
    FailedToDeactivate,
    ChairAlreadyHasRequest,
    FailedToGetRequestDetail,
    FailedToRegisterUser,
    FailedToRegisterOwner,
    FailedToRegisterChair,
    FailedToConnectNotificationStream,
    FailedToRegisterPaymentMethods,
    FailedToGetOwnerSales,
    IncorrectAmountOfFareCharged,
    SalesMismatched,
    FailedToGetOwnerChairs,
    IncorrectOwnerChairsData,
    IncorrectRequestDetail,
}

impl ErrorCode {
    /// Codes that invalidate the whole run.
    pub const CRITICAL: [ErrorCode; 8] = [
        ErrorCode::UserNotRequestingButStatusChanged,
        ErrorCode::ChairNotAssignedButStatusChanged,
        ErrorCode::UnexpectedUserRequestStatusTransition,
        ErrorCode::UnexpectedChairRequestStatusTransition,
        ErrorCode::ChairAlreadyHasRequest,
        ErrorCode::IncorrectAmountOfFareCharged,
        ErrorCode::SalesMismatched,
        ErrorCode::IncorrectOwnerChairsData,
    ];

    pub fn is_critical(&self) -> bool {
        Self::CRITICAL.contains(self)
    }

    /// Numeric value of the code.
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_u16())
    }
}

/// A failure tagged with its classification code.
#[derive(Debug, Error)]
#[error("[{code}] {message}")]
pub struct CodeError {
    pub code: ErrorCode,

    pub message: String,

    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl CodeError {
    /// Creates an error with a plain message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Wraps an underlying error, keeping it as the source.
    pub fn wrap<E>(code: ErrorCode, err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            code,
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.code.is_critical()
    }
}

/// Returned once the tally crosses its limit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("too many errors: {total} exceeds the limit of {limit}")]
pub struct ErrorLimitExceeded {
    pub total: u64,
    pub limit: u64,
}

/// Default aggregate threshold for non-critical errors.
pub const DEFAULT_ERROR_LIMIT: u64 = 200;

/// Tallies non-critical errors per code.
#[derive(Debug)]
pub struct ErrorCounter {
    limit: u64,
    total: AtomicU64,
    per_code: Mutex<BTreeMap<ErrorCode, u64>>,
}

impl Default for ErrorCounter {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_LIMIT)
    }
}

impl ErrorCounter {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            total: AtomicU64::new(0),
            per_code: Mutex::new(BTreeMap::new()),
        }
    }

    /// Records one occurrence of `code`.
    ///
    /// Fails once the aggregate count is strictly greater than the limit.
    pub fn add(&self, code: ErrorCode) -> Result<(), ErrorLimitExceeded> {
        {
            let mut per_code = self.per_code.lock().unwrap_or_else(PoisonError::into_inner);
            *per_code.entry(code).or_insert(0) += 1;
        }
        let total = self.total.fetch_add(1, Ordering::AcqRel) + 1;
        if total > self.limit {
            return Err(ErrorLimitExceeded {
                total,
                limit: self.limit,
            });
        }
        Ok(())
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Acquire)
    }

    /// Snapshot of the per-code tally.
    pub fn counts(&self) -> BTreeMap<ErrorCode, u64> {
        self.per_code
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_classification() {
        assert!(ErrorCode::ChairAlreadyHasRequest.is_critical());
        assert!(ErrorCode::IncorrectAmountOfFareCharged.is_critical());
        assert!(!ErrorCode::FailedToSendChairCoordinate.is_critical());
        assert!(!ErrorCode::FailedToRegisterUser.is_critical());
    }

    #[test]
    fn test_code_error_display_and_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "connection reset");
        let err = CodeError::wrap(ErrorCode::FailedToDepart, io);
        assert_eq!(err.to_string(), "[FailedToDepart(2)] connection reset");
        assert!(std::error::Error::source(&err).is_some());

        let plain = CodeError::new(ErrorCode::SalesMismatched, "total differs");
        assert!(std::error::Error::source(&plain).is_none());
        assert!(plain.is_critical());
    }

    #[test]
    fn test_counter_escalates_past_limit() {
        let counter = ErrorCounter::new(3);
        for _ in 0..3 {
            counter.add(ErrorCode::FailedToAcceptRequest).unwrap();
        }
        let err = counter.add(ErrorCode::FailedToDenyRequest).unwrap_err();
        assert_eq!(err, ErrorLimitExceeded { total: 4, limit: 3 });

        let counts = counter.counts();
        assert_eq!(counts[&ErrorCode::FailedToAcceptRequest], 3);
        assert_eq!(counts[&ErrorCode::FailedToDenyRequest], 1);
        assert_eq!(counter.total(), 4);
    }
}
