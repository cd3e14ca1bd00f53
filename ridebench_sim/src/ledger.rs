//! Ground truth the payment gateway judges charges against.

use crate::registry::RequestId;
use crate::user::User;
use ridebench_payment::{Payment, PaymentStatus, Verifier};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

/// Largest single charge the gateway accepts.
pub const MAX_PAYMENT_AMOUNT: i64 = 1_000_000;

/// Why a settled payment did not line up with a ride.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidReason {
    /// The payer had no ride in flight
    NoRequest,
    AlreadyPaid,
    /// The amount differs from the fare the world computed
    InvalidAmount,
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            InvalidReason::NoRequest => "no_request",
            InvalidReason::AlreadyPaid => "already_paid",
            InvalidReason::InvalidAmount => "invalid_amount",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidPayment {
    pub token: String,
    pub amount: i64,
    pub request: Option<RequestId>,
    pub reason: InvalidReason,
}

/// Verifies payments against the users' rides and keeps the running total.
///
/// Every well-formed charge is committed even when it is wrong; a wrong
/// charge is remembered and surfaces as a discrepancy when the world
/// reconciles payments against sales.
#[derive(Default)]
pub struct PaymentLedger {
    users: RwLock<HashMap<String, Arc<User>>>,
    committed: AtomicI64,
    invalid: Mutex<Vec<InvalidPayment>>,
}

impl PaymentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_token(&self, token: &str, user: Arc<User>) {
        self.users
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.to_owned(), user);
    }

    pub fn total_committed(&self) -> i64 {
        self.committed.load(Ordering::SeqCst)
    }

    pub fn invalid_payments(&self) -> Vec<InvalidPayment> {
        self.invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Count of invalid payments per reason.
    pub fn invalid_summary(&self) -> BTreeMap<InvalidReason, usize> {
        let mut summary = BTreeMap::new();
        for payment in self
            .invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            *summary.entry(payment.reason).or_insert(0) += 1;
        }
        summary
    }

    fn flag(&self, payment: &Payment, request: Option<RequestId>, reason: InvalidReason) {
        warn!(
            token = %payment.token,
            amount = payment.amount,
            request = ?request,
            %reason,
            "Payment does not match any ride"
        );
        self.invalid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(InvalidPayment {
                token: payment.token.clone(),
                amount: payment.amount,
                request,
                reason,
            });
    }
}

impl Verifier for PaymentLedger {
    fn verify(&self, payment: &Payment) -> PaymentStatus {
        let user = self
            .users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&payment.token)
            .cloned();
        let Some(user) = user else {
            return PaymentStatus::InvalidToken;
        };
        if payment.amount <= 0 || payment.amount > MAX_PAYMENT_AMOUNT {
            return PaymentStatus::InvalidAmount;
        }

        match user.current_request() {
            None => self.flag(payment, None, InvalidReason::NoRequest),
            Some(request) => {
                let fare = request.fare();
                let outcome = request.with_state(|s| {
                    if s.paid {
                        Some(InvalidReason::AlreadyPaid)
                    } else if payment.amount != fare {
                        Some(InvalidReason::InvalidAmount)
                    } else {
                        s.paid = true;
                        None
                    }
                });
                if let Some(reason) = outcome {
                    self.flag(payment, Some(request.id), reason);
                }
            }
        }

        self.committed.fetch_add(payment.amount, Ordering::SeqCst);
        PaymentStatus::Success
    }
}
