//! A single payment and its completion signal.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

/// Processing outcome of a payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not processed yet
    Initial,
    Success,
    InvalidAmount,
    InvalidToken,
}

/// A payment request accepted by the gateway.
#[derive(Debug)]
pub struct Payment {
    /// Client-supplied key guaranteeing at-most-once processing
    pub idempotency_key: Option<String>,

    /// Payment token identifying the payer
    pub token: String,

    pub amount: i64,

    status: Mutex<PaymentStatus>,

    /// Set while processing is in flight
    locked: AtomicBool,

    done: watch::Sender<bool>,
}

impl Payment {
    /// Creates a payment in the locked, unprocessed state.
    pub fn new(idempotency_key: Option<String>, token: impl Into<String>, amount: i64) -> Arc<Self> {
        let (done, _) = watch::channel(false);
        Arc::new(Self {
            idempotency_key,
            token: token.into(),
            amount,
            status: Mutex::new(PaymentStatus::Initial),
            locked: AtomicBool::new(true),
            done,
        })
    }

    pub fn status(&self) -> PaymentStatus {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// True if a resent request carries the same payload.
    pub fn matches(&self, token: &str, amount: i64) -> bool {
        self.token == token && self.amount == amount
    }

    /// Records the outcome, unlocks the payment and fires the completion signal.
    ///
    /// Only the first call has any effect.
    pub(crate) fn resolve(&self, status: PaymentStatus) -> bool {
        self.done.send_if_modified(|done| {
            if *done {
                return false;
            }
            *self.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
            self.locked.store(false, Ordering::Release);
            *done = true;
            true
        })
    }

    /// Waits until the payment is processed and returns its status.
    pub async fn settled(&self) -> PaymentStatus {
        let mut rx = self.done.subscribe();
        // the sender lives in `self`, so the channel cannot close while we wait
        let _ = rx.wait_for(|done| *done).await;
        self.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_fires_once() {
        let payment = Payment::new(Some("k".into()), "tok", 1200);
        assert!(payment.is_locked());
        assert_eq!(payment.status(), PaymentStatus::Initial);

        let waiter = {
            let payment = payment.clone();
            tokio::spawn(async move { payment.settled().await })
        };

        assert!(payment.resolve(PaymentStatus::Success));
        assert!(!payment.resolve(PaymentStatus::InvalidAmount));

        assert_eq!(waiter.await.unwrap(), PaymentStatus::Success);
        assert!(!payment.is_locked());
        assert_eq!(payment.status(), PaymentStatus::Success);
    }

    #[test]
    fn test_payload_match() {
        let payment = Payment::new(None, "tok", 1200);
        assert!(payment.matches("tok", 1200));
        assert!(!payment.matches("tok", 1300));
        assert!(!payment.matches("other", 1200));
    }
}
