//! Bounded-concurrency processing queue.

use crate::payment::{Payment, PaymentStatus};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Decides the outcome of a payment.
///
/// Implemented by whoever owns the ground truth the payment is judged
/// against; the queue itself knows nothing about users or fares.
pub trait Verifier: Send + Sync + 'static {
    fn verify(&self, payment: &Payment) -> PaymentStatus;
}

/// Runs at most `queue_size` verifications at once.
pub struct PaymentQueue {
    permits: Arc<Semaphore>,
    process_time: Duration,
    verifier: Arc<dyn Verifier>,
    accepted: Mutex<HashMap<String, Vec<Arc<Payment>>>>,
}

impl PaymentQueue {
    pub fn new(queue_size: usize, process_time: Duration, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(queue_size.max(1))),
            process_time,
            verifier,
            accepted: Mutex::new(HashMap::new()),
        }
    }

    /// Starts processing if a slot is free. Returns false when saturated.
    pub fn try_process(self: &Arc<Self>, payment: Arc<Payment>) -> bool {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                self.accept(&payment);
                let queue = Arc::clone(self);
                tokio::spawn(async move { queue.execute(payment, permit).await });
                true
            }
            Err(_) => false,
        }
    }

    /// Waits for a slot, then processes to completion. The payment is listed
    /// as accepted while it waits.
    pub async fn process(self: &Arc<Self>, payment: Arc<Payment>) -> PaymentStatus {
        self.accept(&payment);
        match self.permits.clone().acquire_owned().await {
            Ok(permit) => self.execute(payment, permit).await,
            // the semaphore is never closed
            Err(_) => payment.status(),
        }
    }

    /// Processes in the background once a slot frees up.
    pub fn enqueue(self: &Arc<Self>, payment: Arc<Payment>) {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.process(payment).await;
        });
    }

    fn accept(&self, payment: &Arc<Payment>) {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(payment.token.clone())
            .or_default()
            .push(Arc::clone(payment));
    }

    async fn execute(&self, payment: Arc<Payment>, permit: OwnedSemaphorePermit) -> PaymentStatus {
        tokio::time::sleep(self.process_time).await;
        let status = self.verifier.verify(&payment);
        payment.resolve(status);
        drop(permit);

        debug!(amount = payment.amount, ?status, "Payment processed");
        status
    }

    /// Payments accepted for `token`, in acceptance order.
    pub fn accepted_for(&self, token: &str) -> Vec<Arc<Payment>> {
        self.accepted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of free processing slots.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
