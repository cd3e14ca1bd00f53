//! Idempotent front door of the payment queue.

use crate::payment::{Payment, PaymentStatus};
use crate::queue::{PaymentQueue, Verifier};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::warn;

/// Gateway tuning.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Concurrent verifications allowed
    pub queue_size: usize,

    /// Simulated processing latency per payment
    pub process_time: Duration,

    /// When saturated, answer with a server error instead of waiting
    pub flaky_when_saturated: bool,

    /// Seed for the flaky-mode dice
    pub seed: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queue_size: 20,
            process_time: Duration::from_millis(100),
            flaky_when_saturated: false,
            seed: 42,
        }
    }
}

/// What a payment submission resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// Processing finished (now or earlier, for a replayed key)
    Settled(PaymentStatus),

    /// Another request with the same key is still being processed
    Processing,

    /// The key was seen before with a different payload
    PayloadMismatch,

    /// Saturated in flaky mode; carries the server error status to report
    Unavailable(u16),
}

/// What a flaky gateway does with a payment that found the queue full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Saturated {
    /// Wait for a slot and answer normally
    Block,

    /// Process later, answer with a server error now
    Enqueue(u16),

    /// Forget the payment, answer with a server error
    Drop(u16),
}

/// One in five saturated payments waits for a slot. Of the rest, four in
/// five are processed later and one is lost.
fn roll_saturated<R: Rng + ?Sized>(rng: &mut R) -> Saturated {
    if rng.gen_ratio(1, 5) {
        return Saturated::Block;
    }
    let keep = rng.gen_ratio(4, 5);
    let status = [500, 502, 504][rng.gen_range(0..3)];
    if keep {
        Saturated::Enqueue(status)
    } else {
        Saturated::Drop(status)
    }
}

/// Payment submission with idempotency-key bookkeeping.
pub struct PaymentGateway {
    config: GatewayConfig,
    queue: Arc<PaymentQueue>,
    known_keys: Mutex<HashMap<String, Arc<Payment>>>,
    rng: Mutex<ChaCha8Rng>,
}

impl PaymentGateway {
    pub fn new(config: GatewayConfig, verifier: Arc<dyn Verifier>) -> Self {
        let queue = Arc::new(PaymentQueue::new(
            config.queue_size,
            config.process_time,
            verifier,
        ));
        let rng = Mutex::new(ChaCha8Rng::seed_from_u64(config.seed));
        Self {
            config,
            queue,
            known_keys: Mutex::new(HashMap::new()),
            rng,
        }
    }

    /// Submits a payment.
    ///
    /// A key seen before is never processed again: it reports `Processing`
    /// while the first request is in flight, then the recorded status, or
    /// `PayloadMismatch` if token or amount differ from the first request.
    pub async fn post_payment(
        &self,
        idempotency_key: Option<String>,
        token: &str,
        amount: i64,
    ) -> PaymentOutcome {
        let payment = Payment::new(idempotency_key.clone(), token, amount);

        if let Some(key) = idempotency_key {
            let mut known = self.known_keys.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = known.get(&key) {
                if existing.is_locked() {
                    return PaymentOutcome::Processing;
                }
                if !existing.matches(token, amount) {
                    return PaymentOutcome::PayloadMismatch;
                }
                return PaymentOutcome::Settled(existing.status());
            }
            known.insert(key, Arc::clone(&payment));
        }

        if self.queue.try_process(Arc::clone(&payment)) {
            return PaymentOutcome::Settled(payment.settled().await);
        }

        if !self.config.flaky_when_saturated {
            return PaymentOutcome::Settled(self.queue.process(payment).await);
        }

        let saturated = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            roll_saturated(&mut *rng)
        };
        warn!(amount, ?saturated, "Payment queue saturated");
        match saturated {
            Saturated::Block => PaymentOutcome::Settled(self.queue.process(payment).await),
            Saturated::Enqueue(status) => {
                self.queue.enqueue(payment);
                PaymentOutcome::Unavailable(status)
            }
            Saturated::Drop(status) => {
                // never processed, so a retry with the same key starts over
                if let Some(key) = &payment.idempotency_key {
                    self.known_keys
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .remove(key);
                }
                PaymentOutcome::Unavailable(status)
            }
        }
    }

    /// Payments accepted for `token`, as `(amount, status)` in acceptance order.
    pub fn payments_for(&self, token: &str) -> Vec<(i64, PaymentStatus)> {
        self.queue
            .accepted_for(token)
            .iter()
            .map(|p| (p.amount, p.status()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingVerifier {
        calls: AtomicUsize,
    }

    impl Verifier for CountingVerifier {
        fn verify(&self, payment: &Payment) -> PaymentStatus {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if payment.token == "good" {
                PaymentStatus::Success
            } else {
                PaymentStatus::InvalidToken
            }
        }
    }

    fn gateway(process_ms: u64) -> (Arc<PaymentGateway>, Arc<CountingVerifier>) {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            queue_size: 2,
            process_time: Duration::from_millis(process_ms),
            ..Default::default()
        };
        (Arc::new(PaymentGateway::new(config, verifier.clone())), verifier)
    }

    #[tokio::test]
    async fn test_replay_after_completion_returns_recorded_status() {
        let (gw, verifier) = gateway(1);
        let first = gw.post_payment(Some("k1".into()), "good", 1500).await;
        assert_eq!(first, PaymentOutcome::Settled(PaymentStatus::Success));

        let replay = gw.post_payment(Some("k1".into()), "good", 1500).await;
        assert_eq!(replay, first);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.payments_for("good"), vec![(1500, PaymentStatus::Success)]);
    }

    #[tokio::test]
    async fn test_replay_with_different_payload_is_rejected() {
        let (gw, verifier) = gateway(1);
        gw.post_payment(Some("k1".into()), "good", 1500).await;
        let mismatch = gw.post_payment(Some("k1".into()), "good", 1600).await;
        assert_eq!(mismatch, PaymentOutcome::PayloadMismatch);
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_replay_mid_flight_conflicts() {
        let (gw, verifier) = gateway(200);
        let first = {
            let gw = gw.clone();
            tokio::spawn(async move { gw.post_payment(Some("k2".into()), "good", 900).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = gw.post_payment(Some("k2".into()), "good", 900).await;
        assert_eq!(second, PaymentOutcome::Processing);

        assert_eq!(
            first.await.unwrap(),
            PaymentOutcome::Settled(PaymentStatus::Success)
        );
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_payments_without_key_are_independent() {
        let (gw, verifier) = gateway(1);
        gw.post_payment(None, "bad", 100).await;
        let second = gw.post_payment(None, "bad", 100).await;
        assert_eq!(second, PaymentOutcome::Settled(PaymentStatus::InvalidToken));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    /// First seed whose opening roll matches `wanted`.
    fn seed_rolling(wanted: fn(Saturated) -> bool) -> u64 {
        (0..1000)
            .find(|seed| wanted(roll_saturated(&mut ChaCha8Rng::seed_from_u64(*seed))))
            .unwrap()
    }

    fn flaky_gateway(seed: u64) -> (Arc<PaymentGateway>, Arc<CountingVerifier>) {
        let verifier = Arc::new(CountingVerifier {
            calls: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            queue_size: 1,
            process_time: Duration::from_millis(200),
            flaky_when_saturated: true,
            seed,
        };
        (Arc::new(PaymentGateway::new(config, verifier.clone())), verifier)
    }

    /// Occupies the only slot with a slow payment.
    async fn saturate(gw: &Arc<PaymentGateway>) -> tokio::task::JoinHandle<PaymentOutcome> {
        let gw = gw.clone();
        let first = tokio::spawn(async move { gw.post_payment(None, "good", 100).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        first
    }

    #[test]
    fn test_saturation_rolls_cover_every_outcome() {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let rolls: Vec<Saturated> = (0..500).map(|_| roll_saturated(&mut rng)).collect();
        let blocked = rolls.iter().filter(|r| **r == Saturated::Block).count();
        let dropped = rolls
            .iter()
            .filter(|r| matches!(r, Saturated::Drop(_)))
            .count();
        assert!((60..140).contains(&blocked), "blocked {blocked}");
        assert!((40..120).contains(&dropped), "dropped {dropped}");
        assert!(rolls.iter().all(|r| match r {
            Saturated::Block => true,
            Saturated::Enqueue(s) | Saturated::Drop(s) => [500, 502, 504].contains(s),
        }));
    }

    #[tokio::test]
    async fn test_flaky_mode_enqueues_behind_server_error() {
        let (gw, verifier) = flaky_gateway(seed_rolling(|r| matches!(r, Saturated::Enqueue(_))));
        let first = saturate(&gw).await;

        match gw.post_payment(None, "good", 200).await {
            PaymentOutcome::Unavailable(status) => assert!([500, 502, 504].contains(&status)),
            other => panic!("expected a server error, got {other:?}"),
        }
        assert_eq!(first.await.unwrap(), PaymentOutcome::Settled(PaymentStatus::Success));

        // the rejected request is still processed eventually
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flaky_mode_blocked_payment_answers_normally() {
        let (gw, verifier) = flaky_gateway(seed_rolling(|r| r == Saturated::Block));
        let first = saturate(&gw).await;

        let blocked = gw.post_payment(Some("k".into()), "good", 200).await;
        assert_eq!(blocked, PaymentOutcome::Settled(PaymentStatus::Success));
        assert_eq!(first.await.unwrap(), PaymentOutcome::Settled(PaymentStatus::Success));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_flaky_mode_dropped_payment_can_be_retried() {
        let (gw, verifier) = flaky_gateway(seed_rolling(|r| matches!(r, Saturated::Drop(_))));
        let first = saturate(&gw).await;

        let dropped = gw.post_payment(Some("k".into()), "good", 200).await;
        assert!(matches!(dropped, PaymentOutcome::Unavailable(_)));
        assert_eq!(first.await.unwrap(), PaymentOutcome::Settled(PaymentStatus::Success));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gw.payments_for("good").len(), 1);

        let retried = gw.post_payment(Some("k".into()), "good", 200).await;
        assert_eq!(retried, PaymentOutcome::Settled(PaymentStatus::Success));
        assert_eq!(verifier.calls.load(Ordering::SeqCst), 2);
    }
}
