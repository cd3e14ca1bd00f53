//! RideBench Payment Gateway
//!
//! A payment processor stand-in the service under test charges fares
//! through. Every payment is settled; whether it was *right* is decided by a
//! [`Verifier`] that owns the benchmark's ground truth and is reconciled
//! later.
//!
//! - [`Payment`]: one request, with a lock flag and a completion signal
//! - [`PaymentQueue`]: bounded-concurrency processing
//! - [`PaymentGateway`]: idempotency-key bookkeeping in front of the queue
//! - [`router`] / [`serve`]: the HTTP wire contract

mod gateway;
mod payment;
mod queue;
mod server;

pub use gateway::{GatewayConfig, PaymentGateway, PaymentOutcome};
pub use payment::{Payment, PaymentStatus};
pub use queue::{PaymentQueue, Verifier};
pub use server::{router, serve, GatewayError, IDEMPOTENCY_KEY_HEADER};
