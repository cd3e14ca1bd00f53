//! RideBench Simulation Harness
//!
//! A virtual world of riders, chairs and fleet owners that drives a
//! ride-hailing service under load and checks that what the service reports
//! stays consistent with what actually happened.
//!
//! # Core Principle: Tick Barrier
//!
//! The world advances a virtual clock one tick at a time:
//! - **Dispatch**: every live actor gets at most one task per tick; an actor
//!   whose previous task is still running is skipped, never queued
//! - **Deadline**: the tick ends when its wall-clock budget runs out, and a
//!   timed-out tick suppresses the next round of population growth
//! - **Abort**: the first critical error cancels the whole run
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                          World                           │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐                │
//! │  │  Users   │  │  Chairs  │  │  Owners  │   registries   │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘                │
//! │       │   Request (shared status triple)                 │
//! │       ▼             ▼             ▼                      │
//! │  ┌────────────────────────────────────────┐              │
//! │  │  ridebench_env client traits           │              │
//! │  └───────────────────┬────────────────────┘              │
//! └──────────────────────┼───────────────────────────────────┘
//!                        ▼
//!        service under test (or LoopbackService)
//!                        │ charges fares
//!                        ▼
//!        PaymentGateway ──verify──► PaymentLedger
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use ridebench_sim::{ScenarioRunner, ScenarioId};
//!
//! let result = ScenarioRunner::new(42)
//!     .with_ticks(120)
//!     .run(ScenarioId::Standard)
//!     .await;
//! assert!(result.passed);
//! ```

mod chair;
mod clock;
mod error;
mod guard;
mod inbox;
mod ledger;
mod loopback;
mod owner;
mod region;
mod registry;
mod request;
mod runner;
pub mod scenarios;
mod user;
mod world;

#[cfg(test)]
mod testing;

pub use chair::{Chair, ChairActivity};
pub use clock::{VirtualClock, LENGTH_OF_DAY, LENGTH_OF_HOUR, LENGTH_OF_MINUTE};
pub use error::WorldError;
pub use guard::{TickGuard, TickPermit};
pub use inbox::NotificationInbox;
pub use ledger::{InvalidPayment, InvalidReason, PaymentLedger, MAX_PAYMENT_AMOUNT};
pub use loopback::{LoopbackConfig, LoopbackService};
pub use owner::{Owner, CHAIR_AUDIT_MINUTE, SALES_AUDIT_MINUTE};
pub use region::RegionState;
pub use registry::{ChairId, OwnerId, Registry, RequestId, UserId};
pub use request::{AssignedChair, Request, RequestRegistry, RequestState};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use user::{User, UserState};
pub use world::{IdlePolicy, PaymentReconciliation, TickReport, World, WorldConfig};
