//! Virtual clock.
//!
//! One tick is one simulated minute. The clock only moves when the world
//! finishes a tick, so every actor sees the same time for a whole tick.

use std::sync::atomic::{AtomicI64, Ordering};

pub const LENGTH_OF_MINUTE: i64 = 1;
pub const LENGTH_OF_HOUR: i64 = 60 * LENGTH_OF_MINUTE;
pub const LENGTH_OF_DAY: i64 = 24 * LENGTH_OF_HOUR;

#[derive(Debug, Default)]
pub struct VirtualClock {
    time: AtomicI64,
}

impl VirtualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current tick.
    pub fn now(&self) -> i64 {
        self.time.load(Ordering::Acquire)
    }

    /// Moves to the next tick and returns it.
    pub fn advance(&self) -> i64 {
        self.time.fetch_add(LENGTH_OF_MINUTE, Ordering::AcqRel) + LENGTH_OF_MINUTE
    }

    pub fn time_of_day(&self) -> i64 {
        self.now() % LENGTH_OF_DAY
    }

    pub fn minute_of_hour(&self) -> i64 {
        self.now() % LENGTH_OF_HOUR
    }
}
