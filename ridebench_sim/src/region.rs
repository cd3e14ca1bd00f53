//! Per-region population and satisfaction bookkeeping.

use crate::registry::UserId;
use ridebench_core::Region;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

/// Live state of one region shared by every actor anchored to it.
#[derive(Debug)]
pub struct RegionState {
    pub region: Region,

    users: Mutex<Vec<UserId>>,

    active_users: AtomicI64,

    /// Sum of per-user average scores, in thousandths of a point
    total_evaluation_milli: AtomicI64,

    /// Users that contributed to the sum
    evaluated_users: AtomicI64,
}

impl RegionState {
    pub fn new(region: Region) -> Self {
        Self {
            region,
            users: Mutex::new(Vec::new()),
            active_users: AtomicI64::new(0),
            total_evaluation_milli: AtomicI64::new(0),
            evaluated_users: AtomicI64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.region.name
    }

    pub fn add_user(&self, id: UserId) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(id);
        self.active_users.fetch_add(1, Ordering::AcqRel);
    }

    /// Every user ever registered here, churned ones included.
    pub fn users(&self) -> Vec<UserId> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn active_users(&self) -> i64 {
        self.active_users.load(Ordering::Acquire)
    }

    /// Removes one active user unless that would go below `floor`.
    pub fn try_leave(&self, floor: i64) -> bool {
        self.active_users
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n > floor).then_some(n - 1)
            })
            .is_ok()
    }

    /// Replaces a user's previous average (if any) with `new_milli`.
    pub fn update_user_average(&self, previous_milli: Option<i64>, new_milli: i64) {
        if previous_milli.is_none() {
            self.evaluated_users.fetch_add(1, Ordering::AcqRel);
        }
        self.total_evaluation_milli
            .fetch_add(new_milli - previous_milli.unwrap_or(0), Ordering::AcqRel);
    }

    /// Rounded average satisfaction, 0 before anyone evaluated.
    pub fn satisfaction_score(&self) -> i64 {
        let users = self.evaluated_users.load(Ordering::Acquire);
        if users == 0 {
            return 0;
        }
        let total = self.total_evaluation_milli.load(Ordering::Acquire);
        (total + users * 500) / (users * 1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ridebench_core::Coordinate;

    fn region() -> RegionState {
        RegionState::new(Region::new("test", Coordinate::new(0, 0), 100, 100))
    }

    #[test]
    fn test_leave_respects_floor() {
        let state = region();
        for id in 1..=3 {
            state.add_user(UserId(id));
        }
        assert!(state.try_leave(1));
        assert!(state.try_leave(1));
        assert!(!state.try_leave(1));
        assert_eq!(state.active_users(), 1);
        assert_eq!(state.users().len(), 3);
    }

    #[test]
    fn test_satisfaction_is_incremental_average() {
        let state = region();
        assert_eq!(state.satisfaction_score(), 0);

        state.update_user_average(None, 5000);
        state.update_user_average(None, 2000);
        // (5 + 2) / 2 = 3.5 rounds up
        assert_eq!(state.satisfaction_score(), 4);

        // second user improves to 3
        state.update_user_average(Some(2000), 3000);
        assert_eq!(state.satisfaction_score(), 4);

        state.update_user_average(Some(5000), 1000);
        assert_eq!(state.satisfaction_score(), 2);
    }
}
