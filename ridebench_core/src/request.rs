//! Request status model, fares and rider evaluation.

use crate::geometry::Coordinate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Base fare charged for every ride.
pub const INITIAL_FARE: i64 = 500;

/// Fare per unit of Manhattan distance between pickup and destination.
pub const FARE_PER_DISTANCE: i64 = 100;

/// Discount granted to a user's very first ride.
pub const FIRST_RIDE_DISCOUNT: i64 = 3000;

/// Lifecycle of a ride request, in progress order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Matching,
    Dispatching,
    Dispatched,
    Carrying,
    Arrived,
    Completed,
    Canceled,
}

impl RequestStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Canceled)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestStatus::Matching => "matching",
            RequestStatus::Dispatching => "dispatching",
            RequestStatus::Dispatched => "dispatched",
            RequestStatus::Carrying => "carrying",
            RequestStatus::Arrived => "arrived",
            RequestStatus::Completed => "completed",
            RequestStatus::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// The three independently observed views of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStatuses {
    /// What the world expects the request to reach next
    pub desired: RequestStatus,

    /// What the chair side currently shows
    pub chair: RequestStatus,

    /// What the user side currently shows
    pub user: RequestStatus,
}

impl Default for RequestStatuses {
    fn default() -> Self {
        Self {
            desired: RequestStatus::Matching,
            chair: RequestStatus::Matching,
            user: RequestStatus::Matching,
        }
    }
}

impl RequestStatuses {
    /// Moves the desired status forward. Returns false, leaving it untouched,
    /// if `next` would move it backwards or out of a terminal state.
    pub fn advance_desired(&mut self, next: RequestStatus) -> bool {
        if self.desired.is_terminal() || next < self.desired {
            return false;
        }
        self.desired = next;
        true
    }

    /// Sets the desired and chair views together, used for chair-driven steps.
    pub fn advance_chair(&mut self, next: RequestStatus) -> bool {
        if !self.advance_desired(next) {
            return false;
        }
        self.chair = next;
        true
    }
}

/// Metered part of the fare.
pub fn metered_fare(pickup: Coordinate, destination: Coordinate) -> i64 {
    FARE_PER_DISTANCE * i64::from(pickup.distance_to(destination))
}

/// Undiscounted fare; this is what the owner earns.
pub fn calculate_sales(pickup: Coordinate, destination: Coordinate) -> i64 {
    INITIAL_FARE + metered_fare(pickup, destination)
}

/// Fare charged to the user after `discount`. The base fare is never discounted.
pub fn calculate_fare(pickup: Coordinate, destination: Coordinate, discount: i64) -> i64 {
    INITIAL_FARE + (metered_fare(pickup, destination) - discount).max(0)
}

/// Ticks a chair of `speed` needs to cover `distance`.
pub fn needed_time(distance: i32, speed: i32) -> i64 {
    let speed = i64::from(speed.max(1));
    let distance = i64::from(distance.max(0));
    (distance + speed - 1) / speed
}

// =============================================================================
// EVALUATION
// =============================================================================

/// Matching must complete in fewer ticks than this.
pub const MATCHING_WAIT_LIMIT: i64 = 100;

/// Maximum deviation from the ideal travel time, in ticks.
pub const TRAVEL_TIME_TOLERANCE: i64 = 5;

/// The rider must be picked up in fewer ticks than this after dispatch.
pub const PICKUP_WAIT_LIMIT: i64 = 10;

/// Virtual-clock stamps of one ride.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RideTimeline {
    pub requested_at: i64,
    pub matched_at: i64,
    pub dispatched_at: i64,
    pub picked_up_at: i64,
    pub arrived_at: i64,
}

/// Four independent checks a rider applies to a finished ride.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub matching: bool,
    pub dispatch: bool,
    pub pickup: bool,
    pub drive: bool,
}

impl Evaluation {
    /// Judges a ride given where the chair started and how fast it moves.
    pub fn judge(
        timeline: &RideTimeline,
        chair_start: Coordinate,
        pickup: Coordinate,
        destination: Coordinate,
        speed: i32,
    ) -> Self {
        let ideal_dispatch = needed_time(chair_start.distance_to(pickup), speed);
        let ideal_drive = needed_time(pickup.distance_to(destination), speed);

        let dispatch_time = timeline.dispatched_at - timeline.matched_at;
        let drive_time = timeline.arrived_at - timeline.picked_up_at;

        Self {
            matching: timeline.matched_at - timeline.requested_at < MATCHING_WAIT_LIMIT,
            dispatch: (dispatch_time - ideal_dispatch).abs() <= TRAVEL_TIME_TOLERANCE,
            pickup: timeline.picked_up_at - timeline.dispatched_at < PICKUP_WAIT_LIMIT,
            drive: (drive_time - ideal_drive).abs() <= TRAVEL_TIME_TOLERANCE,
        }
    }

    /// Score in `1..=5`: one base point plus one per passed check.
    pub fn score(&self) -> i32 {
        1 + [self.matching, self.dispatch, self.pickup, self.drive]
            .iter()
            .filter(|ok| **ok)
            .count() as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fare_formula() {
        let pickup = Coordinate::new(0, 0);
        let destination = Coordinate::new(30, -12);
        assert_eq!(calculate_sales(pickup, destination), 500 + 100 * 42);
        assert_eq!(calculate_fare(pickup, destination, 0), 4700);
    }

    #[test]
    fn test_first_ride_discount_is_exact() {
        let pickup = Coordinate::new(10, 10);
        let destination = Coordinate::new(60, 10);
        let full = calculate_fare(pickup, destination, 0);
        let discounted = calculate_fare(pickup, destination, FIRST_RIDE_DISCOUNT);
        assert_eq!(full - discounted, FIRST_RIDE_DISCOUNT);
    }

    #[test]
    fn test_discount_never_touches_base_fare() {
        let pickup = Coordinate::new(0, 0);
        let destination = Coordinate::new(5, 0);
        assert_eq!(calculate_fare(pickup, destination, FIRST_RIDE_DISCOUNT), INITIAL_FARE);
    }

    #[test]
    fn test_needed_time_rounds_up() {
        assert_eq!(needed_time(60, 2), 30);
        assert_eq!(needed_time(61, 2), 31);
        assert_eq!(needed_time(0, 7), 0);
        assert_eq!(needed_time(1, 7), 1);
    }

    #[test]
    fn test_status_order() {
        assert!(RequestStatus::Matching < RequestStatus::Dispatching);
        assert!(RequestStatus::Arrived < RequestStatus::Completed);
        assert_eq!(RequestStatus::Carrying.to_string(), "carrying");
    }

    #[test]
    fn test_perfect_evaluation() {
        let start = Coordinate::new(0, 0);
        let pickup = Coordinate::new(10, 0);
        let destination = Coordinate::new(10, 20);
        let timeline = RideTimeline {
            requested_at: 0,
            matched_at: 3,
            dispatched_at: 8,
            picked_up_at: 9,
            arrived_at: 19,
        };
        let eval = Evaluation::judge(&timeline, start, pickup, destination, 2);
        assert_eq!(eval.score(), 5);
    }

    #[test]
    fn test_worst_evaluation() {
        let start = Coordinate::new(0, 0);
        let pickup = Coordinate::new(10, 0);
        let destination = Coordinate::new(10, 20);
        let timeline = RideTimeline {
            requested_at: 0,
            matched_at: 150,
            dispatched_at: 200,
            picked_up_at: 260,
            arrived_at: 400,
        };
        let eval = Evaluation::judge(&timeline, start, pickup, destination, 2);
        assert_eq!(eval, Evaluation::default());
        assert_eq!(eval.score(), 1);
    }

    fn any_status() -> impl Strategy<Value = RequestStatus> {
        prop_oneof![
            Just(RequestStatus::Matching),
            Just(RequestStatus::Dispatching),
            Just(RequestStatus::Dispatched),
            Just(RequestStatus::Carrying),
            Just(RequestStatus::Arrived),
            Just(RequestStatus::Completed),
            Just(RequestStatus::Canceled),
        ]
    }

    proptest! {
        #[test]
        fn test_desired_never_regresses(updates in proptest::collection::vec(any_status(), 0..32)) {
            let mut statuses = RequestStatuses::default();
            for next in updates {
                let before = statuses.desired;
                statuses.advance_desired(next);
                prop_assert!(statuses.desired >= before);
                if before.is_terminal() {
                    prop_assert_eq!(statuses.desired, before);
                }
            }
        }
    }
}
