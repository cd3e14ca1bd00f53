//! RideBench Core - domain model for a ride-hailing correctness benchmarker.
//!
//! Everything here is synchronous and deterministic given an RNG:
//! - **Geometry**: integer coordinates, Manhattan distance, rectangular regions
//! - **Errors**: coded failures and the critical/non-critical split
//! - **Requests**: the ordered status model, fares and rider evaluation
//! - **Movement**: the per-tick step a chair takes toward its target
//! - **Fleet**: chair model catalog and chair location history

pub mod chair_model;
pub mod error;
pub mod geometry;
pub mod location;
pub mod movement;
pub mod request;

pub use chair_model::{find_model, pick_models, ChairModel, ModelRotation, CHAIR_MODELS};
pub use error::{CodeError, ErrorCode, ErrorCounter, ErrorLimitExceeded, DEFAULT_ERROR_LIMIT};
pub use geometry::{Coordinate, Region};
pub use location::{ChairLocation, LocationEntry};
pub use movement::{step_free_roam, step_toward};
pub use request::{
    calculate_fare, calculate_sales, needed_time, Evaluation, RequestStatus, RequestStatuses,
    RideTimeline, FIRST_RIDE_DISCOUNT, INITIAL_FARE,
};
