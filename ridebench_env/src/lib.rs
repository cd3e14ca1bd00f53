//! RideBench Environment Abstraction Layer
//!
//! The simulation core never talks to a concrete transport. It drives the
//! service under test through narrow capability traits, one per actor kind:
//!
//! - [`WorldClient`] registers users, owners and chairs
//! - [`UserClient`] creates and evaluates rides
//! - [`ChairClient`] reports movement and ride progress
//! - [`OwnerClient`] reads the fleet roster and sales
//!
//! Push notifications arrive as a closed set of [`NotificationEvent`]s over a
//! [`NotificationFeed`].
//!
//! # Example
//!
//! ```ignore
//! use ridebench_env::{ChairClient, EnvError, NotificationEvent};
//!
//! async fn follow(chair: &dyn ChairClient) -> Result<(), EnvError> {
//!     let mut feed = chair.connect_notifications().await?;
//!     while let Some(event) = feed.recv().await {
//!         if let NotificationEvent::ChairMatched { server_request_id } = event {
//!             chair.accept_ride(&server_request_id).await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{
    ChairClient, OwnerClient, RegisteredChair, RegisteredOwner, RegisteredUser, UserClient,
    WorldClient,
};
pub use error::EnvError;
pub use types::{
    notification_stream, ChairSales, CoordinateAck, CreateRideRequest, CreatedRide,
    EvaluationAck, ModelSales, NotificationEvent, NotificationFeed, NotificationSink, OwnerChair,
    OwnerSales, RegisterChairRequest, RegisterOwnerRequest, RegisterUserRequest, RideDetail,
};
