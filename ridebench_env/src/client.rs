//! Capability sets the simulated actors use to drive the service.

use crate::error::EnvError;
use crate::types::{
    CoordinateAck, CreateRideRequest, CreatedRide, EvaluationAck, NotificationFeed, OwnerChair,
    OwnerSales, RegisterChairRequest, RegisterOwnerRequest, RegisterUserRequest, RideDetail,
};
use async_trait::async_trait;
use ridebench_core::Coordinate;
use std::sync::Arc;

/// Entry point to the service: registers new actors.
///
/// Each successful registration hands back a client bound to the new
/// actor's credentials, so actors never deal with tokens themselves.
///
/// # Implementations
///
/// - **HTTP**: a client speaking the service's REST/SSE surface
/// - **Loopback**: `ridebench_sim::LoopbackService`, an in-process service
#[async_trait]
pub trait WorldClient: Send + Sync + 'static {
    /// Registers a rider. The service must return a non-empty id.
    async fn register_user(&self, req: RegisterUserRequest) -> Result<RegisteredUser, EnvError>;

    /// Registers a fleet owner.
    async fn register_owner(&self, req: RegisterOwnerRequest) -> Result<RegisteredOwner, EnvError>;

    /// Registers a chair under the owner identified by `chair_register_token`.
    async fn register_chair(
        &self,
        chair_register_token: &str,
        req: RegisterChairRequest,
    ) -> Result<RegisteredChair, EnvError>;
}

/// What a rider can do.
#[async_trait]
pub trait UserClient: Send + Sync + 'static {
    async fn register_payment_method(&self, token: &str) -> Result<(), EnvError>;

    async fn create_ride(&self, req: CreateRideRequest) -> Result<CreatedRide, EnvError>;

    /// Submits the rider's score for an arrived ride; the service charges the fare.
    async fn evaluate(&self, server_request_id: &str, score: i32) -> Result<EvaluationAck, EnvError>;

    async fn connect_notifications(&self) -> Result<NotificationFeed, EnvError>;
}

/// What a chair can do.
#[async_trait]
pub trait ChairClient: Send + Sync + 'static {
    async fn post_coordinate(&self, coordinate: Coordinate) -> Result<CoordinateAck, EnvError>;

    async fn accept_ride(&self, server_request_id: &str) -> Result<(), EnvError>;

    async fn deny_ride(&self, server_request_id: &str) -> Result<(), EnvError>;

    /// Reports that the rider is aboard and the chair is leaving the pickup point.
    async fn depart(&self, server_request_id: &str) -> Result<(), EnvError>;

    async fn activate(&self) -> Result<(), EnvError>;

    async fn get_ride(&self, server_request_id: &str) -> Result<RideDetail, EnvError>;

    async fn connect_notifications(&self) -> Result<NotificationFeed, EnvError>;
}

/// What a fleet owner can query.
#[async_trait]
pub trait OwnerClient: Send + Sync + 'static {
    async fn get_chairs(&self) -> Result<Vec<OwnerChair>, EnvError>;

    /// Sales of rides completed up to `until` (ms), or all of them.
    async fn get_sales(&self, until: Option<i64>) -> Result<OwnerSales, EnvError>;
}

/// Outcome of [`WorldClient::register_user`].
#[derive(Clone)]
pub struct RegisteredUser {
    pub server_id: String,
    pub client: Arc<dyn UserClient>,
}

/// Outcome of [`WorldClient::register_owner`].
#[derive(Clone)]
pub struct RegisteredOwner {
    pub server_id: String,
    pub chair_register_token: String,
    pub client: Arc<dyn OwnerClient>,
}

/// Outcome of [`WorldClient::register_chair`].
#[derive(Clone)]
pub struct RegisteredChair {
    pub server_id: String,
    pub owner_server_id: String,
    pub client: Arc<dyn ChairClient>,
}
