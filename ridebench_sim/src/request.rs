//! Ride requests shared between a user and a chair.

use crate::registry::{ChairId, OwnerId, Registry, RequestId, UserId};
use ridebench_core::{
    calculate_fare, calculate_sales, Coordinate, RequestStatuses, RideTimeline,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};

/// The chair serving a request, captured when it adopts the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssignedChair {
    pub id: ChairId,
    pub owner: OwnerId,
    pub server_id: String,
    pub model: &'static str,
    pub speed: i32,
}

/// Mutable part of a request, always accessed under its lock.
#[derive(Debug, Clone, Default)]
pub struct RequestState {
    pub statuses: RequestStatuses,

    pub chair: Option<AssignedChair>,

    /// Where the chair stood when it accepted
    pub chair_start: Option<Coordinate>,

    pub matched_at: i64,
    pub dispatched_at: i64,
    pub picked_up_at: i64,
    pub arrived_at: i64,
    pub completed_at: i64,

    /// Service-side completion time (ms), known after evaluation
    pub server_completed_at: Option<i64>,

    pub evaluated: bool,

    /// A payment for this request was accepted by the ledger
    pub paid: bool,
}

/// One ride request.
#[derive(Debug)]
pub struct Request {
    pub id: RequestId,
    pub user: UserId,
    pub pickup: Coordinate,
    pub destination: Coordinate,

    /// Discount applied to the metered fare
    pub discount: i64,

    pub requested_at: i64,

    server_id: OnceLock<String>,

    state: Mutex<RequestState>,
}

impl Request {
    pub fn new(
        id: RequestId,
        user: UserId,
        pickup: Coordinate,
        destination: Coordinate,
        discount: i64,
        requested_at: i64,
    ) -> Self {
        Self {
            id,
            user,
            pickup,
            destination,
            discount,
            requested_at,
            server_id: OnceLock::new(),
            state: Mutex::new(RequestState::default()),
        }
    }

    /// Service-assigned id, set once after the service accepted the request.
    pub fn server_id(&self) -> Option<&str> {
        self.server_id.get().map(String::as_str)
    }

    pub fn set_server_id(&self, id: impl Into<String>) -> bool {
        self.server_id.set(id.into()).is_ok()
    }

    /// Amount the user should be charged.
    pub fn fare(&self) -> i64 {
        calculate_fare(self.pickup, self.destination, self.discount)
    }

    /// Amount the owner earns.
    pub fn sales(&self) -> i64 {
        calculate_sales(self.pickup, self.destination)
    }

    /// Runs `f` under the request lock. Use for every compound read-modify-write.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut RequestState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn snapshot(&self) -> RequestState {
        self.with_state(|s| s.clone())
    }

    pub fn statuses(&self) -> RequestStatuses {
        self.with_state(|s| s.statuses)
    }

    pub fn timeline(&self) -> RideTimeline {
        self.with_state(|s| RideTimeline {
            requested_at: self.requested_at,
            matched_at: s.matched_at,
            dispatched_at: s.dispatched_at,
            picked_up_at: s.picked_up_at,
            arrived_at: s.arrived_at,
        })
    }
}

/// Request store with a secondary index on the service id.
#[derive(Default)]
pub struct RequestRegistry {
    requests: Registry<RequestId, Request>,
    by_server_id: RwLock<HashMap<String, Arc<Request>>>,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request the service already accepted under `server_id`.
    pub fn create(
        &self,
        server_id: &str,
        build: impl FnOnce(RequestId) -> Request,
    ) -> Arc<Request> {
        let request = self.requests.create(build);
        request.set_server_id(server_id);
        self.by_server_id
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(server_id.to_owned(), Arc::clone(&request));
        request
    }

    pub fn get(&self, id: RequestId) -> Option<Arc<Request>> {
        self.requests.get(id)
    }

    pub fn get_by_server_id(&self, server_id: &str) -> Option<Arc<Request>> {
        self.by_server_id
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(server_id)
            .cloned()
    }

    pub fn values(&self) -> Vec<Arc<Request>> {
        self.requests.values()
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
