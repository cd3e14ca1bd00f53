//! Chair actor.

use crate::guard::TickGuard;
use crate::inbox::NotificationInbox;
use crate::region::RegionState;
use crate::registry::{ChairId, OwnerId};
use crate::request::{AssignedChair, Request};
use crate::world::{IdlePolicy, World};
use rand_chacha::ChaCha8Rng;
use ridebench_core::{
    step_free_roam, step_toward, ChairLocation, ChairModel, CodeError, Coordinate, ErrorCode,
    RequestStatus,
};
use ridebench_env::{ChairClient, NotificationEvent};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChairActivity {
    Inactive,
    Active,
}

#[derive(Debug)]
struct ChairState {
    activity: ChairActivity,

    /// Request the chair adopted, until it is cleaned up after completion
    request: Option<Arc<Request>>,

    /// Service id of a request offered but not yet adopted or denied
    offered: Option<String>,
}

pub struct Chair {
    pub id: ChairId,
    pub server_id: String,
    pub owner: OwnerId,
    pub name: String,
    pub model: ChairModel,
    pub region: Arc<RegionState>,

    client: Arc<dyn ChairClient>,
    state: Mutex<ChairState>,
    location: RwLock<ChairLocation>,
    inbox: NotificationInbox,
    guard: TickGuard,
    rng: Mutex<ChaCha8Rng>,
}

impl std::fmt::Debug for Chair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chair")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("owner", &self.owner)
            .field("name", &self.name)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Chair {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: ChairId,
        server_id: String,
        owner: OwnerId,
        name: String,
        model: ChairModel,
        region: Arc<RegionState>,
        initial: Coordinate,
        client: Arc<dyn ChairClient>,
        inbox_capacity: usize,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            inbox: NotificationInbox::new(id.to_string(), inbox_capacity),
            id,
            server_id,
            owner,
            name,
            model,
            region,
            client,
            state: Mutex::new(ChairState {
                activity: ChairActivity::Inactive,
                request: None,
                offered: None,
            }),
            location: RwLock::new(ChairLocation::new(initial)),
            guard: TickGuard::default(),
            rng: Mutex::new(rng),
        }
    }

    pub fn speed(&self) -> i32 {
        self.model.speed
    }

    pub fn activity(&self) -> ChairActivity {
        self.lock_state().activity
    }

    pub fn current_request(&self) -> Option<Arc<Request>> {
        self.lock_state().request.clone()
    }

    pub fn current(&self) -> Coordinate {
        self.read_location().current()
    }

    /// Copy of the location history.
    pub fn location(&self) -> ChairLocation {
        self.read_location().clone()
    }

    pub(crate) fn guard(&self) -> &TickGuard {
        &self.guard
    }

    pub(crate) fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ChairState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_location(&self) -> std::sync::RwLockReadGuard<'_, ChairLocation> {
        self.location.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_location(&self) -> std::sync::RwLockWriteGuard<'_, ChairLocation> {
        self.location.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// One step of the chair's state machine.
    pub async fn tick(&self, world: &World) -> Result<(), CodeError> {
        for event in self.inbox.drain() {
            self.handle_notification(event)?;
        }

        let now = world.now();
        let (request, offered, activity) = {
            let state = self.lock_state();
            (state.request.clone(), state.offered.clone(), state.activity)
        };

        if let Some(request) = request {
            self.drive(&request, activity, now).await?;
        } else if let Some(server_request_id) = offered {
            self.resolve_offer(world, &server_request_id).await?;
        } else {
            match activity {
                ChairActivity::Inactive => self.activate(now).await?,
                ChairActivity::Active => {
                    if world.config().idle_policy == IdlePolicy::Roam {
                        let current = self.current();
                        let next = {
                            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                            step_free_roam(current, &self.region.region, self.speed(), &mut *rng)
                        };
                        self.write_location().move_to(next, now);
                    }
                }
            }
        }

        self.report_coordinate().await
    }

    async fn drive(
        &self,
        request: &Arc<Request>,
        activity: ChairActivity,
        now: i64,
    ) -> Result<(), CodeError> {
        let server_request_id = request.server_id().unwrap_or_default().to_owned();
        let statuses = request.statuses();

        match statuses.chair {
            RequestStatus::Matching => {
                if activity == ChairActivity::Active {
                    self.client
                        .accept_ride(&server_request_id)
                        .await
                        .map_err(|e| CodeError::wrap(ErrorCode::FailedToAcceptRequest, e))?;
                    let start = self.current();
                    request.with_state(|s| {
                        s.statuses.advance_chair(RequestStatus::Dispatching);
                        s.chair_start = Some(start);
                        s.matched_at = now;
                    });
                } else {
                    self.client
                        .deny_ride(&server_request_id)
                        .await
                        .map_err(|e| CodeError::wrap(ErrorCode::FailedToDenyRequest, e))?;
                    request.with_state(|s| s.chair = None);
                    self.lock_state().request = None;
                }
            }
            RequestStatus::Dispatching => {
                if self.move_toward(request.pickup, now) {
                    request.with_state(|s| {
                        s.statuses.advance_chair(RequestStatus::Dispatched);
                        s.dispatched_at = now;
                    });
                }
            }
            RequestStatus::Dispatched => {
                // the rider only boards once told the chair is there
                if statuses.user != RequestStatus::Dispatched {
                    return Ok(());
                }
                self.client
                    .depart(&server_request_id)
                    .await
                    .map_err(|e| CodeError::wrap(ErrorCode::FailedToDepart, e))?;
                request.with_state(|s| {
                    s.statuses.advance_chair(RequestStatus::Carrying);
                    s.picked_up_at = now;
                });
            }
            RequestStatus::Carrying => {
                if self.move_toward(request.destination, now) {
                    request.with_state(|s| {
                        s.statuses.advance_chair(RequestStatus::Arrived);
                        s.arrived_at = now;
                    });
                }
            }
            RequestStatus::Arrived => {}
            RequestStatus::Completed | RequestStatus::Canceled => {
                debug!(chair = %self.id, request = %request.id, "Releasing finished request");
                self.lock_state().request = None;
            }
        }
        Ok(())
    }

    /// Moves one step toward `target`. Returns true once there.
    fn move_toward(&self, target: Coordinate, now: i64) -> bool {
        let current = self.current();
        let next = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            step_toward(current, target, self.speed(), &mut *rng)
        };
        // recorded even when standing still so the service hears about arrival
        self.write_location().move_to(next, now);
        next == target
    }

    async fn resolve_offer(&self, world: &World, server_request_id: &str) -> Result<(), CodeError> {
        let Some(request) = world.requests().get_by_server_id(server_request_id) else {
            // not one of ours, nobody in the simulation can ride it
            self.client
                .deny_ride(server_request_id)
                .await
                .map_err(|e| CodeError::wrap(ErrorCode::FailedToDenyRequest, e))?;
            self.lock_state().offered = None;
            return Ok(());
        };

        let detail = self
            .client
            .get_ride(server_request_id)
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToGetRequestDetail, e))?;

        if detail.pickup != request.pickup || detail.destination != request.destination {
            self.client
                .deny_ride(server_request_id)
                .await
                .map_err(|e| CodeError::wrap(ErrorCode::FailedToDenyRequest, e))?;
            self.lock_state().offered = None;
            return Err(CodeError::new(
                ErrorCode::IncorrectRequestDetail,
                format!(
                    "ride {server_request_id}: expected {} -> {}, got {} -> {}",
                    request.pickup, request.destination, detail.pickup, detail.destination
                ),
            ));
        }

        request.with_state(|s| {
            s.chair = Some(AssignedChair {
                id: self.id,
                owner: self.owner,
                server_id: self.server_id.clone(),
                model: self.model.name,
                speed: self.model.speed,
            });
        });
        let mut state = self.lock_state();
        state.offered = None;
        state.request = Some(request);
        Ok(())
    }

    async fn activate(&self, now: i64) -> Result<(), CodeError> {
        if !self.inbox.is_connected() {
            let feed = self
                .client
                .connect_notifications()
                .await
                .map_err(|e| CodeError::wrap(ErrorCode::FailedToConnectNotificationStream, e))?;
            self.inbox.attach(feed);
        }

        self.client
            .activate()
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToActivate, e))?;

        let mut location = self.write_location();
        let initial = location.initial();
        location.place_to(initial, now);
        drop(location);

        self.lock_state().activity = ChairActivity::Active;
        debug!(chair = %self.id, at = %initial, "Chair activated");
        Ok(())
    }

    async fn report_coordinate(&self) -> Result<(), CodeError> {
        let current = {
            let location = self.read_location();
            if !location.is_dirty() {
                return Ok(());
            }
            location.current()
        };

        let ack = self
            .client
            .post_coordinate(current)
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToSendChairCoordinate, e))?;

        let mut location = self.write_location();
        location.set_server_time(ack.recorded_at);
        location.reset_dirty();
        Ok(())
    }

    fn handle_notification(&self, event: NotificationEvent) -> Result<(), CodeError> {
        trace!(chair = %self.id, %event, "Chair notification");
        match event {
            NotificationEvent::ChairMatched { server_request_id } => self.assign(server_request_id),
            NotificationEvent::ChairCompleted { server_request_id } => {
                self.change_request_status(&server_request_id, RequestStatus::Completed)
            }
            other => {
                debug!(chair = %self.id, event = %other, "Ignoring user notification on chair stream");
                Ok(())
            }
        }
    }

    /// Records an offer from the service.
    ///
    /// A finished request still held from the previous ride is not a
    /// conflict; the next tick releases it and then looks at the offer.
    fn assign(&self, server_request_id: String) -> Result<(), CodeError> {
        let mut state = self.lock_state();
        let busy = state.offered.is_some()
            || state
                .request
                .as_ref()
                .is_some_and(|r| !r.statuses().chair.is_terminal());
        if busy {
            return Err(CodeError::new(
                ErrorCode::ChairAlreadyHasRequest,
                format!("chair {} offered {server_request_id} while busy", self.id),
            ));
        }
        state.offered = Some(server_request_id);
        Ok(())
    }

    fn change_request_status(
        &self,
        server_request_id: &str,
        status: RequestStatus,
    ) -> Result<(), CodeError> {
        let request = self
            .lock_state()
            .request
            .clone()
            .filter(|r| r.server_id() == Some(server_request_id))
            .ok_or_else(|| {
                CodeError::new(
                    ErrorCode::ChairNotAssignedButStatusChanged,
                    format!("chair {} got {status} for {server_request_id}", self.id),
                )
            })?;

        request.with_state(|s| {
            if status != RequestStatus::Canceled && s.statuses.desired != status {
                return Err(CodeError::new(
                    ErrorCode::UnexpectedChairRequestStatusTransition,
                    format!(
                        "request {}: chair saw {status}, expected {}",
                        request.id, s.statuses.desired
                    ),
                ));
            }
            s.statuses.chair = status;
            Ok(())
        })
    }

    /// Stops notification delivery.
    pub fn shutdown(&self) {
        self.inbox.close();
    }
}
