//! User (rider) actor.

use crate::guard::TickGuard;
use crate::inbox::NotificationInbox;
use crate::region::RegionState;
use crate::registry::UserId;
use crate::request::Request;
use crate::world::World;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use ridebench_core::{
    CodeError, ErrorCode, Evaluation, RequestStatus, RequestStatuses, FIRST_RIDE_DISCOUNT,
};
use ridebench_env::{CreateRideRequest, NotificationEvent, UserClient};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};

/// Account lifecycle of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    /// Registered but cannot pay yet
    NoPaymentMethod,
    Active,
    /// Left the population for good
    Churned,
}

#[derive(Debug)]
struct UserInner {
    state: UserState,
    payment_token: Option<String>,
    request: Option<Arc<Request>>,
    history: Vec<Arc<Request>>,

    /// Sum of scores given so far
    total_score: i64,

    completed: i64,
}

impl UserInner {
    fn average_milli(&self) -> Option<i64> {
        (self.completed > 0).then(|| self.total_score * 1000 / self.completed)
    }
}

pub struct User {
    pub id: UserId,
    pub server_id: String,
    pub name: String,
    pub region: Arc<RegionState>,

    client: Arc<dyn UserClient>,
    inner: Mutex<UserInner>,
    inbox: NotificationInbox,
    guard: TickGuard,
    rng: Mutex<ChaCha8Rng>,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("server_id", &self.server_id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl User {
    pub fn new(
        id: UserId,
        server_id: String,
        name: String,
        region: Arc<RegionState>,
        client: Arc<dyn UserClient>,
        inbox_capacity: usize,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            inbox: NotificationInbox::new(id.to_string(), inbox_capacity),
            id,
            server_id,
            name,
            region,
            client,
            inner: Mutex::new(UserInner {
                state: UserState::NoPaymentMethod,
                payment_token: None,
                request: None,
                history: Vec::new(),
                total_score: 0,
                completed: 0,
            }),
            guard: TickGuard::default(),
            rng: Mutex::new(rng),
        }
    }

    fn lock(&self) -> MutexGuard<'_, UserInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> UserState {
        self.lock().state
    }

    /// The request in flight, if any.
    pub fn current_request(&self) -> Option<Arc<Request>> {
        self.lock().request.clone()
    }

    pub fn history(&self) -> Vec<Arc<Request>> {
        self.lock().history.clone()
    }

    pub fn payment_token(&self) -> Option<String> {
        self.lock().payment_token.clone()
    }

    /// Number of evaluated rides and the sum of their scores.
    pub fn score_totals(&self) -> (i64, i64) {
        let inner = self.lock();
        (inner.completed, inner.total_score)
    }

    pub(crate) fn guard(&self) -> &TickGuard {
        &self.guard
    }

    pub(crate) fn inbox(&self) -> &NotificationInbox {
        &self.inbox
    }

    /// One step of the user's state machine.
    pub async fn tick(self: &Arc<Self>, world: &World) -> Result<(), CodeError> {
        if self.state() == UserState::Churned {
            return Ok(());
        }

        for event in self.inbox.drain() {
            self.handle_notification(event)?;
        }

        if self.state() == UserState::NoPaymentMethod {
            return self.register_payment_method(world).await;
        }

        if let Some(request) = self.current_request() {
            let snapshot = request.snapshot();
            match snapshot.statuses.user {
                RequestStatus::Matching
                | RequestStatus::Dispatching
                | RequestStatus::Dispatched
                | RequestStatus::Carrying => {}
                RequestStatus::Arrived => {
                    if !snapshot.evaluated {
                        self.evaluate(world, &request).await?;
                    }
                }
                RequestStatus::Completed | RequestStatus::Canceled => {
                    self.lock().request = None;
                }
            }
            return Ok(());
        }

        if !self.inbox.is_connected() {
            let feed = self
                .client
                .connect_notifications()
                .await
                .map_err(|e| CodeError::wrap(ErrorCode::FailedToConnectNotificationStream, e))?;
            self.inbox.attach(feed);
        }

        if self.maybe_churn(world) {
            return Ok(());
        }

        self.create_request(world).await
    }

    async fn register_payment_method(self: &Arc<Self>, world: &World) -> Result<(), CodeError> {
        let token = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            uuid::Builder::from_random_bytes(rng.gen()).into_uuid().simple().to_string()
        };
        self.client
            .register_payment_method(&token)
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToRegisterPaymentMethods, e))?;

        world.payments().register_token(&token, Arc::clone(self));
        let mut inner = self.lock();
        inner.payment_token = Some(token);
        inner.state = UserState::Active;
        Ok(())
    }

    async fn create_request(&self, world: &World) -> Result<(), CodeError> {
        let (pickup, destination) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let pickup = self.region.region.random_point(&mut *rng);
            let distance = rng.gen_range(0..100) + 5;
            (pickup, pickup.random_away_from(distance, &mut *rng))
        };
        let first_ride = self.lock().history.is_empty();
        let discount = if first_ride { FIRST_RIDE_DISCOUNT } else { 0 };

        let created = self
            .client
            .create_ride(CreateRideRequest {
                pickup,
                destination,
            })
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToCreateRequest, e))?;

        let now = world.now();
        let request = world.requests().create(&created.server_request_id, |id| {
            Request::new(id, self.id, pickup, destination, discount, now)
        });
        debug!(user = %self.id, request = %request.id, %pickup, %destination, "Ride requested");

        let mut inner = self.lock();
        inner.history.push(Arc::clone(&request));
        inner.request = Some(request);
        Ok(())
    }

    async fn evaluate(&self, world: &World, request: &Arc<Request>) -> Result<(), CodeError> {
        let snapshot = request.snapshot();
        let Some(chair) = snapshot.chair.clone() else {
            return Err(CodeError::new(
                ErrorCode::Unknown,
                format!("request {} arrived without a chair", request.id),
            ));
        };
        let evaluation = Evaluation::judge(
            &request.timeline(),
            snapshot.chair_start.unwrap_or(request.pickup),
            request.pickup,
            request.destination,
            chair.speed,
        );
        let score = evaluation.score();
        let server_request_id = request.server_id().unwrap_or_default();

        // keeps the owner's sales reconciliation off while the fare is in flight
        let owner = world.owner(chair.owner);
        let _settling = owner.as_ref().map(|o| o.begin_settlement());

        let ack = self
            .client
            .evaluate(server_request_id, score)
            .await
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToEvaluate, e))?;

        let expected = request.fare();
        if ack.fare != expected {
            return Err(CodeError::new(
                ErrorCode::IncorrectAmountOfFareCharged,
                format!(
                    "request {}: charged {} but the fare is {expected}",
                    request.id, ack.fare
                ),
            ));
        }

        let now = world.now();
        request.with_state(|s| {
            s.statuses.advance_desired(RequestStatus::Completed);
            s.statuses.user = RequestStatus::Completed;
            s.completed_at = now;
            s.server_completed_at = Some(ack.completed_at);
            s.evaluated = true;
        });

        let (previous, current) = {
            let mut inner = self.lock();
            let previous = inner.average_milli();
            inner.total_score += i64::from(score);
            inner.completed += 1;
            (previous, inner.average_milli().unwrap_or_default())
        };
        self.region.update_user_average(previous, current);

        if let Some(owner) = owner {
            owner.record_completed(Arc::clone(request));
        }
        trace!(user = %self.id, request = %request.id, score, fare = ack.fare, "Ride evaluated");
        Ok(())
    }

    /// Applies the churn policy. Returns true if the user left.
    fn maybe_churn(&self, world: &World) -> bool {
        let (completed, total) = self.score_totals();
        let wants_to_leave = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            wants_to_leave(completed, total, world.config().churn_probability, &mut *rng)
        };

        if !wants_to_leave || !self.region.try_leave(world.config().min_active_users_per_region) {
            return false;
        }

        self.lock().state = UserState::Churned;
        self.inbox.close();
        info!(user = %self.id, region = self.region.name(), completed, total, "User churned");
        true
    }

    fn handle_notification(&self, event: NotificationEvent) -> Result<(), CodeError> {
        trace!(user = %self.id, %event, "User notification");
        let Some(status) = event.user_status() else {
            debug!(user = %self.id, %event, "Ignoring chair notification on user stream");
            return Ok(());
        };
        self.change_request_status(event.server_request_id(), status)
    }

    /// Reconciles a status reported by the service with the world's expectation.
    fn change_request_status(
        &self,
        server_request_id: &str,
        status: RequestStatus,
    ) -> Result<(), CodeError> {
        let (current, stale) = {
            let inner = self.lock();
            let current = inner
                .request
                .clone()
                .filter(|r| r.server_id() == Some(server_request_id));
            let stale = inner
                .history
                .iter()
                .rev()
                .find(|r| r.server_id() == Some(server_request_id))
                .cloned();
            (current, stale)
        };

        let Some(request) = current else {
            // a completion notice may land after the request was already put away
            if status == RequestStatus::Completed {
                if let Some(old) = stale {
                    let accepted = old.with_state(|s| {
                        let done = s.statuses.desired == RequestStatus::Completed;
                        if done {
                            s.statuses.user = RequestStatus::Completed;
                        }
                        done
                    });
                    if accepted {
                        return Ok(());
                    }
                }
            }
            let code = if self.lock().request.is_none() {
                ErrorCode::UserNotRequestingButStatusChanged
            } else {
                ErrorCode::UnexpectedUserRequestStatusTransition
            };
            return Err(CodeError::new(
                code,
                format!("user {} got {status} for {server_request_id}", self.id),
            ));
        };

        request.with_state(|s| {
            let statuses = &mut s.statuses;
            if !accepts_user_status(statuses, status) {
                return Err(CodeError::new(
                    ErrorCode::UnexpectedUserRequestStatusTransition,
                    format!(
                        "request {}: user saw {status} while at {}, expected {}",
                        request.id, statuses.user, statuses.desired
                    ),
                ));
            }
            statuses.user = status;
            Ok(())
        })
    }

    /// Stops notification delivery.
    pub fn shutdown(&self) {
        self.inbox.close();
    }
}

/// Whether the user view may move to `status`. The view never moves back;
/// otherwise it must match the desired status or one of the notification
/// races below.
fn accepts_user_status(statuses: &RequestStatuses, status: RequestStatus) -> bool {
    if status < statuses.user {
        return false;
    }
    status == statuses.desired
        || matches!(
            (status, statuses.user, statuses.desired),
            // the chair reached the pickup before the dispatching notice landed
            (RequestStatus::Dispatching, RequestStatus::Matching, RequestStatus::Dispatched)
                // the arrival notice lags behind the carrying one
                | (RequestStatus::Carrying, RequestStatus::Dispatched, RequestStatus::Arrived)
                // the departure raced our own desired-state update
                | (RequestStatus::Carrying, RequestStatus::Dispatched, RequestStatus::Dispatched)
        )
}

/// Churn policy. One ride scored 1 always drives the user away; a poor
/// average over several rides does so with `probability`.
fn wants_to_leave<R: Rng + ?Sized>(completed: i64, total: i64, probability: f64, rng: &mut R) -> bool {
    match completed {
        0 => false,
        1 => total <= 1,
        _ if total * 1000 / completed <= 2000 => rng.gen_bool(probability.clamp(0.0, 1.0)),
        _ => false,
    }
}
