//! In-process stand-in for the ride-hailing service.
//!
//! Implements every client capability against plain in-memory state so a
//! world can be driven without a network. It matches rides to idle active
//! chairs, pushes status notifications, charges fares through the payment
//! gateway and answers the owner queries. Notifications are delivered after
//! a small fixed delay, like a real push channel.

use async_trait::async_trait;
use ridebench_core::{
    calculate_fare, calculate_sales, Coordinate, RequestStatus, FIRST_RIDE_DISCOUNT,
};
use ridebench_env::{
    notification_stream, ChairClient, ChairSales, CoordinateAck, CreateRideRequest, CreatedRide,
    EnvError, EvaluationAck, ModelSales, NotificationEvent, NotificationFeed, OwnerChair,
    OwnerClient, OwnerSales, RegisterChairRequest, RegisterOwnerRequest, RegisterUserRequest,
    RegisteredChair, RegisteredOwner, RegisteredUser, RideDetail, UserClient, WorldClient,
};
use ridebench_payment::{PaymentGateway, PaymentOutcome, PaymentStatus};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Capacity of the stream handed to a subscriber.
const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct LoopbackConfig {
    /// Delay between a state change and its notification reaching the subscriber
    pub notification_delay: Duration,

    /// Added to every charge sent to the payment gateway
    pub payment_overcharge: i64,

    /// Resubmissions of a payment answered with a conflict or server error
    pub payment_retries: u32,

    pub retry_backoff: Duration,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            notification_delay: Duration::from_millis(20),
            payment_overcharge: 0,
            payment_retries: 50,
            retry_backoff: Duration::from_millis(10),
        }
    }
}

/// Producer side of one subscriber's stream. Events are timestamped on
/// send and released in order once the delay has passed.
#[derive(Clone)]
struct Notifier {
    tx: mpsc::UnboundedSender<(Instant, NotificationEvent)>,
}

impl Notifier {
    fn connect(delay: Duration) -> (Self, NotificationFeed) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(Instant, NotificationEvent)>();
        let (sink, feed) = notification_stream(FEED_CAPACITY);
        tokio::spawn(async move {
            while let Some((sent_at, event)) = rx.recv().await {
                tokio::time::sleep_until(sent_at + delay).await;
                if sink.send(event).await.is_err() {
                    break;
                }
            }
        });
        (Self { tx }, feed)
    }

    fn notify(&self, event: NotificationEvent) {
        // a closed stream just drops the event, like a dead connection
        let _ = self.tx.send((Instant::now(), event));
    }
}

struct UserRecord {
    payment_token: Option<String>,
    rides_requested: u64,
    notifier: Option<Notifier>,
}

struct OwnerRecord {
    chairs: Vec<String>,
}

struct ChairRecord {
    owner: String,
    name: String,
    model: String,
    registered_at: i64,
    active: bool,
    position: Option<Coordinate>,
    total_distance: i64,
    distance_updated_at: Option<i64>,
    ride: Option<String>,
    notifier: Option<Notifier>,
}

struct RideRecord {
    user: String,
    chair: Option<String>,
    pickup: Coordinate,
    destination: Coordinate,
    status: RequestStatus,
    discount: i64,
    denied_by: BTreeSet<String>,
    completed_at: Option<i64>,
}

impl RideRecord {
    fn fare(&self) -> i64 {
        calculate_fare(self.pickup, self.destination, self.discount)
    }
}

#[derive(Default)]
struct ServiceState {
    next_id: u64,
    last_ms: i64,
    users: BTreeMap<String, UserRecord>,
    owners: BTreeMap<String, OwnerRecord>,
    chair_tokens: HashMap<String, String>,
    chairs: BTreeMap<String, ChairRecord>,
    rides: BTreeMap<String, RideRecord>,
}

impl ServiceState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}{:08}", self.next_id)
    }

    fn notify_user(&self, user: &str, event: NotificationEvent) {
        if let Some(notifier) = self.users.get(user).and_then(|u| u.notifier.as_ref()) {
            notifier.notify(event);
        }
    }

    fn notify_chair(&self, chair: &str, event: NotificationEvent) {
        if let Some(notifier) = self.chairs.get(chair).and_then(|c| c.notifier.as_ref()) {
            notifier.notify(event);
        }
    }

    /// Offers every waiting ride to the first idle active chair that has
    /// not turned it down.
    fn match_rides(&mut self) {
        let waiting: Vec<String> = self
            .rides
            .iter()
            .filter(|(_, r)| r.status == RequestStatus::Matching && r.chair.is_none())
            .map(|(id, _)| id.clone())
            .collect();

        for ride_id in waiting {
            let Some(ride) = self.rides.get(&ride_id) else {
                continue;
            };
            let candidate = self
                .chairs
                .iter()
                .find(|(id, c)| c.active && c.ride.is_none() && !ride.denied_by.contains(*id))
                .map(|(id, _)| id.clone());
            let Some(chair_id) = candidate else {
                continue;
            };

            if let Some(ride) = self.rides.get_mut(&ride_id) {
                ride.chair = Some(chair_id.clone());
            }
            if let Some(chair) = self.chairs.get_mut(&chair_id) {
                chair.ride = Some(ride_id.clone());
            }
            self.notify_chair(
                &chair_id,
                NotificationEvent::ChairMatched {
                    server_request_id: ride_id,
                },
            );
        }
    }
}

struct Inner {
    config: LoopbackConfig,
    gateway: Arc<PaymentGateway>,
    epoch: Instant,
    state: Mutex<ServiceState>,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Strictly increasing service time in ms.
    fn now_ms(&self, state: &mut ServiceState) -> i64 {
        let wall = i64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(i64::MAX);
        state.last_ms = wall.max(state.last_ms + 1);
        state.last_ms
    }

    /// Charges a fare, resubmitting under the same key while the gateway is busy.
    async fn charge(&self, ride_id: &str, token: &str, amount: i64) -> Result<(), EnvError> {
        for attempt in 0..=self.config.payment_retries {
            match self
                .gateway
                .post_payment(Some(ride_id.to_owned()), token, amount)
                .await
            {
                PaymentOutcome::Settled(PaymentStatus::Success) => return Ok(()),
                PaymentOutcome::Settled(status) => {
                    return Err(EnvError::status(
                        "evaluate",
                        400,
                        format!("payment for {ride_id} rejected: {status:?}"),
                    ));
                }
                PaymentOutcome::PayloadMismatch => {
                    return Err(EnvError::status(
                        "evaluate",
                        502,
                        format!("payment for {ride_id} conflicts with an earlier one"),
                    ));
                }
                PaymentOutcome::Processing | PaymentOutcome::Unavailable(_) => {
                    debug!(ride = ride_id, attempt, "Payment gateway busy, retrying");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
            }
        }
        warn!(ride = ride_id, "Payment gateway kept failing");
        Err(EnvError::status(
            "evaluate",
            502,
            format!("payment for {ride_id} did not go through"),
        ))
    }
}

/// The in-process service. Cheap to clone.
#[derive(Clone)]
pub struct LoopbackService {
    inner: Arc<Inner>,
}

impl LoopbackService {
    pub fn new(config: LoopbackConfig, gateway: Arc<PaymentGateway>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                gateway,
                epoch: Instant::now(),
                state: Mutex::new(ServiceState::default()),
            }),
        }
    }

    pub fn gateway(&self) -> &Arc<PaymentGateway> {
        &self.inner.gateway
    }

    /// Payment token the service holds for a user.
    pub fn payment_token(&self, user: &str) -> Option<String> {
        self.inner
            .lock()
            .users
            .get(user)
            .and_then(|u| u.payment_token.clone())
    }

    /// Status of a ride as the service sees it.
    pub fn ride_status(&self, ride: &str) -> Option<RequestStatus> {
        self.inner.lock().rides.get(ride).map(|r| r.status)
    }
}

#[async_trait]
impl WorldClient for LoopbackService {
    async fn register_user(&self, req: RegisterUserRequest) -> Result<RegisteredUser, EnvError> {
        if req.username.is_empty() {
            return Err(EnvError::status("register_user", 400, "username is required"));
        }
        let mut state = self.inner.lock();
        let id = state.next_id("user-");
        state.users.insert(
            id.clone(),
            UserRecord {
                payment_token: None,
                rides_requested: 0,
                notifier: None,
            },
        );
        Ok(RegisteredUser {
            client: Arc::new(LoopbackUser {
                inner: Arc::clone(&self.inner),
                id: id.clone(),
            }),
            server_id: id,
        })
    }

    async fn register_owner(&self, req: RegisterOwnerRequest) -> Result<RegisteredOwner, EnvError> {
        if req.name.is_empty() {
            return Err(EnvError::status("register_owner", 400, "name is required"));
        }
        let mut state = self.inner.lock();
        let id = state.next_id("owner-");
        let token = format!("chair-register-{id}");
        state.owners.insert(id.clone(), OwnerRecord { chairs: Vec::new() });
        state.chair_tokens.insert(token.clone(), id.clone());
        Ok(RegisteredOwner {
            chair_register_token: token,
            client: Arc::new(LoopbackOwner {
                inner: Arc::clone(&self.inner),
                id: id.clone(),
            }),
            server_id: id,
        })
    }

    async fn register_chair(
        &self,
        chair_register_token: &str,
        req: RegisterChairRequest,
    ) -> Result<RegisteredChair, EnvError> {
        let mut state = self.inner.lock();
        let owner = state
            .chair_tokens
            .get(chair_register_token)
            .cloned()
            .ok_or_else(|| EnvError::status("register_chair", 401, "unknown register token"))?;
        let id = state.next_id("chair-");
        let registered_at = self.inner.now_ms(&mut state);
        state.chairs.insert(
            id.clone(),
            ChairRecord {
                owner: owner.clone(),
                name: req.name,
                model: req.model,
                registered_at,
                active: false,
                position: None,
                total_distance: 0,
                distance_updated_at: None,
                ride: None,
                notifier: None,
            },
        );
        if let Some(record) = state.owners.get_mut(&owner) {
            record.chairs.push(id.clone());
        }
        Ok(RegisteredChair {
            client: Arc::new(LoopbackChair {
                inner: Arc::clone(&self.inner),
                id: id.clone(),
            }),
            server_id: id,
            owner_server_id: owner,
        })
    }
}

struct LoopbackUser {
    inner: Arc<Inner>,
    id: String,
}

#[async_trait]
impl UserClient for LoopbackUser {
    async fn register_payment_method(&self, token: &str) -> Result<(), EnvError> {
        if token.is_empty() {
            return Err(EnvError::status("register_payment_method", 400, "empty token"));
        }
        let mut state = self.inner.lock();
        let user = state
            .users
            .get_mut(&self.id)
            .ok_or_else(|| EnvError::status("register_payment_method", 401, "unknown user"))?;
        user.payment_token = Some(token.to_owned());
        Ok(())
    }

    async fn create_ride(&self, req: CreateRideRequest) -> Result<CreatedRide, EnvError> {
        let mut state = self.inner.lock();
        let user = state
            .users
            .get(&self.id)
            .ok_or_else(|| EnvError::status("create_ride", 401, "unknown user"))?;
        if user.payment_token.is_none() {
            return Err(EnvError::status("create_ride", 400, "payment method not registered"));
        }
        let first_ride = user.rides_requested == 0;
        let busy = state
            .rides
            .values()
            .any(|r| r.user == self.id && r.status != RequestStatus::Completed);
        if busy {
            return Err(EnvError::status("create_ride", 409, "ride already in progress"));
        }

        let id = state.next_id("ride-");
        state.rides.insert(
            id.clone(),
            RideRecord {
                user: self.id.clone(),
                chair: None,
                pickup: req.pickup,
                destination: req.destination,
                status: RequestStatus::Matching,
                discount: if first_ride { FIRST_RIDE_DISCOUNT } else { 0 },
                denied_by: BTreeSet::new(),
                completed_at: None,
            },
        );
        if let Some(user) = state.users.get_mut(&self.id) {
            user.rides_requested += 1;
        }
        state.match_rides();
        Ok(CreatedRide {
            server_request_id: id,
        })
    }

    async fn evaluate(&self, server_request_id: &str, score: i32) -> Result<EvaluationAck, EnvError> {
        if !(1..=5).contains(&score) {
            return Err(EnvError::status("evaluate", 400, "score must be within 1..=5"));
        }
        let (token, fare) = {
            let state = self.inner.lock();
            let ride = state
                .rides
                .get(server_request_id)
                .filter(|r| r.user == self.id)
                .ok_or_else(|| EnvError::status("evaluate", 404, "ride not found"))?;
            if ride.status != RequestStatus::Arrived {
                return Err(EnvError::status(
                    "evaluate",
                    400,
                    format!("ride is {}, not arrived", ride.status),
                ));
            }
            let token = state
                .users
                .get(&self.id)
                .and_then(|u| u.payment_token.clone())
                .ok_or_else(|| EnvError::status("evaluate", 400, "payment method not registered"))?;
            (token, ride.fare())
        };

        self.inner
            .charge(
                server_request_id,
                &token,
                fare + self.inner.config.payment_overcharge,
            )
            .await?;

        let mut state = self.inner.lock();
        let completed_at = self.inner.now_ms(&mut state);
        let chair = match state.rides.get_mut(server_request_id) {
            Some(ride) => {
                ride.status = RequestStatus::Completed;
                ride.completed_at = Some(completed_at);
                ride.chair.clone()
            }
            None => return Err(EnvError::status("evaluate", 404, "ride not found")),
        };
        state.notify_user(
            &self.id,
            NotificationEvent::UserCompleted {
                server_request_id: server_request_id.to_owned(),
            },
        );
        if let Some(chair) = chair {
            if let Some(record) = state.chairs.get_mut(&chair) {
                record.ride = None;
            }
            state.notify_chair(
                &chair,
                NotificationEvent::ChairCompleted {
                    server_request_id: server_request_id.to_owned(),
                },
            );
        }
        state.match_rides();

        Ok(EvaluationAck { fare, completed_at })
    }

    async fn connect_notifications(&self) -> Result<NotificationFeed, EnvError> {
        let (notifier, feed) = Notifier::connect(self.inner.config.notification_delay);
        let mut state = self.inner.lock();
        let user = state
            .users
            .get_mut(&self.id)
            .ok_or_else(|| EnvError::status("connect_notifications", 401, "unknown user"))?;
        user.notifier = Some(notifier);
        Ok(feed)
    }
}

struct LoopbackChair {
    inner: Arc<Inner>,
    id: String,
}

impl LoopbackChair {
    /// Runs `f` on this chair's assigned ride, failing if the ride belongs elsewhere.
    fn with_ride<R>(
        &self,
        operation: &'static str,
        ride_id: &str,
        f: impl FnOnce(&mut ServiceState, &str) -> Result<R, EnvError>,
    ) -> Result<R, EnvError> {
        let mut state = self.inner.lock();
        let assigned = state
            .rides
            .get(ride_id)
            .ok_or_else(|| EnvError::status(operation, 404, "ride not found"))?
            .chair
            .as_deref()
            == Some(self.id.as_str());
        if !assigned {
            return Err(EnvError::status(operation, 400, "ride is not assigned to this chair"));
        }
        f(&mut state, ride_id)
    }
}

fn advance_ride(
    state: &mut ServiceState,
    operation: &'static str,
    ride_id: &str,
    from: RequestStatus,
    to: RequestStatus,
) -> Result<String, EnvError> {
    let ride = state
        .rides
        .get_mut(ride_id)
        .ok_or_else(|| EnvError::status(operation, 404, "ride not found"))?;
    if ride.status != from {
        return Err(EnvError::status(
            operation,
            400,
            format!("ride is {}, expected {from}", ride.status),
        ));
    }
    ride.status = to;
    Ok(ride.user.clone())
}

#[async_trait]
impl ChairClient for LoopbackChair {
    async fn post_coordinate(&self, coordinate: Coordinate) -> Result<CoordinateAck, EnvError> {
        let mut state = self.inner.lock();
        let recorded_at = self.inner.now_ms(&mut state);
        let chair = state
            .chairs
            .get_mut(&self.id)
            .ok_or_else(|| EnvError::status("post_coordinate", 401, "unknown chair"))?;
        if let Some(previous) = chair.position {
            chair.total_distance += i64::from(previous.distance_to(coordinate));
        }
        chair.position = Some(coordinate);
        chair.distance_updated_at = Some(recorded_at);
        let ride_id = chair.ride.clone();

        if let Some(ride_id) = ride_id {
            let reached = state.rides.get_mut(&ride_id).and_then(|ride| {
                let next = match ride.status {
                    RequestStatus::Dispatching if coordinate == ride.pickup => {
                        RequestStatus::Dispatched
                    }
                    RequestStatus::Carrying if coordinate == ride.destination => {
                        RequestStatus::Arrived
                    }
                    _ => return None,
                };
                ride.status = next;
                Some((ride.user.clone(), next))
            });
            match reached {
                Some((user, RequestStatus::Dispatched)) => state.notify_user(
                    &user,
                    NotificationEvent::UserDispatched {
                        server_request_id: ride_id,
                    },
                ),
                Some((user, _)) => state.notify_user(
                    &user,
                    NotificationEvent::UserArrived {
                        server_request_id: ride_id,
                    },
                ),
                None => {}
            }
        }

        Ok(CoordinateAck { recorded_at })
    }

    async fn accept_ride(&self, server_request_id: &str) -> Result<(), EnvError> {
        self.with_ride("accept_ride", server_request_id, |state, id| {
            let user = advance_ride(
                state,
                "accept_ride",
                id,
                RequestStatus::Matching,
                RequestStatus::Dispatching,
            )?;
            state.notify_user(
                &user,
                NotificationEvent::UserDispatching {
                    server_request_id: id.to_owned(),
                },
            );
            Ok(())
        })
    }

    async fn deny_ride(&self, server_request_id: &str) -> Result<(), EnvError> {
        let mut state = self.inner.lock();
        if let Some(ride) = state.rides.get_mut(server_request_id) {
            if ride.chair.as_deref() == Some(self.id.as_str()) {
                if ride.status != RequestStatus::Matching {
                    return Err(EnvError::status("deny_ride", 400, "ride already accepted"));
                }
                ride.chair = None;
            }
            ride.denied_by.insert(self.id.clone());
        }
        if let Some(chair) = state.chairs.get_mut(&self.id) {
            if chair.ride.as_deref() == Some(server_request_id) {
                chair.ride = None;
            }
        }
        state.match_rides();
        Ok(())
    }

    async fn depart(&self, server_request_id: &str) -> Result<(), EnvError> {
        self.with_ride("depart", server_request_id, |state, id| {
            let user = advance_ride(
                state,
                "depart",
                id,
                RequestStatus::Dispatched,
                RequestStatus::Carrying,
            )?;
            state.notify_user(
                &user,
                NotificationEvent::UserCarrying {
                    server_request_id: id.to_owned(),
                },
            );
            Ok(())
        })
    }

    async fn activate(&self) -> Result<(), EnvError> {
        let mut state = self.inner.lock();
        let chair = state
            .chairs
            .get_mut(&self.id)
            .ok_or_else(|| EnvError::status("activate", 401, "unknown chair"))?;
        chair.active = true;
        state.match_rides();
        Ok(())
    }

    async fn get_ride(&self, server_request_id: &str) -> Result<RideDetail, EnvError> {
        let state = self.inner.lock();
        let ride = state
            .rides
            .get(server_request_id)
            .ok_or_else(|| EnvError::status("get_ride", 404, "ride not found"))?;
        Ok(RideDetail {
            server_request_id: server_request_id.to_owned(),
            pickup: ride.pickup,
            destination: ride.destination,
            status: ride.status,
        })
    }

    async fn connect_notifications(&self) -> Result<NotificationFeed, EnvError> {
        let (notifier, feed) = Notifier::connect(self.inner.config.notification_delay);
        let mut state = self.inner.lock();
        let chair = state
            .chairs
            .get_mut(&self.id)
            .ok_or_else(|| EnvError::status("connect_notifications", 401, "unknown chair"))?;
        chair.notifier = Some(notifier);
        Ok(feed)
    }
}

struct LoopbackOwner {
    inner: Arc<Inner>,
    id: String,
}

#[async_trait]
impl OwnerClient for LoopbackOwner {
    async fn get_chairs(&self) -> Result<Vec<OwnerChair>, EnvError> {
        let state = self.inner.lock();
        let owner = state
            .owners
            .get(&self.id)
            .ok_or_else(|| EnvError::status("get_chairs", 401, "unknown owner"))?;
        Ok(owner
            .chairs
            .iter()
            .filter_map(|id| state.chairs.get(id).map(|c| (id, c)))
            .map(|(id, c)| OwnerChair {
                id: id.clone(),
                name: c.name.clone(),
                model: c.model.clone(),
                active: c.active,
                registered_at: c.registered_at,
                total_distance: c.total_distance,
                total_distance_updated_at: c.distance_updated_at,
            })
            .collect())
    }

    async fn get_sales(&self, until: Option<i64>) -> Result<OwnerSales, EnvError> {
        let state = self.inner.lock();
        let owner = state
            .owners
            .get(&self.id)
            .ok_or_else(|| EnvError::status("get_sales", 401, "unknown owner"))?;

        let mut by_chair: BTreeMap<&str, i64> = BTreeMap::new();
        let mut by_model: BTreeMap<&str, i64> = BTreeMap::new();
        for id in &owner.chairs {
            if let Some(chair) = state.chairs.get(id) {
                by_chair.entry(id.as_str()).or_default();
                by_model.entry(chair.model.as_str()).or_default();
            }
        }

        for ride in state.rides.values() {
            let Some(completed_at) = ride.completed_at else {
                continue;
            };
            if until.is_some_and(|until| completed_at > until) {
                continue;
            }
            let Some(chair) = ride
                .chair
                .as_deref()
                .and_then(|id| state.chairs.get(id).map(|c| (id, c)))
                .filter(|(_, c)| c.owner == self.id)
            else {
                continue;
            };
            let sales = calculate_sales(ride.pickup, ride.destination);
            *by_chair.entry(chair.0).or_default() += sales;
            *by_model.entry(chair.1.model.as_str()).or_default() += sales;
        }

        Ok(OwnerSales {
            total_sales: by_chair.values().sum(),
            chairs: by_chair
                .into_iter()
                .filter_map(|(id, sales)| {
                    state.chairs.get(id).map(|c| ChairSales {
                        id: id.to_owned(),
                        name: c.name.clone(),
                        sales,
                    })
                })
                .collect(),
            models: by_model
                .into_iter()
                .map(|(model, sales)| ModelSales {
                    model: model.to_owned(),
                    sales,
                })
                .collect(),
        })
    }
}
