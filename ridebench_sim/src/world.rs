//! World: registries, virtual clock, population growth and the tick barrier.

use crate::chair::Chair;
use crate::clock::VirtualClock;
use crate::error::WorldError;
use crate::ledger::{InvalidReason, PaymentLedger};
use crate::owner::{InFlight, Owner};
use crate::region::RegionState;
use crate::registry::{ChairId, OwnerId, Registry, UserId};
use crate::request::RequestRegistry;
use crate::user::{User, UserState};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use ridebench_core::{
    pick_models, ChairModel, CodeError, ErrorCode, ErrorCounter, Region, DEFAULT_ERROR_LIMIT,
};
use ridebench_env::{
    EnvError, RegisterChairRequest, RegisterOwnerRequest, RegisterUserRequest, WorldClient,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What an idle active chair does between rides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdlePolicy {
    /// Stay where it is
    #[default]
    Stay,
    /// Wander inside its region
    Roam,
}

/// Configuration for a world.
#[derive(Debug, Clone)]
pub struct WorldConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Wall-clock length of one tick; tasks still running then are left behind
    pub tick_timeout: Duration,

    /// Capacity of each actor's notification inbox
    pub inbox_capacity: usize,

    /// Non-critical errors tolerated before the run is aborted
    pub error_limit: u64,

    /// Ticks between user growth rounds
    pub user_growth_interval: i64,

    /// New users per region per point of satisfaction
    pub users_per_satisfaction_point: i64,

    /// Churn never takes a region below this many active users
    pub min_active_users_per_region: i64,

    /// Chance a user with a poor average leaves on an idle tick
    pub churn_probability: f64,

    /// Sales an owner must earn for each chair it buys
    pub sales_per_new_chair: i64,

    /// How far the service's distance checkpoint may lag a chair's last report (ms)
    pub distance_tolerance_ms: i64,

    pub idle_policy: IdlePolicy,

    pub regions: Vec<Region>,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_timeout: Duration::from_millis(100),
            inbox_capacity: 10,
            error_limit: DEFAULT_ERROR_LIMIT,
            user_growth_interval: 10,
            users_per_satisfaction_point: 1,
            min_active_users_per_region: 2,
            churn_probability: 0.5,
            sales_per_new_chair: 15_000,
            distance_tolerance_ms: 3_000,
            idle_policy: IdlePolicy::Stay,
            regions: Region::defaults(),
        }
    }
}

impl WorldConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    pub fn with_idle_policy(mut self, policy: IdlePolicy) -> Self {
        self.idle_policy = policy;
        self
    }

    pub fn with_error_limit(mut self, limit: u64) -> Self {
        self.error_limit = limit;
        self
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    /// Virtual time the tick ran at
    pub time: i64,

    /// Tasks started, growth included
    pub dispatched: usize,

    /// Actors whose previous tick was still running
    pub skipped: usize,

    pub timed_out: bool,

    /// Tasks still running when the tick ended
    pub outstanding: usize,
}

/// End-of-run comparison of the money that moved against the rides that happened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaymentReconciliation {
    /// Committed by the payment gateway
    pub total_payments: i64,

    /// Coupons granted on completed rides
    pub total_discount: i64,

    /// Undiscounted value of completed rides
    pub total_sales: i64,

    /// What completed rides should have been charged
    pub total_fares: i64,

    pub completed_requests: usize,

    /// Payments that did not line up with a ride, by reason
    pub invalid_payments: BTreeMap<String, usize>,
}

impl PaymentReconciliation {
    /// Non-zero when the service charged more or less than it should have.
    pub fn discrepancy(&self) -> i64 {
        self.total_payments + self.total_discount - self.total_sales
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancy() == 0
            && self.total_payments == self.total_fares
            && self.invalid_payments.is_empty()
    }
}

const FIRST_NAMES: [&str; 12] = [
    "Aiko", "Bruno", "Chloe", "Dmitri", "Elena", "Farid", "Greta", "Hiro", "Ines", "Jonas", "Kenta",
    "Lucia",
];

const LAST_NAMES: [&str; 10] = [
    "Abe", "Brandt", "Costa", "Dubois", "Eriksen", "Fujita", "Garcia", "Hansen", "Ito", "Kowalski",
];

/// The whole simulated population and the scheduler that drives it.
pub struct World {
    config: WorldConfig,
    clock: VirtualClock,
    regions: Vec<Arc<RegionState>>,

    users: Registry<UserId, User>,
    chairs: Registry<ChairId, Chair>,
    owners: Registry<OwnerId, Owner>,
    requests: RequestRegistry,

    payments: Arc<PaymentLedger>,
    errors: ErrorCounter,
    client: Arc<dyn WorldClient>,
    rng: Mutex<ChaCha8Rng>,

    /// Fired once by the first fatal error
    abort: CancellationToken,
    fatal: Mutex<Option<WorldError>>,

    timed_out_last: AtomicBool,
    timed_out_ticks: AtomicU64,
}

impl World {
    pub fn new(
        config: WorldConfig,
        client: Arc<dyn WorldClient>,
        payments: Arc<PaymentLedger>,
    ) -> Arc<Self> {
        let regions = config
            .regions
            .iter()
            .cloned()
            .map(|r| Arc::new(RegionState::new(r)))
            .collect();
        Arc::new(Self {
            clock: VirtualClock::new(),
            regions,
            users: Registry::new(),
            chairs: Registry::new(),
            owners: Registry::new(),
            requests: RequestRegistry::new(),
            payments,
            errors: ErrorCounter::new(config.error_limit),
            client,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(config.seed)),
            abort: CancellationToken::new(),
            fatal: Mutex::new(None),
            timed_out_last: AtomicBool::new(false),
            timed_out_ticks: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &WorldConfig {
        &self.config
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn regions(&self) -> &[Arc<RegionState>] {
        &self.regions
    }

    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    pub fn payments(&self) -> &PaymentLedger {
        &self.payments
    }

    pub fn users(&self) -> Vec<Arc<User>> {
        self.users.values()
    }

    pub fn chairs(&self) -> Vec<Arc<Chair>> {
        self.chairs.values()
    }

    pub fn owners(&self) -> Vec<Arc<Owner>> {
        self.owners.values()
    }

    pub fn owner(&self, id: OwnerId) -> Option<Arc<Owner>> {
        self.owners.get(id)
    }

    pub fn error_counts(&self) -> BTreeMap<ErrorCode, u64> {
        self.errors.counts()
    }

    pub fn timed_out_ticks(&self) -> u64 {
        self.timed_out_ticks.load(Ordering::Acquire)
    }

    /// The error that stopped the run, if any.
    pub fn fatal_error(&self) -> Option<WorldError> {
        self.fatal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Benchmark score: every owner's sub-score added up.
    pub fn score(&self) -> i64 {
        self.owners.values().iter().map(|o| o.sub_score()).sum()
    }

    fn rng(&self) -> MutexGuard<'_, ChaCha8Rng> {
        self.rng.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Independent stream for a new actor, drawn from the world seed.
    fn child_rng(&self) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.rng().gen())
    }

    fn random_name(&self) -> (&'static str, &'static str) {
        let mut rng = self.rng();
        let first = FIRST_NAMES.choose(&mut *rng).copied().unwrap_or("Alex");
        let last = LAST_NAMES.choose(&mut *rng).copied().unwrap_or("Smith");
        (first, last)
    }

    /// Records the outcome of an actor task.
    fn report(&self, result: Result<(), CodeError>) {
        let Err(err) = result else {
            return;
        };
        if err.is_critical() {
            error!(code = %err.code, error = %err, "Critical error");
            self.fail(WorldError::from(&err));
            return;
        }

        warn!(code = %err.code, error = %err, "Non-critical error");
        if let Err(exceeded) = self.errors.add(err.code) {
            error!(total = exceeded.total, limit = exceeded.limit, "Error limit exceeded");
            self.fail(exceeded.into());
        }
    }

    /// Stores the first fatal error and aborts the run.
    fn fail(&self, err: WorldError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(PoisonError::into_inner);
        if fatal.is_none() {
            *fatal = Some(err);
        }
        drop(fatal);
        self.abort.cancel();
    }

    /// Runs one tick.
    ///
    /// Every live actor whose previous tick has finished gets one task. The
    /// tick lasts `tick_timeout` of wall-clock time; tasks still running at
    /// the deadline keep going in the background and suppress the next
    /// growth round.
    pub async fn tick(self: &Arc<Self>) -> Result<TickReport, WorldError> {
        if let Some(err) = self.fatal_error() {
            return Err(err);
        }

        let time = self.clock.now();
        let mut tasks = JoinSet::new();
        let mut skipped = 0;

        if !self.timed_out_last.load(Ordering::Acquire) {
            self.spawn_growth(&mut tasks, time);
        }

        for user in self.users.values() {
            if user.state() == UserState::Churned {
                continue;
            }
            let Some(permit) = user.guard().try_begin() else {
                skipped += 1;
                continue;
            };
            self.spawn(&mut tasks, |world| async move {
                let _permit = permit;
                user.tick(&world).await
            });
        }

        for chair in self.chairs.values() {
            let Some(permit) = chair.guard().try_begin() else {
                skipped += 1;
                continue;
            };
            self.spawn(&mut tasks, |world| async move {
                let _permit = permit;
                chair.tick(&world).await
            });
        }

        for owner in self.owners.values() {
            let Some(permit) = owner.guard().try_begin() else {
                skipped += 1;
                continue;
            };
            self.spawn(&mut tasks, |world| async move {
                let _permit = permit;
                owner.tick(&world).await
            });
        }

        let dispatched = tasks.len();
        let deadline = tokio::time::sleep(self.config.tick_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;
                _ = self.abort.cancelled() => {
                    tasks.detach_all();
                    return Err(self.fatal_error().unwrap_or(WorldError::Aborted));
                }
                Some(joined) = tasks.join_next() => {
                    if let Err(err) = joined {
                        if err.is_panic() {
                            self.fail(WorldError::ActorPanicked(err.to_string()));
                        }
                    }
                }
                _ = &mut deadline => break,
            }
        }

        let outstanding = tasks.len();
        tasks.detach_all();
        let timed_out = outstanding > 0;
        if timed_out {
            self.timed_out_ticks.fetch_add(1, Ordering::AcqRel);
            warn!(time, outstanding, dispatched, "Tick timed out");
        }
        self.timed_out_last.store(timed_out, Ordering::Release);
        self.clock.advance();

        debug!(time, dispatched, skipped, "Tick finished");
        Ok(TickReport {
            time,
            dispatched,
            skipped,
            timed_out,
            outstanding,
        })
    }

    fn spawn<F, Fut>(self: &Arc<Self>, tasks: &mut JoinSet<()>, task: F)
    where
        F: FnOnce(Arc<World>) -> Fut,
        Fut: Future<Output = Result<(), CodeError>> + Send + 'static,
    {
        let world = Arc::clone(self);
        let run = task(Arc::clone(&world));
        tasks.spawn(async move { world.report(run.await) });
    }

    fn spawn_growth(self: &Arc<Self>, tasks: &mut JoinSet<()>, time: i64) {
        for owner in self.owners.values() {
            for _ in 0..owner.affordable_chairs(self.config.sales_per_new_chair) {
                let model = owner.next_growth_model();
                let registering = owner.begin_registration();
                let owner = Arc::clone(&owner);
                self.spawn(tasks, |world| async move {
                    world
                        .register_chair(&owner, model, registering)
                        .await
                        .map(|_| ())
                });
            }
        }

        let interval = self.config.user_growth_interval;
        if interval <= 0 || time == 0 || time % interval != 0 {
            return;
        }
        for region in &self.regions {
            let count = region.satisfaction_score() * self.config.users_per_satisfaction_point;
            if count > 0 {
                debug!(region = region.name(), count, "Growing users");
            }
            for _ in 0..count {
                let region = Arc::clone(region);
                self.spawn(tasks, |world| async move {
                    world.create_user(&region).await.map(|_| ())
                });
            }
        }
    }

    /// Registers a user in `region` with the service and adds it to the world.
    pub async fn create_user(&self, region: &Arc<RegionState>) -> Result<Arc<User>, CodeError> {
        let (first, last) = self.random_name();
        let (handle, birth_year, month, day) = {
            let mut rng = self.rng();
            (
                rng.gen_range(0..100_000),
                rng.gen_range(1950..2005),
                rng.gen_range(1..=12),
                rng.gen_range(1..=28),
            )
        };
        let registered = self
            .client
            .register_user(RegisterUserRequest {
                username: format!("{}{handle:05}", first.to_lowercase()),
                firstname: first.to_owned(),
                lastname: last.to_owned(),
                date_of_birth: format!("{birth_year:04}-{month:02}-{day:02}"),
                invitation_code: None,
            })
            .await
            .and_then(|r| require_field("register_user", "id", &r.server_id).map(|()| r))
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToRegisterUser, e))?;

        let rng = self.child_rng();
        let user = self.users.create(|id| {
            User::new(
                id,
                registered.server_id,
                format!("{first} {last}"),
                Arc::clone(region),
                registered.client,
                self.config.inbox_capacity,
                rng,
            )
        });
        region.add_user(user.id);
        debug!(user = %user.id, region = region.name(), "User registered");
        Ok(user)
    }

    /// Registers an owner in `region`.
    pub async fn create_owner(&self, region: &Arc<RegionState>) -> Result<Arc<Owner>, CodeError> {
        let (_, last) = self.random_name();
        let name = format!("{last} Mobility {}", self.owners.len() + 1);
        let registered = self
            .client
            .register_owner(RegisterOwnerRequest { name: name.clone() })
            .await
            .and_then(|r| {
                require_field("register_owner", "id", &r.server_id)?;
                require_field("register_owner", "chair register token", &r.chair_register_token)?;
                Ok(r)
            })
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToRegisterOwner, e))?;

        let models = pick_models(&mut self.child_rng());
        let owner = self.owners.create(|id| {
            Owner::new(
                id,
                registered.server_id,
                name,
                Arc::clone(region),
                registered.chair_register_token,
                registered.client,
                &models,
            )
        });
        debug!(owner = %owner.id, region = region.name(), "Owner registered");
        Ok(owner)
    }

    /// Buys the owner's next chair.
    pub async fn create_chair(&self, owner: &Arc<Owner>) -> Result<Arc<Chair>, CodeError> {
        let model = owner.next_model();
        let registering = owner.begin_registration();
        self.register_chair(owner, model, registering).await
    }

    async fn register_chair(
        &self,
        owner: &Arc<Owner>,
        model: Option<ChairModel>,
        _registering: InFlight,
    ) -> Result<Arc<Chair>, CodeError> {
        let model = model.ok_or_else(|| {
            CodeError::new(
                ErrorCode::FailedToRegisterChair,
                format!("owner {} has no chair model to buy", owner.id),
            )
        })?;
        let (first, _) = self.random_name();
        let name = format!("{first}-{:03}", self.chairs.len() + 1);

        let registered = self
            .client
            .register_chair(
                &owner.chair_register_token,
                RegisterChairRequest {
                    name: name.clone(),
                    model: model.name.to_owned(),
                },
            )
            .await
            .and_then(|r| {
                require_field("register_chair", "id", &r.server_id)?;
                if r.owner_server_id != owner.server_id {
                    return Err(EnvError::malformed(
                        "register_chair",
                        format!("chair owned by {}, expected {}", r.owner_server_id, owner.server_id),
                    ));
                }
                Ok(r)
            })
            .map_err(|e| CodeError::wrap(ErrorCode::FailedToRegisterChair, e))?;

        let initial = owner.region.region.random_point(&mut *self.rng());
        let rng = self.child_rng();
        let chair = self.chairs.create(|id| {
            Chair::new(
                id,
                registered.server_id,
                owner.id,
                name,
                model,
                Arc::clone(&owner.region),
                initial,
                registered.client,
                self.config.inbox_capacity,
                rng,
            )
        });
        owner.add_chair(Arc::clone(&chair));
        debug!(chair = %chair.id, owner = %owner.id, model = model.name, at = %initial, "Chair registered");
        Ok(chair)
    }

    /// Seeds every region with owners, their chairs and users.
    pub async fn populate(
        &self,
        owners_per_region: usize,
        chairs_per_owner: usize,
        users_per_region: usize,
    ) -> Result<(), CodeError> {
        for region in &self.regions {
            for _ in 0..owners_per_region {
                let owner = self.create_owner(region).await?;
                for _ in 0..chairs_per_owner {
                    self.create_chair(&owner).await?;
                }
            }
            for _ in 0..users_per_region {
                self.create_user(region).await?;
            }
        }
        info!(
            regions = self.regions.len(),
            owners = self.owners.len(),
            chairs = self.chairs.len(),
            users = self.users.len(),
            "World populated"
        );
        Ok(())
    }

    /// Compares committed payments with the rides users completed.
    pub fn validate_payments(&self) -> PaymentReconciliation {
        let mut reconciliation = PaymentReconciliation {
            total_payments: self.payments.total_committed(),
            ..Default::default()
        };
        for request in self.requests.values() {
            if !request.with_state(|s| s.evaluated) {
                continue;
            }
            let sales = request.sales();
            let fare = request.fare();
            reconciliation.completed_requests += 1;
            reconciliation.total_sales += sales;
            reconciliation.total_fares += fare;
            reconciliation.total_discount += sales - fare;
        }
        reconciliation.invalid_payments = self
            .payments
            .invalid_summary()
            .into_iter()
            .map(|(reason, count): (InvalidReason, usize)| (reason.to_string(), count))
            .collect();

        if reconciliation.discrepancy() != 0 {
            error!(
                discrepancy = reconciliation.discrepancy(),
                payments = reconciliation.total_payments,
                sales = reconciliation.total_sales,
                "Payments do not add up"
            );
        }
        reconciliation
    }

    /// Closes every notification stream.
    pub fn shutdown(&self) {
        for user in self.users.values() {
            user.shutdown();
        }
        for chair in self.chairs.values() {
            chair.shutdown();
        }
    }
}

/// Registration responses must carry non-empty identifiers.
fn require_field(operation: &'static str, field: &str, value: &str) -> Result<(), EnvError> {
    if value.is_empty() {
        return Err(EnvError::malformed(operation, format!("empty {field}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{loopback_service, loopback_world, solo_region};
    use async_trait::async_trait;
    use ridebench_core::Coordinate;
    use ridebench_env::{
        CreateRideRequest, CreatedRide, EnvError, EvaluationAck, NotificationFeed,
        RegisteredChair, RegisteredOwner, RegisteredUser, UserClient,
    };

    /// Users whose payment registration takes `delay`.
    struct SlowUsers {
        inner: Arc<dyn WorldClient>,
        delay: Duration,
    }

    struct SlowUser {
        inner: Arc<dyn UserClient>,
        delay: Duration,
    }

    #[async_trait]
    impl WorldClient for SlowUsers {
        async fn register_user(&self, req: RegisterUserRequest) -> Result<RegisteredUser, EnvError> {
            let mut registered = self.inner.register_user(req).await?;
            registered.client = Arc::new(SlowUser {
                inner: registered.client,
                delay: self.delay,
            });
            Ok(registered)
        }

        async fn register_owner(&self, req: RegisterOwnerRequest) -> Result<RegisteredOwner, EnvError> {
            self.inner.register_owner(req).await
        }

        async fn register_chair(
            &self,
            token: &str,
            req: RegisterChairRequest,
        ) -> Result<RegisteredChair, EnvError> {
            self.inner.register_chair(token, req).await
        }
    }

    #[async_trait]
    impl UserClient for SlowUser {
        async fn register_payment_method(&self, token: &str) -> Result<(), EnvError> {
            tokio::time::sleep(self.delay).await;
            self.inner.register_payment_method(token).await
        }

        async fn create_ride(&self, req: CreateRideRequest) -> Result<CreatedRide, EnvError> {
            self.inner.create_ride(req).await
        }

        async fn evaluate(&self, id: &str, score: i32) -> Result<EvaluationAck, EnvError> {
            self.inner.evaluate(id, score).await
        }

        async fn connect_notifications(&self) -> Result<NotificationFeed, EnvError> {
            self.inner.connect_notifications().await
        }
    }

    /// Passes registrations through, then breaks the identifiers in the answer.
    struct TamperedIds {
        inner: Arc<dyn WorldClient>,
    }

    #[async_trait]
    impl WorldClient for TamperedIds {
        async fn register_user(&self, req: RegisterUserRequest) -> Result<RegisteredUser, EnvError> {
            let mut registered = self.inner.register_user(req).await?;
            registered.server_id.clear();
            Ok(registered)
        }

        async fn register_owner(&self, req: RegisterOwnerRequest) -> Result<RegisteredOwner, EnvError> {
            self.inner.register_owner(req).await
        }

        async fn register_chair(
            &self,
            token: &str,
            req: RegisterChairRequest,
        ) -> Result<RegisteredChair, EnvError> {
            let mut registered = self.inner.register_chair(token, req).await?;
            registered.owner_server_id = "owner-elsewhere".into();
            Ok(registered)
        }
    }

    fn solo(config: WorldConfig) -> WorldConfig {
        WorldConfig {
            regions: solo_region(),
            ..config
        }
    }

    #[tokio::test]
    async fn test_registration_answers_are_validated() {
        let (service, ledger) = loopback_service();
        let client = Arc::new(TamperedIds {
            inner: Arc::new(service),
        });
        let world = World::new(solo(WorldConfig::default()), client, ledger);
        let region = Arc::clone(&world.regions()[0]);

        let err = world.create_user(&region).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToRegisterUser);
        assert!(err.to_string().contains("malformed"));
        assert!(world.users().is_empty());

        let owner = world.create_owner(&region).await.unwrap();
        let err = world.create_chair(&owner).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::FailedToRegisterChair);
        assert!(owner.chairs().is_empty());
    }

    #[tokio::test]
    async fn test_straggler_is_skipped_not_queued() {
        let (service, ledger) = loopback_service();
        let config = solo(WorldConfig::default()).with_tick_timeout(Duration::from_millis(20));
        let client = Arc::new(SlowUsers {
            inner: Arc::new(service),
            delay: Duration::from_millis(150),
        });
        let world = World::new(config, client, ledger);
        world.populate(0, 0, 2).await.unwrap();

        let first = world.tick().await.unwrap();
        assert_eq!(first.dispatched, 2);
        assert!(first.timed_out);
        assert_eq!(first.outstanding, 2);

        let second = world.tick().await.unwrap();
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(world.now(), 2);
        assert!(world.timed_out_ticks() >= 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let third = world.tick().await.unwrap();
        assert_eq!(third.skipped, 0);
        assert!(world
            .users()
            .iter()
            .all(|u| u.state() == UserState::Active));
    }

    #[tokio::test]
    async fn test_critical_error_aborts_run() {
        let (world, _) = loopback_world(solo(WorldConfig::default()));
        world.report(Err(CodeError::new(
            ErrorCode::ChairAlreadyHasRequest,
            "offered twice",
        )));

        let err = world.tick().await.unwrap_err();
        assert!(matches!(
            err,
            WorldError::Critical {
                code: ErrorCode::ChairAlreadyHasRequest,
                ..
            }
        ));
        // stays failed
        assert_eq!(world.tick().await.unwrap_err(), err);
    }

    #[tokio::test]
    async fn test_error_limit_aborts_run() {
        let (world, _) = loopback_world(solo(WorldConfig::default()).with_error_limit(2));
        for _ in 0..2 {
            world.report(Err(CodeError::new(ErrorCode::FailedToDepart, "timeout")));
        }
        assert!(world.tick().await.is_ok());

        world.report(Err(CodeError::new(ErrorCode::FailedToDepart, "timeout")));
        let err = world.tick().await.unwrap_err();
        assert!(matches!(err, WorldError::TooManyErrors(_)));
        assert_eq!(world.error_counts().get(&ErrorCode::FailedToDepart), Some(&3));
    }

    #[tokio::test]
    async fn test_users_grow_with_satisfaction() {
        let config = WorldConfig {
            user_growth_interval: 1,
            users_per_satisfaction_point: 2,
            ..solo(WorldConfig::default())
        };
        let (world, _) = loopback_world(config);
        world.regions()[0].update_user_average(None, 3000);

        // no growth at time zero
        world.tick().await.unwrap();
        assert_eq!(world.users().len(), 0);

        world.tick().await.unwrap();
        assert_eq!(world.users().len(), 6);
        assert_eq!(world.regions()[0].active_users(), 6);
    }

    #[tokio::test]
    async fn test_populate_assigns_models_round_robin() {
        let (world, _) = loopback_world(solo(WorldConfig::default()));
        world.populate(1, 4, 0).await.unwrap();

        let owner = &world.owners()[0];
        let speeds: Vec<i32> = owner.chairs().iter().map(|c| c.speed()).collect();
        assert_eq!(speeds, vec![2, 3, 5, 7]);
        assert!(owner
            .chairs()
            .iter()
            .all(|c| world.regions()[0].region.contains(c.location().initial())));
    }

    #[tokio::test]
    async fn test_each_sales_increment_buys_one_chair() {
        let (world, _) = loopback_world(solo(WorldConfig::default()));
        world.populate(1, 3, 0).await.unwrap();
        let owner = world.owners()[0].clone();

        // 500 + 100 * 145 is exactly one increment
        let ride = world.requests().create("ride-growth", |id| {
            crate::request::Request::new(
                id,
                UserId(1),
                Coordinate::new(0, 0),
                Coordinate::new(145, 0),
                0,
                0,
            )
        });
        owner.record_completed(ride);
        assert_eq!(owner.total_sales(), 15_000);
        assert_eq!(owner.affordable_chairs(world.config().sales_per_new_chair), 1);

        world.tick().await.unwrap();
        assert_eq!(owner.chairs().len(), 4);
        assert_eq!(owner.growth_tries(), 1);

        world.tick().await.unwrap();
        assert_eq!(owner.chairs().len(), 4);
        // the bought chair continues the model rotation after the initial fleet
        let speeds: Vec<i32> = owner.chairs().iter().map(|c| c.speed()).collect();
        assert_eq!(speeds, vec![2, 3, 5, 7]);
    }

    #[test]
    fn test_reconciliation_discrepancy() {
        let mut r = PaymentReconciliation {
            total_payments: 2300,
            total_discount: 3000,
            total_sales: 5300,
            total_fares: 2300,
            completed_requests: 1,
            invalid_payments: BTreeMap::new(),
        };
        assert_eq!(r.discrepancy(), 0);
        assert!(r.is_consistent());

        r.total_payments += 100;
        assert_eq!(r.discrepancy(), 100);
        assert!(!r.is_consistent());
    }

    #[test]
    fn test_default_config() {
        let config = WorldConfig::default();
        assert_eq!(config.sales_per_new_chair, 15_000);
        assert_eq!(config.distance_tolerance_ms, 3_000);
        assert_eq!(config.idle_policy, IdlePolicy::Stay);
        assert_eq!(config.regions.len(), 2);
        assert_eq!(Coordinate::new(0, 0), config.regions[0].offset);
    }
}
