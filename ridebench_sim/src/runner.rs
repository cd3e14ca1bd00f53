//! Scenario runner - wires a world to the loopback service and judges the run.

use crate::ledger::PaymentLedger;
use crate::loopback::{LoopbackConfig, LoopbackService};
use crate::scenarios::ScenarioId;
use crate::user::UserState;
use crate::world::{IdlePolicy, PaymentReconciliation, World, WorldConfig};
use ridebench_payment::{serve, GatewayConfig, PaymentGateway};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Amount the overcharge scenario adds to every payment.
const OVERCHARGE: i64 = 100;

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the run met the scenario's expectation
    pub passed: bool,

    /// Ticks completed
    pub total_ticks: u64,

    /// Ticks that ended with tasks still running
    pub timed_out_ticks: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    pub users: usize,

    /// Users that have not churned
    pub active_users: usize,

    pub chairs: usize,
    pub owners: usize,
    pub requests: usize,

    /// Benchmark score
    pub score: i64,

    /// Non-critical errors by code
    pub errors: BTreeMap<String, u64>,

    pub payments: PaymentReconciliation,
}

/// Runs benchmark scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Ticks to run
    ticks: u64,

    tick_timeout: Duration,

    owners_per_region: usize,
    chairs_per_owner: usize,
    users_per_region: usize,

    /// Wait after the last tick so stragglers can settle before validation
    grace_period: Duration,

    /// Serve the payment gateway over HTTP while running
    payment_addr: Option<SocketAddr>,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            ticks: 120,
            tick_timeout: Duration::from_millis(50),
            owners_per_region: 1,
            chairs_per_owner: 3,
            users_per_region: 5,
            grace_period: Duration::from_millis(500),
            payment_addr: None,
        }
    }

    /// Sets the number of ticks.
    pub fn with_ticks(mut self, ticks: u64) -> Self {
        self.ticks = ticks;
        self
    }

    /// Sets the tick timeout.
    pub fn with_tick_timeout(mut self, timeout: Duration) -> Self {
        self.tick_timeout = timeout;
        self
    }

    /// Sets the initial population of every region.
    pub fn with_population(
        mut self,
        owners_per_region: usize,
        chairs_per_owner: usize,
        users_per_region: usize,
    ) -> Self {
        self.owners_per_region = owners_per_region;
        self.chairs_per_owner = chairs_per_owner;
        self.users_per_region = users_per_region;
        self
    }

    /// Sets the grace period before validation.
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    /// Serves the payment gateway on `addr` during the run.
    pub fn with_payment_addr(mut self, addr: SocketAddr) -> Self {
        self.payment_addr = Some(addr);
        self
    }

    fn world_config(&self, scenario: ScenarioId) -> WorldConfig {
        let config = WorldConfig::default()
            .with_seed(self.seed)
            .with_tick_timeout(self.tick_timeout);
        match scenario {
            ScenarioId::Roaming => config.with_idle_policy(IdlePolicy::Roam),
            _ => config,
        }
    }

    fn gateway_config(&self, scenario: ScenarioId) -> GatewayConfig {
        let config = GatewayConfig {
            process_time: Duration::from_millis(5),
            seed: self.seed,
            ..GatewayConfig::default()
        };
        match scenario {
            ScenarioId::FlakyGateway => GatewayConfig {
                queue_size: 1,
                process_time: Duration::from_millis(20),
                flaky_when_saturated: true,
                ..config
            },
            _ => config,
        }
    }

    fn loopback_config(&self, scenario: ScenarioId) -> LoopbackConfig {
        let config = LoopbackConfig {
            notification_delay: (self.tick_timeout / 5).min(Duration::from_millis(20)),
            ..LoopbackConfig::default()
        };
        match scenario {
            ScenarioId::Overcharge => LoopbackConfig {
                payment_overcharge: OVERCHARGE,
                ..config
            },
            _ => config,
        }
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let ledger = Arc::new(PaymentLedger::new());
        let gateway = Arc::new(PaymentGateway::new(
            self.gateway_config(scenario),
            ledger.clone(),
        ));
        let service = LoopbackService::new(self.loopback_config(scenario), Arc::clone(&gateway));
        let world = World::new(self.world_config(scenario), Arc::new(service), ledger);

        let shutdown = CancellationToken::new();
        if let Some(addr) = self.payment_addr {
            match TcpListener::bind(addr).await {
                Ok(listener) => {
                    let token = shutdown.clone();
                    let gateway = Arc::clone(&gateway);
                    tokio::spawn(async move {
                        let stopped = async move { token.cancelled().await };
                        if let Err(e) = serve(listener, gateway, stopped).await {
                            error!("Payment gateway stopped: {}", e);
                        }
                    });
                }
                Err(e) => warn!("Cannot serve payment gateway on {}: {}", addr, e),
            }
        }

        let mut failure_reason = None;
        let mut total_ticks = 0;

        if let Err(e) = world
            .populate(self.owners_per_region, self.chairs_per_owner, self.users_per_region)
            .await
        {
            failure_reason = Some(format!("population failed: {e}"));
        } else {
            for _ in 0..self.ticks {
                match world.tick().await {
                    Ok(report) => {
                        total_ticks += 1;
                        if report.time % 30 == 0 {
                            debug!(
                                "  t={} | dispatched={} | skipped={} | requests={}",
                                report.time,
                                report.dispatched,
                                report.skipped,
                                world.requests().len()
                            );
                        }
                    }
                    Err(e) => {
                        error!("Run aborted at t={}: {}", world.now(), e);
                        failure_reason = Some(e.to_string());
                        break;
                    }
                }
            }
        }

        tokio::time::sleep(self.grace_period).await;
        world.shutdown();
        shutdown.cancel();

        let payments = world.validate_payments();
        if failure_reason.is_none() {
            failure_reason = judge(scenario, &payments);
        }

        let users = world.users();
        let metrics = ScenarioMetrics {
            active_users: users
                .iter()
                .filter(|u| u.state() != UserState::Churned)
                .count(),
            users: users.len(),
            chairs: world.chairs().len(),
            owners: world.owners().len(),
            requests: world.requests().len(),
            score: world.score(),
            errors: world
                .error_counts()
                .into_iter()
                .map(|(code, count)| (code.to_string(), count))
                .collect(),
            payments,
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks,
            timed_out_ticks: world.timed_out_ticks(),
            failure_reason,
            metrics,
        }
    }
}

/// Decides whether the payment reconciliation meets the scenario's expectation.
fn judge(scenario: ScenarioId, payments: &PaymentReconciliation) -> Option<String> {
    if scenario.expects_discrepancy() {
        if payments.discrepancy() == 0 {
            return Some("overcharged payments went unnoticed".to_string());
        }
        return None;
    }
    if !payments.is_consistent() {
        return Some(format!(
            "payments {} + discounts {} != sales {} (fares {}, invalid {:?})",
            payments.total_payments,
            payments.total_discount,
            payments.total_sales,
            payments.total_fares,
            payments.invalid_payments
        ));
    }
    None
}
