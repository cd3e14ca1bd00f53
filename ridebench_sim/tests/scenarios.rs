//! End-to-end runs against the in-process loopback service.

use ridebench_core::{Coordinate, Region, RequestStatus};
use ridebench_payment::{GatewayConfig, PaymentGateway, PaymentOutcome, PaymentStatus};
use ridebench_sim::{
    LoopbackConfig, LoopbackService, PaymentLedger, ScenarioId, ScenarioRunner, World,
    WorldConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn runner() -> ScenarioRunner {
    ScenarioRunner::new(7)
        .with_ticks(400)
        .with_tick_timeout(Duration::from_millis(10))
        .with_grace_period(Duration::from_millis(300))
}

fn solo_world() -> (Arc<World>, LoopbackService, Arc<PaymentLedger>) {
    let ledger = Arc::new(PaymentLedger::new());
    let gateway = Arc::new(PaymentGateway::new(
        GatewayConfig {
            process_time: Duration::from_millis(1),
            ..GatewayConfig::default()
        },
        ledger.clone(),
    ));
    let service = LoopbackService::new(
        LoopbackConfig {
            notification_delay: Duration::from_millis(1),
            ..LoopbackConfig::default()
        },
        gateway,
    );
    let mut config = WorldConfig::default().with_tick_timeout(Duration::from_millis(10));
    config.regions = vec![Region::new("Solo", Coordinate::new(0, 0), 100, 100)];
    // keep the population fixed
    config.user_growth_interval = i64::MAX;
    let world = World::new(config, Arc::new(service.clone()), ledger.clone());
    (world, service, ledger)
}

#[tokio::test(flavor = "multi_thread")]
async fn test_standard_run_reconciles() {
    let result = runner().run(ScenarioId::Standard).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.payments.completed_requests > 0);
    assert_eq!(
        result.metrics.payments.total_payments,
        result.metrics.payments.total_fares
    );
    assert!(result.metrics.score > 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_overcharge_is_detected() {
    let result = runner().run(ScenarioId::Overcharge).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    let payments = &result.metrics.payments;
    assert!(payments.completed_requests > 0);
    assert!(payments.discrepancy() > 0);
    assert!(payments.invalid_payments.contains_key("invalid_amount"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_flaky_gateway_stays_consistent() {
    let result = runner().run(ScenarioId::FlakyGateway).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.payments.is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_roaming_chairs_pass_audits() {
    let result = runner().run(ScenarioId::Roaming).await;
    assert!(result.passed, "{:?}", result.failure_reason);
    assert!(result.metrics.payments.is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stray_payment_breaks_reconciliation() {
    let (world, service, _ledger) = solo_world();
    world.populate(1, 1, 1).await.unwrap();
    let user = world.users().pop().unwrap();

    let mut arrived = None;
    for _ in 0..500 {
        world.tick().await.unwrap();
        if let Some(request) = user.current_request() {
            if request.statuses().desired == RequestStatus::Arrived {
                arrived = Some(request);
                break;
            }
        }
    }
    let request = arrived.expect("ride never arrived");

    let token = user.payment_token().unwrap();
    let stray = request.fare() + 1;
    let outcome = service
        .gateway()
        .post_payment(Some("manual".into()), &token, stray)
        .await;
    assert_eq!(outcome, PaymentOutcome::Settled(PaymentStatus::Success));

    for _ in 0..20 {
        world.tick().await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    world.shutdown();

    let payments = world.validate_payments();
    assert!(request.with_state(|s| s.evaluated));
    assert_eq!(payments.discrepancy(), stray);
    assert_eq!(payments.invalid_payments.values().sum::<usize>(), 1);
    assert!(!payments.is_consistent());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_replays_commit_once() {
    let (world, service, ledger) = solo_world();
    world.populate(0, 0, 1).await.unwrap();
    world.tick().await.unwrap();
    let token = world.users()[0].payment_token().unwrap();

    let posts: Vec<_> = (0..5)
        .map(|_| {
            let gateway = Arc::clone(service.gateway());
            let token = token.clone();
            tokio::spawn(async move {
                loop {
                    match gateway.post_payment(Some("dup".into()), &token, 500).await {
                        PaymentOutcome::Processing => {
                            tokio::time::sleep(Duration::from_millis(1)).await
                        }
                        settled => return settled,
                    }
                }
            })
        })
        .collect();
    for post in posts {
        assert_eq!(
            post.await.unwrap(),
            PaymentOutcome::Settled(PaymentStatus::Success)
        );
    }

    assert_eq!(ledger.total_committed(), 500);
    assert_eq!(ledger.invalid_payments().len(), 1);
    assert_eq!(service.gateway().payments_for(&token).len(), 1);
}
