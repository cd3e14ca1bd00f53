//! Shared fixtures for in-crate tests.

use crate::ledger::PaymentLedger;
use crate::loopback::{LoopbackConfig, LoopbackService};
use crate::world::{World, WorldConfig};
use ridebench_core::{Coordinate, Region};
use ridebench_payment::{GatewayConfig, PaymentGateway};
use std::sync::Arc;
use std::time::Duration;

/// Single 100x100 region centred on the origin.
pub(crate) fn solo_region() -> Vec<Region> {
    vec![Region::new("Solo", Coordinate::new(0, 0), 100, 100)]
}

/// A fast loopback service charging through a fresh ledger.
pub(crate) fn loopback_service() -> (LoopbackService, Arc<PaymentLedger>) {
    let ledger = Arc::new(PaymentLedger::new());
    let gateway = PaymentGateway::new(
        GatewayConfig {
            process_time: Duration::from_millis(1),
            ..GatewayConfig::default()
        },
        ledger.clone(),
    );
    let service = LoopbackService::new(
        LoopbackConfig {
            notification_delay: Duration::from_millis(1),
            ..LoopbackConfig::default()
        },
        Arc::new(gateway),
    );
    (service, ledger)
}

/// A world wired to a fast loopback service.
pub(crate) fn loopback_world(config: WorldConfig) -> (Arc<World>, LoopbackService) {
    let (service, ledger) = loopback_service();
    let world = World::new(config, Arc::new(service.clone()), ledger);
    (world, service)
}
