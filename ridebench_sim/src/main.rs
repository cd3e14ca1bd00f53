//! RideBench CLI
//!
//! Drive a virtual population against the in-process service and check the
//! books at the end.

use clap::Parser;
use ridebench_sim::{ScenarioId, ScenarioResult, ScenarioRunner};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// RideBench load generator and consistency checker
#[derive(Parser, Debug)]
#[command(name = "ridebench")]
#[command(about = "Run ride-hailing benchmark scenarios", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (standard, overcharge, roaming, flaky_gateway, all)
    #[arg(short = 'S', long, default_value = "standard")]
    scenario: String,

    /// Ticks to run
    #[arg(short, long, default_value = "120")]
    ticks: u64,

    /// Wall-clock budget of one tick in milliseconds
    #[arg(long, default_value = "50")]
    tick_timeout_ms: u64,

    /// Owners per region at start
    #[arg(long, default_value = "1")]
    owners: usize,

    /// Chairs each initial owner starts with
    #[arg(long, default_value = "3")]
    chairs_per_owner: usize,

    /// Users per region at start
    #[arg(long, default_value = "5")]
    users: usize,

    /// Serve the payment gateway over HTTP on this address while running
    #[arg(long)]
    payment_addr: Option<SocketAddr>,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {e}");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                eprintln!("Available scenarios: standard, overcharge, roaming, flaky_gateway, all");
                std::process::exit(1);
            }
        }
    };

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    let mut runner = ScenarioRunner::new(seed)
        .with_ticks(args.ticks)
        .with_tick_timeout(Duration::from_millis(args.tick_timeout_ms))
        .with_population(args.owners, args.chairs_per_owner, args.users);
    if let Some(addr) = args.payment_addr {
        runner = runner.with_payment_addr(addr);
    }

    let mut results: Vec<ScenarioResult> = Vec::new();
    for scenario in scenarios {
        let result = runner.run(scenario).await;
        if !args.json {
            report(&result);
        }
        results.push(result);
    }

    let failed = results.iter().filter(|r| !r.passed).count();
    if args.json {
        let summary = serde_json::json!({
            "total": results.len(),
            "passed": results.len() - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "timed_out_ticks": r.timed_out_ticks,
                    "failure_reason": r.failure_reason,
                    "score": r.metrics.score,
                    "users": r.metrics.users,
                    "active_users": r.metrics.active_users,
                    "chairs": r.metrics.chairs,
                    "requests": r.metrics.requests,
                    "errors": r.metrics.errors,
                    "payments": r.metrics.payments,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{json}"),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
}

fn report(result: &ScenarioResult) {
    let metrics = &result.metrics;
    if result.passed {
        info!("✓ {} (seed={}) PASSED", result.scenario.name(), result.seed);
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
    info!(
        "  score={} | users={} ({} active) | chairs={} | requests={} | completed={}",
        metrics.score,
        metrics.users,
        metrics.active_users,
        metrics.chairs,
        metrics.requests,
        metrics.payments.completed_requests
    );
    info!(
        "  ticks={} (timed out {}) | payments={} | sales={} | discrepancy={}",
        result.total_ticks,
        result.timed_out_ticks,
        metrics.payments.total_payments,
        metrics.payments.total_sales,
        metrics.payments.discrepancy()
    );
    for (code, count) in &metrics.errors {
        info!("  {} x{}", code, count);
    }
}
