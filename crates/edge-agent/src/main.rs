//! `edge-agent` binary: wires configuration, the store-and-forward
//! buffer, the driver orchestrator and the automation engine into a
//! running gateway process, and exposes a one-shot formula-testing
//! subcommand for operator troubleshooting.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use application::automation::AutomationEngine;
use application::buffer::BufferService;
use application::bus::EventBus;
use application::orchestrator::{DriverFactory, DriverRegistry};
use domain::formula;
use domain::ports::InMemorySink;
use infrastructure::{build_driver, GatewayConfig, SqliteStore};

#[derive(Parser, Debug)]
#[command(name = "edge-agent", author, version, about, long_about = None)]
struct Cli {
    /// Directory holding the layered configuration files.
    #[arg(long, env = "EDGE_AGENT_CONFIG_DIR", default_value = "config")]
    config_dir: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the gateway daemon until interrupted.
    Run,
    /// Evaluate a formula against a sample value without starting the daemon.
    TestFormula {
        /// The formula expression, e.g. "val * 1.8 + 32".
        expr: String,
        #[arg(long, default_value_t = 0.0)]
        sample: f64,
    },
}

fn init_tracing(log_level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("{log_level},edge_agent=debug")),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run(config_dir: &str) -> Result<()> {
    dotenv::dotenv().ok();

    let config = GatewayConfig::load(config_dir).context("failed to load gateway configuration")?;
    init_tracing(&config.log_level);

    info!(agent_id = %config.agent_id, "edge-agent starting");

    let bus = Arc::new(EventBus::new());

    let store = Arc::new(
        SqliteStore::connect(&config.buffer.database_url)
            .await
            .context("failed to open store-and-forward database")?,
    );
    // The real time-series client is an external collaborator (out of
    // scope here); this in-memory sink stands in until one is wired up
    // by a deployment.
    let sink = Arc::new(InMemorySink::new(false));

    let factory: DriverFactory = Arc::new(build_driver);
    let registry = Arc::new(DriverRegistry::new(bus.clone(), factory));

    let buffer_service = Arc::new(BufferService::new(
        sink.clone(),
        store,
        config.buffer.batch_size,
    ));
    let automation_engine = Arc::new(AutomationEngine::new(sink, registry.clone()));

    bus.subscribe_value(buffer_service.clone()).await;
    bus.subscribe_value(automation_engine.clone()).await;

    let cancel = CancellationToken::new();

    let drain_handle = tokio::spawn(
        buffer_service
            .clone()
            .run_drain_loop(config.buffer.flush_interval, cancel.clone()),
    );
    let stats_handle = tokio::spawn(
        automation_engine
            .clone()
            .run_stats_refresh(config.automation.stats_refresh_interval, cancel.clone()),
    );

    let gc_service = buffer_service.clone();
    let gc_cancel = cancel.clone();
    let gc_interval = config.buffer.gc_interval;
    let gc_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_interval);
        loop {
            tokio::select! {
                _ = gc_cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = gc_service.garbage_collect().await {
                        warn!(error = %err, "scheduled garbage collection failed");
                    }
                }
            }
        }
    });

    info!("edge-agent ready");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => warn!(error = %err, "unable to listen for shutdown signal"),
    }

    cancel.cancel();
    registry.shutdown().await;
    buffer_service.flush_on_shutdown().await;

    let _ = drain_handle.await;
    let _ = stats_handle.await;
    let _ = gc_handle.await;

    info!("edge-agent stopped");
    Ok(())
}

fn test_formula(expr: &str, sample: f64) -> Result<()> {
    let result = formula::test_formula(expr, sample);
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run => {
            let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
            rt.block_on(run(&cli.config_dir))
        }
        Command::TestFormula { expr, sample } => test_formula(&expr, sample),
    }
}
