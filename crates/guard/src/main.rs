//! Thermal Guard - thermal-stress prediction and process offload daemon
//!
//! Samples system telemetry at 10 Hz, predicts thermal escalation with a
//! heuristic risk model, and suspends idle background processes before
//! the machine overheats, restoring them once the stress clears.

use anyhow::Result;
use guard_lib::driver::{DriverConfig, GuardDriver};
use guard_lib::health::{components, HealthRegistry};
use guard_lib::notify::LogNotifier;
use guard_lib::observability::{GuardMetrics, StructuredLogger};
use guard_lib::offload::{
    CandidateSelector, ControllerConfig, KillCommandSender, OffloadController, SelectorConfig,
    DEFAULT_ACTIVE_CPU_PERCENT,
};
use guard_lib::predictor::{HeuristicModel, RiskModel};
use guard_lib::telemetry::ProcSource;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const GUARD_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting thermal-guard");

    // Load configuration
    let config = config::GuardConfig::load()?;
    info!(host_name = %config.host_name, api_port = config.api_port, "Guard configured");

    // Initialize health registry
    let health_registry = HealthRegistry::new();
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::PREDICTOR).await;
    health_registry.register(components::OFFLOAD).await;

    // Initialize metrics
    let metrics = GuardMetrics::new();

    // Risk model: created unloaded, marked ready before the loop starts.
    let model = Arc::new(HeuristicModel::new_unloaded());
    model.load();

    // Initialize structured logger
    let logger = StructuredLogger::new(&config.host_name);
    logger.log_startup(GUARD_VERSION, model.model_version());

    // Offload controller over real SIGSTOP/SIGCONT delivery
    let (controller, mut lifecycle_events) = OffloadController::new(
        Arc::new(KillCommandSender),
        ControllerConfig {
            max_concurrent: config.max_concurrent_offloads,
            auto_restore_enabled: config.auto_restore_enabled,
        },
    );
    let controller = Arc::new(controller);

    // Persist lifecycle transitions as structured log records.
    tokio::spawn(async move {
        while let Some(event) = lifecycle_events.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(target: "lifecycle", record = %json, "Offload transition"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize lifecycle event"),
            }
        }
    });

    let selector = Arc::new(CandidateSelector::new(SelectorConfig {
        min_memory_bytes: config.min_memory_bytes,
        min_idle_secs: config.min_idle_secs,
        active_cpu_percent: DEFAULT_ACTIVE_CPU_PERCENT,
        excluded_identifiers: config.excluded_set(),
    }));

    let driver = GuardDriver::new(
        Arc::new(ProcSource::new()),
        model,
        selector,
        controller.clone(),
        Arc::new(LogNotifier::new()),
        health_registry.clone(),
        logger.clone(),
        DriverConfig {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            prediction_threshold: config.prediction_threshold,
        },
    );

    // Create shared application state before the driver takes ownership
    let app_state = Arc::new(api::AppState {
        health_registry: health_registry.clone(),
        metrics: metrics.clone(),
        controller: controller.clone(),
        cycle: driver.cycle_runner(),
        latest_snapshot: driver.latest_snapshot(),
        tracker: driver.accuracy_tracker(),
    });

    // Start the control loop
    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let driver_handle = tokio::spawn(driver.run(shutdown_rx));

    // Mark guard as ready after initialization
    health_registry.set_ready(true).await;

    // Start status, health and metrics server
    let _api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    // Stop the loop, then hand every suspended process back to the OS.
    let _ = shutdown_tx.send(());
    let _ = driver_handle.await;

    let results = controller.shutdown().await;
    let restored = results.iter().filter(|r| r.success).count();
    for _ in 0..restored {
        metrics.inc_restores("shutdown");
    }
    logger.log_shutdown("SIGINT received", restored, results.len() - restored);

    Ok(())
}
