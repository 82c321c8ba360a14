//! HTTP API for status, user-triggered offload/restore, health checks
//! and Prometheus metrics

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use guard_lib::driver::{CycleRunner, SharedSnapshot, SharedTracker};
use guard_lib::health::{ComponentStatus, HealthRegistry};
use guard_lib::models::{OffloadRecord, OffloadStatus, RestorationReason, ThermalSeverity};
use guard_lib::observability::GuardMetrics;
use guard_lib::offload::{OffloadController, OffloadOutcome, RestoreResult};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: GuardMetrics,
    pub controller: Arc<OffloadController>,
    pub cycle: CycleRunner,
    pub latest_snapshot: SharedSnapshot,
    pub tracker: SharedTracker,
}

/// Summary of the latest telemetry snapshot.
#[derive(Debug, Serialize)]
struct SnapshotSummary {
    timestamp: i64,
    memory_usage: f64,
    memory_pressure: f64,
    thermal_severity: ThermalSeverity,
    candidate_count: usize,
}

/// Response for `GET /v1/status`.
#[derive(Debug, Serialize)]
struct StatusResponse {
    auto_restore_enabled: bool,
    suspended_count: usize,
    reclaimed_bytes: u64,
    prediction_accuracy: f64,
    average_inference_latency_us: Option<u64>,
    suspended: Vec<OffloadRecord>,
    latest_snapshot: Option<SnapshotSummary>,
}

/// One rejected or failed pid in an offload-cycle response.
#[derive(Debug, Serialize)]
struct SkippedCandidate {
    pid: u32,
    reason: String,
}

/// Response for `POST /v1/offload/cycle`.
#[derive(Debug, Serialize)]
struct OffloadCycleResponse {
    suspended_count: usize,
    bytes_reclaimed: u64,
    skipped: Vec<SkippedCandidate>,
}

/// One restoration in a restore response.
#[derive(Debug, Serialize)]
struct RestoreEntry {
    pid: u32,
    success: bool,
    status: OffloadStatus,
    memory_restored: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl From<&RestoreResult> for RestoreEntry {
    fn from(result: &RestoreResult) -> Self {
        Self {
            pid: result.pid,
            success: result.success,
            status: result.status,
            memory_restored: result.memory_restored,
            error: result.error.clone(),
        }
    }
}

/// Response for `POST /v1/restore/all`.
#[derive(Debug, Serialize)]
struct RestoreAllResponse {
    restored: usize,
    failed: usize,
    results: Vec<RestoreEntry>,
}

/// Request body for `PUT /v1/auto-restore`.
#[derive(Debug, Deserialize)]
struct AutoRestoreRequest {
    enabled: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// Health check response - returns 200 if healthy or degraded, 503 if
/// unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    encoder.encode(&metric_families, &mut buffer).unwrap();

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Current guard state: suspensions, accuracy, latest telemetry.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (prediction_accuracy, average_inference_latency_us) = {
        let tracker = state.tracker.lock().await;
        (
            tracker.current_accuracy(),
            tracker
                .average_latency()
                .map(|latency| latency.as_micros() as u64),
        )
    };
    let latest_snapshot = state.latest_snapshot.read().await.as_ref().map(|snapshot| {
        SnapshotSummary {
            timestamp: snapshot.timestamp,
            memory_usage: snapshot.memory_usage,
            memory_pressure: snapshot.memory_pressure,
            thermal_severity: snapshot.thermal_severity,
            candidate_count: snapshot.candidates.len(),
        }
    });

    let response = StatusResponse {
        auto_restore_enabled: state.controller.auto_restore_enabled(),
        suspended_count: state.controller.suspended_count().await,
        reclaimed_bytes: state.controller.total_reclaimed_bytes().await,
        prediction_accuracy,
        average_inference_latency_us,
        suspended: state.controller.live_records().await,
        latest_snapshot,
    };
    (StatusCode::OK, Json(response))
}

/// User-triggered offload cycle over the latest telemetry snapshot.
async fn offload_cycle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.latest_snapshot.read().await.clone();
    let Some(snapshot) = snapshot else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "no telemetry snapshot available yet".to_string(),
            }),
        )
            .into_response();
    };

    let budget = state.controller.remaining_budget().await;
    let batch = state.cycle.run(&snapshot, budget, "user_requested").await;

    let skipped = batch
        .outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            OffloadOutcome::Suspended { .. } => None,
            OffloadOutcome::Rejected { pid, rejection } => Some(SkippedCandidate {
                pid: *pid,
                reason: rejection.as_label().to_string(),
            }),
            OffloadOutcome::Failed { pid, error } => Some(SkippedCandidate {
                pid: *pid,
                reason: error.clone(),
            }),
        })
        .collect();

    (
        StatusCode::OK,
        Json(OffloadCycleResponse {
            suspended_count: batch.suspended_count,
            bytes_reclaimed: batch.bytes_reclaimed,
            skipped,
        }),
    )
        .into_response()
}

/// Restore every suspended process at the user's request. Honored even
/// when auto-restore is disabled.
async fn restore_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let results = state
        .controller
        .restore_all(RestorationReason::UserRequested)
        .await;
    let restored = results.iter().filter(|r| r.success).count();
    for _ in 0..restored {
        state.metrics.inc_restores("user_requested");
    }

    let response = RestoreAllResponse {
        restored,
        failed: results.len() - restored,
        results: results.iter().map(RestoreEntry::from).collect(),
    };
    (StatusCode::OK, Json(response))
}

/// Restore one suspended process by pid.
async fn restore_pid(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<u32>,
) -> impl IntoResponse {
    match state
        .controller
        .restore(pid, RestorationReason::UserRequested)
        .await
    {
        Some(result) => {
            if result.success {
                state.metrics.inc_restores("user_requested");
            }
            (StatusCode::OK, Json(RestoreEntry::from(&result))).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("no suspended process with pid {}", pid),
            }),
        )
            .into_response(),
    }
}

/// Toggle automatic restoration triggers.
async fn set_auto_restore(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AutoRestoreRequest>,
) -> impl IntoResponse {
    state.controller.set_auto_restore_enabled(request.enabled);
    (
        StatusCode::OK,
        Json(serde_json::json!({ "enabled": request.enabled })),
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/v1/status", get(status))
        .route("/v1/offload/cycle", post(offload_cycle))
        .route("/v1/restore/all", post(restore_all))
        .route("/v1/restore/:pid", post(restore_pid))
        .route("/v1/auto-restore", put(set_auto_restore))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
