//! Integration tests for the guard API endpoints
//!
//! The router is rebuilt here from guard-lib components; only code paths
//! that never deliver a real signal are exercised (empty controller,
//! ineligible candidates), so no processes are touched.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use guard_lib::driver::{CycleRunner, SharedSnapshot};
use guard_lib::health::{components, ComponentStatus, HealthRegistry};
use guard_lib::models::{RestorationReason, TelemetrySnapshot, ThermalSeverity};
use guard_lib::notify::LogNotifier;
use guard_lib::observability::{GuardMetrics, StructuredLogger};
use guard_lib::offload::{
    CandidateSelector, ControllerConfig, KillCommandSender, OffloadController, SelectorConfig,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower::ServiceExt;

#[derive(Clone)]
struct AppState {
    health_registry: HealthRegistry,
    metrics: GuardMetrics,
    controller: Arc<OffloadController>,
    cycle: CycleRunner,
    latest_snapshot: SharedSnapshot,
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;
    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;
    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(readiness))
}

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

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let latest = state.latest_snapshot.read().await;
    let body = json!({
        "auto_restore_enabled": state.controller.auto_restore_enabled(),
        "suspended_count": state.controller.suspended_count().await,
        "reclaimed_bytes": state.controller.total_reclaimed_bytes().await,
        "has_snapshot": latest.is_some(),
    });
    (StatusCode::OK, Json(body))
}

async fn offload_cycle(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.latest_snapshot.read().await.clone();
    let Some(snapshot) = snapshot else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "no telemetry snapshot available yet"})),
        );
    };
    let budget = state.controller.remaining_budget().await;
    let batch = state.cycle.run(&snapshot, budget, "user_requested").await;
    (
        StatusCode::OK,
        Json(json!({
            "suspended_count": batch.suspended_count,
            "bytes_reclaimed": batch.bytes_reclaimed,
        })),
    )
}

async fn restore_all(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let results = state
        .controller
        .restore_all(RestorationReason::UserRequested)
        .await;
    let restored = results.iter().filter(|r| r.success).count();
    (
        StatusCode::OK,
        Json(json!({
            "restored": restored,
            "failed": results.len() - restored,
        })),
    )
}

async fn restore_pid(
    State(state): State<Arc<AppState>>,
    Path(pid): Path<u32>,
) -> impl IntoResponse {
    match state
        .controller
        .restore(pid, RestorationReason::UserRequested)
        .await
    {
        Some(result) => (
            StatusCode::OK,
            Json(json!({"pid": result.pid, "success": result.success})),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no suspended process with pid {}", pid)})),
        ),
    }
}

async fn set_auto_restore(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    let enabled = body["enabled"].as_bool().unwrap_or(true);
    state.controller.set_auto_restore_enabled(enabled);
    (StatusCode::OK, Json(json!({"enabled": enabled})))
}

fn create_test_router(state: Arc<AppState>) -> Router {
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

async fn setup_test_app() -> (Router, Arc<AppState>) {
    let health_registry = HealthRegistry::new();
    health_registry.register(components::TELEMETRY).await;
    health_registry.register(components::PREDICTOR).await;
    health_registry.register(components::OFFLOAD).await;

    let (controller, _events) =
        OffloadController::new(Arc::new(KillCommandSender), ControllerConfig::default());
    let controller = Arc::new(controller);
    let cycle = CycleRunner::new(
        Arc::new(CandidateSelector::new(SelectorConfig::default())),
        controller.clone(),
        Arc::new(LogNotifier::new()),
        StructuredLogger::new("test-host"),
    );

    let state = Arc::new(AppState {
        health_registry,
        metrics: GuardMetrics::new(),
        controller,
        cycle,
        latest_snapshot: Arc::new(RwLock::new(None)),
    });
    let router = create_test_router(state.clone());

    (router, state)
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_healthz_returns_ok_when_healthy() {
    let (app, _state) = setup_test_app().await;

    let response = app.oneshot(get_request("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert!(health["components"]["telemetry"].is_object());
    assert!(health["components"]["offload"].is_object());
}

#[tokio::test]
async fn test_healthz_returns_503_when_unhealthy() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_unhealthy(components::TELEMETRY, "meminfo unreadable")
        .await;

    let response = app.oneshot(get_request("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let health = body_json(response).await;
    assert_eq!(health["status"], "unhealthy");
}

#[tokio::test]
async fn test_healthz_stays_ok_when_degraded() {
    let (app, state) = setup_test_app().await;

    state
        .health_registry
        .set_degraded(components::TELEMETRY, "PSI not exposed")
        .await;

    let response = app.oneshot(get_request("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_readyz_tracks_readiness() {
    let (app, state) = setup_test_app().await;

    let response = app
        .clone()
        .oneshot(get_request("/readyz"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    state.health_registry.set_ready(true).await;
    let response = app.oneshot(get_request("/readyz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["ready"], true);
}

#[tokio::test]
async fn test_metrics_endpoint_returns_prometheus_format() {
    let (app, state) = setup_test_app().await;

    state.metrics.inc_predictions();
    state.metrics.observe_sampling_latency(0.001);
    state.metrics.set_suspended_processes(0);

    let response = app.oneshot(get_request("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let content_type = response.headers().get("content-type").unwrap();
    assert!(content_type.to_str().unwrap().contains("text/plain"));

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let metrics_text = String::from_utf8(body.to_vec()).unwrap();

    assert!(metrics_text.contains("thermal_guard_predictions_total"));
    assert!(metrics_text.contains("thermal_guard_sampling_latency_seconds_bucket"));
    assert!(metrics_text.contains("thermal_guard_suspended_processes"));
}

#[tokio::test]
async fn test_status_reports_empty_controller() {
    let (app, _state) = setup_test_app().await;

    let response = app.oneshot(get_request("/v1/status")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let status = body_json(response).await;
    assert_eq!(status["suspended_count"], 0);
    assert_eq!(status["reclaimed_bytes"], 0);
    assert_eq!(status["auto_restore_enabled"], true);
    assert_eq!(status["has_snapshot"], false);
}

#[tokio::test]
async fn test_offload_cycle_without_snapshot_is_unavailable() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(post_request("/v1/offload/cycle"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_offload_cycle_with_no_eligible_candidates() {
    let (app, state) = setup_test_app().await;

    // A snapshot whose only candidate is protected: nothing to suspend,
    // no signal ever sent.
    let mut snapshot = TelemetrySnapshot {
        timestamp: 1_700_000_000,
        memory_usage: 0.9,
        memory_available: 0.1,
        memory_pressure: 0.8,
        thermal_severity: ThermalSeverity::Serious,
        candidates: Vec::new(),
    };
    snapshot.candidates.push(guard_lib::models::ProcessCandidate {
        pid: 1,
        name: "init".to_string(),
        app_id: None,
        memory_bytes: 500 * 1024 * 1024,
        cpu_percent: 0.5,
        idle_secs: 600,
        protected: true,
        exe_path: None,
    });
    *state.latest_snapshot.write().await = Some(snapshot);

    let response = app
        .oneshot(post_request("/v1/offload/cycle"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["suspended_count"], 0);
    assert_eq!(body["bytes_reclaimed"], 0);
}

#[tokio::test]
async fn test_restore_unknown_pid_returns_404() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(post_request("/v1/restore/99999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_json(response).await["error"].is_string());
}

#[tokio::test]
async fn test_restore_all_with_nothing_suspended() {
    let (app, _state) = setup_test_app().await;

    let response = app
        .oneshot(post_request("/v1/restore/all"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["restored"], 0);
    assert_eq!(body["failed"], 0);
}

#[tokio::test]
async fn test_auto_restore_toggle_round_trip() {
    let (app, state) = setup_test_app().await;

    let request = Request::builder()
        .method("PUT")
        .uri("/v1/auto-restore")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"enabled": false}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["enabled"], false);

    assert!(!state.controller.auto_restore_enabled());
}
