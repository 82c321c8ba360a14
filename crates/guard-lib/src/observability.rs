//! Observability infrastructure for the guard
//!
//! Provides:
//! - Prometheus metrics (inference/sampling latency, live suspensions,
//!   reclaimed bytes, offload/restore/rejection counters, accuracy)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<GuardMetricsInner> = OnceLock::new();

struct GuardMetricsInner {
    sampling_latency_seconds: Histogram,
    inference_latency_seconds: Histogram,
    suspended_processes: IntGauge,
    reclaimed_bytes: IntGauge,
    predictions_total: IntCounter,
    offloads_total: IntCounter,
    offload_rejections_total: IntCounterVec,
    restores_total: IntCounterVec,
    tick_errors_total: IntCounter,
    prediction_accuracy_permille: IntGauge,
}

impl GuardMetricsInner {
    fn new() -> Self {
        Self {
            sampling_latency_seconds: register_histogram!(
                "thermal_guard_sampling_latency_seconds",
                "Time spent collecting a telemetry snapshot",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register sampling_latency_seconds"),

            inference_latency_seconds: register_histogram!(
                "thermal_guard_inference_latency_seconds",
                "Time spent scoring a feature vector",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register inference_latency_seconds"),

            suspended_processes: register_int_gauge!(
                "thermal_guard_suspended_processes",
                "Number of processes currently suspended"
            )
            .expect("Failed to register suspended_processes"),

            reclaimed_bytes: register_int_gauge!(
                "thermal_guard_reclaimed_bytes",
                "Estimated bytes reclaimed by live suspensions"
            )
            .expect("Failed to register reclaimed_bytes"),

            predictions_total: register_int_counter!(
                "thermal_guard_predictions_total",
                "Total number of risk predictions generated"
            )
            .expect("Failed to register predictions_total"),

            offloads_total: register_int_counter!(
                "thermal_guard_offloads_total",
                "Total number of successful process suspensions"
            )
            .expect("Failed to register offloads_total"),

            offload_rejections_total: register_int_counter_vec!(
                "thermal_guard_offload_rejections_total",
                "Offload attempts rejected before any OS call",
                &["reason"]
            )
            .expect("Failed to register offload_rejections_total"),

            restores_total: register_int_counter_vec!(
                "thermal_guard_restores_total",
                "Total number of restorations by reason",
                &["reason"]
            )
            .expect("Failed to register restores_total"),

            tick_errors_total: register_int_counter!(
                "thermal_guard_tick_errors_total",
                "Prediction ticks skipped due to errors"
            )
            .expect("Failed to register tick_errors_total"),

            prediction_accuracy_permille: register_int_gauge!(
                "thermal_guard_prediction_accuracy_permille",
                "Rolling prediction accuracy in permille"
            )
            .expect("Failed to register prediction_accuracy_permille"),
        }
    }
}

/// Guard metrics for Prometheus exposition.
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct GuardMetrics {
    _private: (),
}

impl Default for GuardMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(GuardMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &GuardMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_sampling_latency(&self, duration_secs: f64) {
        self.inner().sampling_latency_seconds.observe(duration_secs);
    }

    pub fn observe_inference_latency(&self, duration_secs: f64) {
        self.inner().inference_latency_seconds.observe(duration_secs);
    }

    pub fn set_suspended_processes(&self, count: i64) {
        self.inner().suspended_processes.set(count);
    }

    pub fn set_reclaimed_bytes(&self, bytes: i64) {
        self.inner().reclaimed_bytes.set(bytes);
    }

    pub fn inc_predictions(&self) {
        self.inner().predictions_total.inc();
    }

    pub fn inc_offloads(&self) {
        self.inner().offloads_total.inc();
    }

    pub fn inc_offload_rejection(&self, reason: &str) {
        self.inner()
            .offload_rejections_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn inc_restores(&self, reason: &str) {
        self.inner().restores_total.with_label_values(&[reason]).inc();
    }

    pub fn inc_tick_errors(&self) {
        self.inner().tick_errors_total.inc();
    }

    pub fn set_accuracy(&self, accuracy: f64) {
        self.inner()
            .prediction_accuracy_permille
            .set((accuracy * 1000.0).round() as i64);
    }
}

/// Structured logger for significant guard events.
#[derive(Clone)]
pub struct StructuredLogger {
    host_name: String,
}

impl StructuredLogger {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
        }
    }

    pub fn log_startup(&self, version: &str, model_version: &str) {
        info!(
            event = "guard_started",
            host = %self.host_name,
            guard_version = %version,
            model_version = %model_version,
            "Thermal guard started"
        );
    }

    pub fn log_shutdown(&self, reason: &str, restored: usize, failed: usize) {
        info!(
            event = "guard_shutdown",
            host = %self.host_name,
            reason = %reason,
            restored,
            failed,
            "Thermal guard shutting down"
        );
    }

    pub fn log_prediction(
        &self,
        prediction_id: u64,
        probability: f64,
        severity: &str,
        confidence: f64,
        latency_us: u64,
    ) {
        info!(
            event = "prediction_generated",
            host = %self.host_name,
            prediction_id,
            probability,
            severity = %severity,
            confidence,
            latency_us,
            "Generated thermal risk prediction"
        );
    }

    pub fn log_offload_cycle(&self, trigger: &str, suspended: usize, bytes_reclaimed: u64) {
        info!(
            event = "offload_cycle",
            host = %self.host_name,
            trigger = %trigger,
            suspended,
            bytes_reclaimed,
            "Offload cycle complete"
        );
    }

    pub fn log_restore_cycle(&self, reason: &str, restored: usize, failed: usize) {
        if failed > 0 {
            warn!(
                event = "restore_cycle",
                host = %self.host_name,
                reason = %reason,
                restored,
                failed,
                "Restore cycle completed with failures"
            );
        } else {
            info!(
                event = "restore_cycle",
                host = %self.host_name,
                reason = %reason,
                restored,
                "Restore cycle complete"
            );
        }
    }
}
