//! Guard control loop
//!
//! Runs the sample -> extract -> score -> act pipeline on a fixed tick,
//! resolving prediction outcomes once their horizon elapses and restoring
//! suspended processes when thermal stress clears. Cancellation is
//! observed between ticks; an in-flight tick always runs to completion.

use crate::error::GuardError;
use crate::health::{components, HealthRegistry};
use crate::models::{Prediction, RecommendedAction, TelemetrySnapshot, ThermalSeverity};
use crate::notify::Notifier;
use crate::observability::{GuardMetrics, StructuredLogger};
use crate::offload::{BatchOutcome, CandidateSelector, OffloadController, OffloadOutcome};
use crate::predictor::{AccuracyTracker, FeatureExtractor, RiskModel};
use crate::telemetry::TelemetrySource;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Default tick interval (10 Hz).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Default probability threshold for surfacing Monitor-tier predictions.
pub const DEFAULT_PREDICTION_THRESHOLD: f64 = 0.7;

/// Bound on unresolved prediction outcomes; oldest are dropped first.
const MAX_PENDING_OUTCOMES: usize = 1024;

/// Configuration for the guard driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Interval between pipeline ticks.
    pub tick_interval: Duration,
    /// Monitor-tier predictions below this probability stay silent.
    pub prediction_threshold: f64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick_interval: DEFAULT_TICK_INTERVAL,
            prediction_threshold: DEFAULT_PREDICTION_THRESHOLD,
        }
    }
}

/// Latest telemetry snapshot, shared with status reporting.
pub type SharedSnapshot = Arc<RwLock<Option<TelemetrySnapshot>>>;

/// Accuracy ledger shared between the driver and status reporting.
pub type SharedTracker = Arc<Mutex<AccuracyTracker>>;

/// A prediction awaiting ground truth once its horizon elapses.
#[derive(Debug, Clone, Copy)]
struct PendingOutcome {
    prediction_id: u64,
    due_at: i64,
}

/// One selection-plus-suspension pass.
///
/// Shared by the periodic loop and user-triggered requests so both paths
/// apply the same eligibility rules, metrics, and notifications.
#[derive(Clone)]
pub struct CycleRunner {
    selector: Arc<CandidateSelector>,
    controller: Arc<OffloadController>,
    notifier: Arc<dyn Notifier>,
    metrics: GuardMetrics,
    logger: StructuredLogger,
}

impl CycleRunner {
    pub fn new(
        selector: Arc<CandidateSelector>,
        controller: Arc<OffloadController>,
        notifier: Arc<dyn Notifier>,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            selector,
            controller,
            notifier,
            metrics: GuardMetrics::new(),
            logger,
        }
    }

    /// Select up to `limit` candidates from the snapshot and suspend them.
    pub async fn run(
        &self,
        snapshot: &TelemetrySnapshot,
        limit: usize,
        trigger: &str,
    ) -> BatchOutcome {
        if limit == 0 {
            debug!(trigger, "No offload budget remaining");
            return BatchOutcome::default();
        }
        let picked = self.selector.select(&snapshot.candidates, limit);
        if picked.is_empty() {
            debug!(trigger, "No eligible offload candidates");
            return BatchOutcome::default();
        }

        let batch = self.controller.offload_batch(&picked).await;
        for outcome in &batch.outcomes {
            match outcome {
                OffloadOutcome::Suspended { .. } => self.metrics.inc_offloads(),
                OffloadOutcome::Rejected { rejection, .. } => {
                    self.metrics.inc_offload_rejection(rejection.as_label())
                }
                OffloadOutcome::Failed { .. } => {}
            }
        }
        if batch.suspended_count > 0 {
            self.notifier
                .notify_offload_batch(batch.suspended_count, batch.bytes_reclaimed);
            self.logger
                .log_offload_cycle(trigger, batch.suspended_count, batch.bytes_reclaimed);
        }
        batch
    }
}

/// Periodic driver owning the feature extractor and the accuracy ledger.
///
/// Single-writer by construction: `run` consumes the driver, so extractor
/// history and outcome resolution stay ordered.
pub struct GuardDriver {
    source: Arc<dyn TelemetrySource>,
    model: Arc<dyn RiskModel>,
    controller: Arc<OffloadController>,
    notifier: Arc<dyn Notifier>,
    cycle: CycleRunner,
    extractor: FeatureExtractor,
    tracker: SharedTracker,
    latest: SharedSnapshot,
    health: HealthRegistry,
    logger: StructuredLogger,
    metrics: GuardMetrics,
    config: DriverConfig,
    pending: Vec<PendingOutcome>,
    prev_severity: ThermalSeverity,
    next_prediction_id: u64,
}

impl GuardDriver {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        model: Arc<dyn RiskModel>,
        selector: Arc<CandidateSelector>,
        controller: Arc<OffloadController>,
        notifier: Arc<dyn Notifier>,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: DriverConfig,
    ) -> Self {
        let cycle = CycleRunner::new(
            selector,
            controller.clone(),
            notifier.clone(),
            logger.clone(),
        );
        Self {
            source,
            model,
            controller,
            notifier,
            cycle,
            extractor: FeatureExtractor::new(),
            tracker: Arc::new(Mutex::new(AccuracyTracker::new())),
            latest: Arc::new(RwLock::new(None)),
            health,
            logger,
            metrics: GuardMetrics::new(),
            config,
            pending: Vec::new(),
            prev_severity: ThermalSeverity::Nominal,
            next_prediction_id: 1,
        }
    }

    /// Handle for user-triggered offload cycles.
    pub fn cycle_runner(&self) -> CycleRunner {
        self.cycle.clone()
    }

    /// Handle to the shared accuracy ledger.
    pub fn accuracy_tracker(&self) -> SharedTracker {
        self.tracker.clone()
    }

    /// Handle to the latest telemetry snapshot.
    pub fn latest_snapshot(&self) -> SharedSnapshot {
        self.latest.clone()
    }

    /// Run the pipeline until shutdown is signalled.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            prediction_threshold = self.config.prediction_threshold,
            model_version = self.model.model_version(),
            "Starting guard driver"
        );

        let mut ticker = interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down guard driver");
                    break;
                }
            }
        }
    }

    /// One full pipeline pass. Sampling failure skips the tick; every
    /// other stage degrades rather than aborts.
    async fn tick(&mut self) {
        let sample_start = Instant::now();
        let snapshot = match self.source.sample().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Telemetry sampling failed; skipping tick");
                self.metrics.inc_tick_errors();
                self.health
                    .set_degraded(components::TELEMETRY, e.to_string())
                    .await;
                return;
            }
        };
        self.metrics
            .observe_sampling_latency(sample_start.elapsed().as_secs_f64());
        self.health.set_healthy(components::TELEMETRY).await;

        *self.latest.write().await = Some(snapshot.clone());

        self.resolve_due_outcomes(&snapshot).await;
        self.check_thermal_cleared(&snapshot).await;

        let features = self.extractor.extract(&snapshot);

        let infer_start = Instant::now();
        let estimate = match self.model.score(&features) {
            Ok(e) => e,
            Err(GuardError::ModelNotReady) => {
                debug!("Risk model not ready; retrying next tick");
                self.health
                    .set_degraded(components::PREDICTOR, "model not ready")
                    .await;
                return;
            }
            Err(e) => {
                warn!(error = %e, "Risk scoring failed");
                self.metrics.inc_tick_errors();
                return;
            }
        };
        let inference_latency = infer_start.elapsed();
        self.metrics
            .observe_inference_latency(inference_latency.as_secs_f64());
        self.health.set_healthy(components::PREDICTOR).await;

        let prediction = Prediction {
            id: self.next_prediction_id,
            created_at: snapshot.timestamp,
            probability: estimate.probability,
            severity: estimate.severity,
            confidence: estimate.confidence,
            time_to_event_secs: estimate.time_to_event_secs,
            inference_latency_us: inference_latency.as_micros() as u64,
            features,
        };
        self.next_prediction_id += 1;
        self.metrics.inc_predictions();

        {
            let mut tracker = self.tracker.lock().await;
            tracker.record_prediction(&prediction);
            self.metrics.set_accuracy(tracker.current_accuracy());
        }
        if self.pending.len() >= MAX_PENDING_OUTCOMES {
            self.pending.remove(0);
        }
        self.pending.push(PendingOutcome {
            prediction_id: prediction.id,
            due_at: prediction.created_at + prediction.time_to_event_secs as i64,
        });

        if prediction.severity >= ThermalSeverity::Serious {
            self.notifier.notify_risk(&prediction);
        }

        self.act(&snapshot, &prediction).await;

        self.metrics
            .set_suspended_processes(self.controller.suspended_count().await as i64);
        self.metrics
            .set_reclaimed_bytes(self.controller.total_reclaimed_bytes().await as i64);
    }

    /// Apply the recommended intervention tier.
    async fn act(&self, snapshot: &TelemetrySnapshot, prediction: &Prediction) {
        match prediction.recommended_action() {
            RecommendedAction::OffloadAggressive => {
                let budget = self.controller.remaining_budget().await;
                self.logger.log_prediction(
                    prediction.id,
                    prediction.probability,
                    &prediction.severity.to_string(),
                    prediction.confidence,
                    prediction.inference_latency_us,
                );
                self.cycle.run(snapshot, budget, "aggressive").await;
            }
            RecommendedAction::OffloadConservative => {
                let budget = self.controller.remaining_budget().await;
                if budget > 0 {
                    self.logger.log_prediction(
                        prediction.id,
                        prediction.probability,
                        &prediction.severity.to_string(),
                        prediction.confidence,
                        prediction.inference_latency_us,
                    );
                    // Half the remaining budget, never less than one slot.
                    let limit = (budget / 2).max(1);
                    self.cycle.run(snapshot, limit, "conservative").await;
                }
            }
            RecommendedAction::Monitor => {
                if prediction.probability >= self.config.prediction_threshold {
                    self.notifier.notify_risk(prediction);
                }
            }
            RecommendedAction::None => {}
        }
    }

    /// Attach observed severity to predictions whose horizon has elapsed.
    async fn resolve_due_outcomes(&mut self, snapshot: &TelemetrySnapshot) {
        if self.pending.is_empty() {
            return;
        }
        let now = snapshot.timestamp;
        let due: Vec<u64> = self
            .pending
            .iter()
            .filter(|p| p.due_at <= now)
            .map(|p| p.prediction_id)
            .collect();
        if due.is_empty() {
            return;
        }
        self.pending.retain(|p| p.due_at > now);

        let mut tracker = self.tracker.lock().await;
        for prediction_id in due {
            tracker.record_outcome(prediction_id, snapshot.thermal_severity);
        }
        self.metrics.set_accuracy(tracker.current_accuracy());
    }

    /// Restore suspended processes once severity falls from Serious or
    /// above back to Nominal.
    async fn check_thermal_cleared(&mut self, snapshot: &TelemetrySnapshot) {
        let cleared = self.prev_severity >= ThermalSeverity::Serious
            && snapshot.thermal_severity == ThermalSeverity::Nominal;
        self.prev_severity = snapshot.thermal_severity;
        if !cleared {
            return;
        }

        let results = self.controller.restore_thermal_cleared().await;
        if results.is_empty() {
            return;
        }
        let restored = results.iter().filter(|r| r.success).count();
        let failed = results.len() - restored;
        for _ in 0..restored {
            self.metrics.inc_restores("thermal_cleared");
        }
        if restored > 0 {
            self.notifier.notify_restore_batch(restored);
        }
        self.logger
            .log_restore_cycle("thermal_cleared", restored, failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessCandidate;
    use crate::notify::LogNotifier;
    use crate::offload::fake::RecordingSender;
    use crate::offload::{ControllerConfig, SelectorConfig};
    use crate::predictor::HeuristicModel;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Telemetry source that replays a fixed script, failing once it is
    /// exhausted.
    struct ScriptedSource {
        snapshots: std::sync::Mutex<VecDeque<TelemetrySnapshot>>,
    }

    impl ScriptedSource {
        fn new(snapshots: Vec<TelemetrySnapshot>) -> Self {
            Self {
                snapshots: std::sync::Mutex::new(snapshots.into()),
            }
        }
    }

    #[async_trait]
    impl TelemetrySource for ScriptedSource {
        async fn sample(&self) -> Result<TelemetrySnapshot, GuardError> {
            self.snapshots
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| GuardError::MetricsUnavailable("script exhausted".to_string()))
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        risks: AtomicUsize,
        offload_batches: AtomicUsize,
        restore_batches: AtomicUsize,
    }

    impl Notifier for CountingNotifier {
        fn notify_risk(&self, _prediction: &Prediction) {
            self.risks.fetch_add(1, Ordering::SeqCst);
        }
        fn notify_offload_batch(&self, _count: usize, _bytes_reclaimed: u64) {
            self.offload_batches.fetch_add(1, Ordering::SeqCst);
        }
        fn notify_restore_batch(&self, _count: usize) {
            self.restore_batches.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn candidate(pid: u32) -> ProcessCandidate {
        ProcessCandidate {
            pid,
            name: format!("proc-{}", pid),
            app_id: None,
            memory_bytes: 500 * 1024 * 1024,
            cpu_percent: 1.0,
            idle_secs: 300,
            protected: false,
            exe_path: None,
        }
    }

    fn snapshot(
        timestamp: i64,
        usage: f64,
        pressure: f64,
        severity: ThermalSeverity,
        candidates: Vec<ProcessCandidate>,
    ) -> TelemetrySnapshot {
        TelemetrySnapshot {
            timestamp,
            memory_usage: usage,
            memory_available: 1.0 - usage,
            memory_pressure: pressure,
            thermal_severity: severity,
            candidates,
        }
    }

    fn quiet(timestamp: i64) -> TelemetrySnapshot {
        snapshot(timestamp, 0.3, 0.2, ThermalSeverity::Nominal, Vec::new())
    }

    fn stressed(timestamp: i64, candidates: Vec<ProcessCandidate>) -> TelemetrySnapshot {
        snapshot(timestamp, 0.95, 0.95, ThermalSeverity::Critical, candidates)
    }

    struct Harness {
        driver: GuardDriver,
        model: Arc<HeuristicModel>,
        controller: Arc<OffloadController>,
        notifier: Arc<CountingNotifier>,
        sender: Arc<RecordingSender>,
    }

    fn harness(
        snapshots: Vec<TelemetrySnapshot>,
        max_concurrent: usize,
        prediction_threshold: f64,
        model_ready: bool,
    ) -> Harness {
        let sender = Arc::new(RecordingSender::new());
        let (controller, _events) = OffloadController::new(
            sender.clone(),
            ControllerConfig {
                max_concurrent,
                auto_restore_enabled: true,
            },
        );
        let controller = Arc::new(controller);
        let model = Arc::new(if model_ready {
            HeuristicModel::new()
        } else {
            HeuristicModel::new_unloaded()
        });
        let notifier = Arc::new(CountingNotifier::default());
        let driver = GuardDriver::new(
            Arc::new(ScriptedSource::new(snapshots)),
            model.clone(),
            Arc::new(CandidateSelector::new(SelectorConfig::default())),
            controller.clone(),
            notifier.clone(),
            HealthRegistry::new(),
            StructuredLogger::new("test-host"),
            DriverConfig {
                tick_interval: Duration::from_millis(5),
                prediction_threshold,
            },
        );
        Harness {
            driver,
            model,
            controller,
            notifier,
            sender,
        }
    }

    #[tokio::test]
    async fn test_sampling_failure_skips_tick() {
        let mut h = harness(Vec::new(), 5, 0.7, true);
        h.driver.tick().await;

        assert!(h.driver.tracker.lock().await.is_empty());
        assert_eq!(h.controller.suspended_count().await, 0);
        assert!(h.sender.sent_signals().is_empty());
    }

    #[tokio::test]
    async fn test_quiet_tick_takes_no_action() {
        let mut snap = quiet(1_000);
        snap.candidates = vec![candidate(10)];
        let mut h = harness(vec![snap], 5, 0.7, true);
        h.driver.tick().await;

        assert_eq!(h.driver.tracker.lock().await.len(), 1);
        assert_eq!(h.controller.suspended_count().await, 0);
        assert_eq!(h.notifier.risks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stressed_tick_runs_aggressive_cycle() {
        let candidates = vec![candidate(10), candidate(11), candidate(12)];
        let mut h = harness(vec![stressed(1_000, candidates)], 5, 0.7, true);
        h.driver.tick().await;

        // Aggressive tier spends the whole remaining budget.
        assert_eq!(h.controller.suspended_count().await, 3);
        assert_eq!(h.notifier.offload_batches.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.risks.load(Ordering::SeqCst), 1);

        let latest = h.driver.latest.read().await;
        assert_eq!(latest.as_ref().unwrap().timestamp, 1_000);
    }

    #[tokio::test]
    async fn test_conservative_cycle_uses_half_budget() {
        // Serious but not critical stress lands in the conservative tier.
        let candidates = vec![candidate(10), candidate(11), candidate(12), candidate(13)];
        let snap = snapshot(1_000, 0.85, 0.85, ThermalSeverity::Serious, candidates);
        let mut h = harness(vec![snap], 4, 0.7, true);
        h.driver.tick().await;

        assert_eq!(h.controller.suspended_count().await, 2);
        assert_eq!(h.notifier.risks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_monitor_alert_gated_by_threshold() {
        // usage 0.7, pressure 0.7, elevated thermal: probability ~0.46,
        // Monitor tier, severity below Serious.
        let watch = snapshot(1_000, 0.7, 0.7, ThermalSeverity::Elevated, Vec::new());

        let mut quiet_threshold = harness(vec![watch.clone()], 5, 0.4, true);
        quiet_threshold.driver.tick().await;
        assert_eq!(quiet_threshold.notifier.risks.load(Ordering::SeqCst), 1);
        assert_eq!(quiet_threshold.controller.suspended_count().await, 0);

        let mut high_threshold = harness(vec![watch], 5, 0.7, true);
        high_threshold.driver.tick().await;
        assert_eq!(high_threshold.notifier.risks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_thermal_cleared_restores_suspended() {
        let script = vec![stressed(1_000, vec![candidate(10)]), quiet(1_001)];
        let mut h = harness(script, 5, 0.7, true);

        h.driver.tick().await;
        assert_eq!(h.controller.suspended_count().await, 1);

        h.driver.tick().await;
        assert_eq!(h.controller.suspended_count().await, 0);
        assert_eq!(h.notifier.restore_batches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outcome_resolved_when_horizon_elapses() {
        // Critical prediction at t=1000 carries a 30s horizon; the tick at
        // t=1031 observes Nominal, which the Critical call safely covers.
        let script = vec![stressed(1_000, Vec::new()), quiet(1_031)];
        let mut h = harness(script, 5, 0.7, true);

        h.driver.tick().await;
        h.driver.tick().await;

        let tracker = h.driver.tracker.lock().await;
        assert_eq!(tracker.len(), 2);
        assert_eq!(tracker.current_accuracy(), 1.0);
    }

    #[tokio::test]
    async fn test_outcome_not_resolved_before_horizon() {
        let script = vec![stressed(1_000, Vec::new()), quiet(1_010)];
        let mut h = harness(script, 5, 0.7, true);

        h.driver.tick().await;
        h.driver.tick().await;

        // No ground truth yet: accuracy stays at its empty value.
        let tracker = h.driver.tracker.lock().await;
        assert_eq!(tracker.current_accuracy(), 0.0);
        assert_eq!(h.driver.pending.len(), 2);
    }

    #[tokio::test]
    async fn test_model_not_ready_skips_prediction() {
        let script = vec![
            stressed(1_000, vec![candidate(10)]),
            stressed(1_001, vec![candidate(10)]),
        ];
        let mut h = harness(script, 5, 0.7, false);

        h.driver.tick().await;
        assert!(h.driver.tracker.lock().await.is_empty());
        assert_eq!(h.controller.suspended_count().await, 0);

        h.model.load();
        h.driver.tick().await;
        assert_eq!(h.driver.tracker.lock().await.len(), 1);
        assert_eq!(h.controller.suspended_count().await, 1);
    }

    #[tokio::test]
    async fn test_cycle_runner_respects_limit_and_eligibility() {
        let sender = Arc::new(RecordingSender::new());
        let (controller, _events) =
            OffloadController::new(sender, ControllerConfig::default());
        let runner = CycleRunner::new(
            Arc::new(CandidateSelector::new(SelectorConfig::default())),
            Arc::new(controller),
            Arc::new(LogNotifier::new()),
            StructuredLogger::new("test-host"),
        );

        let mut shielded = candidate(1);
        shielded.protected = true;
        let snap = snapshot(
            1_000,
            0.9,
            0.9,
            ThermalSeverity::Serious,
            vec![shielded, candidate(2), candidate(3), candidate(4)],
        );

        let batch = runner.run(&snap, 2, "user_requested").await;
        assert_eq!(batch.suspended_count, 2);

        let empty = runner.run(&snap, 0, "user_requested").await;
        assert_eq!(empty.suspended_count, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(vec![quiet(1_000), quiet(1_001)], 5, 0.7, true);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let handle = tokio::spawn(h.driver.run(shutdown_rx));
        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("driver should stop promptly")
            .unwrap();
    }
}
