//! User-facing notification delivery
//!
//! Notifications are one-way, fire-and-forget: a delivery failure must
//! never affect offload or restore correctness. The default implementation
//! logs through tracing and deduplicates repeated risk alerts within a
//! configurable window.

use crate::models::{Prediction, ThermalSeverity};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Default deduplication window for repeated risk alerts (5 minutes).
const DEFAULT_DEDUP_WINDOW_SECS: u64 = 5 * 60;

/// One-way notification sink.
pub trait Notifier: Send + Sync {
    /// Fired when predicted severity reaches Serious or above.
    fn notify_risk(&self, prediction: &Prediction);

    /// Fired after a successful offload batch.
    fn notify_offload_batch(&self, count: usize, bytes_reclaimed: u64);

    /// Fired after a successful restore batch.
    fn notify_restore_batch(&self, count: usize);
}

/// Key for deduplicating repeated risk alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DedupKey {
    severity: ThermalSeverity,
}

/// Notifier that emits structured log events.
pub struct LogNotifier {
    dedup_window: Duration,
    recent_alerts: RwLock<HashMap<DedupKey, Instant>>,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self {
            dedup_window: Duration::from_secs(DEFAULT_DEDUP_WINDOW_SECS),
            recent_alerts: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_dedup_window(mut self, window: Duration) -> Self {
        self.dedup_window = window;
        self
    }

    fn should_suppress(&self, key: DedupKey) -> bool {
        let alerts = self.recent_alerts.read().unwrap();
        alerts
            .get(&key)
            .map(|last| last.elapsed() < self.dedup_window)
            .unwrap_or(false)
    }

    fn record(&self, key: DedupKey) {
        let mut alerts = self.recent_alerts.write().unwrap();
        alerts.insert(key, Instant::now());
        let window = self.dedup_window;
        alerts.retain(|_, time| time.elapsed() < window);
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for LogNotifier {
    fn notify_risk(&self, prediction: &Prediction) {
        let key = DedupKey {
            severity: prediction.severity,
        };
        if self.should_suppress(key) {
            return;
        }
        warn!(
            event = "risk_alert",
            prediction_id = prediction.id,
            severity = %prediction.severity,
            probability = prediction.probability,
            confidence = prediction.confidence,
            time_to_event_secs = prediction.time_to_event_secs,
            "Thermal risk predicted"
        );
        self.record(key);
    }

    fn notify_offload_batch(&self, count: usize, bytes_reclaimed: u64) {
        info!(
            event = "offload_batch",
            count,
            bytes_reclaimed,
            "Suspended background processes"
        );
    }

    fn notify_restore_batch(&self, count: usize) {
        info!(event = "restore_batch", count, "Restored suspended processes");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FeatureVector;

    fn prediction(severity: ThermalSeverity) -> Prediction {
        Prediction {
            id: 1,
            created_at: 0,
            probability: 0.7,
            severity,
            confidence: 0.8,
            time_to_event_secs: 120,
            inference_latency_us: 50,
            features: FeatureVector {
                memory_usage: 0.5,
                memory_pressure: 0.5,
                memory_delta: 0.0,
                pressure_delta: 0.0,
                thermal_severity: 0.5,
                thermal_trend: 0.0,
                candidate_count: 0.0,
                potential_savings: 0.0,
                rolling_mean_memory: 0.5,
                rolling_variance_memory: 0.0,
                time_since_incident: 1.0,
                time_of_day: 0.5,
            },
        }
    }

    #[test]
    fn test_risk_alert_deduplication() {
        let notifier = LogNotifier::new().with_dedup_window(Duration::from_millis(80));
        let p = prediction(ThermalSeverity::Serious);

        assert!(!notifier.should_suppress(DedupKey { severity: p.severity }));
        notifier.notify_risk(&p);
        assert!(notifier.should_suppress(DedupKey { severity: p.severity }));

        // Different severity is not suppressed.
        assert!(!notifier.should_suppress(DedupKey {
            severity: ThermalSeverity::Critical
        }));

        std::thread::sleep(Duration::from_millis(100));
        assert!(!notifier.should_suppress(DedupKey { severity: p.severity }));
    }
}
