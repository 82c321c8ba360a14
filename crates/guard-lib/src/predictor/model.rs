//! Risk scoring
//!
//! The scorer is a fixed, inspectable weighted-linear heuristic behind the
//! [`RiskModel`] trait so a learned model can replace it without touching
//! callers, provided it preserves the output ranges and the recommended-
//! action mapping.

use crate::error::GuardError;
use crate::models::{FeatureVector, RiskEstimate, ThermalSeverity};
use std::sync::RwLock;
use std::time::Instant;
use tracing::{debug, warn};

/// Inference latency target in milliseconds; exceeding it is logged, it
/// informs the driver's 100 ms end-to-end tick contract.
const MAX_INFERENCE_MS: u128 = 10;

/// Rolling memory variance above this counts as volatile and costs one
/// confidence decrement. Memory usage is fractional, so 0.01 variance is
/// roughly a 0.1 standard-deviation swing inside the window.
pub const VOLATILITY_THRESHOLD: f64 = 0.01;

/// Trait for risk scoring implementations.
pub trait RiskModel: Send + Sync {
    /// Score a feature vector into a risk estimate. Pure and
    /// deterministic given the vector.
    fn score(&self, features: &FeatureVector) -> Result<RiskEstimate, GuardError>;

    /// Identifier of the scoring function in use.
    fn model_version(&self) -> &str;
}

/// Weights for the linear scorer, fixed and documented.
#[derive(Debug, Clone, Copy)]
struct Weights {
    pressure: f64,
    thermal: f64,
    memory_delta: f64,
    thermal_trend: f64,
    memory_usage: f64,
    recent_incident: f64,
}

const WEIGHTS: Weights = Weights {
    pressure: 0.30,
    thermal: 0.25,
    memory_delta: 0.15,
    thermal_trend: 0.10,
    memory_usage: 0.15,
    recent_incident: 0.05,
};

/// Weighted-linear heuristic scorer with a readiness gate.
///
/// Scoring before [`HeuristicModel::load`] completes returns
/// [`GuardError::ModelNotReady`]; no partial or stale estimates are ever
/// produced.
pub struct HeuristicModel {
    loaded: RwLock<Option<Weights>>,
    version: &'static str,
}

impl HeuristicModel {
    /// Create an unloaded model; callers must [`load`](Self::load) it
    /// before scoring.
    pub fn new_unloaded() -> Self {
        Self {
            loaded: RwLock::new(None),
            version: "heuristic-v1",
        }
    }

    /// Create a model that is ready to score.
    pub fn new() -> Self {
        Self {
            loaded: RwLock::new(Some(WEIGHTS)),
            version: "heuristic-v1",
        }
    }

    /// Mark the model ready. Idempotent.
    pub fn load(&self) {
        let mut guard = self
            .loaded
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            *guard = Some(WEIGHTS);
            debug!(version = self.version, "Risk model loaded");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn probability(w: &Weights, f: &FeatureVector) -> f64 {
        let recent_incident = if f.time_since_incident < 0.1 { 1.0 } else { 0.0 };
        let raw = w.pressure * f.memory_pressure
            + w.thermal * f.thermal_severity
            + w.memory_delta * f.memory_delta.max(0.0)
            + w.thermal_trend * f.thermal_trend.max(0.0)
            + w.memory_usage * f.memory_usage
            + w.recent_incident * recent_incident;
        raw.clamp(0.0, 1.0)
    }

    /// Severity tier thresholds on probability, ties toward the higher
    /// tier. No hysteresis at this layer.
    fn severity(probability: f64) -> ThermalSeverity {
        if probability >= 0.8 {
            ThermalSeverity::Critical
        } else if probability >= 0.6 {
            ThermalSeverity::Serious
        } else if probability >= 0.3 {
            ThermalSeverity::Elevated
        } else {
            ThermalSeverity::Nominal
        }
    }

    /// Confidence starts at 0.8, loses 0.1 for memory volatility and a
    /// further 0.1 when the thermal and memory signals disagree, floored
    /// at 0.5.
    fn confidence(f: &FeatureVector) -> f64 {
        let mut confidence: f64 = 0.8;
        if f.rolling_variance_memory > VOLATILITY_THRESHOLD {
            confidence -= 0.1;
        }
        if f.thermal_severity >= 0.5 && f.memory_pressure < 0.3 {
            confidence -= 0.1;
        }
        confidence.max(0.5)
    }

    /// Coarse step function of probability; an estimate, not a guarantee.
    fn time_to_event(probability: f64) -> u64 {
        if probability >= 0.8 {
            30
        } else if probability >= 0.6 {
            120
        } else if probability >= 0.3 {
            300
        } else {
            600
        }
    }
}

impl Default for HeuristicModel {
    fn default() -> Self {
        Self::new()
    }
}

impl RiskModel for HeuristicModel {
    fn score(&self, features: &FeatureVector) -> Result<RiskEstimate, GuardError> {
        let start = Instant::now();

        let guard = self
            .loaded
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let weights = guard.as_ref().ok_or(GuardError::ModelNotReady)?;

        let probability = Self::probability(weights, features);
        let estimate = RiskEstimate {
            probability,
            severity: Self::severity(probability),
            confidence: Self::confidence(features),
            time_to_event_secs: Self::time_to_event(probability),
        };

        let elapsed = start.elapsed();
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        }

        Ok(estimate)
    }

    fn model_version(&self) -> &str {
        self.version
    }
}
