//! Core data models for the thermal guard

use serde::{Deserialize, Serialize};

/// Version of the feature vector layout. Bump when the arity or the
/// meaning of a component changes.
pub const FEATURE_VECTOR_VERSION: u32 = 1;

/// Number of components in a [`FeatureVector`].
pub const FEATURE_VECTOR_ARITY: usize = 12;

/// Ordered thermal stress level of the machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ThermalSeverity {
    Nominal,
    Elevated,
    Serious,
    Critical,
}

impl ThermalSeverity {
    /// Position in the ordered scale, 0 through 3.
    pub fn as_index(self) -> usize {
        match self {
            ThermalSeverity::Nominal => 0,
            ThermalSeverity::Elevated => 1,
            ThermalSeverity::Serious => 2,
            ThermalSeverity::Critical => 3,
        }
    }

    /// Severity mapped onto [0, 1] for feature extraction.
    pub fn normalized(self) -> f64 {
        self.as_index() as f64 / 3.0
    }
}

impl std::fmt::Display for ThermalSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThermalSeverity::Nominal => write!(f, "nominal"),
            ThermalSeverity::Elevated => write!(f, "elevated"),
            ThermalSeverity::Serious => write!(f, "serious"),
            ThermalSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// A process eligible for consideration by the candidate selector.
///
/// Recomputed on every sampling tick and never persisted directly.
/// `idle_secs` is a CPU-usage heuristic, not user-interaction tracking;
/// it stays behind this boundary so a better idle signal can replace it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessCandidate {
    pub pid: u32,
    pub name: String,
    /// Stable application identifier when one is known.
    pub app_id: Option<String>,
    /// Resident memory footprint in bytes.
    pub memory_bytes: u64,
    /// Recent CPU utilization in percent.
    pub cpu_percent: f64,
    /// Estimated continuous idle duration in seconds.
    pub idle_secs: u64,
    /// Set by the static denylist policy; protected processes are never
    /// suspended.
    pub protected: bool,
    pub exe_path: Option<String>,
}

/// Immutable telemetry bundle produced once per sampling tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Unix timestamp (seconds) of the sample.
    pub timestamp: i64,
    /// Fraction of physical memory in use, 0-1.
    pub memory_usage: f64,
    /// Fraction of physical memory available, 0-1.
    pub memory_available: f64,
    /// Memory pressure, 0-1.
    pub memory_pressure: f64,
    pub thermal_severity: ThermalSeverity,
    /// Ordered list of offload candidates observed this tick.
    pub candidates: Vec<ProcessCandidate>,
}

/// Fixed-arity normalized feature vector for risk scoring.
///
/// Unsigned components lie in [0, 1]; `memory_delta`, `pressure_delta`
/// and `thermal_trend` are signed and lie in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub memory_usage: f64,
    pub memory_pressure: f64,
    pub memory_delta: f64,
    pub pressure_delta: f64,
    pub thermal_severity: f64,
    pub thermal_trend: f64,
    pub candidate_count: f64,
    pub potential_savings: f64,
    pub rolling_mean_memory: f64,
    pub rolling_variance_memory: f64,
    pub time_since_incident: f64,
    pub time_of_day: f64,
}

/// Intervention tier recommended for a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    None,
    Monitor,
    OffloadConservative,
    OffloadAggressive,
}

/// Core fields produced by a risk model for one feature vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEstimate {
    /// Estimated likelihood that thermal severity will increase, 0-1.
    pub probability: f64,
    pub severity: ThermalSeverity,
    /// Model confidence, 0.5-1.0. The model never asserts below-chance
    /// confidence.
    pub confidence: f64,
    /// Coarse estimate of seconds until escalation, not a guarantee.
    pub time_to_event_secs: u64,
}

/// A risk prediction, created once per inference call.
///
/// Later paired (never mutated) with an observed outcome when the
/// accuracy tracker records ground truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: u64,
    /// Unix timestamp (seconds) of creation.
    pub created_at: i64,
    pub probability: f64,
    pub severity: ThermalSeverity,
    pub confidence: f64,
    pub time_to_event_secs: u64,
    /// Measured inference latency in microseconds.
    pub inference_latency_us: u64,
    pub features: FeatureVector,
}

impl Prediction {
    /// Derive the recommended intervention from probability and confidence.
    ///
    /// Downstream action selection depends on this exact mapping.
    pub fn recommended_action(&self) -> RecommendedAction {
        derive_action(self.probability, self.confidence)
    }
}

/// Deterministic (probability, confidence) -> action mapping.
pub fn derive_action(probability: f64, confidence: f64) -> RecommendedAction {
    if probability >= 0.8 && confidence >= 0.7 {
        RecommendedAction::OffloadAggressive
    } else if probability >= 0.6 && confidence >= 0.6 {
        RecommendedAction::OffloadConservative
    } else if probability >= 0.4 {
        RecommendedAction::Monitor
    } else {
        RecommendedAction::None
    }
}

/// Status of an offloaded process. `Suspended` is the only live state;
/// the rest are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffloadStatus {
    Suspended,
    Restored,
    Terminated,
    Failed,
}

/// Why a suspended process was restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorationReason {
    UserRequested,
    AppActivated,
    ThermalCleared,
    Shutdown,
}

/// Record of one suspension, owned by the offload controller while live.
///
/// Handed off as an immutable copy to the persistence collaborator on
/// every status transition. A pid maps to at most one live record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffloadRecord {
    pub id: u64,
    pub pid: u32,
    pub name: String,
    pub app_id: Option<String>,
    /// Footprint at the time of suspension, in bytes.
    pub memory_bytes: u64,
    pub cpu_percent: f64,
    pub idle_secs: u64,
    pub exe_path: Option<String>,
    /// Unix timestamp (seconds) of suspension.
    pub suspended_at: i64,
    pub restored_at: Option<i64>,
    pub status: OffloadStatus,
    pub reason: Option<RestorationReason>,
    pub error: Option<String>,
}

/// Kind of lifecycle transition carried by a [`LifecycleEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Suspended,
    Restored,
    Terminated,
    Failed,
}

/// Append-only lifecycle event emitted to the persistence collaborator
/// on every offload-record status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub record: OffloadRecord,
    pub transition: TransitionKind,
    /// Unix timestamp (seconds) of the transition.
    pub timestamp: i64,
}
