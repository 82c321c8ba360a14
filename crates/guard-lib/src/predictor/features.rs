//! Feature extraction for risk scoring
//!
//! Turns a sequence of telemetry snapshots into a fixed-arity normalized
//! feature vector, tracking rolling memory statistics and the time since
//! the last high-severity incident across calls.

use crate::models::{FeatureVector, TelemetrySnapshot, ThermalSeverity};
use chrono::{TimeZone, Timelike, Utc};
use std::collections::VecDeque;

/// Ring buffer length for rolling memory statistics (~5s at a 10 Hz
/// call rate).
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// Ceiling on the time-since-incident feature (24 hours).
const INCIDENT_CEILING_SECS: i64 = 24 * 60 * 60;

/// Ceiling used to normalize the candidate-count feature.
const MAX_CANDIDATES: f64 = 20.0;

/// Neutral baseline for deltas on the first call.
const NEUTRAL_BASELINE: f64 = 0.5;

/// Extracts features from telemetry snapshots.
///
/// Order-sensitive: every call mutates history, so an instance must be
/// owned by a single execution context.
pub struct FeatureExtractor {
    window: VecDeque<f64>,
    window_size: usize,
    max_memory_bytes: u64,
    prev_usage: f64,
    prev_pressure: f64,
    prev_thermal: f64,
    last_incident_at: Option<i64>,
}

impl FeatureExtractor {
    pub fn new() -> Self {
        Self::with_bounds(DEFAULT_WINDOW_SIZE, 16 * 1024 * 1024 * 1024)
    }

    pub fn with_bounds(window_size: usize, max_memory_bytes: u64) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size),
            window_size: window_size.max(1),
            max_memory_bytes: max_memory_bytes.max(1),
            prev_usage: NEUTRAL_BASELINE,
            prev_pressure: NEUTRAL_BASELINE,
            prev_thermal: ThermalSeverity::Nominal.normalized(),
            last_incident_at: None,
        }
    }

    /// Extract a feature vector from the current snapshot.
    ///
    /// Never fails; missing data degrades to baseline values (an empty
    /// candidate list yields zero potential savings). The rolling window
    /// is updated on every call, independent of whether a prediction is
    /// later requested.
    pub fn extract(&mut self, snapshot: &TelemetrySnapshot) -> FeatureVector {
        let usage = snapshot.memory_usage.clamp(0.0, 1.0);
        let pressure = snapshot.memory_pressure.clamp(0.0, 1.0);
        let thermal = snapshot.thermal_severity.normalized();

        self.push_sample(usage);
        let (mean, variance) = self.rolling_stats();

        // Severity >= Serious resets the incident clock to now.
        if snapshot.thermal_severity >= ThermalSeverity::Serious {
            self.last_incident_at = Some(snapshot.timestamp);
        }

        let vector = FeatureVector {
            memory_usage: usage,
            memory_pressure: pressure,
            memory_delta: (usage - self.prev_usage).clamp(-1.0, 1.0),
            pressure_delta: (pressure - self.prev_pressure).clamp(-1.0, 1.0),
            thermal_severity: thermal,
            thermal_trend: (thermal - self.prev_thermal).clamp(-1.0, 1.0),
            candidate_count: (snapshot.candidates.len() as f64 / MAX_CANDIDATES)
                .clamp(0.0, 1.0),
            potential_savings: self.normalize_savings(&snapshot.candidates),
            rolling_mean_memory: mean,
            rolling_variance_memory: variance,
            time_since_incident: self.time_since_incident(snapshot.timestamp),
            time_of_day: extract_hour(snapshot.timestamp),
        };

        self.prev_usage = usage;
        self.prev_pressure = pressure;
        self.prev_thermal = thermal;

        vector
    }

    fn push_sample(&mut self, usage: f64) {
        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back(usage);
    }

    /// Mean and sample variance over the ring buffer, computed after the
    /// current sample has been inserted.
    fn rolling_stats(&self) -> (f64, f64) {
        let n = self.window.len();
        if n == 0 {
            return (NEUTRAL_BASELINE, 0.0);
        }
        let mean = self.window.iter().sum::<f64>() / n as f64;
        if n < 2 {
            return (mean, 0.0);
        }
        let variance = self
            .window
            .iter()
            .map(|v| (v - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64;
        (mean, variance)
    }

    fn normalize_savings(&self, candidates: &[crate::models::ProcessCandidate]) -> f64 {
        let total: u64 = candidates.iter().map(|c| c.memory_bytes).sum();
        (total as f64 / self.max_memory_bytes as f64).clamp(0.0, 1.0)
    }

    /// Seconds since the last severity >= Serious observation, capped at
    /// 24 hours and normalized by that ceiling. Saturates at 1.0 when no
    /// incident has been seen yet.
    fn time_since_incident(&self, now: i64) -> f64 {
        match self.last_incident_at {
            None => 1.0,
            Some(at) => {
                let elapsed = (now - at).clamp(0, INCIDENT_CEILING_SECS);
                elapsed as f64 / INCIDENT_CEILING_SECS as f64
            }
        }
    }
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn extract_hour(timestamp: i64) -> f64 {
    let dt = Utc
        .timestamp_opt(timestamp, 0)
        .single()
        .unwrap_or_else(Utc::now);
    f64::from(dt.hour()) / 24.0
}
