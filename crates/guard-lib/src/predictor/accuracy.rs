//! Prediction accuracy tracking
//!
//! Bounded-history ledger comparing past predictions against the severity
//! observed later, plus an exponential moving average of inference latency.

use crate::models::{Prediction, ThermalSeverity};
use std::collections::VecDeque;
use std::time::Duration;

/// Default bound on the prediction history.
pub const DEFAULT_HISTORY_SIZE: usize = 100;

/// Smoothing factor for the latency moving average.
const LATENCY_EMA_ALPHA: f64 = 0.1;

/// One ledger entry: a prediction and, once ground truth arrives, the
/// observed severity. Entries are ordered by prediction creation time.
#[derive(Debug, Clone)]
struct LedgerEntry {
    prediction_id: u64,
    predicted: ThermalSeverity,
    observed: Option<ThermalSeverity>,
}

/// Bounded FIFO ledger of predictions and observed outcomes.
pub struct AccuracyTracker {
    history: VecDeque<LedgerEntry>,
    max_size: usize,
    latency_ema_us: Option<f64>,
}

impl AccuracyTracker {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_SIZE)
    }

    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_size.min(1024)),
            max_size: max_size.max(1),
            latency_ema_us: None,
        }
    }

    /// Record a new prediction. Evicts the oldest entry when the history
    /// is at its bound. Latency is tracked for every inference regardless
    /// of whether an outcome ever arrives.
    pub fn record_prediction(&mut self, prediction: &Prediction) {
        while self.history.len() >= self.max_size {
            self.history.pop_front();
        }
        self.history.push_back(LedgerEntry {
            prediction_id: prediction.id,
            predicted: prediction.severity,
            observed: None,
        });
        self.record_latency(Duration::from_micros(prediction.inference_latency_us));
    }

    /// Attach an observed outcome to a past prediction. Tolerates unknown
    /// ids (the entry may have been evicted).
    pub fn record_outcome(&mut self, prediction_id: u64, actual: ThermalSeverity) {
        if let Some(entry) = self
            .history
            .iter_mut()
            .find(|e| e.prediction_id == prediction_id)
        {
            entry.observed = Some(actual);
        }
    }

    /// Fold a latency sample into the moving average.
    pub fn record_latency(&mut self, latency: Duration) {
        let sample = latency.as_micros() as f64;
        self.latency_ema_us = Some(match self.latency_ema_us {
            None => sample,
            Some(ema) => ema + LATENCY_EMA_ALPHA * (sample - ema),
        });
    }

    /// Rolling accuracy over entries with an outcome: a prediction counts
    /// as accurate when its tier equals the actual tier or is strictly
    /// more severe (over-prediction is safe, under-prediction is not).
    /// Returns 0 when no outcomes have been recorded.
    pub fn current_accuracy(&self) -> f64 {
        let mut with_outcome = 0usize;
        let mut accurate = 0usize;
        for entry in &self.history {
            if let Some(actual) = entry.observed {
                with_outcome += 1;
                if entry.predicted >= actual {
                    accurate += 1;
                }
            }
        }
        if with_outcome == 0 {
            0.0
        } else {
            accurate as f64 / with_outcome as f64
        }
    }

    /// Smoothed inference latency, if any inference has run.
    pub fn average_latency(&self) -> Option<Duration> {
        self.latency_ema_us
            .map(|us| Duration::from_micros(us.round() as u64))
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

impl Default for AccuracyTracker {
    fn default() -> Self {
        Self::new()
    }
}
