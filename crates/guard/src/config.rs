//! Guard configuration

use anyhow::Result;
use serde::Deserialize;
use std::collections::HashSet;

/// Lower bound on the prediction threshold.
const MIN_PREDICTION_THRESHOLD: f64 = 0.5;

/// Upper bound on the prediction threshold.
const MAX_PREDICTION_THRESHOLD: f64 = 0.95;

/// Guard configuration, loaded from `GUARD_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct GuardConfig {
    /// Host name used in structured log events
    #[serde(default = "default_host_name")]
    pub host_name: String,

    /// API server port for status, health and metrics
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Pipeline tick interval in milliseconds
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Probability threshold for surfacing Monitor-tier predictions,
    /// clamped to [0.5, 0.95]
    #[serde(default = "default_prediction_threshold")]
    pub prediction_threshold: f64,

    /// Maximum simultaneously suspended processes
    #[serde(default = "default_max_concurrent_offloads")]
    pub max_concurrent_offloads: usize,

    /// Minimum memory footprint for offload eligibility, in bytes
    #[serde(default = "default_min_memory_bytes")]
    pub min_memory_bytes: u64,

    /// Minimum continuous idle duration for offload eligibility
    #[serde(default = "default_min_idle_secs")]
    pub min_idle_secs: u64,

    /// Comma-separated identifiers (app id or process name) that are
    /// never offloaded
    #[serde(default)]
    pub excluded_identifiers: String,

    /// Whether thermal-cleared and app-activation triggers restore
    /// automatically
    #[serde(default = "default_auto_restore_enabled")]
    pub auto_restore_enabled: bool,
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_prediction_threshold() -> f64 {
    0.7
}

fn default_max_concurrent_offloads() -> usize {
    5
}

fn default_min_memory_bytes() -> u64 {
    50 * 1024 * 1024
}

fn default_min_idle_secs() -> u64 {
    60
}

fn default_auto_restore_enabled() -> bool {
    true
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            host_name: default_host_name(),
            api_port: default_api_port(),
            tick_interval_ms: default_tick_interval_ms(),
            prediction_threshold: default_prediction_threshold(),
            max_concurrent_offloads: default_max_concurrent_offloads(),
            min_memory_bytes: default_min_memory_bytes(),
            min_idle_secs: default_min_idle_secs(),
            excluded_identifiers: String::new(),
            auto_restore_enabled: default_auto_restore_enabled(),
        }
    }
}

impl GuardConfig {
    /// Load configuration from the environment. Out-of-range threshold
    /// values are clamped rather than rejected.
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("GUARD"))
            .build()?;

        let mut loaded: GuardConfig = config.try_deserialize().unwrap_or_default();
        loaded.prediction_threshold = loaded
            .prediction_threshold
            .clamp(MIN_PREDICTION_THRESHOLD, MAX_PREDICTION_THRESHOLD);
        Ok(loaded)
    }

    /// Parsed exclusion set.
    pub fn excluded_set(&self) -> HashSet<String> {
        self.excluded_identifiers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }
}
