//! Error taxonomy for the guard core
//!
//! Per-operation outcomes (suspending or restoring a single process) are
//! carried inside result values and never raised past the caller; these
//! errors cover the conditions that make a whole operation or component
//! unusable.

use thiserror::Error;

/// Errors surfaced by the prediction and offload core.
#[derive(Debug, Error)]
pub enum GuardError {
    /// The risk model was invoked before it finished loading. Recoverable
    /// by retrying after load; the driver logs and retries the next tick.
    #[error("risk model not ready")]
    ModelNotReady,

    /// The target process vanished. Informational, triggers record cleanup.
    #[error("process {0} not found")]
    ProcessNotFound(u32),

    /// The OS rejected a signal send.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Attempted to suspend a protected or otherwise unsafe process.
    /// Rejected before any OS call is made.
    #[error("safety violation: refusing to suspend {0}")]
    SafetyViolation(String),

    /// The concurrent-suspension budget is exhausted. Rejected before any
    /// OS call is made.
    #[error("capacity exceeded: {limit} processes already suspended")]
    CapacityExceeded { limit: usize },

    /// Telemetry snapshot collection failed; the tick's prediction is
    /// skipped, never crashing the loop.
    #[error("metrics unavailable: {0}")]
    MetricsUnavailable(String),
}
