//! Process offload management

mod controller;
mod selector;
mod signal;

pub use controller::{
    BatchOutcome, ControllerConfig, OffloadController, OffloadOutcome, OffloadRejection,
    RestoreResult, DEFAULT_MAX_CONCURRENT,
};
pub use selector::{
    CandidateSelector, SelectorConfig, DEFAULT_ACTIVE_CPU_PERCENT, DEFAULT_MIN_IDLE_SECS,
    DEFAULT_MIN_MEMORY_BYTES,
};
pub use signal::{KillCommandSender, SignalSender};

#[cfg(test)]
pub use signal::fake;
