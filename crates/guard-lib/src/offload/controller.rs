//! Offload control
//!
//! Owns the set of currently-suspended processes, executes suspend/resume
//! operations through the [`SignalSender`] capability, enforces the
//! concurrency budget, and drives automatic restoration. All per-operation
//! failures are carried in result values; batch operations never abort on
//! a single item.

use super::signal::SignalSender;
use crate::models::{
    LifecycleEvent, OffloadRecord, OffloadStatus, ProcessCandidate, RestorationReason,
    TransitionKind,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

/// Default cap on simultaneously suspended processes.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Buffer size of the lifecycle event channel.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Configuration for the offload controller.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Concurrency budget: maximum live suspensions at once.
    pub max_concurrent: usize,
    /// Whether automatic restoration triggers are honored.
    pub auto_restore_enabled: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            auto_restore_enabled: true,
        }
    }
}

/// Why an offload attempt was rejected before any OS call was made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OffloadRejection {
    /// Candidate failed the safe-to-suspend predicate.
    SafetyViolation,
    /// The pid already has a live record.
    AlreadySuspended,
    /// The concurrency budget is exhausted.
    CapacityExceeded,
}

impl OffloadRejection {
    /// Stable label for metrics and API responses.
    pub fn as_label(&self) -> &'static str {
        match self {
            OffloadRejection::SafetyViolation => "safety_violation",
            OffloadRejection::AlreadySuspended => "already_suspended",
            OffloadRejection::CapacityExceeded => "capacity_exceeded",
        }
    }
}

/// Outcome of one offload attempt.
#[derive(Debug, Clone)]
pub enum OffloadOutcome {
    /// Stop signal delivered, record is live. `bytes_reclaimed` is the
    /// candidate's reported footprint, an estimate rather than a measured
    /// delta.
    Suspended {
        record: OffloadRecord,
        bytes_reclaimed: u64,
    },
    /// Rejected before any OS-level side effect.
    Rejected {
        pid: u32,
        rejection: OffloadRejection,
    },
    /// The stop signal itself failed; no live record is retained.
    Failed { pid: u32, error: String },
}

impl OffloadOutcome {
    pub fn is_suspended(&self) -> bool {
        matches!(self, OffloadOutcome::Suspended { .. })
    }
}

/// Aggregated result of a batch offload.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub outcomes: Vec<OffloadOutcome>,
    pub suspended_count: usize,
    pub bytes_reclaimed: u64,
}

/// Outcome of one restore attempt on a live record.
#[derive(Debug, Clone)]
pub struct RestoreResult {
    pub pid: u32,
    pub success: bool,
    pub status: OffloadStatus,
    /// Footprint returned to use, per the record. Zero when the process
    /// had already exited or the resume failed.
    pub memory_restored: u64,
    /// The process exited while suspended; informational, not a failure.
    pub terminated_while_suspended: bool,
    pub latency: Duration,
    pub error: Option<String>,
}

/// Owns suspend/resume state for all offloaded processes.
///
/// The live-record map is guarded by a single mutex held across the
/// budget check, the map mutation, and the signal send, so the budget can
/// never be exceeded by concurrent offload calls and operations on the
/// same pid are strictly ordered.
pub struct OffloadController {
    live: Mutex<HashMap<u32, OffloadRecord>>,
    signals: Arc<dyn SignalSender>,
    events_tx: mpsc::Sender<LifecycleEvent>,
    config: ControllerConfig,
    auto_restore: AtomicBool,
    next_record_id: AtomicU64,
}

impl OffloadController {
    /// Create a controller and the receiving end of its lifecycle event
    /// channel. The consumer owns durable storage; this core never reads
    /// its own history back.
    pub fn new(
        signals: Arc<dyn SignalSender>,
        config: ControllerConfig,
    ) -> (Self, mpsc::Receiver<LifecycleEvent>) {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let auto_restore = config.auto_restore_enabled;
        let controller = Self {
            live: Mutex::new(HashMap::new()),
            signals,
            events_tx,
            config,
            auto_restore: AtomicBool::new(auto_restore),
            next_record_id: AtomicU64::new(1),
        };
        (controller, events_rx)
    }

    /// Attempt to suspend one candidate.
    pub async fn offload(&self, candidate: &ProcessCandidate) -> OffloadOutcome {
        if candidate.protected {
            debug!(pid = candidate.pid, name = %candidate.name, "Rejected: protected process");
            return OffloadOutcome::Rejected {
                pid: candidate.pid,
                rejection: OffloadRejection::SafetyViolation,
            };
        }

        let mut live = self.live.lock().await;

        if live.contains_key(&candidate.pid) {
            return OffloadOutcome::Rejected {
                pid: candidate.pid,
                rejection: OffloadRejection::AlreadySuspended,
            };
        }
        if live.len() >= self.config.max_concurrent {
            debug!(
                pid = candidate.pid,
                limit = self.config.max_concurrent,
                "Rejected: concurrency budget exhausted"
            );
            return OffloadOutcome::Rejected {
                pid: candidate.pid,
                rejection: OffloadRejection::CapacityExceeded,
            };
        }

        let mut record = self.record_for(candidate);

        // The lock stays held across the signal send: budget check, map
        // insertion and the OS call are one atomic step.
        if let Err(e) = self.signals.suspend(candidate.pid).await {
            let error = e.to_string();
            record.status = OffloadStatus::Failed;
            record.error = Some(error.clone());
            drop(live);
            self.emit(&record, TransitionKind::Failed);
            warn!(pid = candidate.pid, error = %error, "Suspend signal failed");
            return OffloadOutcome::Failed {
                pid: candidate.pid,
                error,
            };
        }

        live.insert(candidate.pid, record.clone());
        drop(live);

        self.emit(&record, TransitionKind::Suspended);
        info!(
            pid = candidate.pid,
            name = %candidate.name,
            memory_bytes = candidate.memory_bytes,
            "Process suspended"
        );
        OffloadOutcome::Suspended {
            bytes_reclaimed: candidate.memory_bytes,
            record,
        }
    }

    /// Sequentially attempt to suspend each candidate, short-circuiting
    /// once the concurrency budget is reached.
    pub async fn offload_batch(&self, candidates: &[ProcessCandidate]) -> BatchOutcome {
        let mut batch = BatchOutcome::default();
        for candidate in candidates {
            let outcome = self.offload(candidate).await;
            let at_capacity = matches!(
                outcome,
                OffloadOutcome::Rejected {
                    rejection: OffloadRejection::CapacityExceeded,
                    ..
                }
            );
            if let OffloadOutcome::Suspended {
                bytes_reclaimed, ..
            } = &outcome
            {
                batch.suspended_count += 1;
                batch.bytes_reclaimed += bytes_reclaimed;
            }
            batch.outcomes.push(outcome);
            if at_capacity {
                break;
            }
        }
        batch
    }

    /// Restore one suspended process. Returns `None` when the pid has no
    /// live record: restoring an unknown pid is tolerated, not an error.
    pub async fn restore(&self, pid: u32, reason: RestorationReason) -> Option<RestoreResult> {
        let start = Instant::now();
        let mut live = self.live.lock().await;
        let mut record = live.get(&pid).cloned()?;

        // Process gone while suspended: expected, non-fatal, cleanup only.
        if !self.signals.exists(pid).await {
            live.remove(&pid);
            drop(live);
            record.status = OffloadStatus::Terminated;
            record.restored_at = Some(now_ts());
            record.reason = Some(reason);
            self.emit(&record, TransitionKind::Terminated);
            info!(pid, "Process terminated while suspended; record cleaned up");
            return Some(RestoreResult {
                pid,
                success: true,
                status: OffloadStatus::Terminated,
                memory_restored: 0,
                terminated_while_suspended: true,
                latency: start.elapsed(),
                error: None,
            });
        }

        match self.signals.resume(pid).await {
            Ok(()) => {
                live.remove(&pid);
                drop(live);
                record.status = OffloadStatus::Restored;
                record.restored_at = Some(now_ts());
                record.reason = Some(reason);
                self.emit(&record, TransitionKind::Restored);
                let latency = start.elapsed();
                info!(
                    pid,
                    reason = ?reason,
                    latency_ms = latency.as_millis(),
                    "Process restored"
                );
                Some(RestoreResult {
                    pid,
                    success: true,
                    status: OffloadStatus::Restored,
                    memory_restored: record.memory_bytes,
                    terminated_while_suspended: false,
                    latency,
                    error: None,
                })
            }
            Err(e) => {
                live.remove(&pid);
                drop(live);
                let error = e.to_string();
                record.status = OffloadStatus::Failed;
                record.restored_at = Some(now_ts());
                record.reason = Some(reason);
                record.error = Some(error.clone());
                self.emit(&record, TransitionKind::Failed);
                warn!(pid, error = %error, "Resume signal failed");
                Some(RestoreResult {
                    pid,
                    success: false,
                    status: OffloadStatus::Failed,
                    memory_restored: 0,
                    terminated_while_suspended: false,
                    latency: start.elapsed(),
                    error: Some(error),
                })
            }
        }
    }

    /// Restore every live record, best-effort: partial failures do not
    /// block the remaining restorations.
    pub async fn restore_all(&self, reason: RestorationReason) -> Vec<RestoreResult> {
        let pids = self.pids_oldest_first().await;
        let mut results = Vec::with_capacity(pids.len());
        for pid in pids {
            if let Some(result) = self.restore(pid, reason).await {
                results.push(result);
            }
        }
        results
    }

    /// Thermal-cleared trigger: restore all live records longest-suspended
    /// first (most recently suspended last). Honors the auto-restore flag.
    pub async fn restore_thermal_cleared(&self) -> Vec<RestoreResult> {
        if !self.auto_restore_enabled() {
            debug!("Auto-restore disabled; skipping thermal-cleared restoration");
            return Vec::new();
        }
        info!("Thermal stress cleared; restoring suspended processes");
        self.restore_all(RestorationReason::ThermalCleared).await
    }

    /// User-activation trigger: restore the live record whose application
    /// identifier matches, if any. Tolerant of no match.
    pub async fn restore_for_app(&self, app_id: &str) -> Option<RestoreResult> {
        if !self.auto_restore_enabled() {
            return None;
        }
        let pid = {
            let live = self.live.lock().await;
            live.values()
                .find(|r| r.app_id.as_deref() == Some(app_id))
                .map(|r| r.pid)
        }?;
        self.restore(pid, RestorationReason::AppActivated).await
    }

    /// Shutdown hook: unconditionally restore all live records. Failures
    /// are reported but never block process exit.
    pub async fn shutdown(&self) -> Vec<RestoreResult> {
        let results = self.restore_all(RestorationReason::Shutdown).await;
        let failures: Vec<u32> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.pid)
            .collect();
        if !failures.is_empty() {
            warn!(pids = ?failures, "Some processes failed to restore during shutdown");
        }
        results
    }

    pub fn set_auto_restore_enabled(&self, enabled: bool) {
        self.auto_restore.store(enabled, Ordering::SeqCst);
        info!(enabled, "Auto-restore toggled");
    }

    pub fn auto_restore_enabled(&self) -> bool {
        self.auto_restore.load(Ordering::SeqCst)
    }

    /// Number of live (suspended) records.
    pub async fn suspended_count(&self) -> usize {
        self.live.lock().await.len()
    }

    /// Offload slots still available under the concurrency budget.
    pub async fn remaining_budget(&self) -> usize {
        self.config
            .max_concurrent
            .saturating_sub(self.live.lock().await.len())
    }

    /// Sum of recorded footprints over live records.
    pub async fn total_reclaimed_bytes(&self) -> u64 {
        self.live
            .lock()
            .await
            .values()
            .map(|r| r.memory_bytes)
            .sum()
    }

    /// Immutable snapshot of the live records.
    pub async fn live_records(&self) -> Vec<OffloadRecord> {
        let mut records: Vec<OffloadRecord> = self.live.lock().await.values().cloned().collect();
        records.sort_by_key(|r| (r.suspended_at, r.id));
        records
    }

    async fn pids_oldest_first(&self) -> Vec<u32> {
        let live = self.live.lock().await;
        let mut entries: Vec<(i64, u64, u32)> = live
            .values()
            .map(|r| (r.suspended_at, r.id, r.pid))
            .collect();
        entries.sort();
        entries.into_iter().map(|(_, _, pid)| pid).collect()
    }

    fn record_for(&self, candidate: &ProcessCandidate) -> OffloadRecord {
        OffloadRecord {
            id: self.next_record_id.fetch_add(1, Ordering::SeqCst),
            pid: candidate.pid,
            name: candidate.name.clone(),
            app_id: candidate.app_id.clone(),
            memory_bytes: candidate.memory_bytes,
            cpu_percent: candidate.cpu_percent,
            idle_secs: candidate.idle_secs,
            exe_path: candidate.exe_path.clone(),
            suspended_at: now_ts(),
            restored_at: None,
            status: OffloadStatus::Suspended,
            reason: None,
            error: None,
        }
    }

    /// Hand off an immutable record copy to the persistence collaborator.
    /// Non-blocking: a full channel is logged, never propagated.
    fn emit(&self, record: &OffloadRecord, transition: TransitionKind) {
        let event = LifecycleEvent {
            record: record.clone(),
            transition,
            timestamp: now_ts(),
        };
        if let Err(e) = self.events_tx.try_send(event) {
            warn!(error = %e, "Lifecycle event channel full, dropping event");
        }
    }
}

fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
