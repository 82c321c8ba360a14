//! Telemetry snapshot collection
//!
//! The guard core consumes immutable [`TelemetrySnapshot`]s through the
//! [`TelemetrySource`] capability; the production implementation reads
//! `/proc` and the thermal sysfs directly. Tests script their own sources.

use crate::error::GuardError;
use crate::models::{ProcessCandidate, TelemetrySnapshot, ThermalSeverity};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::debug;

/// Scheduler tick rate assumed for CPU accounting (USER_HZ). Fixed at 100
/// on every mainstream Linux build.
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// CPU utilization above this marks a process as active for the idle
/// heuristic.
const IDLE_CPU_PERCENT: f64 = 1.0;

/// Millidegree thresholds mapping the hottest thermal zone to a severity
/// tier.
const THERMAL_ELEVATED_MC: i64 = 70_000;
const THERMAL_SERIOUS_MC: i64 = 85_000;
const THERMAL_CRITICAL_MC: i64 = 95_000;

/// Process names that are never offload candidates.
const PROTECTED_NAMES: &[&str] = &[
    "systemd", "init", "kthreadd", "dbus-daemon", "sshd", "login", "Xorg", "Xwayland",
    "gnome-shell", "kwin_wayland", "pipewire", "pulseaudio",
];

/// Capability producing telemetry snapshots on demand.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Produce one immutable snapshot. Failure maps to
    /// [`GuardError::MetricsUnavailable`] and skips the caller's tick.
    async fn sample(&self) -> Result<TelemetrySnapshot, GuardError>;
}

#[derive(Clone, Copy)]
struct CpuSample {
    total_ticks: u64,
    taken_at: Instant,
}

#[derive(Clone, Copy)]
struct ActivityState {
    cpu: CpuSample,
    last_active: Instant,
}

/// `/proc` + sysfs telemetry source.
///
/// CPU utilization per pid is derived from utime+stime tick deltas between
/// consecutive samples; idle duration is the time since the process last
/// exceeded a small CPU threshold. Both heuristics stay behind the
/// [`ProcessCandidate`] boundary.
pub struct ProcSource {
    proc_root: std::path::PathBuf,
    thermal_root: std::path::PathBuf,
    activity: Mutex<HashMap<u32, ActivityState>>,
    own_pid: u32,
}

impl ProcSource {
    pub fn new() -> Self {
        Self::with_roots("/proc", "/sys/class/thermal")
    }

    pub fn with_roots(
        proc_root: impl Into<std::path::PathBuf>,
        thermal_root: impl Into<std::path::PathBuf>,
    ) -> Self {
        Self {
            proc_root: proc_root.into(),
            thermal_root: thermal_root.into(),
            activity: Mutex::new(HashMap::new()),
            own_pid: std::process::id(),
        }
    }

    async fn memory_fractions(&self) -> Result<(f64, f64), GuardError> {
        let meminfo = tokio::fs::read_to_string(self.proc_root.join("meminfo"))
            .await
            .map_err(|e| GuardError::MetricsUnavailable(format!("meminfo: {}", e)))?;

        let mut total_kb = 0u64;
        let mut available_kb = 0u64;
        for line in meminfo.lines() {
            if let Some(rest) = line.strip_prefix("MemTotal:") {
                total_kb = parse_kb(rest);
            } else if let Some(rest) = line.strip_prefix("MemAvailable:") {
                available_kb = parse_kb(rest);
            }
        }
        if total_kb == 0 {
            return Err(GuardError::MetricsUnavailable(
                "meminfo missing MemTotal".to_string(),
            ));
        }
        let available = available_kb as f64 / total_kb as f64;
        Ok(((1.0 - available).clamp(0.0, 1.0), available.clamp(0.0, 1.0)))
    }

    /// Memory pressure from the PSI `some avg10` figure, 0 when PSI is
    /// not exposed.
    async fn memory_pressure(&self) -> f64 {
        let path = self.proc_root.join("pressure/memory");
        let Ok(psi) = tokio::fs::read_to_string(&path).await else {
            return 0.0;
        };
        for line in psi.lines() {
            if let Some(rest) = line.strip_prefix("some") {
                for field in rest.split_whitespace() {
                    if let Some(value) = field.strip_prefix("avg10=") {
                        return value
                            .parse::<f64>()
                            .map(|v| (v / 100.0).clamp(0.0, 1.0))
                            .unwrap_or(0.0);
                    }
                }
            }
        }
        0.0
    }

    /// Hottest thermal zone mapped onto the severity scale. Nominal when
    /// no zones are readable.
    async fn thermal_severity(&self) -> ThermalSeverity {
        let mut hottest: Option<i64> = None;
        if let Ok(mut entries) = tokio::fs::read_dir(&self.thermal_root).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let name = entry.file_name();
                let Some(name) = name.to_str() else { continue };
                if !name.starts_with("thermal_zone") {
                    continue;
                }
                if let Ok(raw) = tokio::fs::read_to_string(entry.path().join("temp")).await {
                    if let Ok(mc) = raw.trim().parse::<i64>() {
                        hottest = Some(hottest.map_or(mc, |h| h.max(mc)));
                    }
                }
            }
        }
        match hottest {
            None => ThermalSeverity::Nominal,
            Some(mc) if mc >= THERMAL_CRITICAL_MC => ThermalSeverity::Critical,
            Some(mc) if mc >= THERMAL_SERIOUS_MC => ThermalSeverity::Serious,
            Some(mc) if mc >= THERMAL_ELEVATED_MC => ThermalSeverity::Elevated,
            Some(_) => ThermalSeverity::Nominal,
        }
    }

    async fn candidates(&self) -> Vec<ProcessCandidate> {
        let mut candidates = Vec::new();
        let mut seen = Vec::new();
        let Ok(mut entries) = tokio::fs::read_dir(&self.proc_root).await else {
            return candidates;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.parse::<u32>().ok())
            else {
                continue;
            };
            seen.push(pid);
            if let Some(candidate) = self.read_candidate(pid).await {
                candidates.push(candidate);
            }
        }
        // Drop activity state for pids that no longer exist.
        self.activity
            .lock()
            .unwrap()
            .retain(|pid, _| seen.contains(pid));
        candidates
    }

    async fn read_candidate(&self, pid: u32) -> Option<ProcessCandidate> {
        let base = self.proc_root.join(pid.to_string());
        let stat = tokio::fs::read_to_string(base.join("stat")).await.ok()?;

        // The comm field is parenthesized and may contain spaces; split
        // on the closing parenthesis first.
        let open = stat.find('(')?;
        let close = stat.rfind(')')?;
        let name = stat.get(open + 1..close)?.to_string();
        let rest: Vec<&str> = stat.get(close + 2..)?.split_whitespace().collect();
        // rest[0] is the state field (index 2 of the full stat line).
        let utime: u64 = rest.get(11)?.parse().ok()?;
        let stime: u64 = rest.get(12)?.parse().ok()?;

        let memory_bytes = read_vm_rss(&base).await.unwrap_or(0);
        let (cpu_percent, idle_secs) = self.observe_cpu(pid, utime + stime);

        let exe_path = tokio::fs::read_link(base.join("exe"))
            .await
            .ok()
            .map(|p| p.to_string_lossy().into_owned());

        let protected = pid == self.own_pid
            || pid == 1
            || memory_bytes == 0 // kernel threads report no RSS
            || PROTECTED_NAMES.contains(&name.as_str());

        Some(ProcessCandidate {
            pid,
            name,
            app_id: None,
            memory_bytes,
            cpu_percent,
            idle_secs,
            protected,
            exe_path,
        })
    }

    /// Update per-pid CPU accounting and return (cpu percent, idle secs).
    /// The first sample for a pid carries no rate information.
    fn observe_cpu(&self, pid: u32, total_ticks: u64) -> (f64, u64) {
        let now = Instant::now();
        let mut activity = self.activity.lock().unwrap();
        let percent = match activity.get(&pid) {
            Some(state) => {
                let tick_delta = total_ticks.saturating_sub(state.cpu.total_ticks);
                let elapsed = now.duration_since(state.cpu.taken_at).as_secs_f64();
                if elapsed > 0.0 {
                    (tick_delta as f64 / CLOCK_TICKS_PER_SEC / elapsed) * 100.0
                } else {
                    0.0
                }
            }
            None => 0.0,
        };
        let last_active = match activity.get(&pid) {
            Some(state) if percent <= IDLE_CPU_PERCENT => state.last_active,
            _ => now,
        };
        activity.insert(
            pid,
            ActivityState {
                cpu: CpuSample {
                    total_ticks,
                    taken_at: now,
                },
                last_active,
            },
        );
        (percent, last_active.elapsed().as_secs())
    }
}

impl Default for ProcSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TelemetrySource for ProcSource {
    async fn sample(&self) -> Result<TelemetrySnapshot, GuardError> {
        let start = Instant::now();
        let (memory_usage, memory_available) = self.memory_fractions().await?;
        let memory_pressure = self.memory_pressure().await;
        let thermal_severity = self.thermal_severity().await;
        let candidates = self.candidates().await;

        debug!(
            candidates = candidates.len(),
            elapsed_ms = start.elapsed().as_millis(),
            severity = %thermal_severity,
            "Telemetry snapshot collected"
        );

        Ok(TelemetrySnapshot {
            timestamp: chrono::Utc::now().timestamp(),
            memory_usage,
            memory_available,
            memory_pressure,
            thermal_severity,
            candidates,
        })
    }
}

fn parse_kb(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

async fn read_vm_rss(base: &std::path::Path) -> Option<u64> {
    let status = tokio::fs::read_to_string(base.join("status")).await.ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            return Some(parse_kb(rest) * 1024);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kb() {
        assert_eq!(parse_kb("   16316460 kB"), 16_316_460);
        assert_eq!(parse_kb(" garbage"), 0);
    }

    #[tokio::test]
    async fn test_sample_from_fixture_tree() {
        let dir = std::env::temp_dir().join(format!("guard-proc-{}", std::process::id()));
        let proc_root = dir.join("proc");
        let thermal_root = dir.join("thermal");
        tokio::fs::create_dir_all(proc_root.join("4242")).await.unwrap();
        tokio::fs::create_dir_all(thermal_root.join("thermal_zone0"))
            .await
            .unwrap();

        tokio::fs::write(
            proc_root.join("meminfo"),
            "MemTotal:       16000000 kB\nMemFree:         2000000 kB\nMemAvailable:    4000000 kB\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            thermal_root.join("thermal_zone0/temp"),
            "86000\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            proc_root.join("4242/stat"),
            "4242 (idle worker) S 1 4242 4242 0 -1 4194304 100 0 0 0 50 25 0 0 20 0 1 0 100 104857600 25600 18446744073709551615 0 0 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            proc_root.join("4242/status"),
            "Name:\tidle worker\nVmRSS:\t  102400 kB\n",
        )
        .await
        .unwrap();

        let source = ProcSource::with_roots(&proc_root, &thermal_root);
        let snapshot = source.sample().await.unwrap();

        assert!((snapshot.memory_usage - 0.75).abs() < 1e-9);
        assert!((snapshot.memory_available - 0.25).abs() < 1e-9);
        assert_eq!(snapshot.thermal_severity, ThermalSeverity::Serious);
        // PSI file absent in the fixture tree: pressure degrades to zero.
        assert_eq!(snapshot.memory_pressure, 0.0);

        let candidate = snapshot
            .candidates
            .iter()
            .find(|c| c.pid == 4242)
            .expect("fixture process present");
        assert_eq!(candidate.name, "idle worker");
        assert_eq!(candidate.memory_bytes, 102_400 * 1024);
        assert!(!candidate.protected);

        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_missing_meminfo_is_metrics_unavailable() {
        let source = ProcSource::with_roots("/nonexistent-proc", "/nonexistent-thermal");
        let err = source.sample().await.unwrap_err();
        assert!(matches!(err, GuardError::MetricsUnavailable(_)));
    }
}
