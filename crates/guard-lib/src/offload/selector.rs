//! Candidate selection for suspension
//!
//! Ranks eligible processes under exclusion and safety rules. Larger,
//! longer-idle processes are preferred offload targets: they yield the
//! most savings for the least user-visible risk.

use crate::models::ProcessCandidate;
use std::collections::HashSet;

/// Default minimum memory footprint (50 MiB).
pub const DEFAULT_MIN_MEMORY_BYTES: u64 = 50 * 1024 * 1024;

/// Default minimum continuous idle duration.
pub const DEFAULT_MIN_IDLE_SECS: u64 = 60;

/// Default CPU ceiling; high recent CPU counts as evidence of active use
/// even when the process reports itself idle.
pub const DEFAULT_ACTIVE_CPU_PERCENT: f64 = 10.0;

/// Eligibility and ranking policy for offload candidates.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub min_memory_bytes: u64,
    pub min_idle_secs: u64,
    pub active_cpu_percent: f64,
    /// User exclusion set of stable identifiers (app id, falling back to
    /// process name).
    pub excluded_identifiers: HashSet<String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            min_memory_bytes: DEFAULT_MIN_MEMORY_BYTES,
            min_idle_secs: DEFAULT_MIN_IDLE_SECS,
            active_cpu_percent: DEFAULT_ACTIVE_CPU_PERCENT,
            excluded_identifiers: HashSet::new(),
        }
    }
}

/// Ranks eligible processes for suspension.
pub struct CandidateSelector {
    config: SelectorConfig,
}

impl CandidateSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Select up to `limit` candidates, ordered by memory footprint
    /// descending with idle duration as the tie-break. Deterministic for
    /// identical inputs (stable sort).
    pub fn select(&self, candidates: &[ProcessCandidate], limit: usize) -> Vec<ProcessCandidate> {
        let mut eligible: Vec<ProcessCandidate> = candidates
            .iter()
            .filter(|c| self.is_eligible(c))
            .cloned()
            .collect();

        eligible.sort_by(|a, b| {
            b.memory_bytes
                .cmp(&a.memory_bytes)
                .then(b.idle_secs.cmp(&a.idle_secs))
        });
        eligible.truncate(limit);
        eligible
    }

    /// All conditions must hold for a candidate to be considered.
    pub fn is_eligible(&self, candidate: &ProcessCandidate) -> bool {
        if candidate.protected {
            return false;
        }
        if candidate.memory_bytes < self.config.min_memory_bytes {
            return false;
        }
        if candidate.idle_secs < self.config.min_idle_secs {
            return false;
        }
        if candidate.cpu_percent >= self.config.active_cpu_percent {
            return false;
        }
        let identifier = candidate.app_id.as_ref().unwrap_or(&candidate.name);
        !self.config.excluded_identifiers.contains(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(pid: u32, memory_bytes: u64, idle_secs: u64) -> ProcessCandidate {
        ProcessCandidate {
            pid,
            name: format!("proc-{}", pid),
            app_id: None,
            memory_bytes,
            cpu_percent: 1.0,
            idle_secs,
            protected: false,
            exe_path: None,
        }
    }

    #[test]
    fn test_prefers_larger_longer_idle() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        let a = candidate(1, 100 * 1024 * 1024, 300);
        let b = candidate(2, 2 * 1024 * 1024 * 1024, 900);
        let picked = selector.select(&[a, b], 1);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].pid, 2);
    }

    #[test]
    fn test_idle_breaks_memory_ties() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        let a = candidate(1, 500 * 1024 * 1024, 120);
        let b = candidate(2, 500 * 1024 * 1024, 600);
        let picked = selector.select(&[a, b], 2);
        assert_eq!(picked[0].pid, 2);
        assert_eq!(picked[1].pid, 1);
    }

    #[test]
    fn test_protected_never_selected() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        let mut huge = candidate(1, 8 * 1024 * 1024 * 1024, 3600);
        huge.protected = true;
        assert!(selector.select(&[huge], 5).is_empty());
    }

    #[test]
    fn test_minimum_thresholds() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        // Below the 50 MiB floor.
        let small = candidate(1, 10 * 1024 * 1024, 600);
        // Below the 60 s idle floor.
        let busy = candidate(2, 500 * 1024 * 1024, 10);
        assert!(selector.select(&[small, busy], 5).is_empty());
    }

    #[test]
    fn test_high_cpu_counts_as_active_use() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        let mut hot = candidate(1, 500 * 1024 * 1024, 600);
        hot.cpu_percent = 55.0;
        assert!(!selector.is_eligible(&hot));
    }

    #[test]
    fn test_exclusion_set_matches_app_id_then_name() {
        let mut config = SelectorConfig::default();
        config.excluded_identifiers.insert("com.example.editor".into());
        config.excluded_identifiers.insert("proc-2".into());
        let selector = CandidateSelector::new(config);

        let mut by_app_id = candidate(1, 500 * 1024 * 1024, 600);
        by_app_id.app_id = Some("com.example.editor".into());
        let by_name = candidate(2, 500 * 1024 * 1024, 600);
        let kept = candidate(3, 500 * 1024 * 1024, 600);

        let picked = selector.select(&[by_app_id, by_name, kept], 5);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].pid, 3);
    }

    #[test]
    fn test_truncates_to_limit_deterministically() {
        let selector = CandidateSelector::new(SelectorConfig::default());
        let pool: Vec<_> = (1..=10)
            .map(|i| candidate(i, (i as u64) * 100 * 1024 * 1024, 600))
            .collect();
        let first = selector.select(&pool, 3);
        let second = selector.select(&pool, 3);
        assert_eq!(first.len(), 3);
        assert_eq!(
            first.iter().map(|c| c.pid).collect::<Vec<_>>(),
            second.iter().map(|c| c.pid).collect::<Vec<_>>()
        );
        assert_eq!(first[0].pid, 10);
    }
}
