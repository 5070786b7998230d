//! Lock-free counters behind the analytics snapshot.

use crate::error::SubsystemError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Count, average, last and max of a timed operation.
#[derive(Debug, Default)]
pub(crate) struct TimingStats {
    count: AtomicU64,
    total_micros: AtomicU64,
    last_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl TimingStats {
    pub(crate) fn record(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.last_micros.store(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    pub(crate) fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn avg_ms(&self) -> f64 {
        match self.count() {
            0 => 0.0,
            n => self.total_micros.load(Ordering::Relaxed) as f64 / n as f64 / 1000.0,
        }
    }

    pub(crate) fn last_ms(&self) -> f64 {
        self.last_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub(crate) fn max_ms(&self) -> f64 {
        self.max_micros.load(Ordering::Relaxed) as f64 / 1000.0
    }
}

/// Per-subsystem execution counters.
#[derive(Debug, Default)]
pub(crate) struct SubsystemMetrics {
    pub(crate) timing: TimingStats,
    pub(crate) errors: AtomicU64,
    pub(crate) timeouts: AtomicU64,
    pub(crate) panics: AtomicU64,
}

impl SubsystemMetrics {
    pub(crate) fn record(&self, elapsed: Duration, result: &Result<(), SubsystemError>) {
        self.timing.record(elapsed);
        match result {
            Ok(()) => {}
            Err(SubsystemError::Failed { .. }) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(SubsystemError::Timeout { .. }) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Err(SubsystemError::Panicked { .. }) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                self.panics.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Orchestrator-wide counters.
#[derive(Debug, Default)]
pub(crate) struct OrchestratorMetrics {
    pub(crate) ticks: TimingStats,
    pub(crate) agents_visited: AtomicU64,
    pub(crate) agent_updates: AtomicU64,
    pub(crate) skipped_low_priority: AtomicU64,
    pub(crate) reaped_missing: AtomicU64,
    pub(crate) reaped_stale: AtomicU64,
    pub(crate) over_budget_ticks: AtomicU64,
    pub(crate) maintenance: TimingStats,
    pub(crate) init_failures: AtomicU64,
}

pub(crate) fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

pub(crate) fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_stats() {
        let stats = TimingStats::default();
        assert_eq!(stats.avg_ms(), 0.0);
        stats.record(Duration::from_millis(2));
        stats.record(Duration::from_millis(4));
        assert_eq!(stats.count(), 2);
        assert!((stats.avg_ms() - 3.0).abs() < 1e-9);
        assert!((stats.last_ms() - 4.0).abs() < 1e-9);
        assert!((stats.max_ms() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_subsystem_error_kinds_counted() {
        let metrics = SubsystemMetrics::default();
        metrics.record(Duration::ZERO, &Ok(()));
        metrics.record(
            Duration::ZERO,
            &Err(SubsystemError::Timeout {
                subsystem: "gossip".into(),
                duration: Duration::from_millis(5),
            }),
        );
        metrics.record(Duration::ZERO, &Err(SubsystemError::failed("gossip", "boom")));
        assert_eq!(load(&metrics.errors), 2);
        assert_eq!(load(&metrics.timeouts), 1);
        assert_eq!(load(&metrics.panics), 0);
        assert_eq!(metrics.timing.count(), 3);
    }
}
