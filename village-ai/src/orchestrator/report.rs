//! Values returned by ticks, maintenance passes and analytics queries.

use crate::cache::CacheStats;
use crate::id::AgentId;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// What one call to [`Orchestrator::tick`](super::Orchestrator::tick) did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    /// Host tick number passed in
    pub tick: u64,
    /// Registry size when the tick started
    pub population: usize,
    /// Agents selected by the rotating window, in visit order
    pub visited: Vec<AgentId>,
    /// Agents for which at least one subsystem ran
    pub updated: usize,
    /// Agents skipped because they were low priority on an off tick
    pub skipped_low_priority: usize,
    /// Agents reaped because the host no longer knows them
    pub reaped: usize,
    /// Subsystem updates attempted
    pub subsystem_runs: usize,
    /// Subsystem updates that failed, timed out or panicked
    pub failures: usize,
    /// Wall time of the tick
    pub elapsed: Duration,
    /// Whether the tick exceeded its budget
    pub over_budget: bool,
}

/// What one maintenance pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    /// False when another pass was already running
    pub ran: bool,
    /// Stale agents removed
    pub reaped: usize,
    /// Expired annotations reverted
    pub annotations_reverted: usize,
}

/// Per-subsystem part of [`OrchestratorAnalytics`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsystemAnalytics {
    /// Subsystem name
    pub name: String,
    /// Whether it currently runs
    pub enabled: bool,
    /// Configured cadence in milliseconds
    pub interval_ms: u64,
    /// Updates attempted
    pub runs: u64,
    /// Failed updates, including timeouts and panics
    pub errors: u64,
    /// Timed-out updates
    pub timeouts: u64,
    /// Panicked updates
    pub panics: u64,
    /// Mean update time
    pub avg_ms: f64,
    /// Latest update time
    pub last_ms: f64,
    /// Subsystem-specific counters
    pub details: Map<String, Value>,
}

/// Operational snapshot of the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrchestratorAnalytics {
    /// Agents in the registry
    pub tracked_agents: usize,
    /// Registered agents with processing enabled
    pub active_agents: usize,
    /// Ticks run so far
    pub ticks: u64,
    /// Agents selected across all ticks
    pub agents_visited: u64,
    /// Agent passes in which at least one subsystem ran
    pub total_updates: u64,
    /// Low-priority skips
    pub skipped_low_priority: u64,
    /// Mean tick wall time
    pub avg_tick_ms: f64,
    /// Latest tick wall time
    pub last_tick_ms: f64,
    /// Slowest tick
    pub max_tick_ms: f64,
    /// Ticks that exceeded the budget
    pub over_budget_ticks: u64,
    /// Agents reaped because the host lost them
    pub reaped_missing: u64,
    /// Agents reaped for inactivity
    pub reaped_stale: u64,
    /// Completed maintenance passes
    pub maintenance_runs: u64,
    /// Per-subsystem breakdown, in registration order
    pub subsystems: Vec<SubsystemAnalytics>,
    /// Annotations waiting to be reverted
    pub pending_annotations: usize,
    /// Counters of the cache holding this snapshot
    pub analytics_cache: CacheStats,
}
