//! Agent AI orchestrator.
//!
//! Owns the agent registry and drives bounded, amortized work: every tick a
//! rotating window of `clamp(population / divisor, min, max)` agents is
//! visited, each visited agent runs the subsystems that are due for it, and
//! the per-agent work is spread over a bounded worker pool. A slower
//! maintenance loop reaps idle agents and runs subsystem housekeeping.
//!
//! # Example
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::builder(OrchestratorConfig::from_env()?)
//!     .lookup(world.clone())
//!     .spatial(world.clone())
//!     .subsystem(Arc::new(EmotionSubsystem::new(EmotionConfig::default(), world, annotations)))
//!     .build()?;
//! orchestrator.start().await?;
//! loop {
//!     let report = orchestrator.tick(world.time()).await?;
//! }
//! ```

mod metrics;
mod report;

pub use report::{MaintenanceReport, OrchestratorAnalytics, SubsystemAnalytics, TickReport};

use crate::annotation::AnnotationScheduler;
use crate::cache::TimedCache;
use crate::config::OrchestratorConfig;
use crate::error::{
    ConfigError, OrchestratorError, OrchestratorResult, SubsystemError, SubsystemResult, panic_message,
};
use crate::host::{AgentLookup, AgentProfile, SpatialIndex};
use crate::id::AgentId;
use crate::state::{AgentContext, AgentState};
use crate::subsystem::SubsystemPort;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use metrics::{OrchestratorMetrics, SubsystemMetrics, bump, load};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Ticks between two periodic performance log lines.
const PERFORMANCE_LOG_EVERY: u64 = 100;

/// Builder for [`Orchestrator`].
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    lookup: Option<Arc<dyn AgentLookup>>,
    spatial: Option<Arc<dyn SpatialIndex>>,
    annotations: Option<Arc<AnnotationScheduler>>,
    subsystems: Vec<Arc<dyn SubsystemPort>>,
}

impl OrchestratorBuilder {
    /// Set the entity lookup collaborator (required)
    pub fn lookup(mut self, lookup: Arc<dyn AgentLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    /// Set the spatial/priority collaborator (required)
    pub fn spatial(mut self, spatial: Arc<dyn SpatialIndex>) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Share an annotation scheduler so it is swept and cleaned up with the registry
    pub fn annotations(mut self, annotations: Arc<AnnotationScheduler>) -> Self {
        self.annotations = Some(annotations);
        self
    }

    /// Register a subsystem. Subsystems run in registration order.
    pub fn subsystem(mut self, subsystem: Arc<dyn SubsystemPort>) -> Self {
        self.subsystems.push(subsystem);
        self
    }

    /// Validate and construct.
    pub fn build(self) -> OrchestratorResult<Orchestrator> {
        self.config.validate()?;
        let lookup = self
            .lookup
            .ok_or_else(|| ConfigError::MissingKey("agent lookup".to_string()))?;
        let spatial = self
            .spatial
            .ok_or_else(|| ConfigError::MissingKey("spatial index".to_string()))?;

        for (i, subsystem) in self.subsystems.iter().enumerate() {
            if self.subsystems[..i].iter().any(|s| s.name() == subsystem.name()) {
                return Err(ConfigError::InvalidValue {
                    key: "subsystem".to_string(),
                    value: format!("duplicate name '{}'", subsystem.name()),
                }
                .into());
            }
        }

        let subsystem_metrics = self
            .subsystems
            .iter()
            .map(|_| SubsystemMetrics::default())
            .collect();
        let (abort_tx, _) = watch::channel(false);
        let (shutdown_tx, _) = watch::channel(false);

        info!(
            workers = self.config.worker_threads,
            max_updates_per_tick = self.config.max_updates_per_tick,
            subsystems = self.subsystems.len(),
            "orchestrator created"
        );

        Ok(Orchestrator {
            shared: Arc::new(Shared {
                registry: DashMap::new(),
                workers: Arc::new(Semaphore::new(self.config.worker_threads)),
                analytics_cache: TimedCache::new(self.config.analytics_ttl, 1),
                config: self.config,
                subsystems: self.subsystems,
                subsystem_metrics,
                lookup,
                spatial,
                annotations: self.annotations,
                cursor: AtomicUsize::new(0),
                abort_tx,
                metrics: OrchestratorMetrics::default(),
                maintenance_lock: Mutex::new(()),
                shut_down: AtomicBool::new(false),
            }),
            background: Mutex::new(Vec::new()),
            shutdown_tx,
        })
    }
}

/// Explicitly owned orchestrator instance. Construct once, share by reference or `Arc`.
pub struct Orchestrator {
    shared: Arc<Shared>,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

struct Shared {
    config: OrchestratorConfig,
    registry: DashMap<AgentId, AgentState>,
    subsystems: Vec<Arc<dyn SubsystemPort>>,
    subsystem_metrics: Vec<SubsystemMetrics>,
    lookup: Arc<dyn AgentLookup>,
    spatial: Arc<dyn SpatialIndex>,
    annotations: Option<Arc<AnnotationScheduler>>,
    cursor: AtomicUsize,
    workers: Arc<Semaphore>,
    abort_tx: watch::Sender<bool>,
    metrics: OrchestratorMetrics,
    analytics_cache: TimedCache<(), OrchestratorAnalytics>,
    maintenance_lock: Mutex<()>,
    shut_down: AtomicBool,
}

#[derive(Debug, Default)]
struct AgentOutcome {
    runs: usize,
    failures: usize,
}

impl Orchestrator {
    /// Start building an orchestrator
    pub fn builder(config: OrchestratorConfig) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config,
            lookup: None,
            spatial: None,
            annotations: None,
            subsystems: Vec::new(),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &OrchestratorConfig {
        &self.shared.config
    }

    fn ensure_running(&self) -> OrchestratorResult<()> {
        if self.shared.shut_down.load(Ordering::Acquire) {
            Err(OrchestratorError::ShutDown)
        } else {
            Ok(())
        }
    }

    /// Track an agent. Idempotent; returns whether it was newly added.
    pub async fn register_agent(&self, id: AgentId) -> OrchestratorResult<bool> {
        self.register_agent_with(id, None).await
    }

    /// Track an agent, handing `initial` to every subsystem's `initialize`.
    pub async fn register_agent_with(
        &self,
        id: AgentId,
        initial: Option<Value>,
    ) -> OrchestratorResult<bool> {
        self.ensure_running()?;
        let shared = &self.shared;
        if shared.registry.contains_key(&id) {
            return Ok(false);
        }
        if shared.registry.len() >= shared.config.max_tracked_agents {
            let reaped = shared.reap_stale().await;
            debug!(reaped, "registry at capacity, swept stale agents");
        }

        let inserted = match shared.registry.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(AgentState::new(Instant::now()));
                true
            }
        };
        if inserted {
            for subsystem in &shared.subsystems {
                if let Err(e) = subsystem.initialize(id, initial.as_ref()).await {
                    bump(&shared.metrics.init_failures, 1);
                    warn!(agent_id = %id, subsystem = subsystem.name(), error = %e, "subsystem initialization failed");
                }
            }
        }
        Ok(inserted)
    }

    /// Forget an agent the host removed. Returns whether it was tracked.
    pub async fn unregister_agent(&self, id: AgentId) -> bool {
        self.shared.reap(id).await
    }

    /// Pause or resume processing for an agent. Returns false for unknown ids.
    pub fn set_active(&self, id: AgentId, active: bool) -> bool {
        match self.shared.registry.get_mut(&id) {
            Some(mut state) => {
                state.set_active(active);
                true
            }
            None => false,
        }
    }

    /// Context handle of a tracked agent
    pub fn agent_context(&self, id: AgentId) -> Option<AgentContext> {
        self.shared
            .registry
            .get(&id)
            .map(|state| state.context().clone())
    }

    /// Whether the agent is tracked
    pub fn is_registered(&self, id: AgentId) -> bool {
        self.shared.registry.contains_key(&id)
    }

    /// Number of tracked agents
    pub fn agent_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::Acquire)
    }

    /// Run one bounded slice of AI work. Call once per host simulation step.
    pub async fn tick(&self, now_tick: u64) -> OrchestratorResult<TickReport> {
        self.ensure_running()?;
        let shared = &self.shared;
        let started = std::time::Instant::now();

        let mut ids: Vec<AgentId> = shared.registry.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        let mut report = TickReport {
            tick: now_tick,
            population: ids.len(),
            ..Default::default()
        };

        if !ids.is_empty() {
            let window = shared.window_size(ids.len());
            let start = shared.advance_cursor(ids.len(), window);
            let now = Instant::now();
            let mut tasks = JoinSet::new();

            for offset in 0..window {
                let id = ids[(start + offset) % ids.len()];
                report.visited.push(id);

                let Some(profile) = shared.lookup.resolve(id) else {
                    if shared.reap(id).await {
                        bump(&shared.metrics.reaped_missing, 1);
                        report.reaped += 1;
                    }
                    continue;
                };
                if shared.spatial.is_low_priority(id) && !shared.low_priority_turn(id) {
                    report.skipped_low_priority += 1;
                    continue;
                }
                let Some((due, context)) = shared.claim(id, now) else {
                    continue;
                };
                let Ok(permit) = Arc::clone(&shared.workers).acquire_owned().await else {
                    // pool closed by shutdown
                    shared.release(id);
                    break;
                };
                let worker = Arc::clone(shared);
                tasks.spawn(async move {
                    let outcome = worker.run_agent(profile, context, due).await;
                    drop(permit);
                    outcome
                });
            }

            shared.join_agents(&mut tasks, &mut report).await;
        }

        shared.finish_tick(&mut report, started.elapsed());
        Ok(report)
    }

    /// Reap idle agents and run subsystem housekeeping. Single-flight.
    pub async fn maintain(&self) -> MaintenanceReport {
        self.shared.maintain().await
    }

    /// Spawn the background maintenance and annotation-sweep loops.
    pub async fn start(&self) -> OrchestratorResult<()> {
        self.ensure_running()?;
        let mut background = self.background.lock().await;
        if !background.is_empty() {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let mut stop = self.shutdown_tx.subscribe();
        background.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(shared.config.maintenance_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        shared.maintain().await;
                    }
                    _ = stop.changed() => break,
                }
            }
        }));

        if let Some(annotations) = self.shared.annotations.clone() {
            let mut stop = self.shutdown_tx.subscribe();
            let period = self.shared.config.annotation_sweep_interval;
            background.push(tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = interval.tick() => {
                            annotations.sweep();
                        }
                        _ = stop.changed() => break,
                    }
                }
            }));
        }

        info!(
            maintenance_interval = ?self.shared.config.maintenance_interval,
            "orchestrator background loops started"
        );
        Ok(())
    }

    /// Drain in-flight work within the grace period, then force-cancel,
    /// clear all state and shut subsystems down in reverse order. Idempotent.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let grace = shared.config.shutdown_grace;
        info!(?grace, "orchestrator shutting down");
        let _ = self.shutdown_tx.send(true);

        let permits = u32::try_from(shared.config.worker_threads).unwrap_or(u32::MAX);
        match tokio::time::timeout(grace, shared.workers.acquire_many(permits)).await {
            Ok(_) => {}
            Err(_) => {
                warn!("in-flight agent updates outlived the grace period, aborting");
                let _ = shared.abort_tx.send(true);
            }
        }
        shared.workers.close();

        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("background loops outlived the grace period, aborting");
            for abort in aborts {
                abort.abort();
            }
        }

        shared.registry.clear();
        shared.analytics_cache.clear();
        if let Some(annotations) = &shared.annotations {
            annotations.clear();
        }
        for subsystem in shared.subsystems.iter().rev() {
            subsystem.shutdown().await;
        }
        info!("orchestrator shut down");
    }

    /// Operational snapshot, reused for `analytics_ttl`.
    pub fn analytics(&self) -> OrchestratorAnalytics {
        if let Some(cached) = self.shared.analytics_cache.get(&()) {
            return cached;
        }
        let snapshot = self.shared.compute_analytics();
        self.shared.analytics_cache.insert((), snapshot.clone());
        snapshot
    }

    /// Recompute the snapshot now, bypassing and refreshing the cache.
    pub fn refresh_analytics(&self) -> OrchestratorAnalytics {
        let snapshot = self.shared.compute_analytics();
        self.shared.analytics_cache.insert((), snapshot.clone());
        snapshot
    }
}

impl Shared {
    fn window_size(&self, population: usize) -> usize {
        (population / self.config.population_divisor)
            .clamp(self.config.min_updates_per_tick, self.config.max_updates_per_tick)
            .min(population)
    }

    /// Return the window start and move the cursor past the window, wrapping.
    fn advance_cursor(&self, population: usize, window: usize) -> usize {
        let previous = self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                Some((cursor % population + window) % population)
            })
            .unwrap_or_else(|current| current);
        previous % population
    }

    /// Whether a low-priority agent runs on this visit. Counting visits
    /// rather than ticks keeps every rotation slot reachable.
    fn low_priority_turn(&self, id: AgentId) -> bool {
        let divisor = self.config.low_priority_tick_divisor;
        self.registry
            .get_mut(&id)
            .is_some_and(|mut state| state.take_low_priority_turn(divisor))
    }

    /// Mark an agent busy and return the subsystems due for it.
    fn claim(&self, id: AgentId, now: Instant) -> Option<(Vec<usize>, AgentContext)> {
        let mut state = self.registry.get_mut(&id)?;
        if !state.is_active() || state.is_in_flight() {
            return None;
        }
        let due: Vec<usize> = self
            .subsystems
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_enabled() && state.is_due(s.name(), s.interval(), now))
            .map(|(index, _)| index)
            .collect();
        if due.is_empty() {
            return None;
        }
        state.set_in_flight(true);
        Some((due, state.context().clone()))
    }

    fn release(&self, id: AgentId) {
        if let Some(mut state) = self.registry.get_mut(&id) {
            state.set_in_flight(false);
        }
    }

    async fn run_agent(
        self: Arc<Self>,
        profile: AgentProfile,
        context: AgentContext,
        due: Vec<usize>,
    ) -> AgentOutcome {
        let mut outcome = AgentOutcome::default();
        for &index in &due {
            let subsystem = &self.subsystems[index];
            let started = std::time::Instant::now();
            let result = self.run_update(subsystem.as_ref(), &profile, &context).await;
            self.subsystem_metrics[index].record(started.elapsed(), &result);
            outcome.runs += 1;
            if let Err(e) = result {
                outcome.failures += 1;
                warn!(agent_id = %profile.id, subsystem = subsystem.name(), error = %e, "subsystem update failed");
            }
        }

        let finished = Instant::now();
        if let Some(mut state) = self.registry.get_mut(&profile.id) {
            for &index in &due {
                state.mark_updated(self.subsystems[index].name(), finished);
            }
            state.set_in_flight(false);
        }
        outcome
    }

    async fn run_update(
        &self,
        subsystem: &dyn SubsystemPort,
        profile: &AgentProfile,
        context: &AgentContext,
    ) -> SubsystemResult<()> {
        let limit = self.config.subsystem_timeout;
        let guarded = AssertUnwindSafe(subsystem.update(profile, context)).catch_unwind();
        match tokio::time::timeout(limit, guarded).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => Err(SubsystemError::Panicked {
                subsystem: subsystem.name().to_string(),
                message: panic_message(panic.as_ref()),
            }),
            Err(_) => Err(SubsystemError::Timeout {
                subsystem: subsystem.name().to_string(),
                duration: limit,
            }),
        }
    }

    async fn join_agents(&self, tasks: &mut JoinSet<AgentOutcome>, report: &mut TickReport) {
        let mut abort = self.abort_tx.subscribe();
        let mut aborted = false;
        loop {
            tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(outcome)) => {
                        report.updated += 1;
                        report.subsystem_runs += outcome.runs;
                        report.failures += outcome.failures;
                    }
                    Some(Err(e)) => debug!(error = %e, "agent update task did not complete"),
                },
                _ = abort.wait_for(|flag| *flag), if !aborted => {
                    aborted = true;
                    tasks.abort_all();
                }
            }
        }
    }

    fn finish_tick(&self, report: &mut TickReport, elapsed: std::time::Duration) {
        report.elapsed = elapsed;
        report.over_budget = elapsed > self.config.tick_budget;

        let metrics = &self.metrics;
        metrics.ticks.record(elapsed);
        bump(&metrics.agents_visited, report.visited.len() as u64);
        bump(&metrics.agent_updates, report.updated as u64);
        bump(&metrics.skipped_low_priority, report.skipped_low_priority as u64);

        if report.over_budget {
            bump(&metrics.over_budget_ticks, 1);
            warn!(
                tick = report.tick,
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                budget_ms = self.config.tick_budget.as_secs_f64() * 1000.0,
                visited = report.visited.len(),
                "tick exceeded its budget"
            );
        }
        let ticks = metrics.ticks.count();
        if ticks % PERFORMANCE_LOG_EVERY == 0 {
            info!(
                ticks,
                tracked = self.registry.len(),
                avg_tick_ms = metrics.ticks.avg_ms(),
                max_tick_ms = metrics.ticks.max_ms(),
                total_updates = load(&metrics.agent_updates),
                "orchestrator performance"
            );
        }
    }

    /// Remove an agent and every trace of it. Returns whether it was tracked.
    async fn reap(&self, id: AgentId) -> bool {
        if self.registry.remove(&id).is_none() {
            return false;
        }
        self.forget(id).await;
        true
    }

    async fn forget(&self, id: AgentId) {
        if let Some(annotations) = &self.annotations {
            annotations.cancel(id);
        }
        for subsystem in &self.subsystems {
            subsystem.cleanup(id).await;
        }
        debug!(agent_id = %id, "agent state reaped");
    }

    async fn reap_stale(&self) -> usize {
        let threshold = self.config.stale_threshold;
        let now = Instant::now();
        let candidates: Vec<AgentId> = self
            .registry
            .iter()
            .filter(|entry| !entry.is_in_flight() && entry.is_stale(threshold, now))
            .map(|entry| *entry.key())
            .collect();

        let mut reaped = 0;
        for id in candidates {
            let removed = self
                .registry
                .remove_if(&id, |_, state| !state.is_in_flight() && state.is_stale(threshold, now));
            if removed.is_some() {
                self.forget(id).await;
                reaped += 1;
            }
        }
        bump(&self.metrics.reaped_stale, reaped as u64);
        reaped
    }

    async fn maintain(&self) -> MaintenanceReport {
        let Ok(_guard) = self.maintenance_lock.try_lock() else {
            debug!("maintenance already running, skipping");
            return MaintenanceReport::default();
        };
        let started = std::time::Instant::now();

        let reaped = self.reap_stale().await;
        for subsystem in &self.subsystems {
            subsystem.maintain().await;
        }
        let annotations_reverted = self
            .annotations
            .as_ref()
            .map_or(0, |annotations| annotations.sweep());

        self.metrics.maintenance.record(started.elapsed());
        info!(
            reaped,
            annotations_reverted,
            tracked = self.registry.len(),
            "maintenance complete"
        );
        MaintenanceReport {
            ran: true,
            reaped,
            annotations_reverted,
        }
    }

    fn compute_analytics(&self) -> OrchestratorAnalytics {
        let metrics = &self.metrics;
        let subsystems = self
            .subsystems
            .iter()
            .zip(&self.subsystem_metrics)
            .map(|(subsystem, m)| SubsystemAnalytics {
                name: subsystem.name().to_string(),
                enabled: subsystem.is_enabled(),
                interval_ms: u64::try_from(subsystem.interval().as_millis()).unwrap_or(u64::MAX),
                runs: m.timing.count(),
                errors: load(&m.errors),
                timeouts: load(&m.timeouts),
                panics: load(&m.panics),
                avg_ms: m.timing.avg_ms(),
                last_ms: m.timing.last_ms(),
                details: subsystem.analytics(),
            })
            .collect();

        OrchestratorAnalytics {
            tracked_agents: self.registry.len(),
            active_agents: self.registry.iter().filter(|s| s.is_active()).count(),
            ticks: metrics.ticks.count(),
            agents_visited: load(&metrics.agents_visited),
            total_updates: load(&metrics.agent_updates),
            skipped_low_priority: load(&metrics.skipped_low_priority),
            avg_tick_ms: metrics.ticks.avg_ms(),
            last_tick_ms: metrics.ticks.last_ms(),
            max_tick_ms: metrics.ticks.max_ms(),
            over_budget_ticks: load(&metrics.over_budget_ticks),
            reaped_missing: load(&metrics.reaped_missing),
            reaped_stale: load(&metrics.reaped_stale),
            maintenance_runs: metrics.maintenance.count(),
            subsystems,
            pending_annotations: self.annotations.as_ref().map_or(0, |a| a.pending()),
            analytics_cache: self.analytics_cache.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingSubsystem, MockWorld, RecordingSubsystem};
    use std::time::Duration;

    fn orchestrator(world: &Arc<MockWorld>, config: OrchestratorConfig) -> OrchestratorBuilder {
        Orchestrator::builder(config)
            .lookup(world.clone())
            .spatial(world.clone())
    }

    #[test]
    fn test_build_requires_collaborators() {
        let result = Orchestrator::builder(OrchestratorConfig::default()).build();
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::MissingKey(_)))
        ));
    }

    #[test]
    fn test_build_rejects_zero_workers() {
        let world = Arc::new(MockWorld::new());
        let result = orchestrator(&world, OrchestratorConfig::new().with_worker_threads(0)).build();
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::ZeroWorkers))
        ));
    }

    #[test]
    fn test_build_rejects_duplicate_subsystem_names() {
        let world = Arc::new(MockWorld::new());
        let result = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO)))
            .subsystem(Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO)))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_window_size_clamps() {
        let world = Arc::new(MockWorld::new());
        let built = orchestrator(&world, OrchestratorConfig::default()).build().unwrap();
        assert_eq!(built.shared.window_size(1), 1);
        assert_eq!(built.shared.window_size(10), 1);
        assert_eq!(built.shared.window_size(200), 10);
        assert_eq!(built.shared.window_size(100_000), 50);
    }

    #[test]
    fn test_cursor_wraps() {
        let world = Arc::new(MockWorld::new());
        let built = orchestrator(&world, OrchestratorConfig::default()).build().unwrap();
        assert_eq!(built.shared.advance_cursor(5, 2), 0);
        assert_eq!(built.shared.advance_cursor(5, 2), 2);
        assert_eq!(built.shared.advance_cursor(5, 2), 4);
        assert_eq!(built.shared.advance_cursor(5, 2), 1);
        // population shrank below the cursor
        assert_eq!(built.shared.advance_cursor(2, 1), 1);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let id = world.spawn("Ema", Default::default());

        assert!(built.register_agent(id).await.unwrap());
        assert!(!built.register_agent(id).await.unwrap());
        assert_eq!(built.agent_count(), 1);
        assert_eq!(recorder.initialized(), 1);
    }

    #[tokio::test]
    async fn test_missing_agent_is_reaped_during_tick() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let id = world.spawn("Gil", Default::default());
        built.register_agent(id).await.unwrap();
        world.despawn(id);

        let report = built.tick(1).await.unwrap();
        assert_eq!(report.reaped, 1);
        assert!(!built.is_registered(id));
        assert_eq!(recorder.cleaned_up(), 1);
        assert_eq!(recorder.updates(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_subsystems() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("planning", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::new().with_updates_per_tick(1, 50))
            .subsystem(Arc::new(FailingSubsystem::erroring("learning")))
            .subsystem(Arc::new(FailingSubsystem::panicking("quests")))
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let a = world.spawn("Ann", Default::default());
        let b = world.spawn("Bo", Default::default());
        built.register_agent(a).await.unwrap();
        built.register_agent(b).await.unwrap();

        let mut runs = 0;
        let mut failures = 0;
        for tick in 1..=2 {
            let report = built.tick(tick).await.unwrap();
            runs += report.subsystem_runs;
            failures += report.failures;
        }
        assert_eq!(recorder.updates(), 2);
        assert_eq!(runs, 6);
        assert_eq!(failures, 4);

        let analytics = built.refresh_analytics();
        assert_eq!(analytics.subsystems[0].errors, 2);
        assert_eq!(analytics.subsystems[1].panics, 2);
        assert_eq!(analytics.subsystems[2].errors, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_update_times_out() {
        let world = Arc::new(MockWorld::new());
        let config = OrchestratorConfig::new().with_subsystem_timeout(Duration::from_millis(20));
        let built = orchestrator(&world, config)
            .subsystem(Arc::new(FailingSubsystem::hanging("quests", Duration::from_secs(5))))
            .build()
            .unwrap();
        let id = world.spawn("Cal", Default::default());
        built.register_agent(id).await.unwrap();

        let report = built.tick(1).await.unwrap();
        assert_eq!(report.failures, 1);
        assert_eq!(built.refresh_analytics().subsystems[0].timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subsystem_not_rerun_before_interval() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("emotion", Duration::from_secs(60)));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let id = world.spawn("Dov", Default::default());
        built.register_agent(id).await.unwrap();

        built.tick(1).await.unwrap();
        built.tick(2).await.unwrap();
        assert_eq!(recorder.updates(), 1);

        tokio::time::advance(Duration::from_secs(60)).await;
        built.tick(3).await.unwrap();
        assert_eq!(recorder.updates(), 2);
    }

    #[tokio::test]
    async fn test_low_priority_agents_run_every_divisor_visits() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let id = world.spawn("Eli", Default::default());
        world.set_low_priority(id, true);
        built.register_agent(id).await.unwrap();

        for tick in 1..=4 {
            let report = built.tick(tick).await.unwrap();
            assert_eq!(report.skipped_low_priority, 1);
        }
        assert_eq!(recorder.updates(), 0);
        built.tick(5).await.unwrap();
        assert_eq!(recorder.updates(), 1);
    }

    #[tokio::test]
    async fn test_inactive_agents_are_skipped() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        let id = world.spawn("Fen", Default::default());
        built.register_agent(id).await.unwrap();
        assert!(built.set_active(id, false));

        built.tick(1).await.unwrap();
        assert_eq!(recorder.updates(), 0);
        assert_eq!(built.refresh_analytics().active_agents, 0);
    }

    #[tokio::test]
    async fn test_maintenance_is_single_flight() {
        let world = Arc::new(MockWorld::new());
        let built = orchestrator(&world, OrchestratorConfig::default()).build().unwrap();
        let guard = built.shared.maintenance_lock.lock().await;
        assert!(!built.maintain().await.ran);
        drop(guard);
        assert!(built.maintain().await.ran);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analytics_are_cached() {
        let world = Arc::new(MockWorld::new());
        let built = orchestrator(&world, OrchestratorConfig::default()).build().unwrap();
        let id = world.spawn("Gus", Default::default());

        assert_eq!(built.analytics().tracked_agents, 0);
        built.register_agent(id).await.unwrap();
        assert_eq!(built.analytics().tracked_agents, 0, "served from cache");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(built.analytics().tracked_agents, 1);
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_final() {
        let world = Arc::new(MockWorld::new());
        let recorder = Arc::new(RecordingSubsystem::new("gossip", Duration::ZERO));
        let built = orchestrator(&world, OrchestratorConfig::default())
            .subsystem(recorder.clone())
            .build()
            .unwrap();
        built.start().await.unwrap();
        built.register_agent(world.spawn("Hux", Default::default())).await.unwrap();

        built.shutdown().await;
        built.shutdown().await;

        assert!(built.is_shut_down());
        assert_eq!(built.agent_count(), 0);
        assert_eq!(recorder.shutdowns(), 1);
        assert!(matches!(built.tick(1).await, Err(OrchestratorError::ShutDown)));
        assert!(matches!(
            built.register_agent(AgentId::new()).await,
            Err(OrchestratorError::ShutDown)
        ));
    }
}
