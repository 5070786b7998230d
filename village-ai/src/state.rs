//! Per-agent bookkeeping owned by the orchestrator registry.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Free-form scratch space shared by the subsystems of one agent.
///
/// Cloning is cheap and yields a handle to the same map. Subsystems should
/// namespace their keys (`"emotion.dominant"`, `"quests.active"`) and must not
/// rely on another subsystem having written first.
#[derive(Debug, Clone, Default)]
pub struct AgentContext {
    values: Arc<DashMap<String, Value>>,
}

impl AgentContext {
    /// Read a value
    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).map(|v| v.value().clone())
    }

    /// Write a value, returning the previous one
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.values.insert(key.into(), value)
    }

    /// Remove a value
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.remove(key).map(|(_, v)| v)
    }

    /// Whether a key is present
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no keys are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Registry entry for one agent.
#[derive(Debug, Clone)]
pub struct AgentState {
    active: bool,
    last_update: HashMap<String, Instant>,
    context: AgentContext,
    registered_at: Instant,
    in_flight: bool,
    low_priority_visits: u64,
}

impl AgentState {
    /// Fresh, active state with nothing run yet
    pub fn new(now: Instant) -> Self {
        Self {
            active: true,
            last_update: HashMap::new(),
            context: AgentContext::default(),
            registered_at: now,
            in_flight: false,
            low_priority_visits: 0,
        }
    }

    /// Whether AI processing runs for this agent
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Enable or pause AI processing
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Shared context handle
    pub fn context(&self) -> &AgentContext {
        &self.context
    }

    /// When `subsystem` last ran for this agent
    pub fn last_update(&self, subsystem: &str) -> Option<Instant> {
        self.last_update.get(subsystem).copied()
    }

    /// A subsystem that never ran is due immediately.
    pub fn is_due(&self, subsystem: &str, interval: Duration, now: Instant) -> bool {
        self.last_update(subsystem)
            .is_none_or(|last| now.saturating_duration_since(last) >= interval)
    }

    /// Record a run of `subsystem`
    pub fn mark_updated(&mut self, subsystem: &str, at: Instant) {
        match self.last_update.get_mut(subsystem) {
            Some(last) => *last = at,
            None => {
                self.last_update.insert(subsystem.to_string(), at);
            }
        }
    }

    /// Most recent activity: the latest subsystem run, or registration.
    pub fn last_activity(&self) -> Instant {
        self.last_update
            .values()
            .copied()
            .max()
            .map_or(self.registered_at, |latest| latest.max(self.registered_at))
    }

    /// Whether the agent has been idle for longer than `threshold`
    pub fn is_stale(&self, threshold: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity()) > threshold
    }

    /// Count a visit while the host reports the agent as low priority.
    /// Every `divisor`-th such visit is a turn to run; the rest are skipped.
    pub(crate) fn take_low_priority_turn(&mut self, divisor: u64) -> bool {
        self.low_priority_visits += 1;
        self.low_priority_visits % divisor.max(1) == 0
    }

    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn set_in_flight(&mut self, in_flight: bool) {
        self.in_flight = in_flight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_due_after_interval() {
        let start = Instant::now();
        let mut state = AgentState::new(start);
        assert!(state.is_due("emotion", Duration::from_secs(60), start));

        state.mark_updated("emotion", start);
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!state.is_due("emotion", Duration::from_secs(60), Instant::now()));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(state.is_due("emotion", Duration::from_secs(60), Instant::now()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_staleness_tracks_latest_activity() {
        let start = Instant::now();
        let mut state = AgentState::new(start);
        tokio::time::advance(Duration::from_secs(50)).await;
        state.mark_updated("gossip", Instant::now());

        tokio::time::advance(Duration::from_secs(50)).await;
        let now = Instant::now();
        assert!(!state.is_stale(Duration::from_secs(60), now));
        assert!(state.is_stale(Duration::from_secs(40), now));
    }

    #[tokio::test]
    async fn test_low_priority_turn_every_divisor_visits() {
        let mut state = AgentState::new(Instant::now());
        let turns: Vec<bool> = (0..10).map(|_| state.take_low_priority_turn(5)).collect();
        assert_eq!(
            turns,
            [false, false, false, false, true, false, false, false, false, true]
        );
    }

    #[test]
    fn test_context_clones_share_storage() {
        let context = AgentContext::default();
        let other = context.clone();
        other.insert("quests.active", json!(2));
        assert_eq!(context.get("quests.active"), Some(json!(2)));
        assert_eq!(context.remove("quests.active"), Some(json!(2)));
        assert!(other.is_empty());
    }
}
