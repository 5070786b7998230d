//! In-memory collaborators for tests and the headless simulator.

use crate::dialogue::{DialogueRequest, GenerationProvider};
use crate::error::{ProviderError, ProviderResult, SubsystemError, SubsystemResult};
use crate::host::{AgentLookup, AgentProfile, AnnotationSink, NoticeSink, Personality, SpatialIndex};
use crate::id::AgentId;
use crate::state::AgentContext;
use crate::subsystem::SubsystemPort;
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// A tiny world: who exists, who stands near whom, who is far from players.
#[derive(Debug, Default)]
pub struct MockWorld {
    agents: DashMap<AgentId, AgentProfile>,
    neighbours: DashMap<AgentId, Vec<AgentId>>,
    low_priority: DashSet<AgentId>,
    names: DashMap<AgentId, String>,
    notices: Mutex<Vec<(String, String)>>,
}

impl MockWorld {
    /// Empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent and return its id
    pub fn spawn(&self, name: &str, personality: Personality) -> AgentId {
        let id = AgentId::new();
        self.agents
            .insert(id, AgentProfile::new(id, name).with_personality(personality));
        id
    }

    /// Add `count` agents cycling through the personalities
    pub fn populate(&self, count: usize) -> Vec<AgentId> {
        const PERSONALITIES: [Personality; 5] = [
            Personality::Friendly,
            Personality::Grumpy,
            Personality::Curious,
            Personality::Nervous,
            Personality::Neutral,
        ];
        (0..count)
            .map(|i| self.spawn(&format!("Villager {i}"), PERSONALITIES[i % PERSONALITIES.len()]))
            .collect()
    }

    /// Current profile of an agent
    pub fn profile(&self, id: AgentId) -> Option<AgentProfile> {
        self.agents.get(&id).map(|p| p.clone())
    }

    /// Remove an agent from the world
    pub fn despawn(&self, id: AgentId) {
        self.agents.remove(&id);
        self.neighbours.remove(&id);
        self.low_priority.remove(&id);
    }

    /// Make `others` the neighbours of `source`, in both directions
    pub fn place_near(&self, source: AgentId, others: &[AgentId]) {
        self.neighbours.entry(source).or_default().extend_from_slice(others);
        for other in others {
            self.neighbours.entry(*other).or_default().push(source);
        }
    }

    /// Mark an agent as far from every player
    pub fn set_low_priority(&self, id: AgentId, low: bool) {
        if low {
            self.low_priority.insert(id);
        } else {
            self.low_priority.remove(&id);
        }
    }

    /// Name last shown for an agent through the annotation sink
    pub fn display_name(&self, id: AgentId) -> Option<String> {
        self.names.get(&id).map(|n| n.clone())
    }

    /// Notices received so far
    pub fn notices(&self) -> Vec<(String, String)> {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl AgentLookup for MockWorld {
    fn resolve(&self, id: AgentId) -> Option<AgentProfile> {
        self.profile(id)
    }
}

impl SpatialIndex for MockWorld {
    fn is_low_priority(&self, id: AgentId) -> bool {
        self.low_priority.contains(&id)
    }

    /// Radius is ignored; neighbours are whatever [`MockWorld::place_near`] set up.
    fn nearby_agents(&self, id: AgentId, _radius: f64) -> Vec<AgentId> {
        self.neighbours
            .get(&id)
            .map(|n| n.iter().copied().filter(|other| self.agents.contains_key(other)).collect())
            .unwrap_or_default()
    }
}

impl AnnotationSink for MockWorld {
    fn set_display_name(&self, id: AgentId, name: &str) {
        self.names.insert(id, name.to_string());
    }
}

impl NoticeSink for MockWorld {
    fn notify(&self, title: &str, message: &str) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), message.to_string()));
    }
}

/// Annotation sink that remembers the last name written per agent.
#[derive(Debug, Default)]
pub struct RecordingAnnotations {
    names: DashMap<AgentId, String>,
    writes: AtomicUsize,
}

impl RecordingAnnotations {
    /// Last name written for `id`
    pub fn current(&self, id: AgentId) -> Option<String> {
        self.names.get(&id).map(|n| n.clone())
    }

    /// Total writes
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl AnnotationSink for RecordingAnnotations {
    fn set_display_name(&self, id: AgentId, name: &str) {
        self.names.insert(id, name.to_string());
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Notice sink that keeps every notice.
#[derive(Debug, Default)]
pub struct RecordingNotices {
    notices: Mutex<Vec<(String, String)>>,
}

impl RecordingNotices {
    /// Number of notices received
    pub fn count(&self) -> usize {
        self.notices.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Titles in arrival order
    pub fn titles(&self) -> Vec<String> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(title, _)| title.clone())
            .collect()
    }
}

impl NoticeSink for RecordingNotices {
    fn notify(&self, title: &str, message: &str) {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((title.to_string(), message.to_string()));
    }
}

/// Subsystem that counts every call it receives.
#[derive(Debug)]
pub struct RecordingSubsystem {
    name: String,
    interval: Duration,
    enabled: AtomicBool,
    initialized: AtomicUsize,
    updates: AtomicUsize,
    per_agent: DashMap<AgentId, usize>,
    cleaned_up: AtomicUsize,
    maintained: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl RecordingSubsystem {
    /// Recorder with the given cadence
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            enabled: AtomicBool::new(true),
            initialized: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
            per_agent: DashMap::new(),
            cleaned_up: AtomicUsize::new(0),
            maintained: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }

    /// Toggle the enabled flag
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// `initialize` calls
    pub fn initialized(&self) -> usize {
        self.initialized.load(Ordering::Relaxed)
    }

    /// `update` calls across all agents
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::Relaxed)
    }

    /// `update` calls for one agent
    pub fn updates_for(&self, id: AgentId) -> usize {
        self.per_agent.get(&id).map_or(0, |n| *n)
    }

    /// `cleanup` calls
    pub fn cleaned_up(&self) -> usize {
        self.cleaned_up.load(Ordering::Relaxed)
    }

    /// `maintain` calls
    pub fn maintained(&self) -> usize {
        self.maintained.load(Ordering::Relaxed)
    }

    /// `shutdown` calls
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SubsystemPort for RecordingSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn initialize(&self, _agent: AgentId, _initial: Option<&Value>) -> SubsystemResult<()> {
        self.initialized.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn update(&self, agent: &AgentProfile, _context: &AgentContext) -> SubsystemResult<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        *self.per_agent.entry(agent.id).or_insert(0) += 1;
        Ok(())
    }

    async fn cleanup(&self, agent: AgentId) {
        self.per_agent.remove(&agent);
        self.cleaned_up.fetch_add(1, Ordering::Relaxed);
    }

    async fn maintain(&self) {
        self.maintained.fetch_add(1, Ordering::Relaxed);
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy)]
enum FailureMode {
    Error,
    Panic,
    Hang(Duration),
}

/// Subsystem whose every update misbehaves in a fixed way.
#[derive(Debug)]
pub struct FailingSubsystem {
    name: String,
    mode: FailureMode,
}

impl FailingSubsystem {
    /// Every update returns an error
    pub fn erroring(name: impl Into<String>) -> Self {
        Self { name: name.into(), mode: FailureMode::Error }
    }

    /// Every update panics
    pub fn panicking(name: impl Into<String>) -> Self {
        Self { name: name.into(), mode: FailureMode::Panic }
    }

    /// Every update sleeps for `duration` before succeeding
    pub fn hanging(name: impl Into<String>, duration: Duration) -> Self {
        Self { name: name.into(), mode: FailureMode::Hang(duration) }
    }
}

#[async_trait]
impl SubsystemPort for FailingSubsystem {
    fn name(&self) -> &str {
        &self.name
    }

    fn interval(&self) -> Duration {
        Duration::ZERO
    }

    async fn update(&self, agent: &AgentProfile, _context: &AgentContext) -> SubsystemResult<()> {
        match self.mode {
            FailureMode::Error => Err(SubsystemError::failed(&self.name, format!("no plan for {}", agent.name))),
            FailureMode::Panic => panic!("{} lost its mind over {}", self.name, agent.name),
            FailureMode::Hang(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
        }
    }
}

/// Scripted text generator.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    ready: bool,
    panics: bool,
    script: Mutex<VecDeque<ProviderResult<String>>>,
    fallback: ProviderResult<String>,
    delay: Duration,
    calls: AtomicUsize,
    shutdowns: AtomicUsize,
    last_prompt: Mutex<Option<String>>,
}

impl MockProvider {
    fn with_fallback(fallback: ProviderResult<String>) -> Self {
        Self {
            name: "mock".to_string(),
            ready: true,
            panics: false,
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
            last_prompt: Mutex::new(None),
        }
    }

    /// Always answers `text`
    pub fn replying(text: impl Into<String>) -> Self {
        Self::with_fallback(Ok(text.into()))
    }

    /// Always fails with `error`
    pub fn failing(error: ProviderError) -> Self {
        Self::with_fallback(Err(error))
    }

    /// Plays `script` in order, then answers with an empty response
    pub fn scripted(script: Vec<ProviderResult<String>>) -> Self {
        let provider = Self::with_fallback(Err(ProviderError::EmptyResponse));
        *provider.script.lock().unwrap_or_else(PoisonError::into_inner) = script.into();
        provider
    }

    /// Reports itself as not ready
    pub fn not_ready() -> Self {
        Self {
            ready: false,
            ..Self::replying("unused")
        }
    }

    /// Panics inside every `generate` call
    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::replying("unused")
        }
    }

    /// Sleep before every answer
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Report a different name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// `generate` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    /// `shutdown` calls so far
    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::Relaxed)
    }

    /// Prompt of the most recent call
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl GenerationProvider for MockProvider {
    async fn generate(&self, request: &DialogueRequest) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        *self.last_prompt.lock().unwrap_or_else(PoisonError::into_inner) = Some(request.prompt.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panics {
            panic!("{} choked on the prompt", self.name);
        }
        let scripted = self.script.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::Relaxed);
    }
}
