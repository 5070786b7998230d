//! Multi-dimensional emotion engine.
//!
//! Each agent carries an [`EmotionalState`]: ten intensities clamped to
//! `[0, 100]` that drift back toward a per-emotion baseline and react to
//! [`EmotionalEvent`]s scaled by a personality lookup table. The
//! [`EmotionSubsystem`] plugs the engine into the orchestrator, applies
//! isolation effects on every pass and spreads contagious events to nearby
//! agents through the host's [`SpatialIndex`].

use crate::annotation::AnnotationScheduler;
use crate::config::EmotionConfig;
use crate::error::{SubsystemError, SubsystemResult};
use crate::host::{AgentProfile, Personality, SpatialIndex};
use crate::id::AgentId;
use crate::state::AgentContext;
use crate::subsystem::SubsystemPort;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Lowest representable intensity
pub const MIN_INTENSITY: f32 = 0.0;
/// Highest representable intensity
pub const MAX_INTENSITY: f32 = 100.0;

/// Distance to baseline below which decay snaps to the baseline.
const SNAP_EPSILON: f32 = 0.01;

/// How many times an adjustment may spill into linked emotions.
const MAX_SPILL_DEPTH: u8 = 2;

/// The tracked emotions. Declaration order is the tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionType {
    /// Joy
    Happiness,
    /// Fright
    Fear,
    /// Irritation
    Anger,
    /// Affection
    Love,
    /// Interest in the new
    Curiosity,
    /// Lack of stimulation
    Boredom,
    /// Anticipation
    Excitement,
    /// Pressure
    Stress,
    /// Lack of company
    Loneliness,
    /// Quiet satisfaction
    Contentment,
}

impl EmotionType {
    /// Every emotion, in tie-break order
    pub const ALL: [EmotionType; 10] = [
        Self::Happiness,
        Self::Fear,
        Self::Anger,
        Self::Love,
        Self::Curiosity,
        Self::Boredom,
        Self::Excitement,
        Self::Stress,
        Self::Loneliness,
        Self::Contentment,
    ];

    /// Neutral resting intensity
    pub fn baseline(self) -> f32 {
        match self {
            Self::Happiness => 50.0,
            Self::Curiosity => 30.0,
            Self::Contentment => 40.0,
            _ => 0.0,
        }
    }

    /// Fraction of the distance to baseline kept after one minute
    pub fn retention_per_minute(self) -> f32 {
        match self {
            Self::Happiness => 0.95,
            Self::Fear => 0.90,
            Self::Anger => 0.85,
            Self::Love => 0.98,
            Self::Curiosity => 0.92,
            Self::Boredom => 0.88,
            Self::Excitement => 0.80,
            Self::Stress => 0.85,
            Self::Loneliness => 0.93,
            Self::Contentment => 0.96,
        }
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Happiness => "happiness",
            Self::Fear => "fear",
            Self::Anger => "anger",
            Self::Love => "love",
            Self::Curiosity => "curiosity",
            Self::Boredom => "boredom",
            Self::Excitement => "excitement",
            Self::Stress => "stress",
            Self::Loneliness => "loneliness",
            Self::Contentment => "contentment",
        }
    }

    /// Emotions that move along with this one, with the fraction they receive.
    fn linked(self) -> &'static [(EmotionType, f32)] {
        use EmotionType::*;
        match self {
            Happiness => &[(Contentment, 0.3), (Excitement, 0.2), (Stress, -0.4)],
            Fear => &[(Stress, 0.5), (Anger, 0.3), (Happiness, -0.6)],
            Anger => &[(Stress, 0.4), (Happiness, -0.5), (Love, -0.3)],
            Love => &[(Happiness, 0.6), (Contentment, 0.4), (Loneliness, -0.8)],
            Loneliness => &[(Boredom, 0.5), (Stress, 0.3), (Happiness, -0.4)],
            _ => &[],
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EmotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static PERSONALITY_MULTIPLIERS: Lazy<HashMap<(Personality, EmotionType), f32>> = Lazy::new(|| {
    use EmotionType::*;
    use Personality::*;
    let table: &[(Personality, &[(EmotionType, f32)])] = &[
        (Energetic, &[(Excitement, 1.5), (Happiness, 1.5), (Boredom, 0.5)]),
        (Shy, &[(Fear, 1.4), (Stress, 1.4), (Excitement, 0.6)]),
        (Grumpy, &[(Anger, 1.6), (Happiness, 0.7)]),
        (Cheerful, &[(Happiness, 1.4), (Excitement, 1.4), (Anger, 0.6), (Stress, 0.6)]),
        (Nervous, &[(Fear, 1.3), (Stress, 1.3), (Boredom, 1.3), (Contentment, 0.8)]),
        (Confident, &[(Fear, 0.5), (Stress, 0.5), (Excitement, 1.3)]),
    ];
    table
        .iter()
        .flat_map(|(personality, row)| {
            row.iter()
                .map(move |(emotion, factor)| ((*personality, *emotion), *factor))
        })
        .collect()
});

/// How strongly `personality` reacts to `emotion`. 1.0 when the table has no entry.
pub fn personality_multiplier(personality: Personality, emotion: EmotionType) -> f32 {
    PERSONALITY_MULTIPLIERS
        .get(&(personality, emotion))
        .copied()
        .unwrap_or(1.0)
}

/// Per-agent emotion intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionalState {
    values: [f32; 10],
    stability: f32,
}

impl Default for EmotionalState {
    fn default() -> Self {
        Self::new()
    }
}

impl EmotionalState {
    /// Every emotion at its baseline, medium stability
    pub fn new() -> Self {
        let mut values = [0.0; 10];
        for emotion in EmotionType::ALL {
            values[emotion.index()] = emotion.baseline();
        }
        Self {
            values,
            stability: 0.5,
        }
    }

    /// Current intensity
    pub fn get(&self, emotion: EmotionType) -> f32 {
        self.values[emotion.index()]
    }

    /// Overwrite an intensity, clamped to the valid range
    pub fn set(&mut self, emotion: EmotionType, value: f32) {
        let value = if value.is_finite() { value } else { emotion.baseline() };
        self.values[emotion.index()] = value.clamp(MIN_INTENSITY, MAX_INTENSITY);
    }

    /// 0.0 is volatile, 1.0 is steady
    pub fn stability(&self) -> f32 {
        self.stability
    }

    /// Set stability, clamped to `[0, 1]`
    pub fn set_stability(&mut self, stability: f32) {
        self.stability = stability.clamp(0.0, 1.0);
    }

    /// Apply a change scaled by stability, spilling into linked emotions.
    /// Returns the change applied to `emotion` itself before clamping.
    pub fn adjust(&mut self, emotion: EmotionType, delta: f32) -> f32 {
        self.adjust_at_depth(emotion, delta, 0)
    }

    fn adjust_at_depth(&mut self, emotion: EmotionType, delta: f32, depth: u8) -> f32 {
        if !delta.is_finite() {
            return 0.0;
        }
        let scaled = delta * (0.5 + 0.5 * self.stability);
        self.set(emotion, self.get(emotion) + scaled);

        if depth < MAX_SPILL_DEPTH {
            for &(linked, fraction) in emotion.linked() {
                self.adjust_at_depth(linked, scaled * fraction, depth + 1);
            }
        }
        scaled
    }

    /// Move every emotion toward its baseline for `elapsed` time.
    ///
    /// Exponential in elapsed minutes, so no single call can cross the
    /// baseline; values within a hundredth of it snap onto it.
    pub fn decay(&mut self, elapsed: Duration) {
        let minutes = elapsed.as_secs_f32() / 60.0;
        if minutes <= 0.0 {
            return;
        }
        for emotion in EmotionType::ALL {
            let baseline = emotion.baseline();
            let distance = self.get(emotion) - baseline;
            let remaining = distance * emotion.retention_per_minute().powf(minutes);
            let next = if remaining.abs() < SNAP_EPSILON {
                baseline
            } else {
                baseline + remaining
            };
            self.set(emotion, next);
        }
    }

    /// Emotion with the highest raw intensity. Ties go to the earlier variant.
    pub fn dominant_emotion(&self) -> EmotionType {
        EmotionType::ALL
            .into_iter()
            .fold(EmotionType::Happiness, |best, emotion| {
                if self.get(emotion) > self.get(best) {
                    emotion
                } else {
                    best
                }
            })
    }

    /// Emotion furthest from its baseline, with that distance.
    pub fn most_pronounced(&self) -> (EmotionType, f32) {
        EmotionType::ALL
            .into_iter()
            .map(|emotion| (emotion, (self.get(emotion) - emotion.baseline()).abs()))
            .fold((EmotionType::Contentment, 0.0), |best, candidate| {
                if candidate.1 > best.1 { candidate } else { best }
            })
    }

    /// Short mood description such as "calm" or "very anger".
    pub fn description(&self) -> String {
        let (emotion, distance) = self.most_pronounced();
        match distance {
            d if d < 10.0 => "calm".to_string(),
            d if d < 25.0 => format!("slightly {emotion}"),
            d if d < 50.0 => emotion.to_string(),
            _ => format!("very {emotion}"),
        }
    }

    /// One-sentence mood context suitable for a prompt.
    pub fn mood_context(&self) -> String {
        let mut context = format!("Emotional state: {}. ", self.description());
        for emotion in EmotionType::ALL {
            let value = self.get(emotion);
            if (value - emotion.baseline()).abs() > 30.0 {
                context.push_str(&format!("Feeling {emotion} ({}). ", value as i32));
            }
        }
        context
    }

    /// Serializable copy for the persistence collaborator
    pub fn snapshot(&self) -> EmotionalSnapshot {
        EmotionalSnapshot {
            emotions: EmotionType::ALL
                .into_iter()
                .map(|emotion| (emotion, self.get(emotion)))
                .collect(),
            stability: self.stability,
        }
    }

    /// Rebuild from a snapshot; missing emotions keep their baseline.
    pub fn from_snapshot(snapshot: &EmotionalSnapshot) -> Self {
        let mut state = Self::new();
        for (&emotion, &value) in &snapshot.emotions {
            state.set(emotion, value);
        }
        state.set_stability(snapshot.stability);
        state
    }
}

/// In-memory shape handed to and received from the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalSnapshot {
    /// Intensity per emotion
    pub emotions: BTreeMap<EmotionType, f32>,
    /// Stability factor
    #[serde(default = "default_stability")]
    pub stability: f32,
}

fn default_stability() -> f32 {
    0.5
}

/// Something that happened to an agent. Consumed once by [`EmotionSubsystem::process_event`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionalEvent {
    /// Emotion the event targets
    pub primary: EmotionType,
    /// Signed change before personality scaling
    pub intensity: f32,
    /// Where the event came from, for logs
    pub source: String,
    /// Whether nearby agents feel it too
    pub contagious: bool,
}

impl EmotionalEvent {
    /// Create a non-contagious event
    pub fn new(primary: EmotionType, intensity: f32, source: impl Into<String>) -> Self {
        Self {
            primary,
            intensity,
            source: source.into(),
            contagious: false,
        }
    }

    /// Mark the event as contagious
    pub fn contagious(mut self) -> Self {
        self.contagious = true;
        self
    }

    /// A trade went well
    pub fn successful_trade() -> Self {
        Self::new(EmotionType::Happiness, 15.0, "successful_trade")
    }

    /// A player stopped to talk
    pub fn player_interaction() -> Self {
        Self::new(EmotionType::Happiness, 8.0, "player_interaction")
    }

    /// Someone nearby died
    pub fn death_nearby() -> Self {
        Self::new(EmotionType::Fear, 30.0, "villager_death").contagious()
    }

    /// A wedding
    pub fn marriage() -> Self {
        Self::new(EmotionType::Love, 50.0, "marriage").contagious()
    }

    /// A child was born
    pub fn birth() -> Self {
        Self::new(EmotionType::Happiness, 40.0, "birth").contagious()
    }

    /// The village is under attack
    pub fn raid() -> Self {
        Self::new(EmotionType::Fear, 60.0, "raid").contagious()
    }

    /// Nobody around
    pub fn lonely() -> Self {
        Self::new(EmotionType::Loneliness, 20.0, "lonely")
    }

    /// Same chore again
    pub fn repetitive_task() -> Self {
        Self::new(EmotionType::Boredom, 10.0, "repetitive_task")
    }

    /// Found something new
    pub fn discovery() -> Self {
        Self::new(EmotionType::Curiosity, 25.0, "discovery")
    }

    /// A quarrel with another agent
    pub fn argument() -> Self {
        Self::new(EmotionType::Anger, 20.0, "argument")
    }
}

struct TrackedEmotions {
    state: EmotionalState,
    last_decay: Instant,
}

/// Orchestrator subsystem owning one [`EmotionalState`] per agent.
pub struct EmotionSubsystem {
    states: DashMap<AgentId, TrackedEmotions>,
    spatial: Arc<dyn SpatialIndex>,
    annotations: Arc<AnnotationScheduler>,
    config: EmotionConfig,
    events_processed: AtomicU64,
    contagion_applied: AtomicU64,
}

impl EmotionSubsystem {
    /// Key under which the dominant emotion is published in the agent context
    pub const CONTEXT_DOMINANT: &'static str = "emotion.dominant";
    /// Key under which the mood description is published in the agent context
    pub const CONTEXT_DESCRIPTION: &'static str = "emotion.description";

    /// Create the subsystem
    pub fn new(
        config: EmotionConfig,
        spatial: Arc<dyn SpatialIndex>,
        annotations: Arc<AnnotationScheduler>,
    ) -> Self {
        Self {
            states: DashMap::new(),
            spatial,
            annotations,
            config,
            events_processed: AtomicU64::new(0),
            contagion_applied: AtomicU64::new(0),
        }
    }

    fn track(&self, id: AgentId) -> dashmap::mapref::one::RefMut<'_, AgentId, TrackedEmotions> {
        self.states.entry(id).or_insert_with(|| TrackedEmotions {
            state: EmotionalState::new(),
            last_decay: Instant::now(),
        })
    }

    /// Apply an event to `agent`, returning the personality-adjusted delta.
    ///
    /// Strong anger or happiness/love events arm a temporary name annotation;
    /// contagious events spread to nearby agents afterwards. Agents that were
    /// never initialized, or have been cleaned up, are left alone and yield
    /// `None`.
    pub fn process_event(&self, agent: &AgentProfile, event: EmotionalEvent) -> Option<f32> {
        let adjusted = event.intensity * personality_multiplier(agent.personality, event.primary);
        {
            let Some(mut tracked) = self.states.get_mut(&agent.id) else {
                debug!(agent_id = %agent.id, source = %event.source, "event for untracked agent ignored");
                return None;
            };
            tracked.state.adjust(event.primary, adjusted);
        }
        self.events_processed.fetch_add(1, Ordering::Relaxed);
        debug!(agent_id = %agent.id, emotion = %event.primary, adjusted, source = %event.source, "emotional event");

        if adjusted >= self.config.annotation_threshold {
            let suffix = match event.primary {
                EmotionType::Anger => Some(" (Arguing)"),
                EmotionType::Happiness | EmotionType::Love => Some(" (Friends)"),
                _ => None,
            };
            if let Some(suffix) = suffix {
                self.annotations
                    .arm(agent.id, &agent.name, suffix, self.config.annotation_duration);
            }
        }

        if event.contagious {
            self.apply_contagion(agent.id, event.primary, adjusted * self.config.contagion_factor);
        }
        Some(adjusted)
    }

    /// Apply `delta` of `emotion` to every tracked agent near `source`. Returns how many were affected.
    pub fn apply_contagion(&self, source: AgentId, emotion: EmotionType, delta: f32) -> usize {
        let nearby = self
            .spatial
            .nearby_agents(source, self.config.contagion_radius);
        let mut affected = 0;
        for id in nearby.into_iter().filter(|id| *id != source) {
            if let Some(mut tracked) = self.states.get_mut(&id) {
                tracked.state.adjust(emotion, delta);
                affected += 1;
            }
        }
        self.contagion_applied
            .fetch_add(affected as u64, Ordering::Relaxed);
        affected
    }

    /// Copy of an agent's current state
    pub fn state_of(&self, id: AgentId) -> Option<EmotionalState> {
        self.states.get(&id).map(|tracked| tracked.state.clone())
    }

    /// Persistable snapshot of an agent's state
    pub fn snapshot(&self, id: AgentId) -> Option<EmotionalSnapshot> {
        self.states.get(&id).map(|tracked| tracked.state.snapshot())
    }

    /// Replace an agent's state from a persisted snapshot
    pub fn restore(&self, id: AgentId, snapshot: &EmotionalSnapshot) {
        let mut tracked = self.track(id);
        tracked.state = EmotionalState::from_snapshot(snapshot);
        tracked.last_decay = Instant::now();
    }

    /// Mood sentence for prompts; `None` for untracked agents
    pub fn mood_context(&self, id: AgentId) -> Option<String> {
        self.states.get(&id).map(|tracked| tracked.state.mood_context())
    }

    /// Number of tracked agents
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}

#[async_trait]
impl SubsystemPort for EmotionSubsystem {
    fn name(&self) -> &str {
        "emotion"
    }

    fn interval(&self) -> Duration {
        self.config.update_interval
    }

    async fn initialize(&self, agent: AgentId, initial: Option<&Value>) -> SubsystemResult<()> {
        match initial {
            Some(value) => {
                let snapshot: EmotionalSnapshot = serde_json::from_value(value.clone())
                    .map_err(|e| SubsystemError::failed(self.name(), e.to_string()))?;
                self.restore(agent, &snapshot);
            }
            None => {
                self.track(agent);
            }
        }
        Ok(())
    }

    async fn update(&self, agent: &AgentProfile, context: &AgentContext) -> SubsystemResult<()> {
        let neighbours = self
            .spatial
            .nearby_agents(agent.id, self.config.isolation_radius)
            .into_iter()
            .filter(|id| *id != agent.id)
            .count();

        let (dominant, description) = {
            let Some(mut tracked) = self.states.get_mut(&agent.id) else {
                return Ok(());
            };
            let now = Instant::now();
            let elapsed = now.saturating_duration_since(tracked.last_decay);
            tracked.last_decay = now;
            tracked.state.decay(elapsed);

            if neighbours == 0 {
                tracked.state.adjust(EmotionType::Loneliness, 3.0);
            } else if neighbours > self.config.crowd_threshold {
                tracked.state.adjust(EmotionType::Loneliness, -2.0);
            }
            (tracked.state.dominant_emotion(), tracked.state.description())
        };

        context.insert(Self::CONTEXT_DOMINANT, json!(dominant));
        context.insert(Self::CONTEXT_DESCRIPTION, json!(description));
        Ok(())
    }

    async fn cleanup(&self, agent: AgentId) {
        self.states.remove(&agent);
        self.annotations.cancel(agent);
    }

    fn analytics(&self) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert("tracked_agents".into(), json!(self.states.len()));
        map.insert(
            "events_processed".into(),
            json!(self.events_processed.load(Ordering::Relaxed)),
        );
        map.insert(
            "contagion_applied".into(),
            json!(self.contagion_applied.load(Ordering::Relaxed)),
        );
        map
    }

    async fn shutdown(&self) {
        self.states.clear();
    }
}
