//! Configuration for the orchestrator, the emotion engine and the dialogue pipeline.
//!
//! Every struct has sensible defaults, builder-style `with_*` setters, serde
//! support (durations as milliseconds) and a `from_env()` constructor reading
//! `VILLAGE_AI_*` variables. Call `validate()` before use; constructors that
//! consume a config do so themselves.

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Serde helper that stores a [`Duration`] as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Read and parse an environment variable, returning `None` when it is unset.
fn env_parse<T: FromStr>(key: &str) -> ConfigResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

fn env_millis(key: &str) -> ConfigResult<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}

/// Default worker count: available parallelism, never fewer than two.
fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
        .max(2)
}

/// Scheduling and lifecycle settings for the [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of agent updates running concurrently
    pub worker_threads: usize,
    /// Floor on agents visited per tick
    pub min_updates_per_tick: usize,
    /// Ceiling on agents visited per tick
    pub max_updates_per_tick: usize,
    /// The per-tick window is `population / population_divisor`, clamped
    pub population_divisor: usize,
    /// Low-priority agents run on one visit out of every `divisor`
    pub low_priority_tick_divisor: u64,
    /// Agents idle for longer than this are reaped by maintenance
    #[serde(with = "duration_ms")]
    pub stale_threshold: Duration,
    /// Period of the background maintenance loop
    #[serde(with = "duration_ms")]
    pub maintenance_interval: Duration,
    /// Period of the delayed-annotation sweep
    #[serde(with = "duration_ms")]
    pub annotation_sweep_interval: Duration,
    /// Hard limit on one subsystem update for one agent
    #[serde(with = "duration_ms")]
    pub subsystem_timeout: Duration,
    /// Wall-time budget of a whole tick; overruns are logged
    #[serde(with = "duration_ms")]
    pub tick_budget: Duration,
    /// How long shutdown waits for in-flight work before aborting it
    #[serde(with = "duration_ms")]
    pub shutdown_grace: Duration,
    /// How long an analytics snapshot is reused
    #[serde(with = "duration_ms")]
    pub analytics_ttl: Duration,
    /// Registry size that triggers an eager stale sweep on registration
    pub max_tracked_agents: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_workers(),
            min_updates_per_tick: 1,
            max_updates_per_tick: 50,
            population_divisor: 20,
            low_priority_tick_divisor: 5,
            stale_threshold: Duration::from_secs(60 * 60),
            maintenance_interval: Duration::from_secs(5 * 60),
            annotation_sweep_interval: Duration::from_secs(1),
            subsystem_timeout: Duration::from_millis(250),
            tick_budget: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(5),
            analytics_ttl: Duration::from_secs(30),
            max_tracked_agents: 10_000,
        }
    }
}

impl OrchestratorConfig {
    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from `VILLAGE_AI_*` environment variables on top of the defaults.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse("VILLAGE_AI_POOL_SIZE")? {
            config.worker_threads = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_MIN_UPDATES_PER_TICK")? {
            config.min_updates_per_tick = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_MAX_UPDATES_PER_TICK")? {
            config.max_updates_per_tick = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_LOW_PRIORITY_DIVISOR")? {
            config.low_priority_tick_divisor = v;
        }
        if let Some(v) = env_millis("VILLAGE_AI_STALE_THRESHOLD_MS")? {
            config.stale_threshold = v;
        }
        if let Some(v) = env_millis("VILLAGE_AI_MAINTENANCE_INTERVAL_MS")? {
            config.maintenance_interval = v;
        }
        if let Some(v) = env_millis("VILLAGE_AI_TICK_BUDGET_MS")? {
            config.tick_budget = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the worker pool size
    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = workers;
        self
    }

    /// Set the per-tick floor and ceiling
    pub fn with_updates_per_tick(mut self, min: usize, max: usize) -> Self {
        self.min_updates_per_tick = min;
        self.max_updates_per_tick = max;
        self
    }

    /// Set the low-priority tick divisor
    pub fn with_low_priority_divisor(mut self, divisor: u64) -> Self {
        self.low_priority_tick_divisor = divisor;
        self
    }

    /// Set the stale threshold
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Set the maintenance period
    pub fn with_maintenance_interval(mut self, interval: Duration) -> Self {
        self.maintenance_interval = interval;
        self
    }

    /// Set the per-update timeout
    pub fn with_subsystem_timeout(mut self, timeout: Duration) -> Self {
        self.subsystem_timeout = timeout;
        self
    }

    /// Set the per-tick wall-time budget
    pub fn with_tick_budget(mut self, budget: Duration) -> Self {
        self.tick_budget = budget;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set how long analytics snapshots are reused
    pub fn with_analytics_ttl(mut self, ttl: Duration) -> Self {
        self.analytics_ttl = ttl;
        self
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.min_updates_per_tick == 0 || self.min_updates_per_tick > self.max_updates_per_tick {
            return Err(ConfigError::InvalidRange {
                field: "updates_per_tick",
                reason: format!(
                    "floor {} must be in 1..={}",
                    self.min_updates_per_tick, self.max_updates_per_tick
                ),
            });
        }
        if self.population_divisor == 0 {
            return Err(ConfigError::InvalidRange {
                field: "population_divisor",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.low_priority_tick_divisor == 0 {
            return Err(ConfigError::InvalidRange {
                field: "low_priority_tick_divisor",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Tuning of the emotion engine's side effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Per-agent cadence of the decay pass
    #[serde(with = "duration_ms")]
    pub update_interval: Duration,
    /// Radius handed to the spatial collaborator for contagion
    pub contagion_radius: f64,
    /// Fraction of the adjusted delta received by nearby agents
    pub contagion_factor: f32,
    /// Radius used to decide whether an agent is isolated
    pub isolation_radius: f64,
    /// Neighbour count above which loneliness eases
    pub crowd_threshold: usize,
    /// Minimum adjusted delta that triggers a visible annotation
    pub annotation_threshold: f32,
    /// How long an annotation stays before it is reverted
    #[serde(with = "duration_ms")]
    pub annotation_duration: Duration,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            contagion_radius: 10.0,
            contagion_factor: 0.3,
            isolation_radius: 20.0,
            crowd_threshold: 5,
            annotation_threshold: 10.0,
            // 200 simulation ticks at 20 ticks per second
            annotation_duration: Duration::from_secs(10),
        }
    }
}

impl EmotionConfig {
    /// Set the decay cadence
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Set the contagion radius
    pub fn with_contagion_radius(mut self, radius: f64) -> Self {
        self.contagion_radius = radius;
        self
    }

    /// Set the annotation lifetime
    pub fn with_annotation_duration(mut self, duration: Duration) -> Self {
        self.annotation_duration = duration;
        self
    }
}

/// Behaviour of the dialogue pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DialogueConfig {
    /// Master switch; when off every request yields "no dialogue"
    pub enabled: bool,
    /// On failure return "no dialogue" instead of a visible notice
    pub fallback_to_static: bool,
    /// Whether generated lines are cached
    pub cache_enabled: bool,
    /// Maximum number of cached lines
    pub cache_capacity: usize,
    /// Hard timeout of one provider attempt
    #[serde(with = "duration_ms")]
    pub request_timeout: Duration,
    /// Extra attempts after a transient failure
    pub max_retries: u32,
    /// Pause between attempts
    #[serde(with = "duration_ms")]
    pub retry_backoff: Duration,
    /// Number of remembered exchanges fed into fingerprint and prompt
    pub history_entries: usize,
    /// Exchanges kept per (agent, player) pair
    pub conversation_history_limit: usize,
    /// Period of the background cache sweep
    #[serde(with = "duration_ms")]
    pub cache_sweep_interval: Duration,
    /// Minimum spacing between two user-visible notices of the same kind
    #[serde(with = "duration_ms")]
    pub error_cooldown: Duration,
    /// Conversations idle for longer than this are forgotten
    #[serde(with = "duration_ms")]
    pub memory_retention: Duration,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fallback_to_static: true,
            cache_enabled: true,
            cache_capacity: 1000,
            request_timeout: Duration::from_secs(10),
            max_retries: 1,
            retry_backoff: Duration::from_millis(250),
            history_entries: 3,
            conversation_history_limit: 10,
            cache_sweep_interval: Duration::from_secs(10 * 60),
            error_cooldown: Duration::from_secs(30),
            memory_retention: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl DialogueConfig {
    /// Load overrides from `VILLAGE_AI_*` environment variables on top of the defaults.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse("VILLAGE_AI_DYNAMIC_DIALOGUE")? {
            config.enabled = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_FALLBACK_TO_STATIC")? {
            config.fallback_to_static = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_DIALOGUE_CACHE")? {
            config.cache_enabled = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_DIALOGUE_CACHE_SIZE")? {
            config.cache_capacity = v;
        }
        if let Some(v) = env_millis("VILLAGE_AI_LLM_TIMEOUT_MS")? {
            config.request_timeout = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_LLM_MAX_RETRIES")? {
            config.max_retries = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_CONVERSATION_HISTORY_LIMIT")? {
            config.conversation_history_limit = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Enable or disable the whole pipeline
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Choose between silent fallback and a visible notice
    pub fn with_fallback_to_static(mut self, fallback: bool) -> Self {
        self.fallback_to_static = fallback;
        self
    }

    /// Enable or disable caching
    pub fn with_cache(mut self, enabled: bool, capacity: usize) -> Self {
        self.cache_enabled = enabled;
        self.cache_capacity = capacity;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set retry count and backoff
    pub fn with_retries(mut self, max_retries: u32, backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_backoff = backoff;
        self
    }

    /// Set the notice cooldown
    pub fn with_error_cooldown(mut self, cooldown: Duration) -> Self {
        self.error_cooldown = cooldown;
        self
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache_enabled && self.cache_capacity == 0 {
            return Err(ConfigError::InvalidRange {
                field: "cache_capacity",
                reason: "must be at least 1 when caching is enabled".to_string(),
            });
        }
        let timeout = self.request_timeout.as_millis();
        if !(100..=3_600_000).contains(&timeout) {
            return Err(ConfigError::InvalidRange {
                field: "request_timeout",
                reason: format!("{timeout}ms is outside 100ms..=1h"),
            });
        }
        if self.conversation_history_limit == 0 {
            return Err(ConfigError::InvalidRange {
                field: "conversation_history_limit",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Which generation backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// No backend; dialogue always falls back
    #[default]
    None,
    /// Anthropic Messages API
    Anthropic,
    /// OpenAI-compatible completion server on the local network
    Local,
}

impl ProviderKind {
    /// Name used in configuration and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Anthropic => "anthropic",
            Self::Local => "local",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "anthropic" | "claude" => Ok(Self::Anthropic),
            "local" => Ok(Self::Local),
            other => Err(ConfigError::UnknownProvider(other.to_string())),
        }
    }
}

/// Settings for the active generation backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Backend to construct
    pub provider: ProviderKind,
    /// API key, when the backend needs one
    pub api_key: Option<String>,
    /// Endpoint override
    pub endpoint: Option<String>,
    /// Model override
    pub model: Option<String>,
    /// Sampling temperature, 0.0 to 2.0
    pub temperature: f32,
    /// Output length limit
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::None,
            api_key: None,
            endpoint: None,
            model: None,
            temperature: 0.8,
            max_tokens: 150,
        }
    }
}

impl GenerationConfig {
    /// Create a configuration for the given backend
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            ..Default::default()
        }
    }

    /// Load from `VILLAGE_AI_LLM_*` variables. The Anthropic key falls back to `ANTHROPIC_API_KEY`.
    pub fn from_env() -> ConfigResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("VILLAGE_AI_LLM_PROVIDER") {
            config.provider = raw.parse()?;
        }
        config.api_key = std::env::var("VILLAGE_AI_LLM_API_KEY").ok().or_else(|| {
            match config.provider {
                ProviderKind::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
                _ => None,
            }
        });
        config.endpoint = std::env::var("VILLAGE_AI_LLM_ENDPOINT").ok();
        config.model = std::env::var("VILLAGE_AI_LLM_MODEL").ok();
        if let Some(v) = env_parse("VILLAGE_AI_LLM_TEMPERATURE")? {
            config.temperature = v;
        }
        if let Some(v) = env_parse("VILLAGE_AI_LLM_MAX_TOKENS")? {
            config.max_tokens = v;
        }
        config.validate()?;
        Ok(config)
    }

    /// Set the API key
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set temperature, clamped to the supported range
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    /// Reject configurations that cannot run.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidRange {
                field: "temperature",
                reason: format!("{} is outside 0.0..=2.0", self.temperature),
            });
        }
        if self.max_tokens == 0 {
            return Err(ConfigError::InvalidRange {
                field: "max_tokens",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(OrchestratorConfig::default().validate().is_ok());
        assert!(DialogueConfig::default().validate().is_ok());
        assert!(GenerationConfig::default().validate().is_ok());
        assert!(OrchestratorConfig::default().worker_threads >= 2);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = OrchestratorConfig::new().with_worker_threads(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn test_inverted_tick_range_rejected() {
        let config = OrchestratorConfig::new().with_updates_per_tick(10, 5);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRange { field: "updates_per_tick", .. })
        ));
    }

    #[test]
    fn test_request_timeout_bounds() {
        let config = DialogueConfig::default().with_request_timeout(Duration::from_millis(5));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_provider_kind_parse() {
        assert_eq!("Anthropic".parse::<ProviderKind>(), Ok(ProviderKind::Anthropic));
        assert_eq!("".parse::<ProviderKind>(), Ok(ProviderKind::None));
        assert!(matches!(
            "gpt-cloud".parse::<ProviderKind>(),
            Err(ConfigError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_durations_serialize_as_millis() {
        let config = DialogueConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["request_timeout"], 10_000);

        let parsed: OrchestratorConfig =
            serde_json::from_str(r#"{"worker_threads": 3, "tick_budget": 20}"#).unwrap();
        assert_eq!(parsed.worker_threads, 3);
        assert_eq!(parsed.tick_budget, Duration::from_millis(20));
        assert_eq!(parsed.max_updates_per_tick, 50);
    }
}
