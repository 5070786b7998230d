//! Request pipeline tying cache, memory, prompt, provider and reporter together.

use super::cache::DialogueCache;
use super::category::DialogueCategory;
use super::context::DialogueContext;
use super::fingerprint::DialogueFingerprint;
use super::memory::{ConversationEntry, ConversationMemory, excerpt};
use super::prompt::PromptBuilder;
use super::provider::{DialogueRequest, GenerationProvider};
use super::reporter::ErrorReporter;
use super::{DialogueResponse, NoDialogueReason};
use crate::cache::CacheStats;
use crate::config::DialogueConfig;
use crate::error::{ConfigResult, ProviderError, ProviderResult, panic_message};
use crate::host::NoticeSink;
use crate::llm::clean_dialogue;
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Shown when no provider is configured and silent fallback is off.
pub const NOT_CONFIGURED_NOTICE: &str = "Dynamic dialogue is not configured.";
/// Shown when generation failed and silent fallback is off.
pub const TROUBLE_NOTICE: &str = "The villager seems lost for words right now.";

#[derive(Debug, Default)]
struct DialogueStats {
    requests: AtomicU64,
    disabled: AtomicU64,
    not_configured: AtomicU64,
    cache_lookups: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    provider_calls: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

fn load(counter: &AtomicU64) -> u64 {
    counter.load(Ordering::Relaxed)
}

/// Operational snapshot of the dialogue pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DialogueAnalytics {
    /// Active provider, if any
    pub provider: Option<String>,
    /// Calls to `generate`
    pub requests: u64,
    /// Requests refused because the pipeline is off
    pub disabled: u64,
    /// Requests refused because no provider was ready
    pub not_configured: u64,
    /// Cache lookups; always `cache_hits + cache_misses`
    pub cache_lookups: u64,
    /// Lookups served from cache
    pub cache_hits: u64,
    /// Lookups that went to the provider
    pub cache_misses: u64,
    /// Provider attempts, retries included
    pub provider_calls: u64,
    /// Attempts repeated after a transient failure
    pub retries: u64,
    /// Attempts cut off by the request timeout
    pub timeouts: u64,
    /// Requests that produced a fresh line
    pub successes: u64,
    /// Requests that fell back after failing
    pub failures: u64,
    /// Error notices surfaced to the user
    pub notices_reported: u64,
    /// Error notices swallowed by the cooldown
    pub notices_suppressed: u64,
    /// Remembered (agent, player) pairs
    pub conversations: usize,
    /// Underlying cache counters
    pub cache: CacheStats,
}

/// Front door of dynamic dialogue.
pub struct DialogueOrchestrator {
    config: DialogueConfig,
    provider: RwLock<Option<Arc<dyn GenerationProvider>>>,
    cache: Arc<DialogueCache>,
    memory: Arc<ConversationMemory>,
    reporter: ErrorReporter,
    stats: DialogueStats,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for DialogueOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DialogueOrchestrator")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("reporter", &self.reporter)
            .finish_non_exhaustive()
    }
}

impl DialogueOrchestrator {
    /// Pipeline with no provider. Rejects invalid configuration.
    pub fn new(config: DialogueConfig) -> ConfigResult<Self> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            cache: Arc::new(DialogueCache::new(config.cache_capacity)),
            memory: Arc::new(ConversationMemory::new(config.conversation_history_limit)),
            reporter: ErrorReporter::new(config.error_cooldown),
            stats: DialogueStats::default(),
            provider: RwLock::new(None),
            background: Mutex::new(Vec::new()),
            shutdown_tx,
            shut_down: AtomicBool::new(false),
            config,
        })
    }

    /// Install the initial provider
    pub fn with_provider(mut self, provider: Arc<dyn GenerationProvider>) -> Self {
        self.provider = RwLock::new(Some(provider));
        self
    }

    /// Route error notices to `sink`
    pub fn with_notice_sink(mut self, sink: Arc<dyn NoticeSink>) -> Self {
        self.reporter = ErrorReporter::new(self.config.error_cooldown).with_sink(sink);
        self
    }

    /// Active configuration
    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    /// Swap the provider. The previous one is shut down. In-flight requests keep
    /// the provider they started with.
    pub async fn set_provider(&self, provider: Option<Arc<dyn GenerationProvider>>) {
        let name = provider.as_ref().map(|p| p.name().to_string());
        let previous = std::mem::replace(&mut *self.provider.write().await, provider);
        self.reporter.reset();
        info!(provider = ?name, "dialogue provider replaced");
        if let Some(previous) = previous {
            previous.shutdown().await;
        }
    }

    /// Name of the active provider
    pub async fn provider_name(&self) -> Option<String> {
        self.provider.read().await.as_ref().map(|p| p.name().to_string())
    }

    /// Whether a ready provider is installed
    pub async fn is_configured(&self) -> bool {
        self.provider.read().await.as_ref().is_some_and(|p| p.is_ready())
    }

    /// Conversation memory shared with the host
    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// Generated-line cache
    pub fn cache(&self) -> &DialogueCache {
        &self.cache
    }

    /// Produce a line, using the remembered conversation with this player as history.
    pub async fn generate(&self, context: DialogueContext, category: DialogueCategory) -> DialogueResponse {
        let history = self.memory.history(
            context.agent.id,
            context.player_id,
            self.config.history_entries,
        );
        self.generate_with_history(context, category, history).await
    }

    /// Produce a line from an explicit history. Never fails; every outcome is a response.
    pub async fn generate_with_history(
        &self,
        context: DialogueContext,
        category: DialogueCategory,
        history: Vec<ConversationEntry>,
    ) -> DialogueResponse {
        bump(&self.stats.requests);
        if !self.config.enabled || self.shut_down.load(Ordering::Acquire) {
            bump(&self.stats.disabled);
            return DialogueResponse::NoDialogue(NoDialogueReason::Disabled);
        }

        let provider = self.provider.read().await.clone();
        let Some(provider) = provider.filter(|p| p.is_ready()) else {
            bump(&self.stats.not_configured);
            return if self.config.fallback_to_static {
                DialogueResponse::NoDialogue(NoDialogueReason::NotConfigured)
            } else {
                DialogueResponse::Notice(NOT_CONFIGURED_NOTICE.to_string())
            };
        };

        let tone = context.tone();
        let recent = excerpt(&history);
        let fingerprint = DialogueFingerprint::new(&context, category, &recent);
        if self.config.cache_enabled {
            bump(&self.stats.cache_lookups);
            if let Some(text) = self.cache.get(&fingerprint) {
                bump(&self.stats.cache_hits);
                debug!(agent_id = %context.agent.id, %category, "dialogue cache hit");
                return DialogueResponse::Generated { text, tone, cached: true };
            }
            bump(&self.stats.cache_misses);
        }

        let topics = self.memory.topic_frequencies(context.agent.id, context.player_id);
        let prompt = PromptBuilder::new(&context, category)
            .with_history(&history)
            .with_topics(&topics)
            .build_prompt();
        let request = DialogueRequest {
            context,
            category,
            history,
            prompt,
        };

        match self.call_provider(provider.as_ref(), &request).await {
            Ok(text) => {
                bump(&self.stats.successes);
                if self.config.cache_enabled {
                    self.cache.put(fingerprint, text.clone());
                }
                let ctx = &request.context;
                self.memory
                    .record_agent_response(ctx.agent.id, ctx.player_id, &ctx.agent.name, &text, category);
                DialogueResponse::Generated { text, tone, cached: false }
            }
            Err(error) => {
                bump(&self.stats.failures);
                warn!(
                    agent_id = %request.context.agent.id,
                    provider = provider.name(),
                    %category,
                    %error,
                    "dialogue generation failed"
                );
                self.reporter.report(&error);
                if self.config.fallback_to_static {
                    DialogueResponse::NoDialogue(NoDialogueReason::GenerationFailed)
                } else {
                    DialogueResponse::Notice(TROUBLE_NOTICE.to_string())
                }
            }
        }
    }

    /// Bounded attempts with a fixed backoff between transient failures.
    async fn call_provider(&self, provider: &dyn GenerationProvider, request: &DialogueRequest) -> ProviderResult<String> {
        let timeout = self.config.request_timeout;
        let mut attempt = 0;
        loop {
            attempt += 1;
            bump(&self.stats.provider_calls);
            let call = AssertUnwindSafe(provider.generate(request)).catch_unwind();
            let result = match tokio::time::timeout(timeout, call).await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => Err(ProviderError::Panicked {
                    message: panic_message(panic.as_ref()),
                }),
                Err(_) => {
                    bump(&self.stats.timeouts);
                    Err(ProviderError::Timeout { duration: timeout })
                }
            };
            let result = result.and_then(|raw| clean_dialogue(&raw).ok_or(ProviderError::EmptyResponse));
            match result {
                Err(error) if error.is_transient() && attempt <= self.config.max_retries => {
                    bump(&self.stats.retries);
                    debug!(attempt, %error, "retrying dialogue generation");
                    tokio::time::sleep(self.config.retry_backoff).await;
                }
                other => return other,
            }
        }
    }

    /// Run [`generate`](Self::generate) on the runtime without blocking the caller.
    pub fn spawn_generate(self: &Arc<Self>, context: DialogueContext, category: DialogueCategory) -> JoinHandle<DialogueResponse> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.generate(context, category).await })
    }

    /// Counters and cache statistics
    pub async fn analytics(&self) -> DialogueAnalytics {
        let stats = &self.stats;
        DialogueAnalytics {
            provider: self.provider_name().await,
            requests: load(&stats.requests),
            disabled: load(&stats.disabled),
            not_configured: load(&stats.not_configured),
            cache_lookups: load(&stats.cache_lookups),
            cache_hits: load(&stats.cache_hits),
            cache_misses: load(&stats.cache_misses),
            provider_calls: load(&stats.provider_calls),
            retries: load(&stats.retries),
            timeouts: load(&stats.timeouts),
            successes: load(&stats.successes),
            failures: load(&stats.failures),
            notices_reported: self.reporter.reported(),
            notices_suppressed: self.reporter.suppressed(),
            conversations: self.memory.len(),
            cache: self.cache.stats(),
        }
    }

    /// Start the cache sweeper and the conversation-memory cleanup loop. Idempotent.
    pub async fn start_background(&self) {
        let mut background = self.background.lock().await;
        if !background.is_empty() || self.shut_down.load(Ordering::Acquire) {
            return;
        }

        let period = self.config.cache_sweep_interval;
        background.push(Arc::clone(&self.cache).spawn_sweeper(period, self.shutdown_tx.subscribe()));

        let memory = Arc::clone(&self.memory);
        let retention = self.config.memory_retention;
        let mut stop = self.shutdown_tx.subscribe();
        background.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let dropped = memory.cleanup_older_than(retention);
                        if dropped > 0 {
                            debug!(dropped, "forgot idle conversations");
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
        }));
        info!(sweep_interval = ?period, "dialogue background tasks started");
    }

    /// Stop background work, shut the provider down and clear the cache. Idempotent.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.background.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        if let Some(provider) = self.provider.write().await.take() {
            provider.shutdown().await;
        }
        self.cache.clear();
        info!("dialogue pipeline shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AgentProfile;
    use crate::id::{AgentId, PlayerId};
    use crate::testing::{MockProvider, RecordingNotices};

    fn context() -> DialogueContext {
        DialogueContext::new(
            AgentProfile::new(AgentId::from_u128(1), "Wren"),
            PlayerId::from_u128(2),
            "Steve",
        )
    }

    fn config() -> DialogueConfig {
        DialogueConfig::default().with_retries(0, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let provider = Arc::new(MockProvider::replying("Hi"));
        let dialogue = DialogueOrchestrator::new(config().with_enabled(false))
            .unwrap()
            .with_provider(provider.clone());
        let response = dialogue.generate(context(), DialogueCategory::Greeting).await;
        assert_eq!(response, DialogueResponse::NoDialogue(NoDialogueReason::Disabled));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_fallback_or_notice() {
        let silent = DialogueOrchestrator::new(config()).unwrap();
        assert_eq!(
            silent.generate(context(), DialogueCategory::Greeting).await,
            DialogueResponse::NoDialogue(NoDialogueReason::NotConfigured)
        );

        let loud = DialogueOrchestrator::new(config().with_fallback_to_static(false))
            .unwrap()
            .with_provider(Arc::new(MockProvider::not_ready()));
        assert_eq!(
            loud.generate(context(), DialogueCategory::Greeting).await,
            DialogueResponse::Notice(NOT_CONFIGURED_NOTICE.to_string())
        );
        assert!(!loud.is_configured().await);
    }

    #[tokio::test]
    async fn test_second_request_hits_cache() {
        let provider = Arc::new(MockProvider::replying("\"Good morning, Steve\""));
        let dialogue = DialogueOrchestrator::new(config()).unwrap().with_provider(provider.clone());

        let first = dialogue
            .generate_with_history(context(), DialogueCategory::Greeting, Vec::new())
            .await;
        let second = dialogue
            .generate_with_history(context(), DialogueCategory::Greeting, Vec::new())
            .await;

        assert_eq!(first.text(), Some("Good morning, Steve."));
        assert!(matches!(second, DialogueResponse::Generated { cached: true, .. }));
        assert_eq!(provider.calls(), 1);

        let analytics = dialogue.analytics().await;
        assert_eq!(analytics.cache_hits + analytics.cache_misses, analytics.cache_lookups);
        assert_eq!(analytics.cache_hits, 1);
        assert_eq!(analytics.provider.as_deref(), Some("mock"));
    }

    #[tokio::test]
    async fn test_success_is_remembered() {
        let provider = Arc::new(MockProvider::replying("Lovely rain."));
        let dialogue = DialogueOrchestrator::new(config()).unwrap().with_provider(provider);
        dialogue.generate(context(), DialogueCategory::Weather).await;

        let history = dialogue.memory().history(AgentId::from_u128(1), PlayerId::from_u128(2), 5);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].message, "Lovely rain.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_is_retried() {
        let provider = Arc::new(MockProvider::scripted(vec![
            Err(ProviderError::Network("reset".into())),
            Ok("Second time lucky".to_string()),
        ]));
        let dialogue = DialogueOrchestrator::new(config().with_retries(1, Duration::from_millis(50)))
            .unwrap()
            .with_provider(provider.clone());

        let response = dialogue.generate(context(), DialogueCategory::Story).await;
        assert_eq!(response.text(), Some("Second time lucky."));
        assert_eq!(provider.calls(), 2);
        assert_eq!(dialogue.analytics().await.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(MockProvider::replying("late").with_delay(Duration::from_secs(60)));
        let notices = Arc::new(RecordingNotices::default());
        let dialogue = DialogueOrchestrator::new(
            config()
                .with_request_timeout(Duration::from_secs(1))
                .with_fallback_to_static(false),
        )
        .unwrap()
        .with_provider(provider)
        .with_notice_sink(notices.clone());

        let response = dialogue.generate(context(), DialogueCategory::Gossip).await;
        assert_eq!(response, DialogueResponse::Notice(TROUBLE_NOTICE.to_string()));
        assert_eq!(dialogue.analytics().await.timeouts, 1);
        assert_eq!(notices.count(), 1);
        assert!(dialogue.cache().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let provider = Arc::new(MockProvider::failing(ProviderError::AuthenticationFailed {
            reason: "bad key".into(),
        }));
        let dialogue = DialogueOrchestrator::new(config().with_retries(3, Duration::ZERO))
            .unwrap()
            .with_provider(provider.clone());
        let response = dialogue.generate(context(), DialogueCategory::Trade).await;
        assert_eq!(response, DialogueResponse::NoDialogue(NoDialogueReason::GenerationFailed));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn test_provider_panic_falls_back() {
        let provider = Arc::new(MockProvider::panicking());
        let notices = Arc::new(RecordingNotices::default());
        let dialogue = Arc::new(
            DialogueOrchestrator::new(config().with_retries(3, Duration::ZERO))
                .unwrap()
                .with_provider(provider.clone())
                .with_notice_sink(notices.clone()),
        );

        let response = dialogue
            .spawn_generate(context(), DialogueCategory::Greeting)
            .await
            .unwrap();
        assert_eq!(response, DialogueResponse::NoDialogue(NoDialogueReason::GenerationFailed));
        assert_eq!(provider.calls(), 1);
        assert_eq!(notices.count(), 1);
        assert_eq!(dialogue.analytics().await.failures, 1);
        assert!(dialogue.cache().is_empty());
    }

    #[tokio::test]
    async fn test_set_provider_swaps_and_shuts_down_previous() {
        let first = Arc::new(MockProvider::replying("one"));
        let dialogue = DialogueOrchestrator::new(config()).unwrap().with_provider(first.clone());
        dialogue
            .set_provider(Some(Arc::new(MockProvider::replying("two").named("other"))))
            .await;
        assert_eq!(dialogue.provider_name().await.as_deref(), Some("other"));
        assert_eq!(first.shutdowns(), 1);

        dialogue.set_provider(None).await;
        assert!(!dialogue.is_configured().await);
    }

    #[tokio::test]
    async fn test_spawn_generate_and_shutdown() {
        let provider = Arc::new(MockProvider::replying("Farewell"));
        let dialogue = Arc::new(DialogueOrchestrator::new(config()).unwrap().with_provider(provider.clone()));
        dialogue.start_background().await;

        let response = dialogue
            .spawn_generate(context(), DialogueCategory::Farewell)
            .await
            .unwrap();
        assert_eq!(response.text(), Some("Farewell."));

        dialogue.shutdown().await;
        dialogue.shutdown().await;
        assert_eq!(provider.shutdowns(), 1);
        assert_eq!(
            dialogue.generate(context(), DialogueCategory::Farewell).await,
            DialogueResponse::NoDialogue(NoDialogueReason::Disabled)
        );
    }
}
