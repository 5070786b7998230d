//! Concrete text generators and the factory that picks one from configuration.

pub mod anthropic;
pub mod local;

pub use anthropic::AnthropicProvider;
pub use local::LocalProvider;

use crate::config::{GenerationConfig, ProviderKind};
use crate::dialogue::{DialogueCategory, DialogueContext, DialogueRequest, GenerationProvider};
use crate::error::{ProviderError, ProviderResult};
use crate::host::AgentProfile;
use crate::id::{AgentId, PlayerId};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

type Factory = fn(&GenerationConfig) -> ProviderResult<Arc<dyn GenerationProvider>>;

/// Constructors per backend. [`ProviderKind::None`] has no entry.
const FACTORIES: &[(ProviderKind, Factory)] = &[
    (ProviderKind::Anthropic, build_anthropic),
    (ProviderKind::Local, build_local),
];

fn build_anthropic(config: &GenerationConfig) -> ProviderResult<Arc<dyn GenerationProvider>> {
    Ok(Arc::new(AnthropicProvider::from_config(config)?))
}

fn build_local(config: &GenerationConfig) -> ProviderResult<Arc<dyn GenerationProvider>> {
    Ok(Arc::new(LocalProvider::from_config(config)?))
}

/// Speaker labels models like to prepend.
const SPEAKER_PREFIXES: &[&str] = &[
    "villager says:",
    "villager:",
    "response:",
    "answer:",
    "dialogue:",
    "assistant:",
];

/// Build the configured provider. `Ok(None)` means dynamic dialogue is switched off.
pub fn create_provider(config: &GenerationConfig) -> ProviderResult<Option<Arc<dyn GenerationProvider>>> {
    config
        .validate()
        .map_err(|e| ProviderError::Configuration(e.to_string()))?;
    let Some((_, factory)) = FACTORIES.iter().find(|(kind, _)| *kind == config.provider) else {
        return Ok(None);
    };
    let provider = factory(config)?;
    info!(provider = provider.name(), "created dialogue provider");
    Ok(Some(provider))
}

/// Send one probe request through a throwaway provider built from `config`.
///
/// The active provider of any running pipeline is untouched.
pub async fn test_connection(config: &GenerationConfig, timeout: Duration) -> ProviderResult<String> {
    let provider = create_provider(config)?
        .ok_or_else(|| ProviderError::Configuration("no provider configured".to_string()))?;
    if !provider.is_ready() {
        return Err(ProviderError::NotReady {
            reason: format!("{} is missing configuration", provider.name()),
        });
    }

    let request = DialogueRequest {
        context: DialogueContext::new(AgentProfile::new(AgentId::nil(), "Tester"), PlayerId::nil(), "Operator"),
        category: DialogueCategory::Greeting,
        history: Vec::new(),
        prompt: "Reply with a short friendly greeting.".to_string(),
    };
    let result = match tokio::time::timeout(timeout, provider.generate(&request)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout { duration: timeout }),
    };
    provider.shutdown().await;
    let raw = result?;
    clean_dialogue(&raw).ok_or(ProviderError::EmptyResponse)
}

/// Normalize raw model output into one speakable line.
///
/// Collapses whitespace, strips surrounding quotes and speaker labels and
/// makes sure the line ends in punctuation. `None` if nothing is left.
pub fn clean_dialogue(raw: &str) -> Option<String> {
    let mut text = raw.replace("\\n", " ").split_whitespace().collect::<Vec<_>>().join(" ");
    loop {
        let before = text.len();
        text = text.trim_matches('"').trim().to_string();
        if let Some(prefix) = SPEAKER_PREFIXES
            .iter()
            .find(|prefix| text.get(..prefix.len()).is_some_and(|head| head.eq_ignore_ascii_case(prefix)))
        {
            text = text[prefix.len()..].trim().to_string();
        }
        if text.len() == before {
            break;
        }
    }
    if text.is_empty() {
        return None;
    }
    if !text.ends_with(['.', '!', '?']) {
        text.push('.');
    }
    Some(text)
}
