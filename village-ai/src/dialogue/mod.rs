//! LLM-backed dialogue pipeline.
//!
//! A request flows through [`DialogueOrchestrator::generate`]: feature gate,
//! provider readiness, [`DialogueFingerprint`] cache lookup, prompt assembly,
//! bounded provider call with retries, and finally cache/memory writes on
//! success or a graceful fallback on failure. Nothing in here ever returns an
//! error to the host; every outcome is a [`DialogueResponse`].

pub mod cache;
pub mod category;
pub mod context;
pub mod fingerprint;
pub mod memory;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod reporter;

pub use cache::DialogueCache;
pub use category::{CategoryTtl, DialogueCategory};
pub use context::{DialogueContext, DialogueTone, TimeOfDay, Weather};
pub use fingerprint::DialogueFingerprint;
pub use memory::{ConversationEntry, ConversationLog, ConversationMemory, Speaker};
pub use orchestrator::{DialogueAnalytics, DialogueOrchestrator};
pub use prompt::{PromptBuilder, personality_style};
pub use provider::{DialogueRequest, GenerationProvider};
pub use reporter::{ErrorKind, ErrorReporter};

use serde::Serialize;

/// Why no line was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoDialogueReason {
    /// Dynamic dialogue is switched off
    Disabled,
    /// No provider, or the provider is not ready
    NotConfigured,
    /// Every attempt failed
    GenerationFailed,
}

/// Outcome of a dialogue request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DialogueResponse {
    /// A line for the agent to speak
    Generated {
        /// The cleaned line
        text: String,
        /// Formatting hint
        tone: DialogueTone,
        /// Served from cache without a provider call
        cached: bool,
    },
    /// Short user-facing notice shown instead of dialogue
    Notice(String),
    /// Nothing to show; the host uses its static dialogue
    NoDialogue(NoDialogueReason),
}

impl DialogueResponse {
    /// The generated line, if any
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Generated { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Whether a line was produced
    pub fn is_generated(&self) -> bool {
        matches!(self, Self::Generated { .. })
    }
}
