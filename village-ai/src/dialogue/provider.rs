//! Seam between the dialogue pipeline and a text generator.

use super::category::DialogueCategory;
use super::context::DialogueContext;
use super::memory::ConversationEntry;
use crate::error::ProviderResult;
use async_trait::async_trait;
use serde::Serialize;

/// Everything a provider may use to produce one line.
#[derive(Debug, Clone, Serialize)]
pub struct DialogueRequest {
    /// Speaker, listener and world state
    pub context: DialogueContext,
    /// Requested topic
    pub category: DialogueCategory,
    /// Recent exchanges, oldest first
    pub history: Vec<ConversationEntry>,
    /// Fully rendered prompt
    pub prompt: String,
}

/// A text generator.
///
/// Implementations may be slow or fail; the caller bounds every call with
/// its own timeout and never lets an error escape to the host.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Produce raw text for a request. Cleaning happens in the caller.
    async fn generate(&self, request: &DialogueRequest) -> ProviderResult<String>;

    /// Short identifier used in logs and analytics
    fn name(&self) -> &str;

    /// Whether the provider has what it needs to serve requests
    fn is_ready(&self) -> bool;

    /// Release resources. Called once when the provider is replaced or the pipeline stops.
    async fn shutdown(&self) {}
}
