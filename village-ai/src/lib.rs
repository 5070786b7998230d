//! # Village AI
//!
//! Runtime for simulated villagers: a tick-driven orchestrator that rotates
//! a bounded window of agents through pluggable AI subsystems on a worker
//! pool, an emotion engine that is one such subsystem, and an LLM-backed
//! dialogue pipeline with semantic caching and graceful fallback.
//!
//! ## Core Concepts
//!
//! - **Orchestrator**: fair, bounded per-tick scheduling with failure isolation
//! - **SubsystemPort**: the contract every AI behaviour implements
//! - **EmotionSubsystem**: bounded emotional state with decay and contagion
//! - **DialogueOrchestrator**: cache, prompt, provider call, fallback
//! - **TimedCache**: the shared expiring cache underneath both
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use village_ai::prelude::*;
//! use village_ai::testing::MockWorld;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let world = Arc::new(MockWorld::new());
//!     let orchestrator = Orchestrator::builder(OrchestratorConfig::from_env()?)
//!         .lookup(world.clone())
//!         .spatial(world.clone())
//!         .build()?;
//!
//!     orchestrator.register_agent(world.spawn("Wren", Personality::Curious)).await?;
//!     let report = orchestrator.tick(1).await?;
//!     println!("updated {} agents", report.updated);
//!     orchestrator.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod id;
pub mod error;
pub mod config;
pub mod cache;
pub mod host;
pub mod state;
pub mod subsystem;
pub mod annotation;
pub mod emotion;
pub mod orchestrator;
pub mod dialogue;
pub mod llm;
pub mod testing;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::id::*;
    pub use crate::error::*;
    pub use crate::config::{DialogueConfig, EmotionConfig, GenerationConfig, OrchestratorConfig, ProviderKind};
    pub use crate::cache::{CacheStats, TimedCache};
    pub use crate::host::{AgentLookup, AgentProfile, AnnotationSink, NoticeSink, Personality, SpatialIndex};
    pub use crate::state::AgentContext;
    pub use crate::subsystem::SubsystemPort;
    pub use crate::annotation::AnnotationScheduler;
    pub use crate::emotion::{EmotionSubsystem, EmotionType, EmotionalEvent, EmotionalState};
    pub use crate::orchestrator::{Orchestrator, OrchestratorAnalytics, TickReport};
    pub use crate::dialogue::{
        DialogueCategory, DialogueContext, DialogueOrchestrator, DialogueResponse, GenerationProvider,
    };
    pub use crate::llm::{create_provider, test_connection};
}
