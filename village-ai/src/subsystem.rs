//! The contract every pluggable AI subsystem implements.

use crate::error::SubsystemResult;
use crate::host::AgentProfile;
use crate::id::AgentId;
use crate::state::AgentContext;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;

/// A per-agent AI behaviour driven by the orchestrator.
///
/// The orchestrator never runs two updates of the same subsystem for the same
/// agent at once, but does run updates for different agents concurrently.
/// Updates should be short and CPU-bound; anything that needs I/O goes
/// through the asynchronous dialogue pipeline instead of blocking here.
#[async_trait]
pub trait SubsystemPort: Send + Sync {
    /// Stable name, used for cadence bookkeeping and metrics
    fn name(&self) -> &str;

    /// Minimum spacing between two updates for the same agent
    fn interval(&self) -> Duration;

    /// Disabled subsystems are skipped without being marked as run
    fn is_enabled(&self) -> bool {
        true
    }

    /// Called once when an agent is registered
    async fn initialize(&self, _agent: AgentId, _initial: Option<&Value>) -> SubsystemResult<()> {
        Ok(())
    }

    /// Periodic work for one agent
    async fn update(&self, agent: &AgentProfile, context: &AgentContext) -> SubsystemResult<()>;

    /// Drop everything held for an agent that left
    async fn cleanup(&self, _agent: AgentId) {}

    /// Long-period housekeeping
    async fn maintain(&self) {}

    /// Subsystem-specific counters for the analytics snapshot
    fn analytics(&self) -> Map<String, Value> {
        Map::new()
    }

    /// Release resources; called once, in reverse registration order
    async fn shutdown(&self) {}
}
