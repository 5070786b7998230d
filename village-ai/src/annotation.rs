//! Debounced, time-boxed display-name annotations.
//!
//! One pending entry per agent. Arming again before the deadline replaces the
//! suffix and pushes the deadline out; it never stacks suffixes because the
//! base name is captured once, on the first arm. A periodic [`sweep`] reverts
//! everything past its deadline, and [`cancel`] drops an entry silently when
//! the agent is reaped so a revert can never reach a dead entity.
//!
//! [`sweep`]: AnnotationScheduler::sweep
//! [`cancel`]: AnnotationScheduler::cancel

use crate::host::AnnotationSink;
use crate::id::AgentId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct PendingAnnotation {
    base_name: String,
    suffix: String,
    deadline: Instant,
}

/// Delayed-action map keyed by agent id.
pub struct AnnotationScheduler {
    pending: DashMap<AgentId, PendingAnnotation>,
    sink: Arc<dyn AnnotationSink>,
}

impl AnnotationScheduler {
    /// Create a scheduler writing to `sink`
    pub fn new(sink: Arc<dyn AnnotationSink>) -> Self {
        Self {
            pending: DashMap::new(),
            sink,
        }
    }

    /// Show `base_name + suffix` now and revert to `base_name` after `delay`.
    pub fn arm(&self, id: AgentId, base_name: &str, suffix: &str, delay: Duration) {
        let deadline = Instant::now() + delay.max(Duration::from_millis(1));
        let shown = {
            let mut entry = self.pending.entry(id).or_insert_with(|| PendingAnnotation {
                base_name: base_name.to_string(),
                suffix: String::new(),
                deadline,
            });
            entry.suffix = suffix.to_string();
            entry.deadline = deadline;
            format!("{}{}", entry.base_name, entry.suffix)
        };
        self.sink.set_display_name(id, &shown);
    }

    /// Forget a pending annotation without reverting it.
    pub fn cancel(&self, id: AgentId) -> bool {
        self.pending.remove(&id).is_some()
    }

    /// Revert every annotation whose deadline has passed. Returns how many were reverted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let due: Vec<AgentId> = self
            .pending
            .iter()
            .filter(|entry| entry.deadline <= now)
            .map(|entry| *entry.key())
            .collect();

        let mut reverted = 0;
        for id in due {
            // Re-check under the write lock: the entry may have been re-armed.
            if let Some((_, annotation)) = self.pending.remove_if(&id, |_, a| a.deadline <= now) {
                self.sink.set_display_name(id, &annotation.base_name);
                reverted += 1;
            }
        }
        if reverted > 0 {
            debug!(reverted, "annotations reverted");
        }
        reverted
    }

    /// Number of annotations waiting for their revert
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop every pending annotation without reverting
    pub fn clear(&self) {
        self.pending.clear();
    }
}

impl std::fmt::Debug for AnnotationScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnnotationScheduler")
            .field("pending", &self.pending.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingAnnotations;

    fn scheduler() -> (AnnotationScheduler, Arc<RecordingAnnotations>) {
        let sink = Arc::new(RecordingAnnotations::default());
        (AnnotationScheduler::new(sink.clone()), sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_arm_then_revert_after_deadline() {
        let (scheduler, sink) = scheduler();
        let id = AgentId::from_u128(7);
        scheduler.arm(id, "Bram", " (Arguing)", Duration::from_secs(10));
        assert_eq!(sink.current(id).as_deref(), Some("Bram (Arguing)"));

        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(scheduler.sweep(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(scheduler.sweep(), 1);
        assert_eq!(sink.current(id).as_deref(), Some("Bram"));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rearm_extends_instead_of_stacking() {
        let (scheduler, sink) = scheduler();
        let id = AgentId::from_u128(7);
        scheduler.arm(id, "Bram", " (Arguing)", Duration::from_secs(10));
        tokio::time::advance(Duration::from_secs(8)).await;
        // second trigger passes the already-suffixed name; the stored base wins
        scheduler.arm(id, "Bram (Arguing)", " (Friends)", Duration::from_secs(10));
        assert_eq!(sink.current(id).as_deref(), Some("Bram (Friends)"));

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.sweep(), 0, "deadline was pushed out");
        assert_eq!(scheduler.pending(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.sweep(), 1);
        assert_eq!(sink.current(id).as_deref(), Some("Bram"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_never_reverts() {
        let (scheduler, sink) = scheduler();
        let id = AgentId::from_u128(3);
        scheduler.arm(id, "Ona", " (Friends)", Duration::from_secs(1));
        assert!(scheduler.cancel(id));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(scheduler.sweep(), 0);
        assert_eq!(sink.writes(), 1);
    }
}
