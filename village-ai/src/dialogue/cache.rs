//! [`TimedCache`] specialised for generated lines.

use super::category::DialogueCategory;
use super::fingerprint::DialogueFingerprint;
use crate::cache::{CacheStats, TimedCache};
use crate::id::AgentId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

/// Generated-line cache with category-aware lifetimes.
#[derive(Debug)]
pub struct DialogueCache {
    inner: TimedCache<DialogueFingerprint, String>,
}

impl DialogueCache {
    /// Cache holding at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        // Default lifetime is only a fallback; every `put` resolves its own.
        Self {
            inner: TimedCache::new(Duration::from_secs(15 * 60), capacity),
        }
    }

    /// Live line for this key, if any
    pub fn get(&self, fingerprint: &DialogueFingerprint) -> Option<String> {
        self.inner.get(fingerprint)
    }

    /// Store a line under its category's lifetime.
    pub fn put(&self, fingerprint: DialogueFingerprint, text: String) {
        let ttl = fingerprint.category.ttl().resolve(&mut rand::thread_rng());
        self.inner.insert_with_ttl(fingerprint, text, ttl);
    }

    /// Store a line with an explicit lifetime
    pub fn put_with_ttl(&self, fingerprint: DialogueFingerprint, text: String, ttl: Duration) {
        self.inner.insert_with_ttl(fingerprint, text, ttl);
    }

    /// Drop every line spoken by `agent`. Returns how many were removed.
    pub fn invalidate_agent(&self, agent: AgentId) -> usize {
        let before = self.inner.len();
        self.inner.retain(|key, _| key.agent_id != agent);
        before.saturating_sub(self.inner.len())
    }

    /// Drop every line of one category
    pub fn invalidate_category(&self, category: DialogueCategory) {
        self.inner.retain(|key, _| key.category != category);
    }

    /// Drop everything
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Remove expired lines
    pub fn purge_expired(&self) -> usize {
        self.inner.purge_expired()
    }

    /// Number of stored lines, expired ones included until swept
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when nothing is stored
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Hit/miss counters
    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }

    /// Periodically purge expired lines until `stop` flips to true.
    pub fn spawn_sweeper(self: Arc<Self>, period: Duration, mut stop: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = self.purge_expired();
                        if purged > 0 {
                            debug!(purged, remaining = self.len(), "purged expired dialogue");
                        }
                    }
                    changed = stop.changed() => {
                        if changed.is_err() || *stop.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
