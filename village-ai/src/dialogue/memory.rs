//! Per-(agent, player) conversation memory.

use super::category::DialogueCategory;
use crate::id::{AgentId, PlayerId};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

/// Characters of each message kept in the recent-text excerpt.
const EXCERPT_CHARS: usize = 80;

/// Who said a remembered line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The player
    Player,
    /// The agent
    Agent,
}

/// One remembered line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntry {
    /// Who spoke
    pub speaker: Speaker,
    /// Display name of the speaker at the time
    pub speaker_name: String,
    /// What was said
    pub message: String,
    /// Topic of the exchange
    pub category: DialogueCategory,
    /// When it was said
    pub at: DateTime<Utc>,
}

/// Everything remembered about one (agent, player) pair. Serializable for persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationLog {
    /// Oldest first
    pub entries: VecDeque<ConversationEntry>,
    /// Times each topic came up
    pub topics: BTreeMap<DialogueCategory, u32>,
    /// Last time either side spoke
    pub last_interaction: DateTime<Utc>,
}

impl ConversationLog {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            entries: VecDeque::new(),
            topics: BTreeMap::new(),
            last_interaction: now,
        }
    }

    fn push(&mut self, entry: ConversationEntry, limit: usize) {
        self.last_interaction = entry.at;
        self.entries.push_back(entry);
        while self.entries.len() > limit {
            self.entries.pop_front();
        }
    }
}

/// Bounded conversation history keyed by (agent, player).
#[derive(Debug)]
pub struct ConversationMemory {
    logs: DashMap<(AgentId, PlayerId), ConversationLog>,
    /// Entries kept per pair (two per exchange)
    entry_limit: usize,
}

impl ConversationMemory {
    /// Keep at most `exchanges` player/agent exchanges per pair.
    pub fn new(exchanges: usize) -> Self {
        Self {
            logs: DashMap::new(),
            entry_limit: exchanges.max(1) * 2,
        }
    }

    /// Remember something the player said. Counts the topic.
    pub fn record_player_message(
        &self,
        agent: AgentId,
        player: PlayerId,
        player_name: &str,
        message: &str,
        category: DialogueCategory,
    ) {
        self.record(agent, player, Speaker::Player, player_name, message, category);
    }

    /// Remember something the agent said. Counts the topic.
    pub fn record_agent_response(
        &self,
        agent: AgentId,
        player: PlayerId,
        agent_name: &str,
        message: &str,
        category: DialogueCategory,
    ) {
        self.record(agent, player, Speaker::Agent, agent_name, message, category);
    }

    fn record(
        &self,
        agent: AgentId,
        player: PlayerId,
        speaker: Speaker,
        speaker_name: &str,
        message: &str,
        category: DialogueCategory,
    ) {
        let now = Utc::now();
        let mut log = self
            .logs
            .entry((agent, player))
            .or_insert_with(|| ConversationLog::new(now));
        *log.topics.entry(category).or_insert(0) += 1;
        log.push(
            ConversationEntry {
                speaker,
                speaker_name: speaker_name.to_string(),
                message: message.to_string(),
                category,
                at: now,
            },
            self.entry_limit,
        );
    }

    /// Up to `count` most recent entries, oldest first
    pub fn history(&self, agent: AgentId, player: PlayerId, count: usize) -> Vec<ConversationEntry> {
        self.logs
            .get(&(agent, player))
            .map(|log| {
                let skip = log.entries.len().saturating_sub(count);
                log.entries.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default()
    }

    /// Short "name: message" excerpt of the last `count` entries; empty when nothing is remembered.
    pub fn recent_text(&self, agent: AgentId, player: PlayerId, count: usize) -> String {
        excerpt(&self.history(agent, player, count))
    }

    /// Times `category` came up with this player
    pub fn topic_count(&self, agent: AgentId, player: PlayerId, category: DialogueCategory) -> u32 {
        self.logs
            .get(&(agent, player))
            .and_then(|log| log.topics.get(&category).copied())
            .unwrap_or(0)
    }

    /// Topics ordered by how often they came up, most frequent first.
    pub fn topic_frequencies(&self, agent: AgentId, player: PlayerId) -> Vec<(DialogueCategory, u32)> {
        let mut topics: Vec<_> = self
            .logs
            .get(&(agent, player))
            .map(|log| log.topics.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        topics.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        topics
    }

    /// Last time this pair spoke
    pub fn last_interaction(&self, agent: AgentId, player: PlayerId) -> Option<DateTime<Utc>> {
        self.logs.get(&(agent, player)).map(|log| log.last_interaction)
    }

    /// Forget pairs idle for longer than `age`. Returns how many were dropped.
    pub fn cleanup_older_than(&self, age: Duration) -> usize {
        let age = ChronoDuration::from_std(age).unwrap_or(ChronoDuration::MAX);
        let cutoff = Utc::now().checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let before = self.logs.len();
        self.logs.retain(|_, log| log.last_interaction >= cutoff);
        before.saturating_sub(self.logs.len())
    }

    /// Forget everything about one agent
    pub fn clear_agent(&self, agent: AgentId) {
        self.logs.retain(|(owner, _), _| *owner != agent);
    }

    /// Copy of one pair's log for persistence
    pub fn snapshot(&self, agent: AgentId, player: PlayerId) -> Option<ConversationLog> {
        self.logs.get(&(agent, player)).map(|log| log.clone())
    }

    /// Reinstate a persisted log, trimmed to the current limit
    pub fn restore(&self, agent: AgentId, player: PlayerId, mut log: ConversationLog) {
        while log.entries.len() > self.entry_limit {
            log.entries.pop_front();
        }
        self.logs.insert((agent, player), log);
    }

    /// Number of remembered pairs
    pub fn len(&self) -> usize {
        self.logs.len()
    }

    /// True when nothing is remembered
    pub fn is_empty(&self) -> bool {
        self.logs.is_empty()
    }

    /// Forget everything
    pub fn clear(&self) {
        self.logs.clear();
    }
}

/// "name: message" lines joined by spaces, each message cut to a short prefix.
pub fn excerpt(entries: &[ConversationEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            let message: String = entry.message.chars().take(EXCERPT_CHARS).collect();
            format!("{}: {}", entry.speaker_name, message)
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const AGENT: AgentId = AgentId::from_u128(1);
    const PLAYER: PlayerId = PlayerId::from_u128(2);

    #[test]
    fn test_history_is_bounded_and_ordered() {
        let memory = ConversationMemory::new(2);
        for i in 0..5 {
            memory.record_player_message(AGENT, PLAYER, "Steve", &format!("q{i}"), DialogueCategory::Trade);
            memory.record_agent_response(AGENT, PLAYER, "Wren", &format!("a{i}"), DialogueCategory::Trade);
        }
        let history = memory.history(AGENT, PLAYER, 10);
        let messages: Vec<_> = history.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["q3", "a3", "q4", "a4"]);
        assert_eq!(memory.topic_count(AGENT, PLAYER, DialogueCategory::Trade), 10);
    }

    #[test]
    fn test_recent_text_excerpt() {
        let memory = ConversationMemory::new(5);
        assert_eq!(memory.recent_text(AGENT, PLAYER, 3), "");

        memory.record_player_message(AGENT, PLAYER, "Steve", "hello", DialogueCategory::Greeting);
        memory.record_agent_response(AGENT, PLAYER, "Wren", "Good morning!", DialogueCategory::Greeting);
        assert_eq!(memory.recent_text(AGENT, PLAYER, 3), "Steve: hello Wren: Good morning!");
        assert_eq!(memory.recent_text(AGENT, PLAYER, 1), "Wren: Good morning!");
    }

    #[test]
    fn test_topic_frequencies_sorted() {
        let memory = ConversationMemory::new(10);
        memory.record_player_message(AGENT, PLAYER, "Steve", "hi", DialogueCategory::Greeting);
        for _ in 0..3 {
            memory.record_player_message(AGENT, PLAYER, "Steve", "sell?", DialogueCategory::Trade);
        }
        let topics = memory.topic_frequencies(AGENT, PLAYER);
        assert_eq!(topics[0], (DialogueCategory::Trade, 3));
        assert_eq!(topics[1], (DialogueCategory::Greeting, 1));
    }

    #[test]
    fn test_cleanup_and_clear_agent() {
        let memory = ConversationMemory::new(10);
        memory.record_player_message(AGENT, PLAYER, "Steve", "hi", DialogueCategory::Greeting);
        let mut stale = memory.snapshot(AGENT, PLAYER).unwrap();
        stale.last_interaction = Utc::now() - ChronoDuration::hours(2);
        memory.restore(AgentId::from_u128(9), PLAYER, stale);

        assert_eq!(memory.cleanup_older_than(Duration::from_secs(3600)), 1);
        assert_eq!(memory.len(), 1);

        memory.clear_agent(AGENT);
        assert!(memory.is_empty());
    }

    #[test]
    fn test_snapshot_restore_round_trip_through_json() {
        let memory = ConversationMemory::new(10);
        memory.record_agent_response(AGENT, PLAYER, "Wren", "Nice day.", DialogueCategory::Weather);
        let log = memory.snapshot(AGENT, PLAYER).unwrap();
        let json = serde_json::to_string(&log).unwrap();

        let restored = ConversationMemory::new(10);
        restored.restore(AGENT, PLAYER, serde_json::from_str(&json).unwrap());
        assert_eq!(restored.history(AGENT, PLAYER, 5)[0].message, "Nice day.");
        assert_eq!(restored.topic_count(AGENT, PLAYER, DialogueCategory::Weather), 1);
    }
}
