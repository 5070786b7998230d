//! Bucketed cache keys for generated dialogue.
//!
//! Numeric inputs are coarsened before they enter the key so that two
//! requests that would read the same to a player share one cached line.

use super::category::DialogueCategory;
use super::context::{DialogueContext, TimeOfDay, Weather};
use crate::host::Personality;
use crate::id::AgentId;
use serde::Serialize;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Width of one reputation tier.
pub const REPUTATION_TIER_WIDTH: i32 = 20;
/// Width of one mood tier.
pub const MOOD_TIER_WIDTH: u8 = 25;
/// Number of conversation hash buckets.
pub const CONVERSATION_BUCKETS: u64 = 1000;

/// Semantic key of a dialogue request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct DialogueFingerprint {
    /// Speaking agent
    pub agent_id: AgentId,
    /// Agent personality
    pub personality: Personality,
    /// Requested topic
    pub category: DialogueCategory,
    /// `reputation.div_euclid(20)`
    pub reputation_tier: i32,
    /// `happiness / 25`
    pub mood_tier: u8,
    /// Time bucket
    pub time_of_day: TimeOfDay,
    /// Weather tag
    pub weather: Weather,
    /// Bucketed hash of the recent conversation, `None` when there is none
    pub conversation: Option<u16>,
}

impl DialogueFingerprint {
    /// Derive the key from a context, a category and the recent conversation excerpt.
    pub fn new(context: &DialogueContext, category: DialogueCategory, recent_text: &str) -> Self {
        Self {
            agent_id: context.agent.id,
            personality: context.agent.personality,
            category,
            reputation_tier: context.reputation.div_euclid(REPUTATION_TIER_WIDTH),
            mood_tier: context.happiness.min(100) / MOOD_TIER_WIDTH,
            time_of_day: context.time_of_day,
            weather: context.weather,
            conversation: conversation_bucket(recent_text),
        }
    }
}

fn conversation_bucket(recent_text: &str) -> Option<u16> {
    let trimmed = recent_text.trim();
    if trimmed.is_empty() {
        return None;
    }
    let mut hasher = DefaultHasher::new();
    trimmed.hash(&mut hasher);
    Some((hasher.finish() % CONVERSATION_BUCKETS) as u16)
}

impl fmt::Display for DialogueFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:r{}:m{}:{}:{}:",
            self.agent_id.as_uuid(),
            self.personality,
            self.category,
            self.reputation_tier,
            self.mood_tier,
            self.time_of_day.as_str(),
            self.weather.as_str(),
        )?;
        match self.conversation {
            Some(bucket) => write!(f, "c{bucket}"),
            None => f.write_str("none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AgentProfile;
    use crate::id::PlayerId;

    fn context(reputation: i32, happiness: u8) -> DialogueContext {
        let agent = AgentProfile::new(AgentId::from_u128(7), "Wren").with_personality(Personality::Curious);
        DialogueContext::new(agent, PlayerId::from_u128(1), "Steve")
            .with_reputation(reputation)
            .with_happiness(happiness)
    }

    #[test]
    fn test_same_bucket_same_key() {
        let a = DialogueFingerprint::new(&context(41, 60), DialogueCategory::Greeting, "");
        let b = DialogueFingerprint::new(&context(48, 70), DialogueCategory::Greeting, "");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_bucket_boundary_changes_key() {
        let a = DialogueFingerprint::new(&context(19, 50), DialogueCategory::Greeting, "");
        let b = DialogueFingerprint::new(&context(21, 50), DialogueCategory::Greeting, "");
        assert_ne!(a, b);
    }

    #[test]
    fn test_negative_reputation_floors() {
        let fp = DialogueFingerprint::new(&context(-1, 50), DialogueCategory::Trade, "");
        assert_eq!(fp.reputation_tier, -1);
        let fp = DialogueFingerprint::new(&context(-20, 50), DialogueCategory::Trade, "");
        assert_eq!(fp.reputation_tier, -1);
    }

    #[test]
    fn test_conversation_and_category_are_part_of_key() {
        let ctx = context(0, 50);
        let quiet = DialogueFingerprint::new(&ctx, DialogueCategory::Greeting, "  ");
        let chatty = DialogueFingerprint::new(&ctx, DialogueCategory::Greeting, "Steve: hello there");
        assert_eq!(quiet.conversation, None);
        assert!(chatty.conversation.is_some_and(|b| u64::from(b) < CONVERSATION_BUCKETS));
        assert!(quiet.to_string().ends_with("none"));
        assert_ne!(
            DialogueFingerprint::new(&ctx, DialogueCategory::Greeting, ""),
            DialogueFingerprint::new(&ctx, DialogueCategory::Farewell, "")
        );
    }
}
