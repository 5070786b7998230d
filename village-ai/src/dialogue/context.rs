//! Inputs to a dialogue request.

use crate::emotion::EmotionType;
use crate::host::AgentProfile;
use crate::id::PlayerId;
use serde::{Deserialize, Serialize};

/// Coarse time-of-day bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    /// First quarter of the day
    #[default]
    Morning,
    /// Second quarter
    Afternoon,
    /// Third quarter
    Evening,
    /// Last quarter
    Night,
}

impl TimeOfDay {
    /// Length of a simulated day in ticks
    pub const DAY_TICKS: u64 = 24_000;

    /// Bucket a world time expressed in ticks
    pub fn from_ticks(ticks: u64) -> Self {
        match ticks % Self::DAY_TICKS {
            0..6_000 => Self::Morning,
            6_000..12_000 => Self::Afternoon,
            12_000..18_000 => Self::Evening,
            _ => Self::Night,
        }
    }

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Weather tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weather {
    /// Clear sky
    #[default]
    Clear,
    /// Rain
    Rain,
    /// Thunderstorm
    Thunder,
    /// Snowfall
    Snow,
}

impl Weather {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Rain => "rainy",
            Self::Thunder => "stormy",
            Self::Snow => "snowy",
        }
    }
}

/// Formatting hint for the host's chat renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueTone {
    /// Close relationship
    Friendly,
    /// Distrustful relationship
    Hostile,
    /// Agent in high spirits
    Cheerful,
    /// Agent feeling low
    Gloomy,
    /// Nothing notable
    Neutral,
}

/// Everything known about the agent, the player and the world at request time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueContext {
    /// The speaking agent
    pub agent: AgentProfile,
    /// Agent age in days
    pub age: u32,
    /// The listening player
    pub player_id: PlayerId,
    /// Player display name
    pub player_name: String,
    /// Player reputation with this agent, roughly -100 to 100
    pub reputation: i32,
    /// Legacy happiness score, 0 to 100
    pub happiness: u8,
    /// Time bucket
    pub time_of_day: TimeOfDay,
    /// Weather tag
    pub weather: Weather,
    /// Biome name
    pub biome: String,
    /// Spouse name
    pub spouse: Option<String>,
    /// Children's names
    pub children: Vec<String>,
    /// Favourite pastime
    pub hobby: Option<String>,
    /// Latest life events, newest first
    pub recent_events: Vec<String>,
    /// What the agent remembers about this player
    pub player_memory: Option<String>,
    /// Completed trades
    pub total_trades: u32,
    /// Dominant emotion, when the emotion engine tracks the agent
    pub dominant_emotion: Option<EmotionType>,
}

impl DialogueContext {
    /// Minimal context; everything else at neutral defaults
    pub fn new(agent: AgentProfile, player_id: PlayerId, player_name: impl Into<String>) -> Self {
        Self {
            agent,
            age: 150,
            player_id,
            player_name: player_name.into(),
            reputation: 0,
            happiness: 50,
            time_of_day: TimeOfDay::default(),
            weather: Weather::default(),
            biome: "plains".to_string(),
            spouse: None,
            children: Vec::new(),
            hobby: None,
            recent_events: Vec::new(),
            player_memory: None,
            total_trades: 0,
            dominant_emotion: None,
        }
    }

    /// Set reputation
    pub fn with_reputation(mut self, reputation: i32) -> Self {
        self.reputation = reputation;
        self
    }

    /// Set happiness, clamped to 100
    pub fn with_happiness(mut self, happiness: u8) -> Self {
        self.happiness = happiness.min(100);
        self
    }

    /// Set age
    pub fn with_age(mut self, age: u32) -> Self {
        self.age = age;
        self
    }

    /// Set time of day
    pub fn with_time_of_day(mut self, time_of_day: TimeOfDay) -> Self {
        self.time_of_day = time_of_day;
        self
    }

    /// Set weather
    pub fn with_weather(mut self, weather: Weather) -> Self {
        self.weather = weather;
        self
    }

    /// Set biome
    pub fn with_biome(mut self, biome: impl Into<String>) -> Self {
        self.biome = biome.into();
        self
    }

    /// Set spouse and children
    pub fn with_family(mut self, spouse: Option<String>, children: Vec<String>) -> Self {
        self.spouse = spouse;
        self.children = children;
        self
    }

    /// Set hobby
    pub fn with_hobby(mut self, hobby: impl Into<String>) -> Self {
        self.hobby = Some(hobby.into());
        self
    }

    /// Add a recent event
    pub fn with_recent_event(mut self, event: impl Into<String>) -> Self {
        self.recent_events.push(event.into());
        self
    }

    /// Set what the agent remembers about the player
    pub fn with_player_memory(mut self, memory: impl Into<String>) -> Self {
        self.player_memory = Some(memory.into());
        self
    }

    /// Set trade count
    pub fn with_total_trades(mut self, trades: u32) -> Self {
        self.total_trades = trades;
        self
    }

    /// Set dominant emotion
    pub fn with_dominant_emotion(mut self, emotion: EmotionType) -> Self {
        self.dominant_emotion = Some(emotion);
        self
    }

    /// Relationship first, then mood.
    pub fn tone(&self) -> DialogueTone {
        if self.reputation > 50 {
            DialogueTone::Friendly
        } else if self.reputation < -20 {
            DialogueTone::Hostile
        } else if self.happiness > 70 {
            DialogueTone::Cheerful
        } else if self.happiness < 30 {
            DialogueTone::Gloomy
        } else {
            DialogueTone::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::AgentId;

    fn context() -> DialogueContext {
        DialogueContext::new(AgentProfile::new(AgentId::nil(), "Wren"), PlayerId::nil(), "Steve")
    }

    #[test]
    fn test_time_of_day_buckets() {
        assert_eq!(TimeOfDay::from_ticks(1_000), TimeOfDay::Morning);
        assert_eq!(TimeOfDay::from_ticks(13_000), TimeOfDay::Evening);
        assert_eq!(TimeOfDay::from_ticks(24_000 + 20_000), TimeOfDay::Night);
    }

    #[test]
    fn test_tone_prefers_relationship() {
        assert_eq!(context().with_reputation(60).with_happiness(10).tone(), DialogueTone::Friendly);
        assert_eq!(context().with_reputation(-30).tone(), DialogueTone::Hostile);
        assert_eq!(context().with_happiness(90).tone(), DialogueTone::Cheerful);
        assert_eq!(context().with_happiness(200).happiness, 100);
        assert_eq!(context().tone(), DialogueTone::Neutral);
    }
}
