//! Contracts the host simulation implements.
//!
//! The core never holds a reference to a simulation entity. It keeps
//! [`AgentId`]s and asks the host for a fresh [`AgentProfile`] whenever it
//! needs one; `None` means the entity is gone (unloaded, dead, out of scope),
//! which is routine and answered by reaping its state.

use crate::id::AgentId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Personality tag of an agent. Drives emotion multipliers and speech style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Personality {
    /// Warm and open
    Friendly,
    /// Irritable
    Grumpy,
    /// Quiet and hesitant
    Shy,
    /// Enthusiastic
    Energetic,
    /// Slow and relaxed
    Lazy,
    /// Inquisitive
    Curious,
    /// Formal
    Serious,
    /// Upbeat
    Cheerful,
    /// Anxious
    Nervous,
    /// Assertive
    Confident,
    /// No strong traits; every multiplier is 1.0
    #[default]
    Neutral,
}

impl Personality {
    /// Lowercase name used in prompts and cache keys
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Friendly => "friendly",
            Self::Grumpy => "grumpy",
            Self::Shy => "shy",
            Self::Energetic => "energetic",
            Self::Lazy => "lazy",
            Self::Curious => "curious",
            Self::Serious => "serious",
            Self::Cheerful => "cheerful",
            Self::Nervous => "nervous",
            Self::Confident => "confident",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Personality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Personality {
    type Err = std::convert::Infallible;

    /// Unrecognised tags map to [`Personality::Neutral`].
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "friendly" => Self::Friendly,
            "grumpy" => Self::Grumpy,
            "shy" => Self::Shy,
            "energetic" => Self::Energetic,
            "lazy" => Self::Lazy,
            "curious" => Self::Curious,
            "serious" => Self::Serious,
            "cheerful" => Self::Cheerful,
            "nervous" => Self::Nervous,
            "confident" => Self::Confident,
            _ => Self::Neutral,
        })
    }
}

/// Snapshot of the host's view of an agent, produced on demand by [`AgentLookup`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProfile {
    /// Stable identity
    pub id: AgentId,
    /// Display name without any temporary annotation
    pub name: String,
    /// Personality tag
    pub personality: Personality,
    /// Profession, free-form
    pub profession: String,
}

impl AgentProfile {
    /// Create a profile with a neutral personality and no profession
    pub fn new(id: AgentId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            personality: Personality::Neutral,
            profession: "none".to_string(),
        }
    }

    /// Set the personality
    pub fn with_personality(mut self, personality: Personality) -> Self {
        self.personality = personality;
        self
    }

    /// Set the profession
    pub fn with_profession(mut self, profession: impl Into<String>) -> Self {
        self.profession = profession.into();
        self
    }
}

/// Entity lookup. Called once per selected agent per tick.
pub trait AgentLookup: Send + Sync {
    /// Resolve an id to a live profile, or `None` if the entity no longer exists.
    fn resolve(&self, id: AgentId) -> Option<AgentProfile>;
}

/// Spatial and priority queries answered by the host.
pub trait SpatialIndex: Send + Sync {
    /// Whether the agent is far from anything a player cares about.
    fn is_low_priority(&self, id: AgentId) -> bool;

    /// Agents within `radius` of `id`, excluding `id` itself.
    fn nearby_agents(&self, id: AgentId, radius: f64) -> Vec<AgentId>;
}

/// Receives temporary display-name changes.
pub trait AnnotationSink: Send + Sync {
    /// Replace the agent's visible name.
    fn set_display_name(&self, id: AgentId, name: &str);
}

/// User-facing channel for throttled dialogue problems.
pub trait NoticeSink: Send + Sync {
    /// Show a short notice.
    fn notify(&self, title: &str, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_personality_parse_falls_back_to_neutral() {
        assert_eq!("Cheerful".parse::<Personality>(), Ok(Personality::Cheerful));
        assert_eq!("mysterious".parse::<Personality>(), Ok(Personality::Neutral));
    }

    #[test]
    fn test_profile_builder() {
        let profile = AgentProfile::new(AgentId::nil(), "Mira")
            .with_personality(Personality::Shy)
            .with_profession("librarian");
        assert_eq!(profile.personality, Personality::Shy);
        assert_eq!(profile.profession, "librarian");
    }
}
