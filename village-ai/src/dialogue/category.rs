//! Dialogue topics and how long their generated lines may be reused.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

/// What the agent is asked to talk about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogueCategory {
    /// Opening line
    Greeting,
    /// Remark about the weather
    Weather,
    /// The agent's profession
    Work,
    /// Spouse, children, family life
    Family,
    /// Village news
    Gossip,
    /// Commerce
    Trade,
    /// The agent's hobby
    Hobby,
    /// How the agent feels
    Mood,
    /// Life advice
    Advice,
    /// A short tale
    Story,
    /// Closing line
    Farewell,
}

/// How long a generated line stays reusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryTtl {
    /// Always the same lifetime
    Fixed(Duration),
    /// `base` plus a uniformly random share of `spread`
    Jittered {
        /// Minimum lifetime
        base: Duration,
        /// Maximum extra lifetime
        spread: Duration,
    },
}

impl CategoryTtl {
    /// Pick a concrete lifetime
    pub fn resolve(&self, rng: &mut impl Rng) -> Duration {
        match *self {
            Self::Fixed(ttl) => ttl,
            Self::Jittered { base, spread } => {
                let extra_ms = rng.gen_range(0..=spread.as_millis() as u64);
                base + Duration::from_millis(extra_ms)
            }
        }
    }

    /// Upper bound of [`resolve`](Self::resolve)
    pub fn max(&self) -> Duration {
        match *self {
            Self::Fixed(ttl) => ttl,
            Self::Jittered { base, spread } => base + spread,
        }
    }
}

impl DialogueCategory {
    /// Every category
    pub const ALL: [DialogueCategory; 11] = [
        Self::Greeting,
        Self::Weather,
        Self::Work,
        Self::Family,
        Self::Gossip,
        Self::Trade,
        Self::Hobby,
        Self::Mood,
        Self::Advice,
        Self::Story,
        Self::Farewell,
    ];

    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Weather => "weather",
            Self::Work => "work",
            Self::Family => "family",
            Self::Gossip => "gossip",
            Self::Trade => "trade",
            Self::Hobby => "hobby",
            Self::Mood => "mood",
            Self::Advice => "advice",
            Self::Story => "story",
            Self::Farewell => "farewell",
        }
    }

    /// Cache lifetime. Small talk expires fast, stable topics linger, the rest is jittered.
    pub fn ttl(&self) -> CategoryTtl {
        match self {
            Self::Greeting | Self::Farewell => CategoryTtl::Fixed(2 * MINUTE),
            Self::Gossip | Self::Mood => CategoryTtl::Fixed(5 * MINUTE),
            Self::Weather => CategoryTtl::Fixed(10 * MINUTE),
            Self::Work | Self::Hobby => CategoryTtl::Fixed(15 * MINUTE),
            Self::Family => CategoryTtl::Fixed(20 * MINUTE),
            Self::Advice | Self::Story => CategoryTtl::Fixed(30 * MINUTE),
            Self::Trade => CategoryTtl::Jittered {
                base: 5 * MINUTE,
                spread: 10 * MINUTE,
            },
        }
    }
}

impl fmt::Display for DialogueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
