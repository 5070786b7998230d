//! Natural-language prompt assembly.

use super::category::DialogueCategory;
use super::context::{DialogueContext, TimeOfDay};
use super::memory::{ConversationEntry, excerpt};
use crate::host::Personality;
use std::fmt::Write;

/// A topic discussed more often than this gets a "fresh angle" hint.
const OVERUSED_TOPIC_THRESHOLD: u32 = 3;
/// Recent events mentioned in the prompt.
const MAX_EVENTS: usize = 3;

const RESPONSE_GUIDELINES: &str = "\nResponse guidelines:\n\
- Stay completely in character as this villager\n\
- Keep responses under 50 words\n\
- Be conversational and natural\n\
- Don't use asterisks or action descriptions\n\
- Don't break the fourth wall or mention you're an AI\n\
- Match the personality traits in your speech patterns\n\
- Use simple, villager-appropriate language\n\
- Only respond with dialogue text, nothing else\n";

/// Speech-style instruction for a personality.
pub fn personality_style(personality: Personality) -> &'static str {
    match personality {
        Personality::Friendly => "Speak warmly and openly, use welcoming language, show genuine interest in others. ",
        Personality::Grumpy => "Be somewhat irritable, use short responses, occasionally complain about things. ",
        Personality::Shy => "Speak softly and hesitantly, use fewer words, seem a bit nervous or uncertain. ",
        Personality::Energetic => "Use exclamation points, speak enthusiastically, show excitement about topics. ",
        Personality::Lazy => "Speak slowly and casually, mention being tired or wanting to rest. ",
        Personality::Curious => "Ask questions, show interest in learning new things, mention discoveries. ",
        Personality::Serious => "Use formal language, focus on important matters, avoid jokes or casual topics. ",
        Personality::Cheerful => "Be optimistic and upbeat, find positive aspects in situations. ",
        Personality::Nervous => "Speak uncertainly, worry about things, use cautious language. ",
        Personality::Confident => "Speak assertively, show self-assurance, give advice readily. ",
        Personality::Neutral => "Speak naturally according to your character. ",
    }
}

/// Assembles the prompt for one request.
///
/// Sections, in order: character introduction, environment, relationship,
/// memory, speech style, over-used topic hint, category instructions,
/// response guidelines.
#[derive(Debug, Clone, Copy)]
pub struct PromptBuilder<'a> {
    context: &'a DialogueContext,
    category: DialogueCategory,
    history: &'a [ConversationEntry],
    topics: &'a [(DialogueCategory, u32)],
    mood: Option<&'a str>,
}

impl<'a> PromptBuilder<'a> {
    /// Builder with no history and no topic statistics
    pub fn new(context: &'a DialogueContext, category: DialogueCategory) -> Self {
        Self {
            context,
            category,
            history: &[],
            topics: &[],
            mood: None,
        }
    }

    /// Recent exchanges, oldest first
    pub fn with_history(mut self, history: &'a [ConversationEntry]) -> Self {
        self.history = history;
        self
    }

    /// Topic counts for this pair, most frequent first
    pub fn with_topics(mut self, topics: &'a [(DialogueCategory, u32)]) -> Self {
        self.topics = topics;
        self
    }

    /// Mood sentence from the emotion engine
    pub fn with_mood(mut self, mood: &'a str) -> Self {
        self.mood = Some(mood);
        self
    }

    /// Render the prompt
    pub fn build_prompt(&self) -> String {
        let mut prompt = String::with_capacity(1024);
        self.character(&mut prompt);
        self.environment(&mut prompt);
        self.relationship(&mut prompt);
        self.memory(&mut prompt);
        prompt.push_str(personality_style(self.context.agent.personality));
        self.overused_topic(&mut prompt);
        self.instructions(&mut prompt);
        prompt.push_str(RESPONSE_GUIDELINES);
        prompt
    }

    fn character(&self, out: &mut String) {
        let ctx = self.context;
        let stage = match ctx.age {
            0..20 => "a young villager child",
            20..100 => "a young adult villager",
            100..300 => "an adult villager",
            _ => "an elderly villager",
        };
        let _ = write!(
            out,
            "You are {}, {stage} living in a village. Your personality is {}. ",
            ctx.agent.name, ctx.agent.personality
        );
        if let Some(profession) = profession(ctx) {
            let _ = write!(out, "You work as a {profession}. ");
        }
        let _ = write!(out, "Currently, you are feeling {}. ", happiness_description(ctx.happiness));
        if let Some(mood) = self.mood.filter(|m| !m.is_empty()) {
            out.push_str(mood);
            out.push(' ');
        }
    }

    fn environment(&self, out: &mut String) {
        let ctx = self.context;
        let _ = write!(
            out,
            "It is {} and the weather is {}. You live in a {} biome. ",
            ctx.time_of_day.as_str(),
            ctx.weather.as_str(),
            ctx.biome.replace('_', " ")
        );
    }

    fn relationship(&self, out: &mut String) {
        let ctx = self.context;
        let player = &ctx.player_name;
        let _ = match ctx.reputation {
            51.. => write!(out, "You consider {player} a close friend. "),
            21..=50 => write!(out, "You know {player} well and like them. "),
            1..=20 => write!(out, "You have a neutral opinion of {player}. "),
            -19..=0 => write!(out, "You are somewhat wary of {player}. "),
            _ => write!(out, "You don't trust {player} much. "),
        };
        if let Some(spouse) = ctx.spouse.as_deref().filter(|s| !s.is_empty()) {
            let _ = write!(out, "You are married to {spouse}. ");
        }
        match ctx.children.as_slice() {
            [] => {}
            [only] => {
                let _ = write!(out, "You have a child named {only}. ");
            }
            many => {
                let _ = write!(out, "You have children: {}. ", many.join(", "));
            }
        }
    }

    fn memory(&self, out: &mut String) {
        let ctx = self.context;
        if let Some(memory) = ctx.player_memory.as_deref().filter(|m| !m.is_empty()) {
            let _ = write!(out, "You remember: {memory} ");
            if ctx.reputation > 50 {
                out.push_str("These are fond memories. ");
            } else if ctx.reputation < -20 {
                out.push_str("These memories still trouble you. ");
            }
        }

        let recent = excerpt(self.history);
        if !recent.is_empty() {
            let _ = write!(out, "Recent conversation: {recent} ");
            if let Some((topic, count)) = self.topics.first() {
                if *count > OVERUSED_TOPIC_THRESHOLD {
                    let _ = write!(out, "You often discuss {topic} with this player. ");
                }
            }
        }

        if !ctx.recent_events.is_empty() {
            let events: Vec<String> = ctx
                .recent_events
                .iter()
                .take(MAX_EVENTS)
                .map(|event| match event_feeling(event) {
                    Some(feeling) => format!("{event} ({feeling})"),
                    None => event.clone(),
                })
                .collect();
            let _ = write!(out, "Recent events in your life: {}. ", events.join(", "));
        }

        if let Some(hobby) = ctx.hobby.as_deref().filter(|h| !h.is_empty()) {
            let _ = write!(out, "Your hobby is {}. ", hobby.to_lowercase());
        }

        if ctx.total_trades > 50 {
            let _ = write!(
                out,
                "As an experienced trader with {} completed trades, you're confident in your business skills. ",
                ctx.total_trades
            );
        } else if ctx.total_trades < 5 {
            let _ = write!(
                out,
                "You're still new to trading, having only completed {} trades. ",
                ctx.total_trades
            );
        }

        if let Some(emotion) = ctx.dominant_emotion {
            let _ = write!(out, "Currently, you're feeling particularly {}. ", emotion.as_str());
        }
    }

    fn overused_topic(&self, out: &mut String) {
        let count = self
            .topics
            .iter()
            .find(|(topic, _)| *topic == self.category)
            .map_or(0, |(_, count)| *count);
        if count > OVERUSED_TOPIC_THRESHOLD {
            let _ = write!(
                out,
                "You've talked about {} quite a bit recently, so try to approach it from a fresh angle or mention something new. ",
                self.category
            );
        }
    }

    fn instructions(&self, out: &mut String) {
        let ctx = self.context;
        match self.category {
            DialogueCategory::Greeting => {
                out.push_str("Give a greeting that matches your personality and relationship with this player. ");
                match ctx.time_of_day {
                    TimeOfDay::Morning => out.push_str("Consider mentioning it's morning. "),
                    TimeOfDay::Night => out.push_str("Consider it's late - perhaps suggest it's getting late. "),
                    _ => {}
                }
            }
            DialogueCategory::Weather => {
                let _ = write!(out, "Comment on the current {} weather. ", ctx.weather.as_str());
                out.push_str("Relate it to your work, mood, or recent activities. ");
            }
            DialogueCategory::Work => {
                let profession = profession(ctx).unwrap_or("villager");
                let _ = write!(out, "Talk about your work as a {profession}. ");
                out.push_str("Share something specific about your profession or recent work activities. ");
            }
            DialogueCategory::Family => {
                if ctx.spouse.is_some() || !ctx.children.is_empty() {
                    out.push_str("Talk about your family with warmth and care. ");
                } else {
                    out.push_str("Mention something about family life in the village or your thoughts on family. ");
                }
            }
            DialogueCategory::Gossip => {
                out.push_str("Share some light village gossip or news. Keep it friendly and not harmful. ");
            }
            DialogueCategory::Hobby => {
                let hobby = ctx.hobby.as_deref().unwrap_or("your favourite pastime");
                let _ = write!(out, "Talk enthusiastically about your hobby: {}. ", hobby.to_lowercase());
            }
            DialogueCategory::Advice => {
                out.push_str("Give helpful advice based on your life experience and personality. ");
            }
            DialogueCategory::Story => {
                out.push_str("Tell a brief, interesting story from your past or something you've witnessed in the village. ");
            }
            DialogueCategory::Mood => {
                out.push_str("Express how you're feeling today and why. ");
            }
            DialogueCategory::Trade => {
                out.push_str("Mention something about trading or commerce. ");
            }
            DialogueCategory::Farewell => {
                out.push_str("Say goodbye in a way that fits your personality. ");
            }
        }
    }
}

fn profession(ctx: &DialogueContext) -> Option<&str> {
    let profession = ctx.agent.profession.as_str();
    (!profession.is_empty() && profession != "none").then_some(profession)
}

fn happiness_description(happiness: u8) -> &'static str {
    match happiness {
        81.. => "very happy",
        61..=80 => "happy",
        41..=60 => "content",
        21..=40 => "unhappy",
        _ => "miserable",
    }
}

fn event_feeling(event: &str) -> Option<&'static str> {
    let lower = event.to_lowercase();
    if lower.contains("discovered") || lower.contains("found") {
        Some("this excited you")
    } else if lower.contains("lost") || lower.contains("died") {
        Some("this saddened you")
    } else if lower.contains("married") || lower.contains("birth") {
        Some("this brought you great joy")
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::memory::Speaker;
    use crate::emotion::EmotionType;
    use crate::host::AgentProfile;
    use crate::id::{AgentId, PlayerId};
    use chrono::Utc;

    fn context() -> DialogueContext {
        let agent = AgentProfile::new(AgentId::from_u128(1), "Wren")
            .with_personality(Personality::Grumpy)
            .with_profession("farmer");
        DialogueContext::new(agent, PlayerId::from_u128(2), "Steve")
            .with_reputation(60)
            .with_age(350)
            .with_family(Some("Ash".to_string()), vec!["Pip".to_string()])
            .with_hobby("Fishing")
            .with_recent_event("Found a diamond")
            .with_dominant_emotion(EmotionType::Anger)
    }

    #[test]
    fn test_sections_in_order() {
        let ctx = context();
        let prompt = PromptBuilder::new(&ctx, DialogueCategory::Work).build_prompt();

        let intro = prompt.find("You are Wren, an elderly villager").unwrap();
        let env = prompt.find("It is morning and the weather is clear").unwrap();
        let rel = prompt.find("You consider Steve a close friend.").unwrap();
        let style = prompt.find(personality_style(Personality::Grumpy)).unwrap();
        let task = prompt.find("Talk about your work as a farmer.").unwrap();
        let guide = prompt.find("Response guidelines:").unwrap();
        assert!(intro < env && env < rel && rel < style && style < task && task < guide);

        assert!(prompt.contains("You are married to Ash. You have a child named Pip."));
        assert!(prompt.contains("Found a diamond (this excited you)"));
        assert!(prompt.contains("Your hobby is fishing."));
        assert!(prompt.contains("feeling particularly anger"));
    }

    #[test]
    fn test_history_and_overused_topic() {
        let ctx = context();
        let history = vec![ConversationEntry {
            speaker: Speaker::Player,
            speaker_name: "Steve".to_string(),
            message: "Got any wheat?".to_string(),
            category: DialogueCategory::Trade,
            at: Utc::now(),
        }];
        let topics = [(DialogueCategory::Trade, 5), (DialogueCategory::Greeting, 1)];
        let prompt = PromptBuilder::new(&ctx, DialogueCategory::Trade)
            .with_history(&history)
            .with_topics(&topics)
            .build_prompt();

        assert!(prompt.contains("Recent conversation: Steve: Got any wheat?"));
        assert!(prompt.contains("You often discuss trade with this player."));
        assert!(prompt.contains("You've talked about trade quite a bit recently"));

        let fresh = PromptBuilder::new(&ctx, DialogueCategory::Greeting)
            .with_topics(&topics)
            .build_prompt();
        assert!(!fresh.contains("quite a bit recently"));
    }

    #[test]
    fn test_relationship_tiers() {
        let hostile = context().with_reputation(-50);
        let prompt = PromptBuilder::new(&hostile, DialogueCategory::Greeting).build_prompt();
        assert!(prompt.contains("You don't trust Steve much."));

        let wary = context().with_reputation(-5);
        let prompt = PromptBuilder::new(&wary, DialogueCategory::Greeting).build_prompt();
        assert!(prompt.contains("You are somewhat wary of Steve."));
    }

    #[test]
    fn test_every_personality_has_style() {
        assert!(personality_style(Personality::Neutral).contains("naturally"));
        assert!(personality_style(Personality::Energetic).contains("exclamation"));
    }
}
