//! Turn generation: a single character's next interaction, and unified
//! multi-character conversation batches.

use serde_json::Value;

use crate::context;
use crate::fallback;
use crate::parser::{extract_payload, Extracted};
use crate::resolve;
use crate::story::{Character, Interaction, InteractionType, Memory, Scene};

use super::StoryEngine;

const SYSTEM_TURN: &str = "You are an AI that generates realistic character interactions for \
    novel writing. ALWAYS include atmospheric narrative descriptions that set the scene, \
    describe the environment, and add sensory details. Focus on natural dialogue, character \
    development, and rich atmospheric storytelling that contributes to the plot.";

const SYSTEM_ANALYSIS: &str =
    "You are an AI that analyzes character interactions. Return only valid JSON.";

const SYSTEM_NOVELIST: &str = "You are a novelist writing rich, atmospheric scenes. Create \
    natural, plot-driven interactions that include dialogue, character actions, environmental \
    descriptions, and atmospheric details. Write like a novel, not just dialogue. NO \
    introductions. Vary speakers and include narrative elements. Use ONLY these \
    interaction_type values: 'dialogue', 'thought', 'action', 'narration'.";

const ANALYSIS_TOKEN_BUDGET: u32 = 150;

/// A planned (not yet committed) turn for one character.
#[derive(Debug, Clone)]
pub struct TurnPlan {
    pub content: String,
    pub interaction_type: InteractionType,
    pub emotional_state: Option<String>,
    pub target_character_id: Option<String>,
    pub thoughts: Option<String>,
    pub is_fallback: bool,
}

/// One validated turn out of a unified conversation batch.
#[derive(Debug, Clone)]
pub struct ConversationTurn {
    pub character_id: String,
    pub character_name: String,
    pub content: String,
    pub interaction_type: InteractionType,
    pub emotional_state: Option<String>,
    pub target_character_id: Option<String>,
}

#[derive(Debug, Default)]
struct TurnAnalysis {
    interaction_type: Option<InteractionType>,
    emotional_state: Option<String>,
    target_character_id: Option<String>,
    thoughts: Option<String>,
}

impl StoryEngine {
    /// Generate one turn for `character`. Never fails: any provider or
    /// analysis problem degrades to the silent-thought placeholder.
    pub(crate) async fn compose_turn(
        &self,
        character: &Character,
        scene: &Scene,
        roster: &[Character],
        recent: &[Interaction],
        memories: &[Memory],
    ) -> TurnPlan {
        let others: Vec<Character> = roster
            .iter()
            .filter(|c| c.id != character.id)
            .cloned()
            .collect();

        let memory_context = context::memory_context(memories, &others);
        let interaction_context =
            context::interaction_context(recent, roster, context::RECENT_TURN_WINDOW);
        let prompt = turn_prompt(
            character,
            scene,
            &others,
            &memory_context,
            &interaction_context,
            self.config.turn_word_budget,
        );

        let content = match self
            .provider
            .complete(
                SYSTEM_TURN,
                &prompt,
                self.config.turn_word_budget + 50,
                self.config.turn_temperature,
            )
            .await
        {
            Ok(text) => text.trim().to_string(),
            Err(e) => {
                tracing::warn!("Turn generation failed for '{}': {}", character.name, e);
                return fallback::silent_turn(character);
            }
        };

        let analysis = self.analyze_turn(&content, character, &others).await;
        TurnPlan {
            content,
            interaction_type: analysis.interaction_type.unwrap_or(InteractionType::Dialogue),
            emotional_state: analysis.emotional_state,
            target_character_id: analysis.target_character_id,
            thoughts: analysis.thoughts,
            is_fallback: false,
        }
    }

    /// Secondary structured call classifying a generated turn. Failure
    /// yields neutral defaults; the turn itself is kept either way.
    async fn analyze_turn(
        &self,
        content: &str,
        character: &Character,
        others: &[Character],
    ) -> TurnAnalysis {
        let other_names: Vec<&str> = others.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Analyze this character interaction and return a JSON response:\n\n\
             Interaction: \"{}\"\n\
             Character: {}\n\
             Other characters: {:?}\n\n\
             Return JSON with:\n\
             - \"type\": \"dialogue\", \"thought\", \"action\", or \"narration\"\n\
             - \"emotional_state\": brief emotional description\n\
             - \"target_character_id\": name of the character being addressed (if any)\n\
             - \"thoughts\": internal thoughts if this is a thought\n\n\
             JSON response:",
            content, character.name, other_names
        );

        let raw = match self
            .provider
            .complete(
                SYSTEM_ANALYSIS,
                &prompt,
                ANALYSIS_TOKEN_BUDGET,
                self.config.analysis_temperature,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Turn analysis failed for '{}': {}", character.name, e);
                return neutral_analysis();
            }
        };

        let value = match extract_payload(&raw, &["type"]) {
            Extracted::Clean(value) => value,
            Extracted::Repaired { value, dropped } => {
                if dropped > 0 {
                    tracing::debug!("Turn analysis repaired, {} candidate(s) dropped", dropped);
                }
                value
            }
            Extracted::Nothing => {
                tracing::warn!("Turn analysis for '{}' returned no usable JSON", character.name);
                return neutral_analysis();
            }
        };

        // Salvage may hand back a one-element array.
        let object = match &value {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            other => other.clone(),
        };
        let Some(map) = object.as_object() else {
            return neutral_analysis();
        };

        TurnAnalysis {
            interaction_type: map
                .get("type")
                .and_then(Value::as_str)
                .map(InteractionType::normalize),
            emotional_state: map
                .get("emotional_state")
                .and_then(Value::as_str)
                .map(str::to_string),
            target_character_id: map
                .get("target_character_id")
                .and_then(|v| resolve::resolve_mention(v, others))
                .map(|c| c.id.clone()),
            thoughts: map.get("thoughts").and_then(Value::as_str).map(str::to_string),
        }
    }

    /// Generate a unified conversation batch for the whole roster.
    ///
    /// Returns the validated turns plus whether the deterministic
    /// fallback was substituted. Only a batch that yields no parseable
    /// structure at all triggers the fallback; a parsed batch whose
    /// turns all fail validation stays empty.
    pub(crate) async fn compose_conversation(
        &self,
        scene: &Scene,
        roster: &[Character],
        prior: &[Interaction],
    ) -> (Vec<ConversationTurn>, bool) {
        if roster.is_empty() {
            return (Vec::new(), false);
        }

        let prompt = conversation_prompt(scene, roster, prior);
        let raw = match self
            .provider
            .complete(
                SYSTEM_NOVELIST,
                &prompt,
                self.config.conversation_token_budget,
                self.config.turn_temperature,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Conversation generation failed for '{}': {}", scene.title, e);
                return self.conversation_fallback(scene, roster);
            }
        };

        let value = match extract_payload(&raw, &["character_name", "content"]) {
            Extracted::Clean(value) => value,
            Extracted::Repaired { value, dropped } => {
                if dropped > 0 {
                    tracing::warn!(
                        "Conversation batch repaired for '{}': {} candidate(s) dropped",
                        scene.title,
                        dropped
                    );
                }
                value
            }
            Extracted::Nothing => {
                tracing::warn!("Conversation batch for '{}' had no usable JSON", scene.title);
                return self.conversation_fallback(scene, roster);
            }
        };

        let items = match value {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            _ => return self.conversation_fallback(scene, roster),
        };

        let mut turns = Vec::with_capacity(items.len());
        for item in &items {
            if let Some(turn) = validate_turn(item, roster) {
                turns.push(turn);
            }
        }
        if turns.len() < items.len() {
            tracing::debug!(
                "Dropped {} of {} generated turn(s) during validation",
                items.len() - turns.len(),
                items.len()
            );
        }
        (turns, false)
    }

    fn conversation_fallback(
        &self,
        scene: &Scene,
        roster: &[Character],
    ) -> (Vec<ConversationTurn>, bool) {
        match roster.first() {
            Some(first) => (vec![fallback::conversation_opener(scene, first)], true),
            None => (Vec::new(), false),
        }
    }
}

fn neutral_analysis() -> TurnAnalysis {
    TurnAnalysis {
        interaction_type: Some(InteractionType::Dialogue),
        emotional_state: Some("neutral".to_string()),
        target_character_id: None,
        thoughts: None,
    }
}

/// A batch turn survives validation only if its speaker resolves to a
/// roster member; type labels are normalized, the addressee is resolved
/// best-effort and may never be the speaker.
fn validate_turn(item: &Value, roster: &[Character]) -> Option<ConversationTurn> {
    let mentioned = item.get("character_name").and_then(Value::as_str)?;
    let speaker = resolve::resolve(mentioned, roster)?;
    let content = item
        .get("content")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())?;

    let interaction_type = item
        .get("interaction_type")
        .and_then(Value::as_str)
        .map(InteractionType::normalize)
        .unwrap_or(InteractionType::Dialogue);

    let emotional_state = item
        .get("emotional_state")
        .and_then(Value::as_str)
        .map(str::to_string);

    let target_character_id = item
        .get("target_character_id")
        .and_then(|v| resolve::resolve_mention(v, roster))
        .filter(|target| target.id != speaker.id)
        .map(|target| target.id.clone());

    Some(ConversationTurn {
        character_id: speaker.id.clone(),
        character_name: speaker.name.clone(),
        content: content.trim().to_string(),
        interaction_type,
        emotional_state,
        target_character_id,
    })
}

fn turn_prompt(
    character: &Character,
    scene: &Scene,
    others: &[Character],
    memory_context: &str,
    interaction_context: &str,
    word_budget: u32,
) -> String {
    format!(
        "You are {name}, a character in a novel. Generate a natural interaction based on the following context:\n\n\
         CHARACTER PROFILE:\n\
         Name: {name}\n\
         Personality: {personality}\n\
         Background: {background}\n\
         Goals: {goals}\n\
         Fears: {fears}\n\n\
         SCENE CONTEXT:\n\
         Title: {title}\n\
         Environment: {environment}\n\
         Context: {context}\n\
         Weather: {weather}\n\
         Time: {time}\n\
         Mood: {mood}\n\n\
         OTHER CHARACTERS PRESENT:\n{others}\n\n\
         MEMORY CONTEXT:\n{memories}\n\n\
         RECENT INTERACTIONS:\n{interactions}\n\n\
         INSTRUCTIONS:\n\
         Generate a natural interaction that includes:\n\
         1. **Dialogue or action** - What {name} says or does\n\
         2. **Narrative description** - Atmospheric details about the scene, character movements, and sensory details\n\
         3. **Character voice** - Make it authentic to {name}'s personality\n\
         4. **Plot advancement** - Include details that move the story forward\n\n\
         Keep it under {budget} words total. The interaction should feel like a natural part of a novel scene.\n\n\
         Generate the interaction:",
        name = character.name,
        personality = character.personality,
        background = character.background,
        goals = character.goals.as_deref().unwrap_or("Not specified"),
        fears = character.fears.as_deref().unwrap_or("Not specified"),
        title = scene.title,
        environment = scene.environment,
        context = scene.context,
        weather = scene.weather.as_deref().unwrap_or("Not specified"),
        time = scene.time_of_day.as_deref().unwrap_or("Not specified"),
        mood = scene.mood.as_deref().unwrap_or("Not specified"),
        others = context::roster_context(others),
        memories = memory_context,
        interactions = interaction_context,
        budget = word_budget,
    )
}

fn conversation_prompt(scene: &Scene, roster: &[Character], prior: &[Interaction]) -> String {
    let names: Vec<&str> = roster.iter().map(|c| c.name.as_str()).collect();
    let dialogue = context::conversation_context(prior, roster);

    // Early conversations get longer, setup-oriented batches; later ones
    // get shorter batches pushed toward plot progression.
    let (exchanges, focus) = if prior.len() > 10 {
        (
            "2-4",
            "Continue the plot development and character relationships. Don't repeat introductions.",
        )
    } else {
        (
            "3-5",
            "Develop the scene and establish character dynamics naturally.",
        )
    };

    format!(
        "Scene: {title} - {context}\n\
         Environment: {environment}\n\
         Characters: {names}\n\
         {dialogue}\n\n\
         Write {exchanges} natural interactions that advance the plot and develop character relationships.\n\n\
         IMPORTANT RULES:\n\
         - NO introductions or \"Hello, I'm [Name]\" - characters already know each other\n\
         - Vary who speaks - not everyone needs to speak in every round\n\
         - Focus on the plot: {context}\n\
         - {focus}\n\
         - Make dialogue natural and character-specific\n\
         - Include reactions, questions, plans, revelations\n\
         - Build on previous dialogue, don't repeat\n\n\
         You can write interactions that are purely narrative (describing the environment, \
         character actions, or atmospheric details) without any dialogue.\n\n\
         Return JSON:\n\
         [\n  {{\"character_name\": \"Name\", \"content\": \"What they say or do\", \
         \"interaction_type\": \"dialogue/thought/action/narration\", \
         \"emotional_state\": \"feeling\", \"target_character_id\": \"who they're talking to\"}}\n]",
        title = scene.title,
        context = scene.context,
        environment = scene.environment,
        names = names.join(", "),
        dialogue = dialogue,
        exchanges = exchanges,
        focus = focus,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn character(id: &str, name: &str) -> Character {
        let now = Utc::now();
        Character {
            id: id.to_string(),
            name: name.to_string(),
            personality: "quiet".to_string(),
            background: "unknown".to_string(),
            appearance: None,
            goals: None,
            fears: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn scene() -> Scene {
        let now = Utc::now();
        Scene {
            id: "s1".to_string(),
            title: "Diner".to_string(),
            environment: "A roadside diner".to_string(),
            context: "A hiker is missing".to_string(),
            weather: None,
            time_of_day: None,
            mood: None,
            is_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn validation_drops_unknown_speakers() {
        let roster = vec![character("c1", "Emma Chen")];
        let item = json!({"character_name": "Stranger", "content": "hi"});
        assert!(validate_turn(&item, &roster).is_none());
    }

    #[test]
    fn validation_normalizes_type_labels() {
        let roster = vec![character("c1", "Emma Chen")];
        for (raw, expected) in [
            ("environmental", InteractionType::Narration),
            ("gesture", InteractionType::Action),
            ("xyz", InteractionType::Dialogue),
        ] {
            let item = json!({
                "character_name": "Emma",
                "content": "something happens",
                "interaction_type": raw,
            });
            let turn = validate_turn(&item, &roster).unwrap();
            assert_eq!(turn.interaction_type, expected, "label {:?}", raw);
        }
    }

    #[test]
    fn validation_never_targets_the_speaker() {
        let roster = vec![character("c1", "Emma Chen"), character("c2", "Marcus")];
        let item = json!({
            "character_name": "Emma",
            "content": "muttering to herself",
            "interaction_type": "dialogue",
            "target_character_id": "Emma Chen",
        });
        let turn = validate_turn(&item, &roster).unwrap();
        assert!(turn.target_character_id.is_none());
    }

    #[test]
    fn validation_requires_non_empty_content() {
        let roster = vec![character("c1", "Emma Chen")];
        let item = json!({"character_name": "Emma", "content": "   "});
        assert!(validate_turn(&item, &roster).is_none());
    }

    #[test]
    fn conversation_prompt_shifts_policy_with_history_length() {
        let roster = vec![character("c1", "Emma Chen")];
        let prior: Vec<Interaction> = (0..12)
            .map(|i| {
                Interaction::new(
                    "s1",
                    "c1",
                    format!("line {}", i),
                    InteractionType::Dialogue,
                    None,
                    None,
                )
            })
            .collect();

        let early = conversation_prompt(&scene(), &roster, &prior[..3]);
        assert!(early.contains("3-5"));
        assert!(early.contains("establish character dynamics"));

        let late = conversation_prompt(&scene(), &roster, &prior);
        assert!(late.contains("2-4"));
        assert!(late.contains("Don't repeat introductions"));
    }
}
