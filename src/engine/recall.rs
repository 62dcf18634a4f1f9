//! Deriving memories and feeling deltas from committed interactions.
//!
//! Both derivations are independent best-effort generation calls. A
//! failure in either degrades to "nothing derived" and never rolls back
//! the interaction they were derived from.

use serde_json::Value;

use crate::parser::{extract_payload, Extracted};
use crate::resolve;
use crate::story::{
    clamp_intensity, Character, CharacterFeeling, Interaction, Memory, MemoryType, Scene,
};

use super::StoryEngine;

const SYSTEM_MEMORY: &str = "You are an AI that generates character memories as key bullet \
    points. Return only valid JSON.";
const SYSTEM_FEELINGS: &str =
    "You are an AI that analyzes character feelings. Return only valid JSON.";

const MEMORY_TOKEN_BUDGET: u32 = 200;
const FEELINGS_TOKEN_BUDGET: u32 = 250;
const RECALL_TEMPERATURE: f32 = 0.7;

/// A memory holds at most this many key points.
const MAX_KEY_POINTS: usize = 5;

impl StoryEngine {
    /// Derive and persist a memory and feeling deltas for a committed
    /// interaction. Returns (memory created, feelings recorded).
    pub(crate) async fn record_recall(
        &self,
        character: &Character,
        interaction: &Interaction,
        scene: &Scene,
        others: &[Character],
    ) -> (bool, usize) {
        let memory_created = match self
            .derive_memory(character, interaction, scene, others)
            .await
        {
            Some(memory) => match self.db.save_memory(&memory) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Failed to save memory for '{}': {}", character.name, e);
                    false
                }
            },
            None => false,
        };

        let mut feelings_recorded = 0;
        for feeling in self.derive_feelings(character, interaction, others).await {
            match self.db.save_feeling(&feeling) {
                Ok(()) => feelings_recorded += 1,
                Err(e) => {
                    tracing::warn!("Failed to save feeling for '{}': {}", character.name, e);
                }
            }
        }

        (memory_created, feelings_recorded)
    }

    /// What the character would remember from this interaction: a few
    /// key points, a type, and clamped impact/importance.
    pub(crate) async fn derive_memory(
        &self,
        character: &Character,
        interaction: &Interaction,
        scene: &Scene,
        others: &[Character],
    ) -> Option<Memory> {
        let other_names: Vec<&str> = others.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Based on this interaction, generate key bullet points that {name} would remember:\n\n\
             Interaction: \"{content}\"\n\
             Type: {itype}\n\
             Emotional State: {state}\n\
             Scene: {title} - {context}\n\n\
             Other characters present: {others:?}\n\n\
             Generate 3-5 key bullet points that {name} would remember from this interaction. Focus on:\n\
             - Important information revealed\n\
             - Character behavior or personality traits observed\n\
             - Emotional reactions or feelings\n\
             - Any revelations or insights\n\n\
             Return JSON with:\n\
             - \"key_points\": list of bullet point strings\n\
             - \"memory_type\": \"interaction\", \"observation\", \"feeling\", or \"revelation\"\n\
             - \"emotional_impact\": number from -100 to 100\n\
             - \"related_characters\": list of character names involved\n\
             - \"importance\": number from 1-5\n\n\
             JSON response:",
            name = character.name,
            content = interaction.content,
            itype = interaction.interaction_type.as_str(),
            state = interaction.emotional_state.as_deref().unwrap_or("neutral"),
            title = scene.title,
            context = scene.context,
            others = other_names,
        );

        let raw = match self
            .provider
            .complete(SYSTEM_MEMORY, &prompt, MEMORY_TOKEN_BUDGET, RECALL_TEMPERATURE)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Memory generation failed for '{}': {}", character.name, e);
                return None;
            }
        };

        let object = first_object(extract_payload(&raw, &["key_points"]))?;
        let map = object.as_object()?;

        let key_points = parse_key_points(map.get("key_points"));
        if key_points.is_empty() {
            tracing::warn!("Memory for '{}' had no usable key points", character.name);
            return None;
        }

        let memory_type = map
            .get("memory_type")
            .and_then(Value::as_str)
            .map(MemoryType::normalize)
            .unwrap_or(MemoryType::Interaction);
        let emotional_impact = map
            .get("emotional_impact")
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        let importance = map.get("importance").and_then(Value::as_i64).unwrap_or(1);
        let related = map
            .get("related_characters")
            .map(|value| resolve::resolve_all(value, others))
            .unwrap_or_default();

        Some(Memory::new(
            &character.id,
            &scene.id,
            key_points,
            memory_type,
            emotional_impact,
            importance,
            related,
        ))
    }

    /// How this interaction shifts the character's feelings about each
    /// other member present. Unresolvable targets are skipped, never
    /// errors; self-referential edges are impossible by construction.
    pub(crate) async fn derive_feelings(
        &self,
        character: &Character,
        interaction: &Interaction,
        others: &[Character],
    ) -> Vec<CharacterFeeling> {
        if others.is_empty() {
            return Vec::new();
        }

        let other_names: Vec<&str> = others.iter().map(|c| c.name.as_str()).collect();
        let prompt = format!(
            "Based on this interaction, analyze how {name} feels about other characters:\n\n\
             Interaction: \"{content}\"\n\
             Character: {name}\n\
             Emotional State: {state}\n\n\
             Other characters present: {others:?}\n\n\
             Analyze how this interaction affects {name}'s feelings about each other character present.\n\n\
             Return JSON with an array of feeling updates:\n\
             - \"target_character_id\": name of the character they feel about\n\
             - \"feeling_type\": \"trust\", \"distrust\", \"affection\", \"anger\", \"respect\", \"fear\", \"curiosity\", etc.\n\
             - \"intensity\": number from -100 to 100\n\
             - \"reason\": brief reason for the feeling change\n\n\
             JSON response:",
            name = character.name,
            content = interaction.content,
            state = interaction.emotional_state.as_deref().unwrap_or("neutral"),
            others = other_names,
        );

        let raw = match self
            .provider
            .complete(
                SYSTEM_FEELINGS,
                &prompt,
                FEELINGS_TOKEN_BUDGET,
                RECALL_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Feeling analysis failed for '{}': {}", character.name, e);
                return Vec::new();
            }
        };

        let items = match extract_payload(&raw, &["feeling_type"]).into_value() {
            Some(Value::Array(items)) => items,
            Some(object @ Value::Object(_)) => vec![object],
            _ => {
                tracing::warn!("Feeling analysis for '{}' had no usable JSON", character.name);
                return Vec::new();
            }
        };

        let mut feelings = Vec::new();
        for item in &items {
            let Some(map) = item.as_object() else {
                continue;
            };
            let Some(target) = map
                .get("target_character_id")
                .and_then(|v| resolve::resolve_mention(v, others))
            else {
                continue;
            };
            let Some(feeling_type) = map
                .get("feeling_type")
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
            else {
                continue;
            };

            let raw_intensity = map.get("intensity").and_then(Value::as_f64).unwrap_or(0.0);
            if raw_intensity != clamp_intensity(raw_intensity) {
                tracing::warn!(
                    "Clamping out-of-range feeling intensity {} from '{}'",
                    raw_intensity,
                    character.name
                );
            }
            let reason = map
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();

            if let Some(feeling) = CharacterFeeling::new(
                &character.id,
                &target.id,
                feeling_type.trim().to_string(),
                raw_intensity,
                reason,
            ) {
                feelings.push(feeling);
            }
        }
        feelings
    }
}

fn first_object(extracted: Extracted) -> Option<Value> {
    match extracted.into_value()? {
        Value::Array(items) => items.into_iter().find(|item| item.is_object()),
        object @ Value::Object(_) => Some(object),
        _ => None,
    }
}

/// Accept key points either as a JSON list or as one bulleted string.
fn parse_key_points(value: Option<&Value>) -> Vec<String> {
    let mut points = match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(text)) => text
            .lines()
            .map(|line| line.trim_start_matches(['-', '*', '•', ' ']).trim().to_string())
            .filter(|line| !line.is_empty())
            .collect(),
        _ => Vec::new(),
    };
    points.truncate(MAX_KEY_POINTS);
    points
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_points_accept_list_or_bulleted_string() {
        let from_list = parse_key_points(Some(&json!(["one", " two ", ""])));
        assert_eq!(from_list, vec!["one", "two"]);

        let from_string = parse_key_points(Some(&json!("- first point\n- second point\n\n* third")));
        assert_eq!(from_string, vec!["first point", "second point", "third"]);

        assert!(parse_key_points(None).is_empty());
        assert!(parse_key_points(Some(&json!(42))).is_empty());
    }

    #[test]
    fn key_points_are_capped() {
        let many = json!(["a", "b", "c", "d", "e", "f", "g"]);
        assert_eq!(parse_key_points(Some(&many)).len(), MAX_KEY_POINTS);
    }

    #[tokio::test]
    async fn feelings_aimed_at_absent_characters_are_dropped() {
        use std::sync::Arc;

        use crate::config::EngineConfig;
        use crate::database::StoryDatabase;
        use crate::engine::testing::ScriptedProvider;
        use crate::story::{CharacterDraft, InteractionType, SceneDraft};

        let db = Arc::new(StoryDatabase::in_memory().unwrap());
        let emma = db
            .create_character(CharacterDraft {
                name: "Emma".to_string(),
                personality: "sharp".to_string(),
                background: "journalist".to_string(),
                ..Default::default()
            })
            .unwrap();
        let marcus = db
            .create_character(CharacterDraft {
                name: "Marcus".to_string(),
                personality: "guarded".to_string(),
                background: "mechanic".to_string(),
                ..Default::default()
            })
            .unwrap();
        let scene = db
            .create_scene(
                SceneDraft {
                    title: "Diner".to_string(),
                    environment: "diner".to_string(),
                    context: "missing hiker".to_string(),
                    ..Default::default()
                },
                &[emma.id.clone(), marcus.id.clone()],
            )
            .unwrap();

        // One edge aimed at the acting character, one at a stranger, one valid.
        let script = r#"[
            {"target_character_id": "Emma", "feeling_type": "pride", "intensity": 40, "reason": "self"},
            {"target_character_id": "Nobody", "feeling_type": "fear", "intensity": 10, "reason": "ghost"},
            {"target_character_id": "Marcus", "feeling_type": "distrust", "intensity": -30, "reason": "evasive"}
        ]"#;
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(script.to_string())]));
        let engine = crate::engine::StoryEngine::new(
            Arc::clone(&db),
            provider as Arc<dyn crate::provider::GenerationProvider>,
            EngineConfig::default(),
        );

        let interaction = crate::story::Interaction::new(
            &scene.id,
            &emma.id,
            "Emma pressed the question.".to_string(),
            InteractionType::Dialogue,
            None,
            None,
        );
        let others = vec![marcus.clone()];

        let feelings = engine.derive_feelings(&emma, &interaction, &others).await;
        assert_eq!(feelings.len(), 1);
        assert_eq!(feelings[0].target_character_id, marcus.id);
        assert_eq!(feelings[0].character_id, emma.id);
        assert_eq!(feelings[0].intensity, -30.0);
    }
}
