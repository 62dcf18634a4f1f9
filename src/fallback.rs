//! Deterministic substitutes for failed generation calls.
//!
//! Every external-generation call site has a placeholder here so the
//! story always continues: the caller gets narratively plausible content
//! instead of an empty or error response.

use std::collections::BTreeMap;

use crate::engine::narration::SceneSummary;
use crate::engine::turns::{ConversationTurn, TurnPlan};
use crate::story::{Character, Interaction, InteractionType, Scene};

/// Placeholder single-character turn: the character withdraws rather
/// than speaking, which stays coherent in any scene.
pub fn silent_turn(character: &Character) -> TurnPlan {
    TurnPlan {
        content: format!("[{} remains silent, lost in thought...]", character.name),
        interaction_type: InteractionType::Thought,
        emotional_state: Some("contemplative".to_string()),
        target_character_id: None,
        thoughts: Some("The character is processing recent events...".to_string()),
        is_fallback: true,
    }
}

/// Placeholder conversation batch: one untargeted line from the given
/// roster member, grounded in the scene's environment.
pub fn conversation_opener(scene: &Scene, speaker: &Character) -> ConversationTurn {
    ConversationTurn {
        character_id: speaker.id.clone(),
        character_name: speaker.name.clone(),
        content: format!(
            "{} glanced around the {}, weighing what to say next. \"There's more going on here than we know.\"",
            speaker.name,
            scene.environment.to_lowercase()
        ),
        interaction_type: InteractionType::Dialogue,
        emotional_state: Some("curious".to_string()),
        target_character_id: None,
    }
}

/// Placeholder scene narration built from the scene's own mood.
pub fn narration(scene: &Scene) -> String {
    format!(
        "The scene continues with an air of {} hanging in the air.",
        scene.mood.as_deref().unwrap_or("tension")
    )
}

/// Placeholder plot inspiration list.
pub fn plot_inspiration() -> Vec<String> {
    vec![
        "Continue developing character relationships".to_string(),
        "Explore character backstories".to_string(),
        "Introduce new conflicts".to_string(),
    ]
}

/// Placeholder scene summary assembled from stored state.
pub fn scene_summary(
    scene: &Scene,
    roster: &[Character],
    interactions: &[Interaction],
) -> SceneSummary {
    let key_events = interactions
        .iter()
        .take(3)
        .map(|interaction| {
            let author = roster
                .iter()
                .find(|c| c.id == interaction.character_id)
                .map(|c| c.name.as_str())
                .unwrap_or("Unknown");
            format!(
                "{}: {}",
                author,
                crate::context::excerpt(&interaction.content, 50)
            )
        })
        .collect();

    let character_developments: BTreeMap<String, String> = roster
        .iter()
        .map(|c| (c.name.clone(), "Participated in scene interactions".to_string()))
        .collect();

    SceneSummary {
        summary: format!(
            "Scene '{}' with {} interactions between {} characters.",
            scene.title,
            interactions.len(),
            roster.len()
        ),
        key_events,
        character_developments,
        relationship_changes: vec!["Characters interacted in the scene".to_string()],
        plot_advancement: "Scene progressed the story through character interactions".to_string(),
    }
}
