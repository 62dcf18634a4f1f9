//! Bounded prompt-context assembly.
//!
//! Generation cost and latency grow with context length, so every
//! context piece is truncated to a fixed budget regardless of how long
//! the scene history gets. Absent data yields a fixed sentinel string
//! rather than an empty one, keeping the downstream prompt shape
//! well-formed.

use crate::story::{Character, Interaction, Memory};

/// Recent interactions included when composing a single-character turn.
pub const RECENT_TURN_WINDOW: usize = 2;
/// Recent interactions included when continuing a scene conversation.
pub const RECENT_CONVERSATION_WINDOW: usize = 5;
/// Memories included for the acting character.
pub const MEMORY_WINDOW: usize = 3;
/// Character budget for one interaction excerpt.
pub const INTERACTION_EXCERPT_CHARS: usize = 80;
/// Character budget for one memory excerpt.
pub const MEMORY_EXCERPT_CHARS: usize = 100;

pub const NO_RECENT_INTERACTIONS: &str = "No recent interactions in this scene.";
pub const NO_MEMORIES: &str = "No previous memories with these characters.";

/// Truncate on a char boundary and mark the cut.
pub fn excerpt(text: &str, budget: usize) -> String {
    let cut: String = text.chars().take(budget).collect();
    format!("{}...", cut)
}

fn name_of<'a>(roster: &'a [Character], character_id: &str) -> &'a str {
    roster
        .iter()
        .find(|c| c.id == character_id)
        .map(|c| c.name.as_str())
        .unwrap_or("Unknown")
}

/// Summarize the last `window` interactions for prompt inclusion.
pub fn interaction_context(
    interactions: &[Interaction],
    roster: &[Character],
    window: usize,
) -> String {
    if interactions.is_empty() {
        return NO_RECENT_INTERACTIONS.to_string();
    }

    let start = interactions.len().saturating_sub(window);
    let lines: Vec<String> = interactions[start..]
        .iter()
        .map(|interaction| {
            format!(
                "{}: {}",
                name_of(roster, &interaction.character_id),
                excerpt(&interaction.content, INTERACTION_EXCERPT_CHARS)
            )
        })
        .collect();

    format!("Recent scene interactions: {}", lines.join(" | "))
}

/// Recent dialogue block for conversation continuation, one line per turn.
pub fn conversation_context(interactions: &[Interaction], roster: &[Character]) -> String {
    if interactions.is_empty() {
        return String::new();
    }

    let start = interactions
        .len()
        .saturating_sub(RECENT_CONVERSATION_WINDOW);
    let lines: Vec<String> = interactions[start..]
        .iter()
        .map(|interaction| {
            format!(
                "{}: {}",
                name_of(roster, &interaction.character_id),
                excerpt(&interaction.content, INTERACTION_EXCERPT_CHARS)
            )
        })
        .collect();

    format!("\n\nRECENT DIALOGUE:\n{}", lines.join("\n"))
}

/// Summarize the acting character's most recent memories, annotated with
/// the names of involved characters that are present.
pub fn memory_context(memories: &[Memory], others: &[Character]) -> String {
    if memories.is_empty() {
        return NO_MEMORIES.to_string();
    }

    let start = memories.len().saturating_sub(MEMORY_WINDOW);
    let mut entries = Vec::new();
    for memory in &memories[start..] {
        let points = memory.key_points.join("; ");
        let involved: Vec<&str> = others
            .iter()
            .filter(|c| memory.related_characters.contains(&c.id))
            .map(|c| c.name.as_str())
            .collect();

        if involved.is_empty() {
            entries.push(format!("Memory: {}", excerpt(&points, MEMORY_EXCERPT_CHARS)));
        } else {
            entries.push(format!(
                "Memory: {} (involving: {})",
                excerpt(&points, MEMORY_EXCERPT_CHARS),
                involved.join(", ")
            ));
        }
    }

    format!("Recent memories: {}", entries.join("; "))
}

/// One-line-per-character roster block for prompt inclusion.
pub fn roster_context(characters: &[Character]) -> String {
    characters
        .iter()
        .map(|c| format!("- {}: {}", c.name, excerpt(&c.personality, 60)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{InteractionType, MemoryType};
    use chrono::Utc;

    fn character(id: &str, name: &str) -> Character {
        let now = Utc::now();
        Character {
            id: id.to_string(),
            name: name.to_string(),
            personality: "curious and stubborn".to_string(),
            background: "grew up nearby".to_string(),
            appearance: None,
            goals: None,
            fears: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn interaction(character_id: &str, content: &str) -> Interaction {
        Interaction::new(
            "s1",
            character_id,
            content.to_string(),
            InteractionType::Dialogue,
            None,
            None,
        )
    }

    #[test]
    fn empty_history_yields_sentinels() {
        let roster = vec![character("c1", "Emma")];
        assert_eq!(
            interaction_context(&[], &roster, RECENT_TURN_WINDOW),
            NO_RECENT_INTERACTIONS
        );
        assert_eq!(memory_context(&[], &roster), NO_MEMORIES);
        assert_eq!(conversation_context(&[], &roster), "");
    }

    #[test]
    fn interaction_context_keeps_only_last_window() {
        let roster = vec![character("c1", "Emma")];
        let history = vec![
            interaction("c1", "first"),
            interaction("c1", "second"),
            interaction("c1", "third"),
        ];
        let context = interaction_context(&history, &roster, RECENT_TURN_WINDOW);
        assert!(!context.contains("first"));
        assert!(context.contains("second"));
        assert!(context.contains("third"));
    }

    #[test]
    fn long_content_is_truncated_to_budget() {
        let roster = vec![character("c1", "Emma")];
        let long = "x".repeat(500);
        let history = vec![interaction("c1", &long)];
        let context = interaction_context(&history, &roster, RECENT_TURN_WINDOW);
        assert!(context.len() < 200);
        assert!(context.contains("..."));
    }

    #[test]
    fn memory_context_names_present_related_characters() {
        let others = vec![character("c2", "Marcus"), character("c3", "Sarah")];
        let memory = Memory::new(
            "c1",
            "s1",
            vec!["Marcus lied about the map".to_string()],
            MemoryType::Observation,
            -20.0,
            3,
            vec!["c2".to_string()],
        );
        let context = memory_context(&[memory], &others);
        assert!(context.contains("involving: Marcus"));
        assert!(!context.contains("Sarah"));
    }

    #[test]
    fn unknown_author_is_labelled_unknown() {
        let roster = vec![character("c1", "Emma")];
        let history = vec![interaction("ghost", "who said this")];
        let context = interaction_context(&history, &roster, RECENT_TURN_WINDOW);
        assert!(context.contains("Unknown:"));
    }
}
