//! Merged chronological view of a scene's event streams.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::story::{
    Character, CharacterFeeling, Interaction, InteractionType, Memory, MemoryType, PlotNote,
    PlotNoteCategory,
};

/// One entry in the merged timeline, tagged with its source kind.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimelineEntry {
    Interaction {
        timestamp: DateTime<Utc>,
        character_name: String,
        content: String,
        interaction_type: InteractionType,
        emotional_state: Option<String>,
    },
    Memory {
        timestamp: DateTime<Utc>,
        character_name: String,
        key_points: Vec<String>,
        memory_type: MemoryType,
        importance: i64,
    },
    PlotNote {
        timestamp: DateTime<Utc>,
        content: String,
        category: PlotNoteCategory,
        importance: i64,
    },
}

impl TimelineEntry {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineEntry::Interaction { timestamp, .. } => *timestamp,
            TimelineEntry::Memory { timestamp, .. } => *timestamp,
            TimelineEntry::PlotNote { timestamp, .. } => *timestamp,
        }
    }
}

/// The assembled view handed to presentation layers.
#[derive(Debug, Clone, Serialize)]
pub struct TimelineView {
    pub scene_id: String,
    pub scene_title: String,
    pub entries: Vec<TimelineEntry>,
    pub feelings: Vec<CharacterFeeling>,
}

fn name_of(roster: &[Character], character_id: &str) -> String {
    roster
        .iter()
        .find(|c| c.id == character_id)
        .map(|c| c.name.clone())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Merge the three event streams into one sequence ordered by creation
/// time ascending. The sort is stable and the streams are appended in
/// interaction, memory, plot-note order, so ties keep source sequence
/// order.
pub fn assemble(
    roster: &[Character],
    interactions: &[Interaction],
    memories: &[Memory],
    plot_notes: &[PlotNote],
) -> Vec<TimelineEntry> {
    let mut entries = Vec::with_capacity(interactions.len() + memories.len() + plot_notes.len());

    for interaction in interactions {
        entries.push(TimelineEntry::Interaction {
            timestamp: interaction.created_at,
            character_name: name_of(roster, &interaction.character_id),
            content: interaction.content.clone(),
            interaction_type: interaction.interaction_type,
            emotional_state: interaction.emotional_state.clone(),
        });
    }
    for memory in memories {
        entries.push(TimelineEntry::Memory {
            timestamp: memory.created_at,
            character_name: name_of(roster, &memory.character_id),
            key_points: memory.key_points.clone(),
            memory_type: memory.memory_type,
            importance: memory.importance,
        });
    }
    for note in plot_notes {
        entries.push(TimelineEntry::PlotNote {
            timestamp: note.created_at,
            content: note.content.clone(),
            category: note.category,
            importance: note.importance,
        });
    }

    entries.sort_by_key(|entry| entry.timestamp());
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

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

    fn interaction_at(character_id: &str, content: &str, at: DateTime<Utc>) -> Interaction {
        let mut interaction = Interaction::new(
            "s1",
            character_id,
            content.to_string(),
            InteractionType::Dialogue,
            None,
            None,
        );
        interaction.created_at = at;
        interaction
    }

    fn memory_at(character_id: &str, at: DateTime<Utc>) -> Memory {
        let mut memory = Memory::new(
            character_id,
            "s1",
            vec!["a fact".to_string()],
            MemoryType::Observation,
            0.0,
            2,
            vec![],
        );
        memory.created_at = at;
        memory
    }

    #[test]
    fn streams_merge_in_timestamp_order() {
        let roster = vec![character("c1", "Emma")];
        let t1 = Utc::now();
        let t2 = t1 + Duration::seconds(10);
        let t3 = t1 + Duration::seconds(20);

        let interactions = vec![
            interaction_at("c1", "first", t1),
            interaction_at("c1", "third", t3),
        ];
        let memories = vec![memory_at("c1", t2)];

        let entries = assemble(&roster, &interactions, &memories, &[]);
        assert_eq!(entries.len(), 3);
        assert!(matches!(entries[0], TimelineEntry::Interaction { .. }));
        assert!(matches!(entries[1], TimelineEntry::Memory { .. }));
        assert!(matches!(entries[2], TimelineEntry::Interaction { .. }));
    }

    #[test]
    fn timestamp_ties_keep_source_stream_order() {
        let roster = vec![character("c1", "Emma")];
        let t = Utc::now();

        let interactions = vec![interaction_at("c1", "spoken", t)];
        let memories = vec![memory_at("c1", t)];
        let mut note = PlotNote::new("s1", None, "noted".to_string(), PlotNoteCategory::General, 1);
        note.created_at = t;

        let entries = assemble(&roster, &interactions, &memories, &[note]);
        assert!(matches!(entries[0], TimelineEntry::Interaction { .. }));
        assert!(matches!(entries[1], TimelineEntry::Memory { .. }));
        assert!(matches!(entries[2], TimelineEntry::PlotNote { .. }));
    }

    #[test]
    fn unknown_authors_are_labelled() {
        let entries = assemble(&[], &[interaction_at("ghost", "boo", Utc::now())], &[], &[]);
        match &entries[0] {
            TimelineEntry::Interaction { character_name, .. } => {
                assert_eq!(character_name, "Unknown")
            }
            other => panic!("unexpected entry {:?}", other),
        }
    }
}
