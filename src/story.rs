use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed set of interaction kinds a turn can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionType {
    Dialogue,
    Thought,
    Action,
    Narration,
}

impl InteractionType {
    pub fn as_str(self) -> &'static str {
        match self {
            InteractionType::Dialogue => "dialogue",
            InteractionType::Thought => "thought",
            InteractionType::Action => "action",
            InteractionType::Narration => "narration",
        }
    }

    /// Normalize a provider-supplied label to the closed set.
    ///
    /// Providers routinely invent near-synonyms ("environmental",
    /// "gesture"); anything unrecognized falls back to dialogue.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "dialogue" => InteractionType::Dialogue,
            "thought" => InteractionType::Thought,
            "action" | "movement" | "gesture" | "physical" => InteractionType::Action,
            "narration" | "narrative" | "description" | "environmental" => {
                InteractionType::Narration
            }
            _ => InteractionType::Dialogue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Interaction,
    Observation,
    Feeling,
    Revelation,
}

impl MemoryType {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Interaction => "interaction",
            MemoryType::Observation => "observation",
            MemoryType::Feeling => "feeling",
            MemoryType::Revelation => "revelation",
        }
    }

    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "observation" => MemoryType::Observation,
            "feeling" => MemoryType::Feeling,
            "revelation" => MemoryType::Revelation,
            _ => MemoryType::Interaction,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlotNoteCategory {
    CharacterDevelopment,
    Relationship,
    PlotPoint,
    Inspiration,
    SceneSummary,
    General,
}

impl PlotNoteCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            PlotNoteCategory::CharacterDevelopment => "character-development",
            PlotNoteCategory::Relationship => "relationship",
            PlotNoteCategory::PlotPoint => "plot-point",
            PlotNoteCategory::Inspiration => "inspiration",
            PlotNoteCategory::SceneSummary => "scene-summary",
            PlotNoteCategory::General => "general",
        }
    }

    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "character-development" => PlotNoteCategory::CharacterDevelopment,
            "relationship" => PlotNoteCategory::Relationship,
            "plot-point" => PlotNoteCategory::PlotPoint,
            "inspiration" => PlotNoteCategory::Inspiration,
            "scene-summary" => PlotNoteCategory::SceneSummary,
            _ => PlotNoteCategory::General,
        }
    }
}

/// Clamp a provider-suggested emotional intensity/impact into [-100, 100].
/// Never trust upstream values as given.
pub fn clamp_intensity(value: f64) -> f64 {
    value.clamp(-100.0, 100.0)
}

/// Clamp a provider-suggested importance rank into [1, 5].
pub fn clamp_importance(value: i64) -> i64 {
    value.clamp(1, 5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    pub personality: String,
    pub background: String,
    pub appearance: Option<String>,
    pub goals: Option<String>,
    pub fears: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User-authored fields for a new character. Identity is assigned on save.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CharacterDraft {
    pub name: String,
    pub personality: String,
    pub background: String,
    pub appearance: Option<String>,
    pub goals: Option<String>,
    pub fears: Option<String>,
}

/// Partial update of a character's narrative fields. Identity is immutable.
#[derive(Debug, Clone, Default)]
pub struct CharacterUpdate {
    pub name: Option<String>,
    pub personality: Option<String>,
    pub background: Option<String>,
    pub appearance: Option<String>,
    pub goals: Option<String>,
    pub fears: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    pub title: String,
    pub environment: String,
    pub context: String,
    pub weather: Option<String>,
    pub time_of_day: Option<String>,
    pub mood: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SceneDraft {
    pub title: String,
    pub environment: String,
    pub context: String,
    pub weather: Option<String>,
    pub time_of_day: Option<String>,
    pub mood: Option<String>,
}

/// Membership record binding a character into a scene's roster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneMember {
    pub id: String,
    pub scene_id: String,
    pub character_id: String,
    pub role_in_scene: Option<String>,
    pub emotional_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub id: String,
    pub scene_id: String,
    pub character_id: String,
    pub content: String,
    pub interaction_type: InteractionType,
    pub emotional_state: Option<String>,
    pub target_character_id: Option<String>,
    /// Nominal in-story calendar date. Display only; never used for ordering.
    pub interaction_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Interaction {
    pub fn new(
        scene_id: &str,
        character_id: &str,
        content: String,
        interaction_type: InteractionType,
        emotional_state: Option<String>,
        target_character_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            scene_id: scene_id.to_string(),
            character_id: character_id.to_string(),
            content,
            interaction_type,
            emotional_state,
            target_character_id,
            interaction_date: now.date_naive(),
            created_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub character_id: String,
    pub scene_id: String,
    /// Ordered remembered facts, not free text.
    pub key_points: Vec<String>,
    pub memory_type: MemoryType,
    pub emotional_impact: f64,
    pub importance: i64,
    /// Ids of other scene members this memory involves. Never the owner.
    pub related_characters: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Memory {
    pub fn new(
        character_id: &str,
        scene_id: &str,
        key_points: Vec<String>,
        memory_type: MemoryType,
        emotional_impact: f64,
        importance: i64,
        related_characters: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            character_id: character_id.to_string(),
            scene_id: scene_id.to_string(),
            key_points,
            memory_type,
            emotional_impact: clamp_intensity(emotional_impact),
            importance: clamp_importance(importance),
            related_characters,
            created_at: Utc::now(),
        }
    }
}

/// Directed feeling edge between two characters. History is additive:
/// re-generation appends new edges rather than overwriting old ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterFeeling {
    pub id: String,
    pub character_id: String,
    pub target_character_id: String,
    pub feeling_type: String,
    pub intensity: f64,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl CharacterFeeling {
    /// Returns None for a self-referential edge.
    pub fn new(
        character_id: &str,
        target_character_id: &str,
        feeling_type: String,
        intensity: f64,
        reason: String,
    ) -> Option<Self> {
        if character_id == target_character_id {
            return None;
        }
        Some(Self {
            id: Uuid::new_v4().to_string(),
            character_id: character_id.to_string(),
            target_character_id: target_character_id.to_string(),
            feeling_type,
            intensity: clamp_intensity(intensity),
            reason,
            created_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlotNote {
    pub id: String,
    pub scene_id: String,
    pub character_id: Option<String>,
    pub content: String,
    pub category: PlotNoteCategory,
    pub importance: i64,
    pub created_at: DateTime<Utc>,
}

impl PlotNote {
    pub fn new(
        scene_id: &str,
        character_id: Option<String>,
        content: String,
        category: PlotNoteCategory,
        importance: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            scene_id: scene_id.to_string(),
            character_id,
            content,
            category,
            importance: clamp_importance(importance),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interaction_type_normalizes_synonyms() {
        assert_eq!(
            InteractionType::normalize("environmental"),
            InteractionType::Narration
        );
        assert_eq!(InteractionType::normalize("gesture"), InteractionType::Action);
        assert_eq!(InteractionType::normalize("xyz"), InteractionType::Dialogue);
        assert_eq!(
            InteractionType::normalize(" Thought "),
            InteractionType::Thought
        );
    }

    #[test]
    fn intensity_and_importance_are_clamped() {
        assert_eq!(clamp_intensity(500.0), 100.0);
        assert_eq!(clamp_intensity(-500.0), -100.0);
        assert_eq!(clamp_intensity(42.5), 42.5);
        assert_eq!(clamp_importance(0), 1);
        assert_eq!(clamp_importance(9), 5);
        assert_eq!(clamp_importance(3), 3);
    }

    #[test]
    fn self_referential_feelings_are_rejected() {
        assert!(CharacterFeeling::new("a", "a", "trust".into(), 10.0, "".into()).is_none());
        let feeling =
            CharacterFeeling::new("a", "b", "trust".into(), 500.0, "saved my life".into()).unwrap();
        assert_eq!(feeling.intensity, 100.0);
    }
}
