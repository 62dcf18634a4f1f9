use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::Mutex;
use uuid::Uuid;

use crate::story::{
    Character, CharacterDraft, CharacterFeeling, CharacterUpdate, Interaction, InteractionType,
    Memory, MemoryType, PlotNote, PlotNoteCategory, Scene, SceneDraft, SceneMember,
};

/// Counts of rows removed when a scene's conversation is discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardCounts {
    pub interactions: usize,
    pub memories: usize,
    pub feelings: usize,
}

/// Persistent story state: characters, scenes, interactions, memories,
/// feelings and plot notes.
pub struct StoryDatabase {
    conn: Mutex<Connection>,
}

impl StoryDatabase {
    /// Create or open the database at `path`.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    /// Private in-memory database, used by embedders and tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.ensure_schema()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Database lock poisoned: {}", e))
    }

    fn ensure_schema(&self) -> Result<()> {
        let conn = self.lock_conn()?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS characters (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                personality TEXT NOT NULL,
                background TEXT NOT NULL,
                appearance TEXT,
                goals TEXT,
                fears TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS scenes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                environment TEXT NOT NULL,
                context TEXT NOT NULL,
                weather TEXT,
                time_of_day TEXT,
                mood TEXT,
                is_active INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS scene_members (
                id TEXT PRIMARY KEY,
                scene_id TEXT NOT NULL,
                character_id TEXT NOT NULL,
                role_in_scene TEXT,
                emotional_state TEXT NOT NULL DEFAULT 'neutral'
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS interactions (
                id TEXT PRIMARY KEY,
                scene_id TEXT NOT NULL,
                character_id TEXT NOT NULL,
                content TEXT NOT NULL,
                interaction_type TEXT NOT NULL DEFAULT 'dialogue',
                emotional_state TEXT,
                target_character_id TEXT,
                interaction_date TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS memories (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                scene_id TEXT NOT NULL,
                key_points_json TEXT NOT NULL,
                memory_type TEXT NOT NULL DEFAULT 'interaction',
                emotional_impact REAL NOT NULL DEFAULT 0,
                importance INTEGER NOT NULL DEFAULT 1,
                related_characters_json TEXT NOT NULL,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS character_feelings (
                id TEXT PRIMARY KEY,
                character_id TEXT NOT NULL,
                target_character_id TEXT NOT NULL,
                feeling_type TEXT NOT NULL,
                intensity REAL NOT NULL DEFAULT 0,
                reason TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            r#"CREATE TABLE IF NOT EXISTS plot_notes (
                id TEXT PRIMARY KEY,
                scene_id TEXT NOT NULL,
                character_id TEXT,
                content TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT 'general',
                importance INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL
            )"#,
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_scene_members_scene ON scene_members(scene_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_interactions_scene_created ON interactions(scene_id, created_at ASC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_scene ON memories(scene_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_memories_character_created ON memories(character_id, created_at ASC)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_feelings_character ON character_feelings(character_id)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_plot_notes_scene ON plot_notes(scene_id)",
            [],
        )?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Characters
    // ------------------------------------------------------------------

    pub fn create_character(&self, draft: CharacterDraft) -> Result<Character> {
        let now = Utc::now();
        let character = Character {
            id: Uuid::new_v4().to_string(),
            name: draft.name,
            personality: draft.personality,
            background: draft.background,
            appearance: draft.appearance,
            goals: draft.goals,
            fears: draft.fears,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO characters (id, name, personality, background, appearance, goals, fears, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                character.id,
                character.name,
                character.personality,
                character.background,
                character.appearance,
                character.goals,
                character.fears,
                character.created_at.to_rfc3339(),
                character.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(character)
    }

    pub fn get_character(&self, id: &str) -> Result<Option<Character>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT id, name, personality, background, appearance, goals, fears, created_at, updated_at
             FROM characters WHERE id = ?1",
            [id],
            character_from_row,
        );
        optional(result)
    }

    pub fn list_characters(&self) -> Result<Vec<Character>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, personality, background, appearance, goals, fears, created_at, updated_at
             FROM characters ORDER BY created_at ASC",
        )?;
        let characters = stmt
            .query_map([], character_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(characters)
    }

    /// Update a character's narrative fields. Identity never changes.
    pub fn update_character(&self, id: &str, update: CharacterUpdate) -> Result<Character> {
        let mut character = self
            .get_character(id)?
            .with_context(|| format!("Character '{}' not found", id))?;

        if let Some(name) = update.name {
            character.name = name;
        }
        if let Some(personality) = update.personality {
            character.personality = personality;
        }
        if let Some(background) = update.background {
            character.background = background;
        }
        if update.appearance.is_some() {
            character.appearance = update.appearance;
        }
        if update.goals.is_some() {
            character.goals = update.goals;
        }
        if update.fears.is_some() {
            character.fears = update.fears;
        }
        character.updated_at = Utc::now();

        let conn = self.lock_conn()?;
        conn.execute(
            "UPDATE characters
             SET name = ?2, personality = ?3, background = ?4, appearance = ?5, goals = ?6, fears = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                character.id,
                character.name,
                character.personality,
                character.background,
                character.appearance,
                character.goals,
                character.fears,
                character.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(character)
    }

    pub fn delete_character(&self, id: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM characters WHERE id = ?1", [id])?;
        conn.execute("DELETE FROM scene_members WHERE character_id = ?1", [id])?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scenes and membership
    // ------------------------------------------------------------------

    pub fn create_scene(&self, draft: SceneDraft, character_ids: &[String]) -> Result<Scene> {
        let now = Utc::now();
        let scene = Scene {
            id: Uuid::new_v4().to_string(),
            title: draft.title,
            environment: draft.environment,
            context: draft.context,
            weather: draft.weather,
            time_of_day: draft.time_of_day,
            mood: draft.mood,
            is_active: false,
            created_at: now,
            updated_at: now,
        };

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO scenes (id, title, environment, context, weather, time_of_day, mood, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8, ?9)",
            params![
                scene.id,
                scene.title,
                scene.environment,
                scene.context,
                scene.weather,
                scene.time_of_day,
                scene.mood,
                scene.created_at.to_rfc3339(),
                scene.updated_at.to_rfc3339(),
            ],
        )?;

        // Insertion order defines the deterministic roster order.
        for character_id in character_ids {
            conn.execute(
                "INSERT INTO scene_members (id, scene_id, character_id, role_in_scene, emotional_state)
                 VALUES (?1, ?2, ?3, NULL, 'neutral')",
                params![Uuid::new_v4().to_string(), scene.id, character_id],
            )?;
        }
        Ok(scene)
    }

    pub fn get_scene(&self, id: &str) -> Result<Option<Scene>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT id, title, environment, context, weather, time_of_day, mood, is_active, created_at, updated_at
             FROM scenes WHERE id = ?1",
            [id],
            scene_from_row,
        );
        optional(result)
    }

    pub fn list_scenes(&self) -> Result<Vec<Scene>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, environment, context, weather, time_of_day, mood, is_active, created_at, updated_at
             FROM scenes ORDER BY created_at ASC",
        )?;
        let scenes = stmt
            .query_map([], scene_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(scenes)
    }

    /// Activate one scene and deactivate all others in a single atomic
    /// update, so exactly one scene is active afterwards.
    pub fn activate_scene(&self, id: &str) -> Result<Scene> {
        {
            let conn = self.lock_conn()?;
            let changed = conn.execute(
                "UPDATE scenes SET is_active = (id = ?1), updated_at = ?2",
                params![id, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                anyhow::bail!("Scene '{}' not found", id);
            }
        }
        self.get_scene(id)?
            .with_context(|| format!("Scene '{}' not found", id))
    }

    pub fn active_scene(&self) -> Result<Option<Scene>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            "SELECT id, title, environment, context, weather, time_of_day, mood, is_active, created_at, updated_at
             FROM scenes WHERE is_active = 1 LIMIT 1",
            [],
            scene_from_row,
        );
        optional(result)
    }

    /// The scene's roster, in membership insertion order.
    pub fn scene_roster(&self, scene_id: &str) -> Result<Vec<Character>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.personality, c.background, c.appearance, c.goals, c.fears, c.created_at, c.updated_at
             FROM scene_members sm
             JOIN characters c ON c.id = sm.character_id
             WHERE sm.scene_id = ?1
             ORDER BY sm.rowid ASC",
        )?;
        let characters = stmt
            .query_map([scene_id], character_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(characters)
    }

    pub fn scene_members(&self, scene_id: &str) -> Result<Vec<SceneMember>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, scene_id, character_id, role_in_scene, emotional_state
             FROM scene_members WHERE scene_id = ?1 ORDER BY rowid ASC",
        )?;
        let members = stmt
            .query_map([scene_id], |row| {
                Ok(SceneMember {
                    id: row.get(0)?,
                    scene_id: row.get(1)?,
                    character_id: row.get(2)?,
                    role_in_scene: row.get(3)?,
                    emotional_state: row.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(members)
    }

    // ------------------------------------------------------------------
    // Interactions
    // ------------------------------------------------------------------

    pub fn save_interaction(&self, interaction: &Interaction) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO interactions
             (id, scene_id, character_id, content, interaction_type, emotional_state, target_character_id, interaction_date, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                interaction.id,
                interaction.scene_id,
                interaction.character_id,
                interaction.content,
                interaction.interaction_type.as_str(),
                interaction.emotional_state,
                interaction.target_character_id,
                interaction.interaction_date.to_string(),
                interaction.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// All interactions for a scene, oldest first. Insertion order breaks
    /// timestamp ties.
    pub fn scene_interactions(&self, scene_id: &str) -> Result<Vec<Interaction>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, scene_id, character_id, content, interaction_type, emotional_state, target_character_id, interaction_date, created_at
             FROM interactions WHERE scene_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let interactions = stmt
            .query_map([scene_id], interaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(interactions)
    }

    /// The last `limit` interactions for a scene, returned oldest first.
    pub fn recent_interactions(&self, scene_id: &str, limit: usize) -> Result<Vec<Interaction>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, scene_id, character_id, content, interaction_type, emotional_state, target_character_id, interaction_date, created_at
             FROM interactions WHERE scene_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let mut interactions = stmt
            .query_map(params![scene_id, limit as i64], interaction_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        interactions.reverse();
        Ok(interactions)
    }

    pub fn count_scene_interactions(&self, scene_id: &str) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM interactions WHERE scene_id = ?1",
            [scene_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Memories
    // ------------------------------------------------------------------

    pub fn save_memory(&self, memory: &Memory) -> Result<()> {
        let key_points_json = serde_json::to_string(&memory.key_points)
            .context("Failed to serialize memory key points")?;
        let related_json = serde_json::to_string(&memory.related_characters)
            .context("Failed to serialize related characters")?;

        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO memories
             (id, character_id, scene_id, key_points_json, memory_type, emotional_impact, importance, related_characters_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                memory.id,
                memory.character_id,
                memory.scene_id,
                key_points_json,
                memory.memory_type.as_str(),
                memory.emotional_impact,
                memory.importance,
                related_json,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// The character's last `limit` memories, returned oldest first.
    pub fn character_memories(&self, character_id: &str, limit: usize) -> Result<Vec<Memory>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, character_id, scene_id, key_points_json, memory_type, emotional_impact, importance, related_characters_json, created_at
             FROM memories WHERE character_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;
        let mut memories = stmt
            .query_map(params![character_id, limit as i64], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        memories.reverse();
        Ok(memories)
    }

    pub fn scene_memories(&self, scene_id: &str) -> Result<Vec<Memory>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, character_id, scene_id, key_points_json, memory_type, emotional_impact, importance, related_characters_json, created_at
             FROM memories WHERE scene_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let memories = stmt
            .query_map([scene_id], memory_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(memories)
    }

    // ------------------------------------------------------------------
    // Feelings
    // ------------------------------------------------------------------

    pub fn save_feeling(&self, feeling: &CharacterFeeling) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO character_feelings
             (id, character_id, target_character_id, feeling_type, intensity, reason, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                feeling.id,
                feeling.character_id,
                feeling.target_character_id,
                feeling.feeling_type,
                feeling.intensity,
                feeling.reason,
                feeling.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Feeling history authored by any of the given characters, oldest first.
    pub fn feelings_of(&self, character_ids: &[String]) -> Result<Vec<CharacterFeeling>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, character_id, target_character_id, feeling_type, intensity, reason, created_at
             FROM character_feelings WHERE character_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;

        let mut feelings = Vec::new();
        for character_id in character_ids {
            let batch = stmt
                .query_map([character_id], feeling_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            feelings.extend(batch);
        }
        Ok(feelings)
    }

    // ------------------------------------------------------------------
    // Plot notes
    // ------------------------------------------------------------------

    pub fn save_plot_note(&self, note: &PlotNote) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO plot_notes (id, scene_id, character_id, content, category, importance, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                note.id,
                note.scene_id,
                note.character_id,
                note.content,
                note.category.as_str(),
                note.importance,
                note.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn scene_plot_notes(&self, scene_id: &str) -> Result<Vec<PlotNote>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, scene_id, character_id, content, category, importance, created_at
             FROM plot_notes WHERE scene_id = ?1 ORDER BY created_at ASC, rowid ASC",
        )?;
        let notes = stmt
            .query_map([scene_id], plot_note_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    // ------------------------------------------------------------------
    // Conversation discard
    // ------------------------------------------------------------------

    /// Clear a scene's conversation: its interactions and memories, and
    /// the feeling history of its members. Scene and character entities
    /// are untouched.
    pub fn discard_conversation(&self, scene_id: &str) -> Result<DiscardCounts> {
        let member_ids: Vec<String> = self
            .scene_members(scene_id)?
            .into_iter()
            .map(|m| m.character_id)
            .collect();

        let conn = self.lock_conn()?;
        let interactions =
            conn.execute("DELETE FROM interactions WHERE scene_id = ?1", [scene_id])?;
        let memories = conn.execute("DELETE FROM memories WHERE scene_id = ?1", [scene_id])?;

        let mut feelings = 0;
        for character_id in &member_ids {
            feelings += conn.execute(
                "DELETE FROM character_feelings WHERE character_id = ?1",
                [character_id],
            )?;
        }

        Ok(DiscardCounts {
            interactions,
            memories,
            feelings,
        })
    }
}

// ----------------------------------------------------------------------
// Row mapping
// ----------------------------------------------------------------------

fn optional<T>(result: std::result::Result<T, rusqlite::Error>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_rfc3339(
    value: String,
    column: usize,
) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_date(value: String, column: usize) -> std::result::Result<NaiveDate, rusqlite::Error> {
    value.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_json_list(
    value: String,
    column: usize,
) -> std::result::Result<Vec<String>, rusqlite::Error> {
    serde_json::from_str(&value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn character_from_row(row: &Row<'_>) -> std::result::Result<Character, rusqlite::Error> {
    Ok(Character {
        id: row.get(0)?,
        name: row.get(1)?,
        personality: row.get(2)?,
        background: row.get(3)?,
        appearance: row.get(4)?,
        goals: row.get(5)?,
        fears: row.get(6)?,
        created_at: parse_rfc3339(row.get::<_, String>(7)?, 7)?,
        updated_at: parse_rfc3339(row.get::<_, String>(8)?, 8)?,
    })
}

fn scene_from_row(row: &Row<'_>) -> std::result::Result<Scene, rusqlite::Error> {
    Ok(Scene {
        id: row.get(0)?,
        title: row.get(1)?,
        environment: row.get(2)?,
        context: row.get(3)?,
        weather: row.get(4)?,
        time_of_day: row.get(5)?,
        mood: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        created_at: parse_rfc3339(row.get::<_, String>(8)?, 8)?,
        updated_at: parse_rfc3339(row.get::<_, String>(9)?, 9)?,
    })
}

fn interaction_from_row(row: &Row<'_>) -> std::result::Result<Interaction, rusqlite::Error> {
    Ok(Interaction {
        id: row.get(0)?,
        scene_id: row.get(1)?,
        character_id: row.get(2)?,
        content: row.get(3)?,
        interaction_type: InteractionType::normalize(&row.get::<_, String>(4)?),
        emotional_state: row.get(5)?,
        target_character_id: row.get(6)?,
        interaction_date: parse_date(row.get::<_, String>(7)?, 7)?,
        created_at: parse_rfc3339(row.get::<_, String>(8)?, 8)?,
    })
}

fn memory_from_row(row: &Row<'_>) -> std::result::Result<Memory, rusqlite::Error> {
    Ok(Memory {
        id: row.get(0)?,
        character_id: row.get(1)?,
        scene_id: row.get(2)?,
        key_points: parse_json_list(row.get::<_, String>(3)?, 3)?,
        memory_type: MemoryType::normalize(&row.get::<_, String>(4)?),
        emotional_impact: row.get(5)?,
        importance: row.get(6)?,
        related_characters: parse_json_list(row.get::<_, String>(7)?, 7)?,
        created_at: parse_rfc3339(row.get::<_, String>(8)?, 8)?,
    })
}

fn feeling_from_row(row: &Row<'_>) -> std::result::Result<CharacterFeeling, rusqlite::Error> {
    Ok(CharacterFeeling {
        id: row.get(0)?,
        character_id: row.get(1)?,
        target_character_id: row.get(2)?,
        feeling_type: row.get(3)?,
        intensity: row.get(4)?,
        reason: row.get(5)?,
        created_at: parse_rfc3339(row.get::<_, String>(6)?, 6)?,
    })
}

fn plot_note_from_row(row: &Row<'_>) -> std::result::Result<PlotNote, rusqlite::Error> {
    Ok(PlotNote {
        id: row.get(0)?,
        scene_id: row.get(1)?,
        character_id: row.get(2)?,
        content: row.get(3)?,
        category: PlotNoteCategory::normalize(&row.get::<_, String>(4)?),
        importance: row.get(5)?,
        created_at: parse_rfc3339(row.get::<_, String>(6)?, 6)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{InteractionType, MemoryType, PlotNoteCategory};

    fn draft(name: &str) -> CharacterDraft {
        CharacterDraft {
            name: name.to_string(),
            personality: "curious and stubborn".to_string(),
            background: "grew up in the valley".to_string(),
            ..Default::default()
        }
    }

    fn scene_draft(title: &str) -> SceneDraft {
        SceneDraft {
            title: title.to_string(),
            environment: "A roadside diner at night".to_string(),
            context: "Two strangers share a booth".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn character_crud_round_trips() {
        let db = StoryDatabase::in_memory().unwrap();
        let created = db.create_character(draft("Emma Chen")).unwrap();

        let loaded = db.get_character(&created.id).unwrap().unwrap();
        assert_eq!(loaded.name, "Emma Chen");

        let updated = db
            .update_character(
                &created.id,
                CharacterUpdate {
                    goals: Some("find the missing hiker".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.goals.as_deref(), Some("find the missing hiker"));

        db.delete_character(&created.id).unwrap();
        assert!(db.get_character(&created.id).unwrap().is_none());
    }

    #[test]
    fn activating_a_scene_deactivates_all_others() {
        let db = StoryDatabase::in_memory().unwrap();
        let a = db.create_scene(scene_draft("Scene A"), &[]).unwrap();
        let b = db.create_scene(scene_draft("Scene B"), &[]).unwrap();

        let a = db.activate_scene(&a.id).unwrap();
        assert!(a.is_active);

        let b = db.activate_scene(&b.id).unwrap();
        assert!(b.is_active);

        let active: Vec<Scene> = db
            .list_scenes()
            .unwrap()
            .into_iter()
            .filter(|s| s.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
        assert_eq!(db.active_scene().unwrap().unwrap().id, b.id);
    }

    #[test]
    fn activating_missing_scene_fails() {
        let db = StoryDatabase::in_memory().unwrap();
        db.create_scene(scene_draft("Scene A"), &[]).unwrap();
        assert!(db.activate_scene("no-such-scene").is_err());
    }

    #[test]
    fn roster_preserves_membership_order() {
        let db = StoryDatabase::in_memory().unwrap();
        let emma = db.create_character(draft("Emma")).unwrap();
        let marcus = db.create_character(draft("Marcus")).unwrap();
        let scene = db
            .create_scene(scene_draft("Diner"), &[marcus.id.clone(), emma.id.clone()])
            .unwrap();

        let roster = db.scene_roster(&scene.id).unwrap();
        let names: Vec<&str> = roster.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Marcus", "Emma"]);
    }

    #[test]
    fn recent_interactions_returns_last_n_oldest_first() {
        let db = StoryDatabase::in_memory().unwrap();
        let emma = db.create_character(draft("Emma")).unwrap();
        let scene = db
            .create_scene(scene_draft("Diner"), &[emma.id.clone()])
            .unwrap();

        for i in 0..4 {
            let interaction = Interaction::new(
                &scene.id,
                &emma.id,
                format!("line {}", i),
                InteractionType::Dialogue,
                None,
                None,
            );
            db.save_interaction(&interaction).unwrap();
        }

        let recent = db.recent_interactions(&scene.id, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].content, "line 2");
        assert_eq!(recent[1].content, "line 3");
        assert_eq!(db.count_scene_interactions(&scene.id).unwrap(), 4);
    }

    #[test]
    fn memory_round_trips_key_points_and_related() {
        let db = StoryDatabase::in_memory().unwrap();
        let emma = db.create_character(draft("Emma")).unwrap();
        let scene = db
            .create_scene(scene_draft("Diner"), &[emma.id.clone()])
            .unwrap();

        let memory = Memory::new(
            &emma.id,
            &scene.id,
            vec!["Marcus hid the map".to_string(), "The lights flickered".to_string()],
            MemoryType::Revelation,
            250.0,
            7,
            vec!["other-id".to_string()],
        );
        db.save_memory(&memory).unwrap();

        let loaded = db.character_memories(&emma.id, 5).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].key_points.len(), 2);
        assert_eq!(loaded[0].memory_type, MemoryType::Revelation);
        // Clamped at construction time.
        assert_eq!(loaded[0].emotional_impact, 100.0);
        assert_eq!(loaded[0].importance, 5);
        assert_eq!(loaded[0].related_characters, vec!["other-id"]);
    }

    #[test]
    fn discard_clears_conversation_but_keeps_entities() {
        let db = StoryDatabase::in_memory().unwrap();
        let emma = db.create_character(draft("Emma")).unwrap();
        let marcus = db.create_character(draft("Marcus")).unwrap();
        let scene = db
            .create_scene(scene_draft("Diner"), &[emma.id.clone(), marcus.id.clone()])
            .unwrap();

        db.save_interaction(&Interaction::new(
            &scene.id,
            &emma.id,
            "hello".to_string(),
            InteractionType::Dialogue,
            None,
            None,
        ))
        .unwrap();
        db.save_memory(&Memory::new(
            &emma.id,
            &scene.id,
            vec!["met Marcus".to_string()],
            MemoryType::Interaction,
            10.0,
            2,
            vec![marcus.id.clone()],
        ))
        .unwrap();
        db.save_feeling(
            &CharacterFeeling::new(&emma.id, &marcus.id, "curiosity".to_string(), 30.0, "".to_string())
                .unwrap(),
        )
        .unwrap();

        let counts = db.discard_conversation(&scene.id).unwrap();
        assert_eq!(
            counts,
            DiscardCounts {
                interactions: 1,
                memories: 1,
                feelings: 1
            }
        );

        assert!(db.scene_interactions(&scene.id).unwrap().is_empty());
        assert!(db.scene_memories(&scene.id).unwrap().is_empty());
        assert!(db.get_scene(&scene.id).unwrap().is_some());
        assert!(db.get_character(&emma.id).unwrap().is_some());
        assert_eq!(db.scene_roster(&scene.id).unwrap().len(), 2);
    }

    #[test]
    fn plot_notes_round_trip() {
        let db = StoryDatabase::in_memory().unwrap();
        let scene = db.create_scene(scene_draft("Diner"), &[]).unwrap();

        let note = PlotNote::new(
            &scene.id,
            None,
            "The strangers agree to search together.".to_string(),
            PlotNoteCategory::SceneSummary,
            4,
        );
        db.save_plot_note(&note).unwrap();

        let notes = db.scene_plot_notes(&scene.id).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].category, PlotNoteCategory::SceneSummary);
        assert_eq!(notes[0].importance, 4);
    }

    #[test]
    fn database_persists_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("story.db");

        let id = {
            let db = StoryDatabase::new(&path).unwrap();
            db.create_character(draft("Emma")).unwrap().id
        };

        let reopened = StoryDatabase::new(&path).unwrap();
        assert!(reopened.get_character(&id).unwrap().is_some());
    }
}
