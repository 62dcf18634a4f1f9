//! Scene narration, scene summarization, and plot inspiration.
//!
//! These calls enrich a scene around the turn loop: free-text
//! atmosphere, a structured recap persisted as a plot note, and story
//! prompts for the author. Like everywhere else, generation failure
//! degrades to deterministic content.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use crate::context;
use crate::fallback;
use crate::parser::extract_payload;
use crate::story::{Character, Interaction, PlotNote, PlotNoteCategory, Scene};

use super::{EngineResult, StoryEngine};

const SYSTEM_NARRATION: &str = "You are an AI that generates atmospheric narrative descriptions \
    for novel writing. Focus on sensory details, character dynamics, and plot advancement.";
const SYSTEM_SUMMARY: &str = "You are a story analyst. Return ONLY valid JSON. Focus on \
    character relationships and developments.";
const SYSTEM_INSPIRATION: &str =
    "You are an AI that generates plot inspiration for novel writing.";

const NARRATION_TOKEN_BUDGET: u32 = 150;
const SUMMARY_TOKEN_BUDGET: u32 = 300;
const INSPIRATION_TOKEN_BUDGET: u32 = 400;
const NARRATION_TEMPERATURE: f32 = 0.7;
const INSPIRATION_TEMPERATURE: f32 = 0.8;

/// Interactions quoted in the plot-inspiration prompt.
const INSPIRATION_WINDOW: usize = 10;

/// Structured recap of a scene's events.
#[derive(Debug, Clone, Serialize)]
pub struct SceneSummary {
    pub summary: String,
    pub key_events: Vec<String>,
    pub character_developments: BTreeMap<String, String>,
    pub relationship_changes: Vec<String>,
    pub plot_advancement: String,
}

impl StoryEngine {
    /// Atmospheric narrative description of the scene as it stands.
    pub async fn narrate_scene(&self, scene_id: &str) -> EngineResult<String> {
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;
        let recent = self
            .db
            .recent_interactions(scene_id, context::RECENT_TURN_WINDOW)?;

        let prompt = narration_prompt(&scene, &roster, &recent);
        match self
            .provider
            .complete(
                SYSTEM_NARRATION,
                &prompt,
                NARRATION_TOKEN_BUDGET,
                NARRATION_TEMPERATURE,
            )
            .await
        {
            Ok(text) => Ok(text.trim().to_string()),
            Err(e) => {
                tracing::warn!("Scene narration failed for '{}': {}", scene.title, e);
                Ok(fallback::narration(&scene))
            }
        }
    }

    /// Summarize the scene's events and persist the summary line as a
    /// plot note. Generation or parse failure degrades to a summary
    /// assembled from stored interactions; the plot note is written
    /// either way.
    pub async fn summarize_scene(&self, scene_id: &str) -> EngineResult<SceneSummary> {
        let _guard = self.lock_scene(scene_id)?;
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;
        let interactions = self.db.scene_interactions(scene_id)?;

        let prompt = summary_prompt(&scene, &roster, &interactions);
        let summary = match self
            .provider
            .complete(
                SYSTEM_SUMMARY,
                &prompt,
                SUMMARY_TOKEN_BUDGET,
                NARRATION_TEMPERATURE,
            )
            .await
        {
            Ok(raw) => match parse_summary(&raw) {
                Some(summary) => summary,
                None => {
                    tracing::warn!("Scene summary for '{}' had no usable JSON", scene.title);
                    fallback::scene_summary(&scene, &roster, &interactions)
                }
            },
            Err(e) => {
                tracing::warn!("Scene summary failed for '{}': {}", scene.title, e);
                fallback::scene_summary(&scene, &roster, &interactions)
            }
        };

        let note = PlotNote::new(
            &scene.id,
            None,
            summary.summary.clone(),
            PlotNoteCategory::SceneSummary,
            4,
        );
        self.db.save_plot_note(&note)?;

        Ok(summary)
    }

    /// Plot points that could emerge from the scene's interactions.
    pub async fn plot_inspiration(&self, scene_id: &str) -> EngineResult<Vec<String>> {
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;
        let interactions = self
            .db
            .recent_interactions(scene_id, INSPIRATION_WINDOW)?;

        let prompt = inspiration_prompt(&scene, &roster, &interactions);
        let raw = match self
            .provider
            .complete(
                SYSTEM_INSPIRATION,
                &prompt,
                INSPIRATION_TOKEN_BUDGET,
                INSPIRATION_TEMPERATURE,
            )
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!("Plot inspiration failed for '{}': {}", scene.title, e);
                return Ok(fallback::plot_inspiration());
            }
        };

        let points: Vec<String> = match extract_payload(&raw, &[]).into_value() {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if points.is_empty() {
            tracing::warn!("Plot inspiration for '{}' had no usable JSON", scene.title);
            return Ok(fallback::plot_inspiration());
        }
        Ok(points)
    }
}

fn parse_summary(raw: &str) -> Option<SceneSummary> {
    let value = extract_payload(raw, &["summary"]).into_value()?;
    let object = match value {
        Value::Array(items) => items.into_iter().find(|item| item.is_object())?,
        object @ Value::Object(_) => object,
        _ => return None,
    };
    let map = object.as_object()?;

    let summary = map
        .get("summary")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())?
        .trim()
        .to_string();

    let key_events = string_list(map.get("key_events"));
    let relationship_changes = string_list(map.get("relationship_changes"));
    let character_developments = map
        .get("character_developments")
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|(name, value)| {
                    value.as_str().map(|v| (name.clone(), v.to_string()))
                })
                .collect()
        })
        .unwrap_or_default();
    let plot_advancement = map
        .get("plot_advancement")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    Some(SceneSummary {
        summary,
        key_events,
        character_developments,
        relationship_changes,
        plot_advancement,
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn narration_prompt(scene: &Scene, roster: &[Character], recent: &[Interaction]) -> String {
    format!(
        "Generate a narrative description for this scene that enhances the atmosphere and contributes to the plot:\n\n\
         SCENE DETAILS:\n\
         Title: {title}\n\
         Environment: {environment}\n\
         Context: {context}\n\
         Weather: {weather}\n\
         Time: {time}\n\
         Mood: {mood}\n\n\
         CHARACTERS PRESENT:\n{roster}\n\n\
         RECENT INTERACTIONS:\n{interactions}\n\n\
         Generate a narrative description that:\n\
         1. **Sets the atmospheric tone** - Describe the environment, lighting, sounds, smells\n\
         2. **Shows character dynamics** - How characters are positioned, their body language, subtle interactions\n\
         3. **Advances the plot** - Include details that hint at future developments or reveal character motivations\n\
         4. **Creates tension or mood** - Use sensory details to build the emotional atmosphere\n\n\
         Keep it concise but evocative (2-3 sentences). Focus on details that matter to the story.\n\n\
         Narrative description:",
        title = scene.title,
        environment = scene.environment,
        context = scene.context,
        weather = scene.weather.as_deref().unwrap_or("Not specified"),
        time = scene.time_of_day.as_deref().unwrap_or("Not specified"),
        mood = scene.mood.as_deref().unwrap_or("Not specified"),
        roster = context::roster_context(roster),
        interactions = context::interaction_context(recent, roster, context::RECENT_TURN_WINDOW),
    )
}

fn summary_prompt(scene: &Scene, roster: &[Character], interactions: &[Interaction]) -> String {
    let names: Vec<&str> = roster.iter().map(|c| c.name.as_str()).collect();
    let lines: Vec<String> = interactions
        .iter()
        .map(|interaction| {
            let author = roster
                .iter()
                .find(|c| c.id == interaction.character_id)
                .map(|c| c.name.as_str())
                .unwrap_or("Unknown");
            format!("- {}: {}", author, interaction.content)
        })
        .collect();

    format!(
        "Analyze this scene and focus on character relationships and developments:\n\n\
         SCENE: {title}\n\
         CONTEXT: {context}\n\
         ENVIRONMENT: {environment}\n\n\
         CHARACTERS: {names:?}\n\n\
         INTERACTIONS:\n{lines}\n\n\
         Analyze and return JSON with:\n\
         1. **summary**: 2-3 sentence scene overview\n\
         2. **key_events**: 3-5 most important events\n\
         3. **character_developments**: how each character changed or revealed themselves\n\
         4. **relationship_changes**: specific relationship developments between characters\n\
         5. **plot_advancement**: how this moves the story forward\n\n\
         Return ONLY valid JSON:\n\
         {{\n  \"summary\": \"brief scene overview\",\n  \"key_events\": [\"event1\", \"event2\", \"event3\"],\n  \
         \"character_developments\": {{\"Character1\": \"development\", \"Character2\": \"development\"}},\n  \
         \"relationship_changes\": [\"relationship change 1\", \"relationship change 2\"],\n  \
         \"plot_advancement\": \"how story progresses\"\n}}",
        title = scene.title,
        context = scene.context,
        environment = scene.environment,
        names = names,
        lines = lines.join("\n"),
    )
}

fn inspiration_prompt(scene: &Scene, roster: &[Character], interactions: &[Interaction]) -> String {
    let names: Vec<&str> = roster.iter().map(|c| c.name.as_str()).collect();
    let lines: Vec<String> = interactions
        .iter()
        .map(|interaction| {
            let author = roster
                .iter()
                .find(|c| c.id == interaction.character_id)
                .map(|c| c.name.as_str())
                .unwrap_or("Unknown");
            format!(
                "{}: {}",
                author,
                context::excerpt(&interaction.content, 100)
            )
        })
        .collect();

    format!(
        "Based on this scene and character interactions, generate plot inspiration for novel writing:\n\n\
         Scene: {title}\n\
         Context: {context}\n\
         Characters: {names:?}\n\n\
         Recent interactions: {lines:?}\n\n\
         Generate 5 plot points or story developments that could emerge from these interactions.\n\
         Focus on character development, conflicts, and story progression.\n\n\
         Return as a JSON array of strings.",
        title = scene.title,
        context = scene.context,
        names = names,
        lines = lines,
    )
}
