//! Narrative orchestration: turn generation, conversation protocol,
//! memory/feeling derivation, and the per-scene critical section.

pub mod narration;
pub mod recall;
pub mod turns;

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::config::EngineConfig;
use crate::database::{DiscardCounts, StoryDatabase};
use crate::provider::GenerationProvider;
use crate::story::{Character, Interaction, Scene};
use crate::timeline::{self, TimelineView};

/// Errors surfaced by orchestration operations.
///
/// Provider failures and malformed payloads never appear here: they are
/// absorbed by fallback content so the story always continues.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("scene '{0}' not found")]
    SceneNotFound(String),
    #[error("character '{0}' not found")]
    CharacterNotFound(String),
    #[error("character '{character_id}' is not a member of scene '{scene_id}'")]
    CharacterNotInScene {
        character_id: String,
        scene_id: String,
    },
    #[error("no existing conversation to continue in scene '{0}'")]
    ConversationEmpty(String),
    #[error("scene '{0}' is busy with another operation")]
    SceneBusy(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// One committed turn plus what was derived from it.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub interaction: Interaction,
    pub character_name: String,
    pub thoughts: Option<String>,
    pub memory_created: bool,
    pub feelings_recorded: usize,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct AdvanceOutcome {
    pub scene_id: String,
    pub turns: Vec<TurnOutcome>,
}

#[derive(Debug, Clone)]
pub struct ConversationOutcome {
    pub scene_id: String,
    pub interactions: Vec<Interaction>,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct SaveOutcome {
    pub scene_id: String,
    pub interaction_count: usize,
}

#[derive(Debug, Clone)]
pub struct DiscardOutcome {
    pub scene_id: String,
    pub counts: DiscardCounts,
}

/// The orchestration core. Stateless between calls apart from the busy
/// registry: every operation rebuilds its context from persisted state.
pub struct StoryEngine {
    pub(crate) db: Arc<StoryDatabase>,
    pub(crate) provider: Arc<dyn GenerationProvider>,
    pub(crate) config: EngineConfig,
    busy_scenes: Arc<Mutex<HashSet<String>>>,
}

/// Releases a scene's critical section on drop.
struct SceneGuard {
    registry: Arc<Mutex<HashSet<String>>>,
    scene_id: String,
}

impl Drop for SceneGuard {
    fn drop(&mut self) {
        if let Ok(mut busy) = self.registry.lock() {
            busy.remove(&self.scene_id);
        }
    }
}

impl StoryEngine {
    pub fn new(
        db: Arc<StoryDatabase>,
        provider: Arc<dyn GenerationProvider>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db,
            provider,
            config,
            busy_scenes: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Enter the scene's critical section, or fail with `SceneBusy` if
    /// another orchestration operation holds it. Never blocks.
    fn lock_scene(&self, scene_id: &str) -> EngineResult<SceneGuard> {
        let mut busy = self
            .busy_scenes
            .lock()
            .map_err(|e| EngineError::Storage(anyhow::anyhow!("busy registry poisoned: {}", e)))?;
        if !busy.insert(scene_id.to_string()) {
            return Err(EngineError::SceneBusy(scene_id.to_string()));
        }
        Ok(SceneGuard {
            registry: Arc::clone(&self.busy_scenes),
            scene_id: scene_id.to_string(),
        })
    }

    fn require_scene(&self, scene_id: &str) -> EngineResult<Scene> {
        self.db
            .get_scene(scene_id)?
            .ok_or_else(|| EngineError::SceneNotFound(scene_id.to_string()))
    }

    /// Generate a single turn for one character, commit it, then derive
    /// a memory and feeling deltas best-effort.
    pub async fn generate_interaction(
        &self,
        scene_id: &str,
        character_id: &str,
    ) -> EngineResult<TurnOutcome> {
        let _guard = self.lock_scene(scene_id)?;
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;

        let character = roster
            .iter()
            .find(|c| c.id == character_id)
            .cloned()
            .ok_or_else(|| match self.db.get_character(character_id) {
                Ok(Some(_)) => EngineError::CharacterNotInScene {
                    character_id: character_id.to_string(),
                    scene_id: scene_id.to_string(),
                },
                _ => EngineError::CharacterNotFound(character_id.to_string()),
            })?;

        let recent = self
            .db
            .recent_interactions(scene_id, crate::context::RECENT_CONVERSATION_WINDOW)?;
        let memories = self
            .db
            .character_memories(&character.id, crate::context::MEMORY_WINDOW)?;

        let outcome = self
            .commit_turn(&scene, &roster, &character, &recent, &memories)
            .await?;
        Ok(outcome)
    }

    /// Advance the scene: one generated turn per roster member, in
    /// membership order. An explicit accumulator extends the recent
    /// interaction list after every commit, so each subsequent
    /// character observes the turns of the same round.
    pub async fn advance_timeline(&self, scene_id: &str) -> EngineResult<AdvanceOutcome> {
        let _guard = self.lock_scene(scene_id)?;
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;

        let mut recent = self
            .db
            .recent_interactions(scene_id, crate::context::RECENT_CONVERSATION_WINDOW)?;
        let mut turns = Vec::with_capacity(roster.len());

        for character in &roster {
            let memories = self
                .db
                .character_memories(&character.id, crate::context::MEMORY_WINDOW)?;
            let outcome = self
                .commit_turn(&scene, &roster, character, &recent, &memories)
                .await?;
            recent.push(outcome.interaction.clone());
            turns.push(outcome);
        }

        tracing::info!(
            "Advanced scene '{}': {} turn(s) generated",
            scene.title,
            turns.len()
        );
        Ok(AdvanceOutcome {
            scene_id: scene_id.to_string(),
            turns,
        })
    }

    async fn commit_turn(
        &self,
        scene: &Scene,
        roster: &[Character],
        character: &Character,
        recent: &[Interaction],
        memories: &[crate::story::Memory],
    ) -> EngineResult<TurnOutcome> {
        let plan = self
            .compose_turn(character, scene, roster, recent, memories)
            .await;

        let interaction = Interaction::new(
            &scene.id,
            &character.id,
            plan.content,
            plan.interaction_type,
            plan.emotional_state,
            plan.target_character_id,
        );
        self.db.save_interaction(&interaction)?;

        let others: Vec<Character> = roster
            .iter()
            .filter(|c| c.id != character.id)
            .cloned()
            .collect();
        let (memory_created, feelings_recorded) =
            self.record_recall(character, &interaction, scene, &others).await;

        Ok(TurnOutcome {
            interaction,
            character_name: character.name.clone(),
            thoughts: plan.thoughts,
            memory_created,
            feelings_recorded,
            used_fallback: plan.is_fallback,
        })
    }

    /// Start a fresh conversation: clear the scene's previous
    /// conversation state, then generate a unified opening batch.
    pub async fn start_conversation(&self, scene_id: &str) -> EngineResult<ConversationOutcome> {
        let _guard = self.lock_scene(scene_id)?;
        let scene = self.require_scene(scene_id)?;
        self.db.discard_conversation(scene_id)?;

        let roster = self.db.scene_roster(scene_id)?;
        let (batch, used_fallback) = self.compose_conversation(&scene, &roster, &[]).await;

        let interactions = self.commit_batch(&scene, batch)?;
        Ok(ConversationOutcome {
            scene_id: scene_id.to_string(),
            interactions,
            used_fallback,
        })
    }

    /// Continue an existing conversation with a further unified batch.
    pub async fn continue_conversation(&self, scene_id: &str) -> EngineResult<ConversationOutcome> {
        let _guard = self.lock_scene(scene_id)?;
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;

        let prior = self.db.scene_interactions(scene_id)?;
        if prior.is_empty() {
            return Err(EngineError::ConversationEmpty(scene_id.to_string()));
        }

        let (batch, used_fallback) = self.compose_conversation(&scene, &roster, &prior).await;
        let interactions = self.commit_batch(&scene, batch)?;
        Ok(ConversationOutcome {
            scene_id: scene_id.to_string(),
            interactions,
            used_fallback,
        })
    }

    fn commit_batch(
        &self,
        scene: &Scene,
        batch: Vec<turns::ConversationTurn>,
    ) -> EngineResult<Vec<Interaction>> {
        let mut interactions = Vec::with_capacity(batch.len());
        for turn in batch {
            let interaction = Interaction::new(
                &scene.id,
                &turn.character_id,
                turn.content,
                turn.interaction_type,
                turn.emotional_state,
                turn.target_character_id,
            );
            self.db.save_interaction(&interaction)?;
            interactions.push(interaction);
        }
        Ok(interactions)
    }

    /// Saving is a confirmation, not a state transition: committed
    /// interactions are already durable.
    pub fn save_conversation(&self, scene_id: &str) -> EngineResult<SaveOutcome> {
        self.require_scene(scene_id)?;
        let interaction_count = self.db.count_scene_interactions(scene_id)?;
        Ok(SaveOutcome {
            scene_id: scene_id.to_string(),
            interaction_count,
        })
    }

    /// Discard the scene's conversation, clearing interactions, memories
    /// and the members' feeling history.
    pub fn discard_conversation(&self, scene_id: &str) -> EngineResult<DiscardOutcome> {
        let _guard = self.lock_scene(scene_id)?;
        self.require_scene(scene_id)?;
        let counts = self.db.discard_conversation(scene_id)?;
        tracing::info!(
            "Discarded conversation for scene '{}': {} interaction(s), {} memorie(s), {} feeling(s)",
            scene_id,
            counts.interactions,
            counts.memories,
            counts.feelings
        );
        Ok(DiscardOutcome {
            scene_id: scene_id.to_string(),
            counts,
        })
    }

    /// Merged, time-ordered view over the scene's persisted streams.
    pub fn timeline(&self, scene_id: &str) -> EngineResult<TimelineView> {
        let scene = self.require_scene(scene_id)?;
        let roster = self.db.scene_roster(scene_id)?;
        let interactions = self.db.scene_interactions(scene_id)?;
        let memories = self.db.scene_memories(scene_id)?;
        let plot_notes = self.db.scene_plot_notes(scene_id)?;

        let member_ids: Vec<String> = roster.iter().map(|c| c.id.clone()).collect();
        let feelings = self.db.feelings_of(&member_ids)?;

        let entries = timeline::assemble(&roster, &interactions, &memories, &plot_notes);
        Ok(TimelineView {
            scene_id: scene.id,
            scene_title: scene.title,
            entries,
            feelings,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::provider::{GenerationProvider, ProviderError};

    /// Provider that replays a fixed script of responses and records the
    /// prompts it was asked for.
    pub struct ScriptedProvider {
        responses: Mutex<VecDeque<Result<String, ProviderError>>>,
        pub calls: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedProvider {
        pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: Mutex::new(Vec::new()),
            }
        }

        /// All providers fail: every call errors.
        pub fn failing() -> Self {
            Self::new(Vec::new())
        }

        pub fn recorded_calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl GenerationProvider for ScriptedProvider {
        async fn complete(
            &self,
            system_prompt: &str,
            user_prompt: &str,
            _max_tokens: u32,
            _temperature: f32,
        ) -> Result<String, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_prompt.to_string()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(ProviderError::Empty))
        }
    }
}
