use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Engine configuration, loaded from `fabula.toml` with environment
/// variable overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // LLM configuration (OpenAI-compatible: Ollama, LM Studio, vLLM, OpenAI, etc.)
    #[serde(default = "default_llm_url")]
    pub llm_api_url: String,
    #[serde(default = "default_llm_model")]
    pub llm_model: String,
    #[serde(default)]
    pub llm_api_key: Option<String>,

    // Story state storage
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Generation knobs
    /// Word budget for a single character turn.
    #[serde(default = "default_turn_word_budget")]
    pub turn_word_budget: u32,
    /// Token budget for one unified conversation batch.
    #[serde(default = "default_conversation_token_budget")]
    pub conversation_token_budget: u32,
    #[serde(default = "default_turn_temperature")]
    pub turn_temperature: f32,
    #[serde(default = "default_analysis_temperature")]
    pub analysis_temperature: f32,
}

fn default_llm_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_llm_model() -> String {
    "llama3.2".to_string()
}

fn default_database_path() -> String {
    "fabula_story.db".to_string()
}

fn default_turn_word_budget() -> u32 {
    50
}

fn default_conversation_token_budget() -> u32 {
    800
}

fn default_turn_temperature() -> f32 {
    0.8
}

fn default_analysis_temperature() -> f32 {
    0.3
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            llm_api_url: default_llm_url(),
            llm_model: default_llm_model(),
            llm_api_key: None,
            database_path: default_database_path(),
            turn_word_budget: default_turn_word_budget(),
            conversation_token_budget: default_conversation_token_budget(),
            turn_temperature: default_turn_temperature(),
            analysis_temperature: default_analysis_temperature(),
        }
    }
}

impl EngineConfig {
    pub fn config_path() -> PathBuf {
        PathBuf::from("fabula.toml")
    }

    /// Load from `fabula.toml` in the working directory, falling back to
    /// defaults plus environment variables.
    pub fn load() -> Self {
        Self::load_from(Self::config_path())
    }

    pub fn load_from<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        if let Ok(contents) = fs::read_to_string(path) {
            match toml::from_str::<EngineConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::default().with_env_overrides()
    }

    /// Save config next to the working directory.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = env::var("FABULA_LLM_API_URL") {
            self.llm_api_url = url;
        }
        if let Ok(model) = env::var("FABULA_LLM_MODEL") {
            self.llm_model = model;
        }
        if let Ok(key) = env::var("FABULA_LLM_API_KEY") {
            self.llm_api_key = Some(key);
        }
        if let Ok(path) = env::var("FABULA_DATABASE_PATH") {
            self.database_path = path;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: EngineConfig = toml::from_str("llm_model = \"mistral\"").unwrap();
        assert_eq!(config.llm_model, "mistral");
        assert_eq!(config.llm_api_url, default_llm_url());
        assert_eq!(config.turn_word_budget, 50);
        assert_eq!(config.conversation_token_budget, 800);
    }

    #[test]
    fn config_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabula.toml");

        let mut config = EngineConfig::default();
        config.llm_model = "qwen2.5".to_string();
        fs::write(&path, toml::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = EngineConfig::load_from(&path);
        assert_eq!(loaded.llm_model, "qwen2.5");
    }

    #[test]
    fn env_vars_override_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fabula.toml");
        fs::write(&path, "database_path = \"from-file.db\"").unwrap();

        env::set_var("FABULA_DATABASE_PATH", "from-env.db");
        let loaded = EngineConfig::load_from(&path);
        env::remove_var("FABULA_DATABASE_PATH");

        assert_eq!(loaded.database_path, "from-env.db");
    }
}
