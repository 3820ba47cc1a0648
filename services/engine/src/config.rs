//! services/engine/src/config.rs
//!
//! Defines the engine's configuration structures and loading logic.
//!
//! Process settings are loaded from environment variables at startup (the `.env`
//! file is used for local development). The game rules (xp table, health system,
//! question rules) live in a JSON file whose path comes from the environment and
//! are loaded exactly once into a [`RulesHandle`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, Level};

use crate::error::{EngineError, EngineResult};

/// The number of attempts a reader gets per question. Fixed by the game design.
pub const MAX_ATTEMPTS_PER_QUESTION: u8 = 2;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Failed to read rules file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse rules file: {0}")]
    Parse(#[from] serde_json::Error),
}

//=========================================================================================
// Process configuration
//=========================================================================================

/// Holds all process-level configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub log_level: Level,
    pub rules_path: PathBuf,
    pub user_id: Option<String>,
    pub health_poll_interval: Duration,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to keep tests hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let rules_path = std::env::var("GAME_ENGINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./config/game_engine.json"));

        let user_id = std::env::var("LITURA_USER_ID").ok();

        let poll_secs_str = std::env::var("HEALTH_POLL_SECS").unwrap_or_else(|_| "10".to_string());
        let poll_secs = poll_secs_str.parse::<u64>().map_err(|e| {
            ConfigError::InvalidValue("HEALTH_POLL_SECS".to_string(), e.to_string())
        })?;
        if poll_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "HEALTH_POLL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            log_level,
            rules_path,
            user_id,
            health_poll_interval: Duration::from_secs(poll_secs),
        })
    }
}

//=========================================================================================
// Game rules (game_engine.json)
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEngineConfig {
    #[serde(default)]
    pub engine_version: String,
    pub xp_rules: XpRules,
    pub health_system: HealthSystemConfig,
    pub question_rules: QuestionRulesConfig,
    pub review_text: ReviewTextConfig,
    #[serde(default)]
    pub competition: CompetitionConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XpRules {
    pub correct: u32,
    pub half_credit: u32,
    pub incorrect: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSystemConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub max_segments: u32,
    /// Zero or negative disables passive regeneration.
    pub segment_recharge_minutes: i64,
    pub penalties: HealthPenalties,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthPenalties {
    /// Health change for a wrong answer. Written as a signed delta (e.g. `-1`);
    /// the magnitude is what gets subtracted.
    pub wrong_answer: i32,
    pub max_loss_per_bite: u32,
}

impl HealthPenalties {
    pub fn wrong_answer_cost(&self) -> u32 {
        self.wrong_answer.unsigned_abs()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRulesConfig {
    pub questions_per_bite: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts_per_question: u8,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewTextConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub daily_limit: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub visibility: CompetitionVisibility,
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            visibility: CompetitionVisibility::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionVisibility {
    #[serde(default = "enabled_by_default")]
    pub show_rank_delta: bool,
}

impl Default for CompetitionVisibility {
    fn default() -> Self {
        Self {
            show_rank_delta: true,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_max_attempts() -> u8 {
    MAX_ATTEMPTS_PER_QUESTION
}

impl GameEngineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Rejects rule tables the engine cannot honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.question_rules.max_attempts_per_question != MAX_ATTEMPTS_PER_QUESTION {
            return Err(ConfigError::InvalidValue(
                "questionRules.maxAttemptsPerQuestion".to_string(),
                format!(
                    "only {} attempts per question are supported, got {}",
                    MAX_ATTEMPTS_PER_QUESTION, self.question_rules.max_attempts_per_question
                ),
            ));
        }
        if self.health_system.max_segments == 0 {
            return Err(ConfigError::InvalidValue(
                "healthSystem.maxSegments".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// The passive recharge interval, or `None` when regeneration is disabled.
    pub fn recharge_interval(&self) -> Option<chrono::Duration> {
        let minutes = self.health_system.segment_recharge_minutes;
        (minutes > 0).then(|| chrono::Duration::minutes(minutes))
    }
}

//=========================================================================================
// RulesHandle
//=========================================================================================

/// Holds the game rules once they have been loaded.
///
/// Every component reads its rules through this handle; using the engine before
/// the rules are loaded is a sequencing bug and surfaces as
/// [`EngineError::ConfigNotLoaded`].
#[derive(Debug, Default)]
pub struct RulesHandle {
    inner: OnceLock<Arc<GameEngineConfig>>,
}

impl RulesHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that is already loaded with `config`.
    pub fn with_config(config: GameEngineConfig) -> Result<Self, ConfigError> {
        let handle = Self::new();
        handle.initialize(config)?;
        Ok(handle)
    }

    /// Installs the rules. Later calls are ignored once rules are present.
    pub fn initialize(&self, config: GameEngineConfig) -> Result<(), ConfigError> {
        if self.inner.get().is_some() {
            return Ok(());
        }
        config.validate()?;
        let engine_version = config.engine_version.clone();
        let questions_per_bite = config.question_rules.questions_per_bite;
        let max_health = config.health_system.max_segments;
        match self.inner.set(Arc::new(config)) {
            Ok(()) => info!(
                engine_version = %engine_version,
                questions_per_bite,
                max_health,
                "Game rules loaded."
            ),
            Err(_) => debug!("Game rules were installed concurrently; keeping the first."),
        }
        Ok(())
    }

    pub fn initialize_from_path(&self, path: &Path) -> Result<(), ConfigError> {
        if self.is_loaded() {
            return Ok(());
        }
        self.initialize(GameEngineConfig::from_path(path)?)
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.get().is_some()
    }

    pub fn get(&self) -> EngineResult<Arc<GameEngineConfig>> {
        self.inner.get().cloned().ok_or(EngineError::ConfigNotLoaded)
    }
}
