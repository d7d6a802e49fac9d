//! Configuration loading and validation.

use crate::error::{ConfigError, Result};
use crate::security::AutonomyLevel;
use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Pocketbot configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory path (SQLite database, heartbeat source).
    pub data_dir: PathBuf,

    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub history: HistoryConfig,
    pub memory: MemoryConfig,
    pub security: SecurityConfig,
    pub telegram: TelegramConfig,
    pub discord: DiscordConfig,
    pub whatsapp: WhatsappConfig,
    pub heartbeat: HeartbeatConfig,
    pub instructions: InstructionsConfig,
    pub skills: SkillsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server: ServerConfig::default(),
            llm: LlmConfig::default(),
            history: HistoryConfig::default(),
            memory: MemoryConfig::default(),
            security: SecurityConfig::default(),
            telegram: TelegramConfig::default(),
            discord: DiscordConfig::default(),
            whatsapp: WhatsappConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            instructions: InstructionsConfig::default(),
            skills: SkillsConfig::default(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("pocketbot"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Webhook server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
        }
    }
}

/// A (provider, model) pair. Resolution is a pure lookup; no network calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub model: String,
}

/// LLM provider configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Global default provider + model.
    pub provider: String,
    pub model: String,

    /// API key. Falls back to `POCKETBOT_LLM_API_KEY` or `OPENAI_API_KEY`.
    pub api_key: Option<String>,

    /// Override for the provider base URL (self-hosted or proxy setups).
    pub base_url: Option<String>,

    /// Per-intent (provider, model) overrides, keyed by intent name.
    pub intent_overrides: HashMap<String, ModelRef>,

    /// Maximum tool-call round trips per agent invocation.
    pub max_tool_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            api_key: None,
            base_url: None,
            intent_overrides: HashMap::new(),
            max_tool_turns: 8,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key from config or environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("POCKETBOT_LLM_API_KEY").ok())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
    }
}

/// Conversation history settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Most recent turns loaded into the prompt context.
    pub limit: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { limit: 20 }
    }
}

/// Memory retrieval settings.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Maximum fragments injected into the prompt context.
    pub recall_limit: i64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self { recall_limit: 5 }
    }
}

/// Allow/block lists and the autonomy level for skill actions.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allowed user ids (exact, "gateway:id" compound, or "*").
    /// Empty means everyone is allowed.
    pub allowed_users: Vec<String>,
    /// Blocked user ids (exact or compound). Block always wins.
    pub blocked_users: Vec<String>,
    pub allowed_channels: Vec<String>,
    pub blocked_channels: Vec<String>,
    pub autonomy: AutonomyLevel,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    /// Shared secret compared against `X-Telegram-Bot-Api-Secret-Token`.
    pub webhook_secret: Option<String>,
}

/// Discord bot settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DiscordConfig {
    pub bot_token: Option<String>,
    /// Application public key for Ed25519 interaction verification.
    /// Accepted in config for forward compatibility; the current adapter
    /// only gates on the interaction `type` field (see gateway/discord.rs).
    pub public_key: Option<String>,
}

/// WhatsApp Cloud API settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct WhatsappConfig {
    pub access_token: Option<String>,
    pub phone_number_id: Option<String>,
    /// App secret for `X-Hub-Signature-256` HMAC verification.
    /// When unset, verification is skipped (fail open); require this
    /// in production deployments.
    pub app_secret: Option<String>,
    /// Token echoed back during the GET verification handshake.
    pub verify_token: Option<String>,
}

/// Heartbeat task runner settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Markdown checklist source. Defaults to `<data_dir>/HEARTBEAT.md`.
    pub source_path: Option<PathBuf>,
    /// How often the engine checks for due items, in minutes.
    pub tick_minutes: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            source_path: None,
            tick_minutes: 5,
        }
    }
}

/// Skill layer settings.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SkillsConfig {
    /// Directory the file skills may read and write. Defaults to
    /// `<data_dir>/workspace`.
    pub workspace_dir: Option<PathBuf>,
    /// Brave Search API key. Without it the web_search skill reports
    /// itself unconfigured.
    pub web_search_api_key: Option<String>,
}

/// Identity and specialist instruction text.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstructionsConfig {
    /// Base identity/personality instructions.
    pub base: String,
    /// Specialist instruction per intent name. Missing intents fall back
    /// to the general instruction.
    pub specialist: HashMap<String, String>,
}

impl Default for InstructionsConfig {
    fn default() -> Self {
        Self {
            base: "You are Pocketbot, a helpful personal assistant. Be concise \
                   and practical. Use your tools when they help."
                .into(),
            specialist: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from `<data_dir>/pocketbot.toml` if present,
    /// otherwise fall back to defaults plus environment.
    pub fn load() -> Result<Self> {
        let data_dir = default_data_dir();
        let path = data_dir.join("pocketbot.toml");
        if path.exists() {
            return Self::load_from_path(&path);
        }

        let config = Self {
            data_dir,
            ..Self::default()
        };
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load from a specific TOML config file path.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Load {
            path: path.display().to_string(),
            source,
        })?;

        let config: Self = toml::from_str(&raw)
            .map_err(|error| ConfigError::Invalid(format!("{}: {error}", path.display())))?;

        config.validate()?;
        config.ensure_data_dir()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.history.limit <= 0 {
            return Err(ConfigError::Invalid("history.limit must be positive".into()).into());
        }
        if self.memory.recall_limit <= 0 {
            return Err(ConfigError::Invalid("memory.recall_limit must be positive".into()).into());
        }
        for (intent, model_ref) in &self.llm.intent_overrides {
            if model_ref.provider.is_empty() || model_ref.model.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "llm.intent_overrides.{intent} needs both provider and model"
                ))
                .into());
            }
        }
        Ok(())
    }

    fn ensure_data_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir).with_context(|| {
            format!(
                "failed to create data directory: {}",
                self.data_dir.display()
            )
        })?;
        Ok(())
    }

    /// Get the SQLite database path.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("pocketbot.db")
    }

    /// Get the directory the file skills are confined to.
    pub fn workspace_dir(&self) -> PathBuf {
        self.skills
            .workspace_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("workspace"))
    }

    /// Get the heartbeat source path.
    pub fn heartbeat_source(&self) -> PathBuf {
        self.heartbeat
            .source_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join("HEARTBEAT.md"))
    }
}
