//! Top-level error types for Pocketbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Agent(#[from] AgentError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),

    #[error(transparent)]
    Skill(#[from] SkillError),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load config from {path}: {source}")]
    Load {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Database connection and operation errors.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("failed to connect to SQLite: {0}")]
    SqliteConnect(#[from] sqlx::Error),

    #[error("schema initialization failed: {0}")]
    Schema(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Memory storage and retrieval errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory fragment not found: {id}")]
    NotFound { id: String },

    #[error("failed to save memory fragment: {0}")]
    SaveFailed(String),

    #[error("failed to search memory fragments: {0}")]
    SearchFailed(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Gateway adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("unknown gateway: {0}")]
    Unknown(String),

    #[error("gateway {gateway} is not configured")]
    NotConfigured { gateway: String },

    #[error("webhook verification failed for {gateway}")]
    VerificationFailed { gateway: String },

    #[error("transport request failed: {0}")]
    Transport(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Agent dispatch and LLM invocation errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("conversation {id} not found")]
    ConversationNotFound { id: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("missing API key for provider: {0}")]
    MissingProviderKey(String),

    #[error("completion failed: {0}")]
    CompletionFailed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Heartbeat and notification scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("notification {id} not found")]
    NotificationNotFound { id: String },

    #[error("heartbeat source unreadable: {0}")]
    SourceUnreadable(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Skill registry errors.
///
/// These surface only from registry management (enable/disable). Skill
/// *execution* failures never cross the skill boundary as errors; they are
/// rendered as "Error: ..." strings for the LLM agent to read.
#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("unknown skill: {0}")]
    Unknown(String),

    #[error("skill '{0}' is required and cannot be disabled")]
    RequiredSkill(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
