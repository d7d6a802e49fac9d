//! Skill registry: the closed set of tools offered to the agent.
//!
//! Skill execution never errors across the boundary. Internal failures
//! and autonomy violations render as `"Error: ..."` strings so the agent
//! can read them and recover in conversation.

pub mod calendar;
pub mod core;
pub mod file;
pub mod memory;
pub mod scheduler;
pub mod shell;
pub mod shopping;
pub mod web_search;

use crate::error::{Result, SkillError};
use crate::security::{ActionClass, AutonomyLevel};
use crate::GatewayKind;
use anyhow::Context as _;
use futures::future::BoxFuture;
use sqlx::{Row as _, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Skills the agent cannot function without; they can never be disabled.
pub const REQUIRED_SKILLS: &[&str] = &["remember", "recall", "current_time"];

/// Per-invocation context threaded into skill handlers.
#[derive(Debug, Clone, Default)]
pub struct SkillContext {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub gateway: Option<GatewayKind>,
    pub channel_id: Option<String>,
}

pub type SkillHandler = Arc<
    dyn Fn(SkillContext, serde_json::Value) -> BoxFuture<'static, anyhow::Result<String>>
        + Send
        + Sync,
>;

/// A registered tool: metadata for the provider plus the handler.
pub struct Skill {
    pub name: &'static str,
    pub description: &'static str,
    /// JSON schema for the arguments object.
    pub parameters: serde_json::Value,
    pub action: ActionClass,
    handler: SkillHandler,
}

impl Skill {
    pub fn new(
        name: &'static str,
        description: &'static str,
        parameters: serde_json::Value,
        action: ActionClass,
        handler: SkillHandler,
    ) -> Self {
        Self {
            name,
            description,
            parameters,
            action,
            handler,
        }
    }

    async fn run(&self, context: SkillContext, arguments: serde_json::Value) -> String {
        match (self.handler)(context, arguments).await {
            Ok(output) => output,
            Err(error) => format!("Error: {error:#}"),
        }
    }
}

impl std::fmt::Debug for Skill {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skill")
            .field("name", &self.name)
            .field("action", &self.action)
            .finish()
    }
}

/// The registry: closed at startup, enabled-unless-disabled with the
/// disabled set persisted in `skill_settings`.
pub struct SkillRegistry {
    pool: SqlitePool,
    autonomy: AutonomyLevel,
    skills: HashMap<&'static str, Arc<Skill>>,
    disabled: RwLock<HashSet<String>>,
}

impl SkillRegistry {
    pub fn new(pool: SqlitePool, autonomy: AutonomyLevel) -> Self {
        Self {
            pool,
            autonomy,
            skills: HashMap::new(),
            disabled: RwLock::new(HashSet::new()),
        }
    }

    /// Create the settings table and load persisted disabled flags.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS skill_settings ( \
                 name TEXT PRIMARY KEY, \
                 enabled INTEGER NOT NULL DEFAULT 1 \
             )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create skill_settings table")?;

        let rows = sqlx::query("SELECT name FROM skill_settings WHERE enabled = 0")
            .fetch_all(&self.pool)
            .await
            .context("failed to load skill settings")?;

        let mut disabled = self.disabled.write().expect("skill settings poisoned");
        disabled.clear();
        for row in rows {
            if let Ok(name) = row.try_get::<String, _>("name") {
                disabled.insert(name);
            }
        }

        Ok(())
    }

    pub fn register(&mut self, skill: Skill) {
        self.skills.insert(skill.name, Arc::new(skill));
    }

    pub fn get(&self, name: &str) -> Option<Arc<Skill>> {
        self.skills.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.skills.keys().copied().collect();
        names.sort_unstable();
        names
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.skills.contains_key(name)
            && !self
                .disabled
                .read()
                .expect("skill settings poisoned")
                .contains(name)
    }

    /// The skills currently offered to the agent, sorted by name for
    /// stable provider payloads.
    pub fn enabled_skills(&self) -> Vec<Arc<Skill>> {
        let disabled = self.disabled.read().expect("skill settings poisoned");
        let mut enabled: Vec<_> = self
            .skills
            .values()
            .filter(|skill| !disabled.contains(skill.name))
            .cloned()
            .collect();
        enabled.sort_by_key(|skill| skill.name);
        enabled
    }

    /// Flip a skill's enabled flag and persist it. Disabling a required
    /// skill is a validation error and leaves the flag unchanged.
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<()> {
        if !self.skills.contains_key(name) {
            return Err(SkillError::Unknown(name.to_string()).into());
        }
        if !enabled && REQUIRED_SKILLS.contains(&name) {
            return Err(SkillError::RequiredSkill(name.to_string()).into());
        }

        sqlx::query(
            "INSERT INTO skill_settings (name, enabled) VALUES (?, ?) \
             ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled",
        )
        .bind(name)
        .bind(enabled as i64)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to persist setting for skill {name}"))?;

        let mut disabled = self.disabled.write().expect("skill settings poisoned");
        if enabled {
            disabled.remove(name);
        } else {
            disabled.insert(name.to_string());
        }

        Ok(())
    }

    /// Execute a skill by name. Unknown or disabled names, autonomy
    /// violations, and handler failures all come back as error strings.
    pub async fn execute(
        &self,
        name: &str,
        context: SkillContext,
        arguments: serde_json::Value,
    ) -> String {
        let Some(skill) = self.skills.get(name) else {
            return format!("Error: unknown tool '{name}'");
        };
        if !self.is_enabled(name) {
            return format!("Error: tool '{name}' is disabled");
        }
        if !self.autonomy.permits(skill.action) {
            return format!(
                "Error: tool '{name}' is not permitted at the current autonomy level"
            );
        }

        tracing::debug!(skill = name, "executing skill");
        skill.run(context, arguments).await
    }
}

/// Byte-bounded truncation on a char boundary, with an ellipsis marker.
/// Used to cap tool output before it is stored or fed back to the model.
pub fn truncate_output(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n[... output truncated]", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt as _;

    fn echo_skill(name: &'static str, action: ActionClass) -> Skill {
        Skill::new(
            name,
            "echoes its input",
            serde_json::json!({"type": "object", "properties": {}}),
            action,
            Arc::new(|_ctx, args| {
                async move { Ok(format!("echo: {args}")) }.boxed()
            }),
        )
    }

    async fn registry(autonomy: AutonomyLevel) -> SkillRegistry {
        let pool = crate::db::connect_in_memory().await;
        let mut registry = SkillRegistry::new(pool, autonomy);
        registry.register(echo_skill("current_time", ActionClass::Read));
        registry.register(echo_skill("remember", ActionClass::Write));
        registry.register(echo_skill("recall", ActionClass::Read));
        registry.register(echo_skill("shell", ActionClass::Execute));
        registry.initialize().await.expect("settings schema");
        registry
    }

    #[tokio::test]
    async fn required_skills_cannot_be_disabled() {
        let registry = registry(AutonomyLevel::Full).await;

        let result = registry.set_enabled("remember", false).await;
        assert!(matches!(
            result,
            Err(crate::Error::Skill(SkillError::RequiredSkill(_)))
        ));
        assert!(registry.is_enabled("remember"));
    }

    #[tokio::test]
    async fn unknown_skill_toggle_is_an_error() {
        let registry = registry(AutonomyLevel::Full).await;
        assert!(matches!(
            registry.set_enabled("nonexistent", false).await,
            Err(crate::Error::Skill(SkillError::Unknown(_)))
        ));
    }

    #[tokio::test]
    async fn disabled_skills_are_not_offered_or_executed() {
        let registry = registry(AutonomyLevel::Full).await;
        registry.set_enabled("shell", false).await.expect("disable");

        assert!(!registry.is_enabled("shell"));
        assert!(registry
            .enabled_skills()
            .iter()
            .all(|skill| skill.name != "shell"));

        let output = registry
            .execute("shell", SkillContext::default(), serde_json::json!({}))
            .await;
        assert!(output.starts_with("Error:"));

        registry.set_enabled("shell", true).await.expect("enable");
        assert!(registry.is_enabled("shell"));
    }

    #[tokio::test]
    async fn disabled_flags_survive_reload() {
        let pool = crate::db::connect_in_memory().await;

        let mut first = SkillRegistry::new(pool.clone(), AutonomyLevel::Full);
        first.register(echo_skill("shell", ActionClass::Execute));
        first.initialize().await.expect("settings schema");
        first.set_enabled("shell", false).await.expect("disable");

        let mut second = SkillRegistry::new(pool, AutonomyLevel::Full);
        second.register(echo_skill("shell", ActionClass::Execute));
        second.initialize().await.expect("settings reload");
        assert!(!second.is_enabled("shell"));
    }

    #[tokio::test]
    async fn autonomy_gates_execution_as_error_strings() {
        let registry = registry(AutonomyLevel::Readonly).await;

        let read = registry
            .execute("current_time", SkillContext::default(), serde_json::json!({}))
            .await;
        assert!(read.starts_with("echo:"));

        let write = registry
            .execute("remember", SkillContext::default(), serde_json::json!({}))
            .await;
        assert!(write.starts_with("Error:"));
    }

    #[tokio::test]
    async fn unknown_tool_executes_to_error_string() {
        let registry = registry(AutonomyLevel::Full).await;
        let output = registry
            .execute("no_such_tool", SkillContext::default(), serde_json::json!({}))
            .await;
        assert_eq!(output, "Error: unknown tool 'no_such_tool'");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_output("short", 100), "short");

        let truncated = truncate_output("héllo wörld", 7);
        assert!(truncated.starts_with("héllo"));
        assert!(truncated.ends_with("[... output truncated]"));
    }
}
