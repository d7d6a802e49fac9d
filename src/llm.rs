//! LLM provider abstraction: model routing plus the invocation boundary.

pub mod openai;
pub mod routing;

pub use openai::OpenAiClient;
pub use routing::ModelRouter;

use crate::config::ModelRef;
use crate::conversation::Role;
use crate::error::Result;
use crate::skills::{Skill, SkillContext};
use async_trait::async_trait;
use std::sync::Arc;

/// A prior turn handed to the provider.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
    /// Set for tool-result turns replayed from the message log.
    pub tool_name: Option<String>,
}

/// One agent invocation: system text, history, the new user message, and
/// the tools on offer.
#[derive(Clone)]
pub struct AgentRequest {
    pub model: ModelRef,
    pub system: String,
    pub history: Vec<ChatTurn>,
    pub user_message: String,
    pub skills: Vec<Arc<Skill>>,
    pub context: SkillContext,
}

/// A tool call the agent made during the invocation, with its output.
/// Recorded so the dispatcher can persist tool turns.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub output: String,
}

/// What an invocation produced.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub text: String,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// The single I/O boundary to a language model. Implementations own the
/// tool-call loop; errors propagate to the caller, which decides how to
/// apologize.
#[async_trait]
pub trait LlmAgent: Send + Sync {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply>;
}
