//! OpenAI-compatible chat completions client with a bounded tool loop.

use crate::config::LlmConfig;
use crate::error::{AgentError, Result};
use crate::llm::{AgentReply, AgentRequest, LlmAgent, ToolCallRecord};
use crate::skills::{Skill, SkillRegistry};
use async_trait::async_trait;
use crate::conversation::Role;
use std::sync::Arc;

const OPENAI_BASE: &str = "https://api.openai.com/v1";

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: Option<String>,
    max_tool_turns: usize,
    registry: Arc<SkillRegistry>,
}

impl OpenAiClient {
    pub fn from_config(config: &LlmConfig, registry: Arc<SkillRegistry>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: config.resolve_api_key(),
            base_url: config.base_url.clone(),
            max_tool_turns: config.max_tool_turns,
            registry,
        }
    }

    /// Known providers map to their endpoint; anything else needs an
    /// explicit base_url override in config.
    fn endpoint(&self, provider: &str) -> Result<String> {
        if let Some(base) = &self.base_url {
            return Ok(format!("{}/chat/completions", base.trim_end_matches('/')));
        }
        match provider {
            "openai" => Ok(format!("{OPENAI_BASE}/chat/completions")),
            other => Err(AgentError::UnknownProvider(other.to_string()).into()),
        }
    }

    async fn completion(
        &self,
        url: &str,
        api_key: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AgentError::CompletionFailed(e.to_string()))?;

        let status = response.status();
        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::CompletionFailed(e.to_string()))?;

        if !status.is_success() {
            let detail = payload
                .pointer("/error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("no error detail");
            return Err(AgentError::CompletionFailed(format!("{status}: {detail}")).into());
        }

        Ok(payload)
    }
}

#[async_trait]
impl LlmAgent for OpenAiClient {
    async fn invoke(&self, request: AgentRequest) -> Result<AgentReply> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| AgentError::MissingProviderKey(request.model.provider.clone()))?;
        let url = self.endpoint(&request.model.provider)?;

        let mut messages = build_initial_messages(&request);
        let tools = tool_definitions(&request.skills);
        let mut records: Vec<ToolCallRecord> = Vec::new();

        for _ in 0..self.max_tool_turns {
            let mut body = serde_json::json!({
                "model": request.model.model,
                "messages": messages,
            });
            if !tools.is_empty() {
                body["tools"] = serde_json::Value::Array(tools.clone());
            }

            let payload = self.completion(&url, &api_key, &body).await?;
            let message = payload
                .pointer("/choices/0/message")
                .cloned()
                .ok_or_else(|| {
                    AgentError::CompletionFailed("response had no message".to_string())
                })?;

            let calls = parse_tool_calls(&message);
            if calls.is_empty() {
                let text = message
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return Ok(AgentReply {
                    text,
                    tool_calls: records,
                });
            }

            messages.push(message);
            for (call_id, name, arguments) in calls {
                let output = self
                    .registry
                    .execute(&name, request.context.clone(), arguments.clone())
                    .await;
                tracing::debug!(tool = %name, "tool call completed");

                messages.push(serde_json::json!({
                    "role": "tool",
                    "tool_call_id": call_id,
                    "content": output,
                }));
                records.push(ToolCallRecord {
                    name,
                    arguments,
                    output,
                });
            }
        }

        // Out of tool turns: one last call with tools withheld forces a
        // textual answer.
        let body = serde_json::json!({
            "model": request.model.model,
            "messages": messages,
        });
        let payload = self.completion(&url, &api_key, &body).await?;
        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        Ok(AgentReply {
            text,
            tool_calls: records,
        })
    }
}

/// System + replayed history + the new user message, in wire shape.
/// Stored tool turns replay as bracketed assistant notes; the upstream
/// call ids they belonged to are gone.
fn build_initial_messages(request: &AgentRequest) -> Vec<serde_json::Value> {
    let mut messages = vec![serde_json::json!({
        "role": "system",
        "content": request.system,
    })];

    for turn in &request.history {
        let value = match turn.role {
            Role::User => serde_json::json!({"role": "user", "content": turn.content}),
            Role::Assistant => {
                serde_json::json!({"role": "assistant", "content": turn.content})
            }
            Role::Tool => {
                let name = turn.tool_name.as_deref().unwrap_or("tool");
                serde_json::json!({
                    "role": "assistant",
                    "content": format!("[{name} result] {}", turn.content),
                })
            }
        };
        messages.push(value);
    }

    messages.push(serde_json::json!({
        "role": "user",
        "content": request.user_message,
    }));
    messages
}

fn tool_definitions(skills: &[Arc<Skill>]) -> Vec<serde_json::Value> {
    skills
        .iter()
        .map(|skill| {
            serde_json::json!({
                "type": "function",
                "function": {
                    "name": skill.name,
                    "description": skill.description,
                    "parameters": skill.parameters,
                },
            })
        })
        .collect()
}

/// (call_id, name, parsed arguments) triples from an assistant message.
/// Unparseable argument strings degrade to an empty object so the skill
/// can report the missing fields itself.
fn parse_tool_calls(message: &serde_json::Value) -> Vec<(String, String, serde_json::Value)> {
    message
        .get("tool_calls")
        .and_then(|v| v.as_array())
        .map(|calls| {
            calls
                .iter()
                .filter_map(|call| {
                    let id = call.get("id").and_then(|v| v.as_str())?.to_string();
                    let name = call
                        .pointer("/function/name")
                        .and_then(|v| v.as_str())?
                        .to_string();
                    let arguments = call
                        .pointer("/function/arguments")
                        .and_then(|v| v.as_str())
                        .and_then(|raw| serde_json::from_str(raw).ok())
                        .unwrap_or_else(|| serde_json::json!({}));
                    Some((id, name, arguments))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelRef;
    use crate::llm::ChatTurn;
    use crate::skills::SkillContext;
    use indoc::indoc;

    fn request_with_history(history: Vec<ChatTurn>) -> AgentRequest {
        AgentRequest {
            model: ModelRef {
                provider: "openai".into(),
                model: "gpt-4o".into(),
            },
            system: "be helpful".into(),
            history,
            user_message: "hello".into(),
            skills: Vec::new(),
            context: SkillContext::default(),
        }
    }

    #[test]
    fn wire_messages_start_with_system_and_end_with_user() {
        let request = request_with_history(vec![
            ChatTurn {
                role: Role::User,
                content: "earlier question".into(),
                tool_name: None,
            },
            ChatTurn {
                role: Role::Tool,
                content: "42".into(),
                tool_name: Some("calculator".into()),
            },
            ChatTurn {
                role: Role::Assistant,
                content: "the answer is 42".into(),
                tool_name: None,
            },
        ]);

        let messages = build_initial_messages(&request);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[2]["role"], "assistant");
        assert_eq!(
            messages[2]["content"].as_str().unwrap(),
            "[calculator result] 42"
        );
        assert_eq!(messages[4]["role"], "user");
        assert_eq!(messages[4]["content"], "hello");
    }

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let message: serde_json::Value = serde_json::from_str(indoc! {r#"
            {
                "role": "assistant",
                "tool_calls": [
                    {
                        "id": "call_1",
                        "type": "function",
                        "function": {
                            "name": "calculator",
                            "arguments": "{\"expression\": \"6*7\"}"
                        }
                    },
                    {
                        "id": "call_2",
                        "type": "function",
                        "function": {
                            "name": "current_time",
                            "arguments": "not json"
                        }
                    }
                ]
            }
        "#})
        .unwrap();

        let calls = parse_tool_calls(&message);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].1, "calculator");
        assert_eq!(calls[0].2, serde_json::json!({"expression": "6*7"}));
        assert_eq!(calls[1].2, serde_json::json!({}));
    }

    #[test]
    fn plain_replies_have_no_tool_calls() {
        let message = serde_json::json!({"role": "assistant", "content": "hi"});
        assert!(parse_tool_calls(&message).is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_without_base_url_is_an_error() {
        let pool = crate::db::connect_in_memory().await;
        let registry = Arc::new(SkillRegistry::new(
            pool,
            crate::security::AutonomyLevel::Full,
        ));
        let client = OpenAiClient::from_config(
            &LlmConfig {
                api_key: Some("k".into()),
                ..LlmConfig::default()
            },
            registry,
        );

        assert!(client.endpoint("openai").is_ok());
        assert!(matches!(
            client.endpoint("mystery"),
            Err(crate::Error::Agent(AgentError::UnknownProvider(_)))
        ));
    }
}
