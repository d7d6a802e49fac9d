//! Discord gateway over the interactions webhook and REST message API.

use crate::config::DiscordConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::{GatewayKind, InboundMessage};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::HashMap;

const API_BASE: &str = "https://discord.com/api/v10";

pub struct DiscordGateway {
    config: DiscordConfig,
    http: reqwest::Client,
}

impl DiscordGateway {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Discord
    }

    /// Structural gate: the body must be a JSON object with a numeric
    /// interaction `type`. Full Ed25519 signature verification against
    /// `public_key` is accepted in config but not wired in yet.
    fn verify(&self, _headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError> {
        let parsed: serde_json::Value =
            serde_json::from_slice(body).map_err(|_| GatewayError::VerificationFailed {
                gateway: "discord".to_string(),
            })?;

        if parsed.get("type").and_then(|v| v.as_u64()).is_some() {
            Ok(())
        } else {
            Err(GatewayError::VerificationFailed {
                gateway: "discord".to_string(),
            })
        }
    }

    /// Type 1 (ping) and anything without message data normalize to
    /// nothing; the webhook layer answers pings itself. Message payloads
    /// yield one inbound message; slash commands render as the command
    /// name followed by their option values.
    fn normalize(&self, payload: &serde_json::Value) -> Vec<InboundMessage> {
        if payload.get("type").and_then(|v| v.as_u64()) == Some(1) {
            return Vec::new();
        }

        // Interaction payloads nest the message under "data"; plain
        // message events carry it at the top level.
        let message = payload.get("data").unwrap_or(payload);

        let content = match message.get("content").and_then(|v| v.as_str()) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => match slash_command_text(message) {
                Some(text) => text,
                None => return Vec::new(),
            },
        };

        let Some(channel_id) = payload
            .get("channel_id")
            .or_else(|| message.get("channel_id"))
            .and_then(|v| v.as_str())
        else {
            return Vec::new();
        };

        let author = message
            .get("author")
            .or_else(|| payload.pointer("/member/user"))
            .or_else(|| payload.get("user"));

        vec![InboundMessage {
            gateway: GatewayKind::Discord,
            content,
            sender_id: author
                .and_then(|a| a.get("id"))
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            sender_name: author
                .and_then(|a| a.get("username"))
                .and_then(|v| v.as_str())
                .map(str::to_string),
            channel_id: channel_id.to_string(),
            timestamp: chrono::Utc::now(),
            media: None,
            extra: HashMap::new(),
        }]
    }

    async fn deliver(&self, channel_id: &str, text: &str) -> bool {
        let Some(token) = self.config.bot_token.as_deref() else {
            tracing::warn!("discord delivery skipped: no bot token configured");
            return false;
        };

        let url = format!("{API_BASE}/channels/{channel_id}/messages");
        let result = self
            .http
            .post(&url)
            .header("Authorization", format!("Bot {token}"))
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "discord message rejected");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "discord message send failed");
                false
            }
        }
    }
}

/// Flatten a slash-command invocation to text: the command name followed
/// by each option value in payload order. Number values are rendered
/// through their JSON form.
fn slash_command_text(data: &serde_json::Value) -> Option<String> {
    let mut parts = vec![data.get("name")?.as_str()?.to_string()];
    if let Some(options) = data.get("options").and_then(|v| v.as_array()) {
        for option in options {
            match option.get("value") {
                Some(serde_json::Value::String(value)) => parts.push(value.clone()),
                Some(serde_json::Value::Null) | None => {}
                Some(other) => parts.push(other.to_string()),
            }
        }
    }
    Some(parts.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn gateway() -> DiscordGateway {
        DiscordGateway::new(DiscordConfig::default())
    }

    #[test]
    fn rejects_bodies_without_interaction_type() {
        assert!(gateway().verify(&HeaderMap::new(), b"not json").is_err());
        assert!(gateway().verify(&HeaderMap::new(), br#"{"foo": 1}"#).is_err());
        assert!(gateway().verify(&HeaderMap::new(), br#"{"type": 1}"#).is_ok());
    }

    #[test]
    fn ping_normalizes_to_nothing() {
        let ping = serde_json::json!({ "type": 1 });
        assert!(gateway().normalize(&ping).is_empty());
    }

    #[test]
    fn normalizes_message_payload() {
        let payload: serde_json::Value = serde_json::from_str(indoc! {r#"
            {
                "type": 0,
                "channel_id": "111222333",
                "author": { "id": "42", "username": "alice" },
                "content": "what should I watch tonight?"
            }
        "#})
        .unwrap();

        let messages = gateway().normalize(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].channel_id, "111222333");
        assert_eq!(messages[0].sender_id, "42");
        assert_eq!(messages[0].content, "what should I watch tonight?");
    }

    #[test]
    fn slash_command_options_concatenate() {
        let payload: serde_json::Value = serde_json::from_str(indoc! {r#"
            {
                "type": 2,
                "channel_id": "111",
                "member": { "user": { "id": "42", "username": "alice" } },
                "data": {
                    "name": "remind",
                    "options": [
                        { "name": "what", "value": "stretch" },
                        { "name": "minutes", "value": 30 }
                    ]
                }
            }
        "#})
        .unwrap();

        let messages = gateway().normalize(&payload);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "remind stretch 30");
        assert_eq!(messages[0].sender_id, "42");
        assert_eq!(messages[0].sender_name.as_deref(), Some("alice"));
    }

    #[test]
    fn empty_content_normalizes_to_nothing() {
        let payload = serde_json::json!({
            "type": 0,
            "channel_id": "111",
            "author": { "id": "42" },
            "content": ""
        });
        assert!(gateway().normalize(&payload).is_empty());
    }
}
