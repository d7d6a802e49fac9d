//! Telegram Bot API gateway (webhook mode).

use crate::config::TelegramConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::{GatewayKind, InboundMessage, MediaRef};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::HashMap;

const API_BASE: &str = "https://api.telegram.org";

pub struct TelegramGateway {
    config: TelegramConfig,
    http: reqwest::Client,
}

impl TelegramGateway {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    fn token(&self) -> Result<&str, GatewayError> {
        self.config
            .bot_token
            .as_deref()
            .ok_or(GatewayError::NotConfigured {
                gateway: "telegram".to_string(),
            })
    }
}

#[async_trait]
impl Gateway for TelegramGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Telegram
    }

    /// Verbatim comparison of the secret token header Telegram echoes on
    /// every webhook call. No secret configured means no check.
    fn verify(&self, headers: &HeaderMap, _body: &[u8]) -> Result<(), GatewayError> {
        let Some(expected) = self.config.webhook_secret.as_deref() else {
            return Ok(());
        };

        let presented = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|value| value.to_str().ok());

        if presented == Some(expected) {
            Ok(())
        } else {
            Err(GatewayError::VerificationFailed {
                gateway: "telegram".to_string(),
            })
        }
    }

    /// An update carries at most one message, new or edited. Text lands
    /// in `content`; voice and audio attachments become a [`MediaRef`]
    /// with empty content, which the pipeline fills in via
    /// transcription; other attachments render as `[kind] caption`.
    fn normalize(&self, payload: &serde_json::Value) -> Vec<InboundMessage> {
        let Some(message) = payload
            .get("message")
            .or_else(|| payload.get("edited_message"))
        else {
            return Vec::new();
        };
        let Some(chat_id) = message.pointer("/chat/id") else {
            return Vec::new();
        };

        let from = message.get("from");
        let sender_id = from
            .and_then(|f| f.get("id"))
            .map(value_to_id)
            .unwrap_or_default();
        let sender_name = from
            .and_then(|f| f.get("first_name"))
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let media = message
            .get("voice")
            .map(|v| ("voice", v))
            .or_else(|| message.get("audio").map(|a| ("audio", a)))
            .and_then(|(kind, attachment)| {
                let file_id = attachment.get("file_id")?.as_str()?;
                Some(MediaRef {
                    media_id: file_id.to_string(),
                    mime_type: attachment
                        .get("mime_type")
                        .and_then(|v| v.as_str())
                        .unwrap_or("audio/ogg")
                        .to_string(),
                    kind: kind.to_string(),
                })
            });

        let text = message.get("text").and_then(|v| v.as_str());
        let caption = message
            .get("caption")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let content = if let Some(text) = text {
            text.to_string()
        } else if media.is_some() {
            // Audio content stays empty; transcription fills it in.
            String::new()
        } else if let Some(kind) = media_kind(message) {
            format!("[{kind}] {caption}").trim_end().to_string()
        } else {
            caption.to_string()
        };

        if content.is_empty() && media.is_none() {
            return Vec::new();
        }

        let timestamp = message
            .get("date")
            .and_then(|v| v.as_i64())
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
            .unwrap_or_else(chrono::Utc::now);

        vec![InboundMessage {
            gateway: GatewayKind::Telegram,
            content,
            sender_id,
            sender_name,
            channel_id: value_to_id(chat_id),
            timestamp,
            media,
            extra: HashMap::new(),
        }]
    }

    async fn deliver(&self, channel_id: &str, text: &str) -> bool {
        let token = match self.token() {
            Ok(token) => token,
            Err(error) => {
                tracing::warn!(%error, "telegram delivery skipped");
                return false;
            }
        };

        let url = format!("{API_BASE}/bot{token}/sendMessage");
        let body = serde_json::json!({
            "chat_id": channel_id,
            "text": text,
            "parse_mode": "Markdown",
        });

        match self.http.post(&url).json(&body).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "telegram sendMessage rejected");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "telegram sendMessage failed");
                false
            }
        }
    }

    /// Two-step download: getFile resolves the file path, then the file
    /// endpoint serves the bytes.
    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>, GatewayError> {
        let token = self.token()?;

        let url = format!("{API_BASE}/bot{token}/getFile");
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "file_id": media.media_id }))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let info: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let file_path = info
            .pointer("/result/file_path")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                GatewayError::Transport("telegram getFile returned no file_path".to_string())
            })?;

        let bytes = self
            .http
            .get(format!("{API_BASE}/file/bot{token}/{file_path}"))
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}

/// First recognized non-audio attachment key on the message, if any.
fn media_kind(message: &serde_json::Value) -> Option<&'static str> {
    const KINDS: &[&str] = &[
        "photo",
        "video",
        "document",
        "sticker",
        "animation",
        "video_note",
        "location",
        "contact",
    ];
    KINDS.iter().copied().find(|kind| message.get(kind).is_some())
}

/// Telegram ids are numeric in JSON but string-typed everywhere here.
fn value_to_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
