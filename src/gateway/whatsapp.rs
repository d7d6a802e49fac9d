//! WhatsApp Cloud API gateway.

use crate::config::WhatsappConfig;
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::{GatewayKind, InboundMessage, MediaRef};
use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::HashMap;

const API_BASE: &str = "https://graph.facebook.com/v19.0";

pub struct WhatsappGateway {
    config: WhatsappConfig,
    http: reqwest::Client,
}

impl WhatsappGateway {
    pub fn new(config: WhatsappConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    /// The GET subscription handshake: echo `hub.challenge` back when the
    /// verify token matches.
    pub fn verify_subscription(&self, mode: &str, token: &str, challenge: &str) -> Option<String> {
        let expected = self.config.verify_token.as_deref()?;
        if mode == "subscribe" && token == expected {
            Some(challenge.to_string())
        } else {
            None
        }
    }

    fn access_token(&self) -> Result<&str, GatewayError> {
        self.config
            .access_token
            .as_deref()
            .ok_or(GatewayError::NotConfigured {
                gateway: "whatsapp".to_string(),
            })
    }
}

#[async_trait]
impl Gateway for WhatsappGateway {
    fn kind(&self) -> GatewayKind {
        GatewayKind::Whatsapp
    }

    /// HMAC-SHA256 of the raw body with the app secret, compared against
    /// the hex digest in `X-Hub-Signature-256`. Without an app secret the
    /// check is skipped, which is acceptable only for local development.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError> {
        let Some(secret) = self.config.app_secret.as_deref() else {
            return Ok(());
        };

        let failed = || GatewayError::VerificationFailed {
            gateway: "whatsapp".to_string(),
        };

        let header = headers
            .get("x-hub-signature-256")
            .and_then(|value| value.to_str().ok())
            .ok_or_else(failed)?;
        let presented = header.strip_prefix("sha256=").ok_or_else(failed)?;
        let presented = hex::decode(presented).map_err(|_| failed())?;

        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        mac.update(body);
        mac.verify_slice(&presented).map_err(|_| failed())
    }

    /// Walks entry/changes/value.messages; status-only callbacks carry no
    /// messages array and normalize to nothing. The sender phone number
    /// doubles as the channel id.
    fn normalize(&self, payload: &serde_json::Value) -> Vec<InboundMessage> {
        let mut out = Vec::new();

        let entries = payload.get("entry").and_then(|v| v.as_array());
        for entry in entries.into_iter().flatten() {
            let changes = entry.get("changes").and_then(|v| v.as_array());
            for change in changes.into_iter().flatten() {
                let Some(value) = change.get("value") else {
                    continue;
                };

                let sender_name = value
                    .pointer("/contacts/0/profile/name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);

                let messages = value.get("messages").and_then(|v| v.as_array());
                for message in messages.into_iter().flatten() {
                    let Some(from) = message.get("from").and_then(|v| v.as_str()) else {
                        continue;
                    };

                    let media = message.get("audio").and_then(|audio| {
                        let id = audio.get("id")?.as_str()?;
                        Some(MediaRef {
                            media_id: id.to_string(),
                            mime_type: audio
                                .get("mime_type")
                                .and_then(|v| v.as_str())
                                .unwrap_or("audio/ogg")
                                .to_string(),
                            kind: "audio".to_string(),
                        })
                    });

                    // Audio content stays empty for transcription; other
                    // media renders as `[kind] caption`.
                    let content = match message
                        .pointer("/text/body")
                        .and_then(|v| v.as_str())
                    {
                        Some(body) => body.to_string(),
                        None => match message.get("type").and_then(|v| v.as_str()) {
                            Some("text") | Some("audio") | None => String::new(),
                            Some(kind) => {
                                let caption = message
                                    .pointer(&format!("/{kind}/caption"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default();
                                format!("[{kind}] {caption}").trim_end().to_string()
                            }
                        },
                    };

                    if content.is_empty() && media.is_none() {
                        continue;
                    }

                    let timestamp = message
                        .get("timestamp")
                        .and_then(|v| v.as_str())
                        .and_then(|s| s.parse::<i64>().ok())
                        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
                        .unwrap_or_else(chrono::Utc::now);

                    out.push(InboundMessage {
                        gateway: GatewayKind::Whatsapp,
                        content,
                        sender_id: from.to_string(),
                        sender_name: sender_name.clone(),
                        channel_id: from.to_string(),
                        timestamp,
                        media,
                        extra: HashMap::new(),
                    });
                }
            }
        }

        out
    }

    async fn deliver(&self, channel_id: &str, text: &str) -> bool {
        let (token, phone_id) = match (self.access_token(), self.config.phone_number_id.as_deref())
        {
            (Ok(token), Some(phone_id)) => (token, phone_id),
            _ => {
                tracing::warn!("whatsapp delivery skipped: missing access token or phone id");
                return false;
            }
        };

        let url = format!("{API_BASE}/{phone_id}/messages");
        let body = serde_json::json!({
            "messaging_product": "whatsapp",
            "to": channel_id,
            "type": "text",
            "text": { "body": text },
        });

        match self.http.post(&url).bearer_auth(token).json(&body).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(status = %response.status(), "whatsapp message rejected");
                false
            }
            Err(error) => {
                tracing::warn!(%error, "whatsapp message send failed");
                false
            }
        }
    }

    /// Media retrieval is indirect: the media id resolves to a short-lived
    /// URL, which is then fetched with the same bearer token.
    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>, GatewayError> {
        let token = self.access_token()?;

        let info: serde_json::Value = self
            .http
            .get(format!("{API_BASE}/{}", media.media_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let url = info.get("url").and_then(|v| v.as_str()).ok_or_else(|| {
            GatewayError::Transport("whatsapp media lookup returned no url".to_string())
        })?;

        let bytes = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(bytes.to_vec())
    }
}
