//! Pocketbot: a personal assistant that routes messages from external
//! channels through a memory-augmented conversational agent.

pub mod agent;
pub mod api;
pub mod config;
pub mod conversation;
pub mod db;
pub mod error;
pub mod gateway;
pub mod heartbeat;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod notify;
pub mod pipeline;
pub mod security;
pub mod skills;
pub mod stt;

pub use error::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// External messaging channel a conversation belongs to.
///
/// `Scheduler` and `Heartbeat` are synthetic gateways: their conversations
/// are created by timers rather than inbound transport events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GatewayKind {
    Cli,
    Telegram,
    Discord,
    Whatsapp,
    Web,
    Api,
    Scheduler,
    Heartbeat,
}

impl GatewayKind {
    /// Parse a gateway name as stored in the database or config.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "cli" => Some(Self::Cli),
            "telegram" => Some(Self::Telegram),
            "discord" => Some(Self::Discord),
            "whatsapp" => Some(Self::Whatsapp),
            "web" => Some(Self::Web),
            "api" => Some(Self::Api),
            "scheduler" => Some(Self::Scheduler),
            "heartbeat" => Some(Self::Heartbeat),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cli => "cli",
            Self::Telegram => "telegram",
            Self::Discord => "discord",
            Self::Whatsapp => "whatsapp",
            Self::Web => "web",
            Self::Api => "api",
            Self::Scheduler => "scheduler",
            Self::Heartbeat => "heartbeat",
        }
    }
}

impl std::fmt::Display for GatewayKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inbound media reference (e.g. a WhatsApp voice note). The payload itself
/// stays on the transport; the adapter downloads it on demand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaRef {
    pub media_id: String,
    pub mime_type: String,
    /// Transport media kind ("audio", "voice", "image", ...).
    pub kind: String,
}

impl MediaRef {
    /// Whether this media should go through the transcription path.
    pub fn is_audio(&self) -> bool {
        matches!(self.kind.as_str(), "audio" | "voice") || self.mime_type.starts_with("audio/")
    }
}

/// Canonical inbound message produced by every gateway adapter.
///
/// `content` may be empty when the transport message type is unrecognized;
/// callers treat empty content as "ignore, do not invoke the agent".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub gateway: GatewayKind,
    pub content: String,
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Transport-specific chat/channel identifier.
    pub channel_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub media: Option<MediaRef>,
    pub extra: HashMap<String, serde_json::Value>,
}

impl InboundMessage {
    /// Build a synthetic message (CLI input, scheduler tick, tests).
    pub fn synthetic(gateway: GatewayKind, channel_id: &str, content: &str) -> Self {
        Self {
            gateway,
            content: content.to_string(),
            sender_id: "system".to_string(),
            sender_name: None,
            channel_id: channel_id.to_string(),
            timestamp: chrono::Utc::now(),
            media: None,
            extra: HashMap::new(),
        }
    }
}
