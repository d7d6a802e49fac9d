//! Gateway adapters: the boundary between external transports and the
//! canonical message pipeline.
//!
//! Each adapter does three jobs: verify an incoming webhook request,
//! normalize the transport payload into [`InboundMessage`]s, and deliver
//! outbound text. Delivery reports success as a bool and never errors;
//! a transport that is down should not take the pipeline down with it.

pub mod cli;
pub mod discord;
pub mod telegram;
pub mod whatsapp;

pub use cli::CliGateway;
pub use discord::DiscordGateway;
pub use telegram::TelegramGateway;
pub use whatsapp::WhatsappGateway;

use crate::error::GatewayError;
use crate::{GatewayKind, InboundMessage, MediaRef};
use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::HashMap;
use std::sync::Arc;

#[async_trait]
pub trait Gateway: Send + Sync + 'static {
    fn kind(&self) -> GatewayKind;

    /// Check the authenticity of an incoming webhook request before its
    /// payload is parsed. Adapters with no credentials configured skip
    /// their check rather than rejecting everything.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), GatewayError>;

    /// Translate a transport payload into canonical messages. Payloads
    /// that carry nothing actionable (status callbacks, unsupported
    /// message types) produce an empty list.
    fn normalize(&self, payload: &serde_json::Value) -> Vec<InboundMessage>;

    /// Send text to a channel. Returns whether the transport accepted it.
    async fn deliver(&self, channel_id: &str, text: &str) -> bool;

    /// Download referenced media bytes (voice notes). Transports without
    /// media retrieval report it as unsupported.
    async fn fetch_media(&self, media: &MediaRef) -> Result<Vec<u8>, GatewayError> {
        let _ = media;
        Err(GatewayError::Transport(format!(
            "{} does not support media retrieval",
            self.kind()
        )))
    }
}

/// Registry of configured gateway adapters, keyed by kind.
#[derive(Default)]
pub struct GatewayManager {
    adapters: HashMap<GatewayKind, Arc<dyn Gateway>>,
}

impl GatewayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn Gateway>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn get(&self, kind: GatewayKind) -> Result<Arc<dyn Gateway>, GatewayError> {
        self.adapters
            .get(&kind)
            .cloned()
            .ok_or(GatewayError::NotConfigured {
                gateway: kind.as_str().to_string(),
            })
    }

    pub fn is_registered(&self, kind: GatewayKind) -> bool {
        self.adapters.contains_key(&kind)
    }

    /// Deliver through the adapter for `kind`. Missing adapters count as
    /// a failed delivery.
    pub async fn deliver(&self, kind: GatewayKind, channel_id: &str, text: &str) -> bool {
        match self.get(kind) {
            Ok(adapter) => adapter.deliver(channel_id, text).await,
            Err(error) => {
                tracing::warn!(gateway = %kind, %error, "delivery to unregistered gateway");
                false
            }
        }
    }
}
