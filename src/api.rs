//! HTTP surface: webhook endpoints for the transport gateways plus a
//! health probe.

pub mod webhooks;

use crate::gateway::{GatewayManager, WhatsappGateway};
use crate::pipeline::Pipeline;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub gateways: Arc<GatewayManager>,
    /// Kept concrete alongside the dyn registry because the Meta
    /// subscription handshake is a GET that no other gateway has.
    pub whatsapp: Option<Arc<WhatsappGateway>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/telegram", post(webhooks::telegram))
        .route("/webhooks/discord", post(webhooks::discord))
        .route(
            "/webhooks/whatsapp",
            get(webhooks::whatsapp_subscribe).post(webhooks::whatsapp),
        )
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
