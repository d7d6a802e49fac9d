//! Webhook handlers.
//!
//! All handlers follow the same shape: verify the raw request against the
//! adapter's credentials, acknowledge the transport immediately, and hand
//! the normalized messages to the pipeline on background tasks. Transports
//! retry on non-2xx, so internal failures after verification still answer
//! 200; only verification failures are rejected.

use crate::api::AppState;
use crate::GatewayKind;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::collections::HashMap;

pub async fn telegram(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    ingest(&state, GatewayKind::Telegram, &headers, &body)
}

pub async fn discord(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let adapter = match state.gateways.get(GatewayKind::Discord) {
        Ok(adapter) => adapter,
        Err(_) => return StatusCode::NOT_FOUND.into_response(),
    };
    if let Err(error) = adapter.verify(&headers, &body) {
        tracing::warn!(%error, "rejected discord webhook");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(%error, "unparseable discord payload");
            return StatusCode::OK.into_response();
        }
    };

    // Interaction pings must be answered synchronously with a pong.
    if payload.get("type").and_then(|v| v.as_i64()) == Some(1) {
        return Json(serde_json::json!({ "type": 1 })).into_response();
    }

    spawn_all(&state, adapter.normalize(&payload));
    StatusCode::OK.into_response()
}

pub async fn whatsapp(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    ingest(&state, GatewayKind::Whatsapp, &headers, &body)
}

/// Meta's subscription handshake: `GET ?hub.mode=subscribe&
/// hub.verify_token=...&hub.challenge=...`, answered with the raw
/// challenge on a token match.
pub async fn whatsapp_subscribe(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mode = params.get("hub.mode").map(String::as_str).unwrap_or("");
    let token = params
        .get("hub.verify_token")
        .map(String::as_str)
        .unwrap_or("");
    let challenge = params
        .get("hub.challenge")
        .map(String::as_str)
        .unwrap_or("");

    match state
        .whatsapp
        .as_ref()
        .and_then(|gateway| gateway.verify_subscription(mode, token, challenge))
    {
        Some(challenge) => challenge.into_response(),
        None => {
            tracing::warn!("rejected whatsapp subscription handshake");
            StatusCode::FORBIDDEN.into_response()
        }
    }
}

fn ingest(state: &AppState, kind: GatewayKind, headers: &HeaderMap, body: &Bytes) -> StatusCode {
    let adapter = match state.gateways.get(kind) {
        Ok(adapter) => adapter,
        Err(_) => return StatusCode::NOT_FOUND,
    };

    if let Err(error) = adapter.verify(headers, body) {
        tracing::warn!(gateway = %kind, %error, "rejected webhook");
        return StatusCode::UNAUTHORIZED;
    }

    let payload: serde_json::Value = match serde_json::from_slice(body) {
        Ok(payload) => payload,
        Err(error) => {
            tracing::warn!(gateway = %kind, %error, "unparseable webhook payload");
            return StatusCode::OK;
        }
    };

    spawn_all(state, adapter.normalize(&payload));
    StatusCode::OK
}

fn spawn_all(state: &AppState, messages: Vec<crate::InboundMessage>) {
    for message in messages {
        let pipeline = state.pipeline.clone();
        tokio::spawn(async move {
            let gateway = message.gateway;
            if let Err(error) = pipeline.handle_inbound(message).await {
                tracing::error!(%gateway, %error, "inbound message handling failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentDispatcher, CollaborationStore};
    use crate::config::{
        InstructionsConfig, LlmConfig, SecurityConfig, TelegramConfig, WhatsappConfig,
    };
    use crate::conversation::store::ConversationStore;
    use crate::gateway::{GatewayManager, TelegramGateway, WhatsappGateway};
    use crate::intent::IntentRouter;
    use crate::llm::{AgentReply, AgentRequest, LlmAgent, ModelRouter};
    use crate::memory::MemoryStore;
    use crate::pipeline::Pipeline;
    use crate::security::{AutonomyLevel, SecurityGate};
    use crate::skills::SkillRegistry;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoLlm;

    #[async_trait]
    impl LlmAgent for EchoLlm {
        async fn invoke(&self, request: AgentRequest) -> crate::Result<AgentReply> {
            Ok(AgentReply {
                text: request.user_message,
                tool_calls: Vec::new(),
            })
        }
    }

    async fn state(telegram_secret: Option<&str>) -> AppState {
        let pool = crate::db::connect_in_memory().await;
        let conversations = ConversationStore::new(pool.clone());
        conversations.initialize().await.expect("conversations");
        let memory = MemoryStore::new(pool.clone());
        memory.initialize().await.expect("memory");
        let collaborations = CollaborationStore::new(pool.clone());
        collaborations.initialize().await.expect("collaborations");
        let registry = SkillRegistry::new(pool, AutonomyLevel::Supervised);

        let dispatcher = Arc::new(AgentDispatcher::new(
            conversations.clone(),
            memory,
            collaborations,
            IntentRouter::new(InstructionsConfig::default()),
            ModelRouter::from_config(&LlmConfig::default()),
            Arc::new(EchoLlm),
            Arc::new(registry),
            20,
            5,
        ));

        let whatsapp = Arc::new(WhatsappGateway::new(WhatsappConfig {
            verify_token: Some("hub-token".into()),
            ..WhatsappConfig::default()
        }));

        let mut manager = GatewayManager::new();
        manager.register(Arc::new(TelegramGateway::new(TelegramConfig {
            bot_token: Some("bot-token".into()),
            webhook_secret: telegram_secret.map(str::to_string),
        })));
        manager.register(whatsapp.clone());
        let gateways = Arc::new(manager);

        let pipeline = Pipeline::new(
            gateways.clone(),
            SecurityGate::new(SecurityConfig::default()),
            conversations,
            dispatcher,
            None,
        );

        AppState {
            pipeline,
            gateways,
            whatsapp: Some(whatsapp),
        }
    }

    #[tokio::test]
    async fn telegram_secret_mismatch_is_unauthorized() {
        let state = state(Some("expected")).await;
        let body = Bytes::from_static(br#"{"update_id":1}"#);

        let mut headers = HeaderMap::new();
        headers.insert("x-telegram-bot-api-secret-token", "wrong".parse().unwrap());
        assert_eq!(
            ingest(&state, GatewayKind::Telegram, &headers, &body),
            StatusCode::UNAUTHORIZED
        );

        headers.insert(
            "x-telegram-bot-api-secret-token",
            "expected".parse().unwrap(),
        );
        assert_eq!(
            ingest(&state, GatewayKind::Telegram, &headers, &body),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn unparseable_payload_still_answers_ok() {
        let state = state(None).await;
        let body = Bytes::from_static(b"not json");
        assert_eq!(
            ingest(&state, GatewayKind::Telegram, &HeaderMap::new(), &body),
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn unregistered_gateway_is_not_found() {
        let state = state(None).await;
        assert_eq!(
            ingest(
                &state,
                GatewayKind::Discord,
                &HeaderMap::new(),
                &Bytes::new()
            ),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn whatsapp_handshake_echoes_or_rejects() {
        let app = state(None).await;

        let good = Query(HashMap::from([
            ("hub.mode".to_string(), "subscribe".to_string()),
            ("hub.verify_token".to_string(), "hub-token".to_string()),
            ("hub.challenge".to_string(), "12345".to_string()),
        ]));
        let response = whatsapp_subscribe(State(app.clone()), good).await;
        assert_eq!(response.status(), StatusCode::OK);

        let bad = Query(HashMap::from([
            ("hub.mode".to_string(), "subscribe".to_string()),
            ("hub.verify_token".to_string(), "wrong".to_string()),
            ("hub.challenge".to_string(), "12345".to_string()),
        ]));
        let response = whatsapp_subscribe(State(app), bad).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
