//! The inbound message pipeline: security, transcription, conversation
//! resolution, agent dispatch, delivery.

use crate::agent::AgentDispatcher;
use crate::conversation::store::ConversationStore;
use crate::gateway::GatewayManager;
use crate::security::SecurityGate;
use crate::stt::Transcriber;
use crate::{InboundMessage, Result};
use std::sync::Arc;

const APOLOGY: &str = "Sorry, something went wrong while handling that. Please try again.";

pub struct Pipeline {
    gateways: Arc<GatewayManager>,
    security: SecurityGate,
    conversations: Arc<ConversationStore>,
    dispatcher: Arc<AgentDispatcher>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl Pipeline {
    pub fn new(
        gateways: Arc<GatewayManager>,
        security: SecurityGate,
        conversations: Arc<ConversationStore>,
        dispatcher: Arc<AgentDispatcher>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            gateways,
            security,
            conversations,
            dispatcher,
            transcriber,
        })
    }

    /// Handle one normalized inbound message end to end.
    ///
    /// Unauthorized senders are dropped silently (audit log only); the
    /// transport never learns why. An LLM failure is answered with a
    /// generic apology and still counts as handled.
    pub async fn handle_inbound(&self, message: InboundMessage) -> Result<()> {
        let has_audio = message
            .media
            .as_ref()
            .is_some_and(|media| media.is_audio());
        if message.content.trim().is_empty() && !has_audio {
            tracing::debug!(gateway = %message.gateway, "ignoring message with no content");
            return Ok(());
        }

        if !self.security.is_user_allowed(&message.sender_id, message.gateway) {
            tracing::warn!(
                gateway = %message.gateway,
                sender_id = %message.sender_id,
                "dropping message from unauthorized user"
            );
            return Ok(());
        }
        if !self
            .security
            .is_channel_allowed(&message.channel_id, message.gateway)
        {
            tracing::warn!(
                gateway = %message.gateway,
                channel_id = %message.channel_id,
                "dropping message from unauthorized channel"
            );
            return Ok(());
        }

        let mut content = message.content.trim().to_string();
        if content.is_empty() && has_audio {
            match self.transcribe(&message).await {
                Some(text) => content = text,
                None => return Ok(()),
            }
        }
        if content.is_empty() {
            return Ok(());
        }

        let conversation = self
            .conversations
            .find_or_create(
                message.gateway,
                Some(&message.channel_id),
                message.sender_name.as_deref(),
                Some(&message.sender_id),
            )
            .await?;

        match self.dispatcher.chat(&conversation, &content).await {
            Ok(reply) => {
                if !self
                    .gateways
                    .deliver(message.gateway, &message.channel_id, &reply)
                    .await
                {
                    tracing::warn!(
                        conversation_id = %conversation.id,
                        gateway = %message.gateway,
                        "reply delivery failed"
                    );
                }
            }
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation.id,
                    %error,
                    "agent dispatch failed"
                );
                self.gateways
                    .deliver(message.gateway, &message.channel_id, APOLOGY)
                    .await;
            }
        }

        Ok(())
    }

    /// Voice note path: download through the originating adapter, then
    /// transcribe. Any failure drops the message (logged, never fatal).
    async fn transcribe(&self, message: &InboundMessage) -> Option<String> {
        let media = message.media.as_ref()?;
        let transcriber = match &self.transcriber {
            Some(transcriber) => transcriber.clone(),
            None => {
                tracing::debug!(gateway = %message.gateway, "no transcriber, ignoring voice note");
                return None;
            }
        };

        let adapter = match self.gateways.get(message.gateway) {
            Ok(adapter) => adapter,
            Err(error) => {
                tracing::warn!(%error, "cannot fetch media without an adapter");
                return None;
            }
        };

        let audio = match adapter.fetch_media(media).await {
            Ok(audio) => audio,
            Err(error) => {
                tracing::warn!(%error, media_id = %media.media_id, "media download failed");
                return None;
            }
        };

        match transcriber.transcribe(audio, &media.mime_type).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => None,
            Err(error) => {
                tracing::warn!(%error, media_id = %media.media_id, "transcription failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::CollaborationStore;
    use crate::config::{InstructionsConfig, LlmConfig, SecurityConfig};
    use crate::error::{AgentError, GatewayError};
    use crate::gateway::Gateway;
    use crate::intent::IntentRouter;
    use crate::llm::{AgentReply, AgentRequest, LlmAgent, ModelRouter};
    use crate::memory::MemoryStore;
    use crate::security::AutonomyLevel;
    use crate::skills::SkillRegistry;
    use crate::{GatewayKind, MediaRef};
    use async_trait::async_trait;
    use axum::http::HeaderMap;
    use std::sync::Mutex;

    struct StubGateway {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Gateway for StubGateway {
        fn kind(&self) -> GatewayKind {
            GatewayKind::Telegram
        }

        fn verify(
            &self,
            _headers: &HeaderMap,
            _body: &[u8],
        ) -> std::result::Result<(), GatewayError> {
            Ok(())
        }

        fn normalize(&self, _payload: &serde_json::Value) -> Vec<InboundMessage> {
            Vec::new()
        }

        async fn deliver(&self, _channel_id: &str, text: &str) -> bool {
            self.sent.lock().unwrap().push(text.to_string());
            true
        }

        async fn fetch_media(
            &self,
            _media: &MediaRef,
        ) -> std::result::Result<Vec<u8>, GatewayError> {
            Ok(b"fake-audio".to_vec())
        }
    }

    struct StubLlm {
        fail: bool,
    }

    #[async_trait]
    impl LlmAgent for StubLlm {
        async fn invoke(&self, request: AgentRequest) -> crate::Result<AgentReply> {
            if self.fail {
                return Err(AgentError::CompletionFailed("down".into()).into());
            }
            Ok(AgentReply {
                text: format!("re: {}", request.user_message),
                tool_calls: Vec::new(),
            })
        }
    }

    struct StubTranscriber;

    #[async_trait]
    impl Transcriber for StubTranscriber {
        async fn transcribe(&self, _audio: Vec<u8>, _mime: &str) -> crate::Result<String> {
            Ok("what's the weather".to_string())
        }
    }

    struct Fixture {
        pipeline: Arc<Pipeline>,
        gateway: Arc<StubGateway>,
        conversations: Arc<ConversationStore>,
    }

    async fn fixture(security: SecurityConfig, llm_fails: bool) -> Fixture {
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
            Arc::new(StubLlm { fail: llm_fails }),
            Arc::new(registry),
            20,
            5,
        ));

        let gateway = Arc::new(StubGateway {
            sent: Mutex::new(Vec::new()),
        });
        let mut manager = GatewayManager::new();
        manager.register(gateway.clone());

        let pipeline = Pipeline::new(
            Arc::new(manager),
            SecurityGate::new(security),
            conversations.clone(),
            dispatcher,
            Some(Arc::new(StubTranscriber)),
        );

        Fixture {
            pipeline,
            gateway,
            conversations,
        }
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage {
            gateway: GatewayKind::Telegram,
            content: content.to_string(),
            sender_id: "42".to_string(),
            sender_name: Some("Alice".to_string()),
            channel_id: "chat-1".to_string(),
            timestamp: chrono::Utc::now(),
            media: None,
            extra: Default::default(),
        }
    }

    #[tokio::test]
    async fn replies_are_delivered_to_the_origin_channel() {
        let fixture = fixture(SecurityConfig::default(), false).await;

        fixture
            .pipeline
            .handle_inbound(inbound("hello"))
            .await
            .expect("handle");

        assert_eq!(
            fixture.gateway.sent.lock().unwrap().as_slice(),
            &["re: hello".to_string()]
        );
    }

    #[tokio::test]
    async fn empty_messages_are_ignored() {
        let fixture = fixture(SecurityConfig::default(), false).await;
        fixture
            .pipeline
            .handle_inbound(inbound("   "))
            .await
            .expect("handle");
        assert!(fixture.gateway.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn blocked_users_are_dropped_silently() {
        let fixture = fixture(
            SecurityConfig {
                blocked_users: vec!["42".into()],
                ..SecurityConfig::default()
            },
            false,
        )
        .await;

        fixture
            .pipeline
            .handle_inbound(inbound("hello"))
            .await
            .expect("handle");

        assert!(fixture.gateway.sent.lock().unwrap().is_empty());
        // Nothing was persisted either: no conversation got created.
        let conversation = fixture
            .conversations
            .find_or_create(GatewayKind::Telegram, Some("chat-1"), None, None)
            .await
            .expect("conversation");
        let history = fixture
            .conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn llm_failure_sends_an_apology() {
        let fixture = fixture(SecurityConfig::default(), true).await;

        fixture
            .pipeline
            .handle_inbound(inbound("hello"))
            .await
            .expect("handle");

        let sent = fixture.gateway.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Sorry"));
    }

    #[tokio::test]
    async fn voice_notes_are_transcribed_then_answered() {
        let fixture = fixture(SecurityConfig::default(), false).await;

        let mut message = inbound("");
        message.media = Some(MediaRef {
            media_id: "m1".into(),
            mime_type: "audio/ogg".into(),
            kind: "voice".into(),
        });

        fixture
            .pipeline
            .handle_inbound(message)
            .await
            .expect("handle");

        assert_eq!(
            fixture.gateway.sent.lock().unwrap().as_slice(),
            &["re: what's the weather".to_string()]
        );
    }
}
