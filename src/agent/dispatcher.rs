//! The agent dispatcher: turns an inbound user message into a persisted
//! exchange via the LLM boundary.

use crate::agent::CollaborationStore;
use crate::conversation::store::ConversationStore;
use crate::conversation::{Conversation, NewMessage, Role};
use crate::error::Result;
use crate::intent::IntentRouter;
use crate::llm::{AgentReply, AgentRequest, ChatTurn, LlmAgent, ModelRouter};
use crate::memory::search::format_memory_context;
use crate::memory::MemoryStore;
use crate::skills::{SkillContext, SkillRegistry};
use std::sync::Arc;

pub struct AgentDispatcher {
    conversations: Arc<ConversationStore>,
    memory: Arc<MemoryStore>,
    collaborations: Arc<CollaborationStore>,
    intents: IntentRouter,
    models: ModelRouter,
    llm: Arc<dyn LlmAgent>,
    registry: Arc<SkillRegistry>,
    history_limit: i64,
    recall_limit: i64,
}

impl AgentDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<ConversationStore>,
        memory: Arc<MemoryStore>,
        collaborations: Arc<CollaborationStore>,
        intents: IntentRouter,
        models: ModelRouter,
        llm: Arc<dyn LlmAgent>,
        registry: Arc<SkillRegistry>,
        history_limit: i64,
        recall_limit: i64,
    ) -> Self {
        Self {
            conversations,
            memory,
            collaborations,
            intents,
            models,
            llm,
            registry,
            history_limit,
            recall_limit,
        }
    }

    /// One chat turn: retrieve context, invoke the model, persist the
    /// exchange, return the reply text.
    ///
    /// Runs under the conversation lock so concurrent messages for the
    /// same conversation can't interleave their message pairs. An LLM
    /// error propagates with nothing persisted.
    pub async fn chat(&self, conversation: &Conversation, text: &str) -> Result<String> {
        let _guard = self.conversations.lock(&conversation.id).await;

        let (request, intent) = self.build_request(conversation, text, true).await?;
        tracing::info!(
            conversation_id = %conversation.id,
            intent = %intent,
            model = %request.model.model,
            "dispatching chat turn"
        );

        let reply = self.llm.invoke(request).await?;
        self.persist_exchange(conversation, text, &reply).await?;

        Ok(reply.text)
    }

    /// The multi-stage path: planner, executor, reviewer against the same
    /// model. Only the reviewer's output enters the message log; the
    /// intermediate stages are kept in the collaboration audit table.
    pub async fn collaborate(&self, conversation: &Conversation, text: &str) -> Result<String> {
        let _guard = self.conversations.lock(&conversation.id).await;

        let (base_request, intent) = self.build_request(conversation, text, true).await?;
        tracing::info!(
            conversation_id = %conversation.id,
            intent = %intent,
            "dispatching collaboration"
        );

        let plan = {
            let mut request = base_request.clone();
            request.skills = Vec::new();
            request.system = format!(
                "{}\n\nYou are the planning stage. Produce a short numbered plan \
                 for fulfilling the user's request. Do not fulfil it yourself.",
                request.system
            );
            self.llm.invoke(request).await?.text
        };

        let draft_reply = {
            let mut request = base_request.clone();
            request.system = format!(
                "{}\n\nYou are the execution stage. Follow this plan, using tools \
                 where they help:\n{plan}",
                request.system
            );
            self.llm.invoke(request).await?
        };

        let final_reply = {
            let mut request = base_request;
            request.skills = Vec::new();
            request.system = format!(
                "{}\n\nYou are the review stage. Improve the draft answer below \
                 and reply with the final text for the user.\n\nPlan:\n{plan}\n\n\
                 Draft:\n{}",
                request.system, draft_reply.text
            );
            self.llm.invoke(request).await?
        };

        self.collaborations
            .record(&conversation.id, &plan, &draft_reply.text, &final_reply.text)
            .await?;

        // Only the reviewer output reaches the message log; executor tool
        // turns stay in the audit record.
        let persisted = AgentReply {
            text: final_reply.text.clone(),
            tool_calls: Vec::new(),
        };
        self.persist_exchange(conversation, text, &persisted).await?;

        Ok(final_reply.text)
    }

    /// Assemble the request: history, memory context, intent instruction,
    /// resolved model, and the enabled skill set.
    async fn build_request(
        &self,
        conversation: &Conversation,
        text: &str,
        with_skills: bool,
    ) -> Result<(AgentRequest, crate::intent::Intent)> {
        let history = self
            .conversations
            .history(&conversation.id, self.history_limit)
            .await?;
        let history: Vec<ChatTurn> = history
            .into_iter()
            .map(|message| ChatTurn {
                role: message.role,
                content: message.content,
                tool_name: message.tool_name,
            })
            .collect();

        let fragments = self
            .memory
            .get_relevant(
                text,
                conversation.user_id.as_deref(),
                self.recall_limit,
                None,
            )
            .await?;

        let routed = self.intents.route(text);
        let model = self.models.resolve(routed.intent);

        let mut system = self.intents.base_instructions().to_string();
        system.push_str("\n\n");
        system.push_str(&routed.instruction);
        let memory_block = format_memory_context(&fragments);
        if !memory_block.is_empty() {
            system.push_str("\n\n");
            system.push_str(&memory_block);
        }

        let request = AgentRequest {
            model,
            system,
            history,
            user_message: text.to_string(),
            skills: if with_skills {
                self.registry.enabled_skills()
            } else {
                Vec::new()
            },
            context: SkillContext {
                user_id: conversation.user_id.clone(),
                conversation_id: Some(conversation.id.clone()),
                gateway: Some(conversation.gateway),
                channel_id: conversation.gateway_conversation_id.clone(),
            },
        };

        Ok((request, routed.intent))
    }

    /// Persist the exchange in order: user turn, tool turns, assistant
    /// turn. Called only after a successful invocation.
    async fn persist_exchange(
        &self,
        conversation: &Conversation,
        text: &str,
        reply: &AgentReply,
    ) -> Result<()> {
        self.conversations
            .append(&conversation.id, Role::User, NewMessage::text(text))
            .await?;

        for call in &reply.tool_calls {
            self.conversations
                .append(
                    &conversation.id,
                    Role::Tool,
                    NewMessage {
                        content: call.output.clone(),
                        tool_name: Some(call.name.clone()),
                        tool_arguments: Some(call.arguments.clone()),
                        metadata: None,
                    },
                )
                .await?;
        }

        self.conversations
            .append(
                &conversation.id,
                Role::Assistant,
                NewMessage::text(&reply.text),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InstructionsConfig, LlmConfig};
    use crate::error::AgentError;
    use crate::llm::ToolCallRecord;
    use crate::memory::NewFragment;
    use crate::security::AutonomyLevel;
    use crate::GatewayKind;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted model double: pops a canned reply per invocation and
    /// records each request for inspection.
    struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<AgentReply>>>,
        requests: Mutex<Vec<AgentRequest>>,
    }

    impl ScriptedLlm {
        fn new(replies: Vec<Result<AgentReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn text(reply: &str) -> Result<AgentReply> {
            Ok(AgentReply {
                text: reply.to_string(),
                tool_calls: Vec::new(),
            })
        }

        fn systems(&self) -> Vec<String> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.system.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LlmAgent for ScriptedLlm {
        async fn invoke(&self, request: AgentRequest) -> Result<AgentReply> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ScriptedLlm::text("default"))
        }
    }

    struct Fixture {
        dispatcher: AgentDispatcher,
        conversations: Arc<ConversationStore>,
        collaborations: Arc<CollaborationStore>,
        memory: Arc<MemoryStore>,
        llm: Arc<ScriptedLlm>,
    }

    async fn fixture(replies: Vec<Result<AgentReply>>) -> Fixture {
        let pool = crate::db::connect_in_memory().await;
        let conversations = ConversationStore::new(pool.clone());
        conversations.initialize().await.expect("conversations");
        let memory = MemoryStore::new(pool.clone());
        memory.initialize().await.expect("memory");
        let collaborations = CollaborationStore::new(pool.clone());
        collaborations.initialize().await.expect("collaborations");
        let registry = SkillRegistry::new(pool, AutonomyLevel::Supervised);

        let llm = ScriptedLlm::new(replies);
        let dispatcher = AgentDispatcher::new(
            conversations.clone(),
            memory.clone(),
            collaborations.clone(),
            IntentRouter::new(InstructionsConfig::default()),
            ModelRouter::from_config(&LlmConfig::default()),
            llm.clone(),
            Arc::new(registry),
            20,
            5,
        );

        Fixture {
            dispatcher,
            conversations,
            collaborations,
            memory,
            llm,
        }
    }

    async fn conversation(fixture: &Fixture) -> Conversation {
        fixture
            .conversations
            .create(GatewayKind::Telegram, Some("chat-1"), None, Some("alice"))
            .await
            .expect("conversation")
    }

    #[tokio::test]
    async fn chat_persists_user_tool_assistant_in_order() {
        let fixture = fixture(vec![Ok(AgentReply {
            text: "it's 42".into(),
            tool_calls: vec![ToolCallRecord {
                name: "calculator".into(),
                arguments: serde_json::json!({"expression": "6*7"}),
                output: "42".into(),
            }],
        })])
        .await;
        let conversation = conversation(&fixture).await;

        let reply = fixture
            .dispatcher
            .chat(&conversation, "what is 6*7?")
            .await
            .expect("chat");
        assert_eq!(reply, "it's 42");

        let history = fixture
            .conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "what is 6*7?");
        assert_eq!(history[1].role, Role::Tool);
        assert_eq!(history[1].tool_name.as_deref(), Some("calculator"));
        assert_eq!(history[2].role, Role::Assistant);
        assert_eq!(history[2].content, "it's 42");
    }

    #[tokio::test]
    async fn llm_failure_persists_nothing() {
        let fixture = fixture(vec![Err(
            AgentError::CompletionFailed("boom".into()).into()
        )])
        .await;
        let conversation = conversation(&fixture).await;

        let result = fixture.dispatcher.chat(&conversation, "hello").await;
        assert!(result.is_err());

        let history = fixture
            .conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert!(history.is_empty());
    }

    #[tokio::test]
    async fn memory_context_reaches_the_system_prompt() {
        let fixture = fixture(vec![ScriptedLlm::text("sure")]).await;
        fixture
            .memory
            .remember(NewFragment {
                user_id: Some("alice".into()),
                category: Some("health".into()),
                ..NewFragment::text("allergic to peanuts")
            })
            .await
            .expect("remember");
        let conversation = conversation(&fixture).await;

        fixture
            .dispatcher
            .chat(&conversation, "allergic to peanuts?")
            .await
            .expect("chat");

        let systems = fixture.llm.systems();
        assert!(systems[0].contains("allergic to peanuts"));
    }

    #[tokio::test]
    async fn specialist_instruction_tracks_intent() {
        let fixture = fixture(vec![ScriptedLlm::text("ok")]).await;
        let conversation = conversation(&fixture).await;

        fixture
            .dispatcher
            .chat(&conversation, "What shows should I watch tonight?")
            .await
            .expect("chat");

        let systems = fixture.llm.systems();
        assert!(systems[0].contains("entertainment"));
    }

    #[tokio::test]
    async fn collaborate_runs_three_stages_and_persists_only_the_review() {
        let fixture = fixture(vec![
            ScriptedLlm::text("1. research\n2. answer"),
            ScriptedLlm::text("draft answer"),
            ScriptedLlm::text("polished answer"),
        ])
        .await;
        let conversation = conversation(&fixture).await;

        let reply = fixture
            .dispatcher
            .collaborate(&conversation, "Build me a blog about gardening tips")
            .await
            .expect("collaborate");
        assert_eq!(reply, "polished answer");

        let systems = fixture.llm.systems();
        assert_eq!(systems.len(), 3);
        assert!(systems[0].contains("planning stage"));
        assert!(systems[1].contains("1. research"));
        assert!(systems[2].contains("draft answer"));

        let history = fixture
            .conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].content, "polished answer");

        let runs = fixture
            .collaborations
            .for_conversation(&conversation.id)
            .await
            .expect("runs");
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].draft, "draft answer");
        assert_eq!(runs[0].final_output, "polished answer");
    }

    #[tokio::test]
    async fn collaborate_failure_mid_run_persists_no_messages() {
        let fixture = fixture(vec![
            ScriptedLlm::text("a plan"),
            Err(AgentError::CompletionFailed("boom".into()).into()),
        ])
        .await;
        let conversation = conversation(&fixture).await;

        let result = fixture
            .dispatcher
            .collaborate(&conversation, "do something big")
            .await;
        assert!(result.is_err());

        let history = fixture
            .conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert!(history.is_empty());
        assert!(fixture
            .collaborations
            .for_conversation(&conversation.id)
            .await
            .expect("runs")
            .is_empty());
    }
}
