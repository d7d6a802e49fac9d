//! Conversation and message persistence (SQLite).

use crate::conversation::{Conversation, Message, NewMessage, Role};
use crate::error::Result;
use crate::GatewayKind;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Conversation store: find-or-create identity plus the ordered message log.
///
/// Also owns the per-conversation lock registry used to serialize the
/// user/assistant exchange pair against concurrent requests for the same
/// conversation.
pub struct ConversationStore {
    pool: SqlitePool,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create the conversation tables if they don't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                title TEXT,
                gateway TEXT NOT NULL,
                gateway_conversation_id TEXT,
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create conversations table")?;

        // At most one conversation per (gateway, channel) pair when the
        // channel id is present.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_conversations_gateway_channel \
             ON conversations(gateway, gateway_conversation_id) \
             WHERE gateway_conversation_id IS NOT NULL",
        )
        .execute(&self.pool)
        .await
        .context("failed to create conversation uniqueness index")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                tool_name TEXT,
                tool_arguments TEXT,
                metadata TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create messages table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
             ON messages(conversation_id, created_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create message index")?;

        Ok(())
    }

    /// Acquire the serialization lock for a conversation. Held across the
    /// whole retrieve/dispatch/persist exchange so concurrent messages for
    /// the same conversation don't interleave their message pairs.
    pub async fn lock(&self, conversation_id: &str) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().expect("lock registry poisoned");
            locks
                .entry(conversation_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Find or create the conversation for a (gateway, channel) pair.
    ///
    /// Title and user id are set only at creation time. The insert uses
    /// `ON CONFLICT DO NOTHING` against the partial unique index, so two
    /// concurrent resolutions for the same pair converge on one row.
    pub async fn find_or_create(
        &self,
        gateway: GatewayKind,
        gateway_conversation_id: Option<&str>,
        title: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Conversation> {
        if let Some(channel) = gateway_conversation_id {
            if let Some(existing) = self.find_by_channel(gateway, channel).await? {
                return Ok(existing);
            }

            let id = uuid::Uuid::new_v4().to_string();
            sqlx::query(
                "INSERT INTO conversations (id, user_id, title, gateway, gateway_conversation_id, metadata, created_at) \
                 VALUES (?, ?, ?, ?, ?, '{}', ?) \
                 ON CONFLICT DO NOTHING",
            )
            .bind(&id)
            .bind(user_id)
            .bind(title)
            .bind(gateway.as_str())
            .bind(channel)
            .bind(chrono::Utc::now())
            .execute(&self.pool)
            .await
            .context("failed to insert conversation")?;

            return self
                .find_by_channel(gateway, channel)
                .await?
                .context("conversation missing after find-or-create")
                .map_err(Into::into);
        }

        // No channel identity: always a fresh synthetic conversation.
        self.create(gateway, None, title, user_id).await
    }

    /// Explicitly create a conversation (new chat, scheduled task trigger).
    pub async fn create(
        &self,
        gateway: GatewayKind,
        gateway_conversation_id: Option<&str>,
        title: Option<&str>,
        user_id: Option<&str>,
    ) -> Result<Conversation> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();
        sqlx::query(
            "INSERT INTO conversations (id, user_id, title, gateway, gateway_conversation_id, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, '{}', ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(title)
        .bind(gateway.as_str())
        .bind(gateway_conversation_id)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to create conversation")?;

        Ok(Conversation {
            id,
            user_id: user_id.map(String::from),
            title: title.map(String::from),
            gateway,
            gateway_conversation_id: gateway_conversation_id.map(String::from),
            metadata: serde_json::json!({}),
            created_at,
        })
    }

    /// Look up a conversation by id.
    pub async fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, gateway, gateway_conversation_id, metadata, created_at \
             FROM conversations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load conversation {id}"))?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    async fn find_by_channel(
        &self,
        gateway: GatewayKind,
        channel: &str,
    ) -> Result<Option<Conversation>> {
        let row = sqlx::query(
            "SELECT id, user_id, title, gateway, gateway_conversation_id, metadata, created_at \
             FROM conversations WHERE gateway = ? AND gateway_conversation_id = ?",
        )
        .bind(gateway.as_str())
        .bind(channel)
        .fetch_optional(&self.pool)
        .await
        .context("failed to look up conversation by channel")?;

        Ok(row.map(|row| row_to_conversation(&row)))
    }

    /// Append a message with the given role. Returns the persisted message.
    pub async fn append(
        &self,
        conversation_id: &str,
        role: Role,
        message: NewMessage,
    ) -> Result<Message> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();
        let tool_arguments_json = message
            .tool_arguments
            .as_ref()
            .map(|v| v.to_string());
        let metadata_json = message.metadata.as_ref().map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, tool_name, tool_arguments, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(role.as_str())
        .bind(&message.content)
        .bind(&message.tool_name)
        .bind(&tool_arguments_json)
        .bind(&metadata_json)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to append message to conversation {conversation_id}"))?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            role,
            content: message.content,
            tool_name: message.tool_name,
            tool_arguments: message.tool_arguments,
            metadata: message.metadata,
            created_at,
        })
    }

    /// Load the most recent messages for a conversation, oldest first.
    pub async fn history(&self, conversation_id: &str, limit: i64) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, role, content, tool_name, tool_arguments, metadata, created_at \
             FROM messages \
             WHERE conversation_id = ? \
             ORDER BY created_at DESC, rowid DESC \
             LIMIT ?",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load history for conversation {conversation_id}"))?;

        let mut messages: Vec<Message> = rows.iter().map(row_to_message).collect();
        // Reverse to chronological order
        messages.reverse();
        Ok(messages)
    }
}

fn row_to_conversation(row: &sqlx::sqlite::SqliteRow) -> Conversation {
    let gateway: String = row.try_get("gateway").unwrap_or_default();
    let metadata: String = row.try_get("metadata").unwrap_or_else(|_| "{}".into());

    Conversation {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get::<Option<String>, _>("user_id").unwrap_or(None),
        title: row.try_get::<Option<String>, _>("title").unwrap_or(None),
        gateway: GatewayKind::parse(&gateway).unwrap_or(GatewayKind::Api),
        gateway_conversation_id: row
            .try_get::<Option<String>, _>("gateway_conversation_id")
            .unwrap_or(None),
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    let role: String = row.try_get("role").unwrap_or_default();
    let tool_arguments: Option<String> = row
        .try_get::<Option<String>, _>("tool_arguments")
        .unwrap_or(None);
    let metadata: Option<String> = row.try_get::<Option<String>, _>("metadata").unwrap_or(None);

    Message {
        id: row.try_get("id").unwrap_or_default(),
        conversation_id: row.try_get("conversation_id").unwrap_or_default(),
        role: Role::parse(&role).unwrap_or(Role::User),
        content: row.try_get("content").unwrap_or_default(),
        tool_name: row.try_get::<Option<String>, _>("tool_name").unwrap_or(None),
        tool_arguments: tool_arguments.and_then(|raw| serde_json::from_str(&raw).ok()),
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_store() -> Arc<ConversationStore> {
        let pool = crate::db::connect_in_memory().await;
        let store = ConversationStore::new(pool);
        store.initialize().await.expect("schema should initialize");
        store
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let store = setup_store().await;

        let first = store
            .find_or_create(GatewayKind::Telegram, Some("chat-1"), Some("Alice"), None)
            .await
            .expect("first resolution");
        let second = store
            .find_or_create(GatewayKind::Telegram, Some("chat-1"), Some("Other"), None)
            .await
            .expect("second resolution");

        assert_eq!(first.id, second.id);
        // Title is set only at creation time.
        assert_eq!(second.title.as_deref(), Some("Alice"));
    }

    #[tokio::test]
    async fn same_channel_on_different_gateways_is_distinct() {
        let store = setup_store().await;

        let telegram = store
            .find_or_create(GatewayKind::Telegram, Some("42"), None, None)
            .await
            .expect("telegram conversation");
        let discord = store
            .find_or_create(GatewayKind::Discord, Some("42"), None, None)
            .await
            .expect("discord conversation");

        assert_ne!(telegram.id, discord.id);
    }

    #[tokio::test]
    async fn history_preserves_order_and_limit() {
        let store = setup_store().await;
        let conversation = store
            .create(GatewayKind::Cli, Some("repl"), None, None)
            .await
            .expect("conversation");

        for i in 0..5 {
            store
                .append(
                    &conversation.id,
                    if i % 2 == 0 { Role::User } else { Role::Assistant },
                    NewMessage::text(format!("message {i}")),
                )
                .await
                .expect("append");
        }

        let full = store.history(&conversation.id, 10).await.expect("history");
        assert_eq!(full.len(), 5);
        for (i, message) in full.iter().enumerate() {
            assert_eq!(message.content, format!("message {i}"));
        }

        let limited = store.history(&conversation.id, 3).await.expect("history");
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[0].content, "message 2");
        assert_eq!(limited[2].content, "message 4");
    }

    #[tokio::test]
    async fn synthetic_conversations_are_always_fresh() {
        let store = setup_store().await;
        let a = store
            .find_or_create(GatewayKind::Scheduler, None, Some("reminder"), None)
            .await
            .expect("first synthetic");
        let b = store
            .find_or_create(GatewayKind::Scheduler, None, Some("reminder"), None)
            .await
            .expect("second synthetic");
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn tool_messages_round_trip_arguments() {
        let store = setup_store().await;
        let conversation = store
            .create(GatewayKind::Api, None, None, None)
            .await
            .expect("conversation");

        store
            .append(
                &conversation.id,
                Role::Tool,
                NewMessage {
                    content: "42".into(),
                    tool_name: Some("calculator".into()),
                    tool_arguments: Some(serde_json::json!({"expression": "6*7"})),
                    metadata: None,
                },
            )
            .await
            .expect("append tool message");

        let history = store.history(&conversation.id, 10).await.expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Tool);
        assert_eq!(history[0].tool_name.as_deref(), Some("calculator"));
        assert_eq!(
            history[0].tool_arguments,
            Some(serde_json::json!({"expression": "6*7"}))
        );
    }
}
