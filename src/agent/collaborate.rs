//! Audit storage for multi-stage collaboration runs.
//!
//! The planner/executor/reviewer stages themselves live on
//! [`AgentDispatcher::collaborate`](crate::agent::AgentDispatcher::collaborate);
//! this module persists what each stage produced.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

/// One recorded collaboration: the intermediate plan and draft plus the
/// reviewer output that reached the user.
#[derive(Debug, Clone)]
pub struct CollaborationRun {
    pub id: String,
    pub conversation_id: String,
    pub plan: String,
    pub draft: String,
    pub final_output: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct CollaborationStore {
    pool: SqlitePool,
}

impl CollaborationStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collaboration_runs (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                plan TEXT NOT NULL,
                draft TEXT NOT NULL,
                final_output TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create collaboration_runs table")?;
        Ok(())
    }

    pub async fn record(
        &self,
        conversation_id: &str,
        plan: &str,
        draft: &str,
        final_output: &str,
    ) -> Result<CollaborationRun> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO collaboration_runs (id, conversation_id, plan, draft, final_output, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(conversation_id)
        .bind(plan)
        .bind(draft)
        .bind(final_output)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to record collaboration run")?;

        Ok(CollaborationRun {
            id,
            conversation_id: conversation_id.to_string(),
            plan: plan.to_string(),
            draft: draft.to_string(),
            final_output: final_output.to_string(),
            created_at,
        })
    }

    /// Runs for a conversation, newest first.
    pub async fn for_conversation(&self, conversation_id: &str) -> Result<Vec<CollaborationRun>> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, plan, draft, final_output, created_at \
             FROM collaboration_runs WHERE conversation_id = ? ORDER BY created_at DESC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load collaboration runs")?;

        Ok(rows
            .iter()
            .map(|row| CollaborationRun {
                id: row.try_get("id").unwrap_or_default(),
                conversation_id: row.try_get("conversation_id").unwrap_or_default(),
                plan: row.try_get("plan").unwrap_or_default(),
                draft: row.try_get("draft").unwrap_or_default(),
                final_output: row.try_get("final_output").unwrap_or_default(),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect())
    }
}
