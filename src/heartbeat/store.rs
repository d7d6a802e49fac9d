//! Heartbeat run history (SQLite).

use crate::error::Result;
use crate::heartbeat::{HeartbeatRunRecord, RunStatus};
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

pub struct HeartbeatRunStore {
    pool: SqlitePool,
}

impl HeartbeatRunStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS heartbeat_runs (
                id TEXT PRIMARY KEY,
                item_id TEXT NOT NULL,
                instruction TEXT NOT NULL,
                status TEXT NOT NULL,
                output TEXT NOT NULL DEFAULT '',
                executed_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create heartbeat_runs table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_heartbeat_runs_item \
             ON heartbeat_runs(item_id, executed_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create heartbeat run index")?;

        Ok(())
    }

    pub async fn log_run(
        &self,
        item_id: &str,
        instruction: &str,
        status: RunStatus,
        output: &str,
    ) -> Result<HeartbeatRunRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        let executed_at = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO heartbeat_runs (id, item_id, instruction, status, output, executed_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(item_id)
        .bind(instruction)
        .bind(status.as_str())
        .bind(output)
        .bind(executed_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to log heartbeat run for {item_id}"))?;

        Ok(HeartbeatRunRecord {
            id,
            item_id: item_id.to_string(),
            instruction: instruction.to_string(),
            status,
            output: output.to_string(),
            executed_at,
        })
    }

    /// Most recent run for an item, regardless of outcome.
    pub async fn last_run(&self, item_id: &str) -> Result<Option<HeartbeatRunRecord>> {
        let row = sqlx::query(
            "SELECT id, item_id, instruction, status, output, executed_at \
             FROM heartbeat_runs WHERE item_id = ? \
             ORDER BY executed_at DESC, rowid DESC LIMIT 1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load last heartbeat run for {item_id}"))?;

        Ok(row.as_ref().map(row_to_record))
    }
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> HeartbeatRunRecord {
    let status: String = row.try_get("status").unwrap_or_default();

    HeartbeatRunRecord {
        id: row.try_get("id").unwrap_or_default(),
        item_id: row.try_get("item_id").unwrap_or_default(),
        instruction: row.try_get("instruction").unwrap_or_default(),
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        output: row.try_get("output").unwrap_or_default(),
        executed_at: row
            .try_get("executed_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn last_run_tracks_the_newest_record() {
        let pool = crate::db::connect_in_memory().await;
        let store = HeartbeatRunStore::new(pool);
        store.initialize().await.expect("schema");

        assert!(store.last_run("item-1").await.expect("query").is_none());

        store
            .log_run("item-1", "summarize", RunStatus::Failed, "timeout")
            .await
            .expect("log");
        store
            .log_run("item-1", "summarize", RunStatus::Success, "done")
            .await
            .expect("log");
        store
            .log_run("item-2", "other", RunStatus::Success, "done")
            .await
            .expect("log");

        let last = store
            .last_run("item-1")
            .await
            .expect("query")
            .expect("record");
        assert_eq!(last.status, RunStatus::Success);
        assert_eq!(last.output, "done");
    }
}
