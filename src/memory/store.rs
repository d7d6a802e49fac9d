//! Memory fragment storage (SQLite + FTS5).

use crate::error::Result;
use crate::memory::{MemoryFragment, NewFragment};
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Memory store for insert/delete and ranked retrieval.
pub struct MemoryStore {
    pool: SqlitePool,
    /// Whether the FTS5 index is available. When false, retrieval falls
    /// back to substring containment ordered by recency.
    fts_available: AtomicBool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            fts_available: AtomicBool::new(false),
        })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn fts_available(&self) -> bool {
        self.fts_available.load(Ordering::Relaxed)
    }

    /// Create the memory tables and, when the build supports it, the FTS5
    /// index. An FTS5 failure downgrades retrieval to the fallback path
    /// instead of failing initialization.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS memory_fragments (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                conversation_id TEXT,
                key TEXT,
                category TEXT,
                content TEXT NOT NULL,
                metadata TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create memory_fragments table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_memory_fragments_user \
             ON memory_fragments(user_id, category)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create memory index")?;

        match self.initialize_fts().await {
            Ok(()) => self.fts_available.store(true, Ordering::Relaxed),
            Err(error) => {
                tracing::warn!(
                    %error,
                    "FTS5 index unavailable, memory retrieval will use the substring fallback"
                );
                self.fts_available.store(false, Ordering::Relaxed);
            }
        }

        Ok(())
    }

    async fn initialize_fts(&self) -> anyhow::Result<()> {
        sqlx::query(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memory_fragments_fts USING fts5( \
                 content, key, \
                 content='memory_fragments', content_rowid='rowid' \
             )",
        )
        .execute(&self.pool)
        .await
        .context("failed to create memory FTS table")?;

        // Fragments are immutable, so insert/delete triggers are enough.
        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS memory_fragments_ai \
             AFTER INSERT ON memory_fragments BEGIN \
                 INSERT INTO memory_fragments_fts(rowid, content, key) \
                 VALUES (new.rowid, new.content, new.key); \
             END",
        )
        .execute(&self.pool)
        .await
        .context("failed to create memory FTS insert trigger")?;

        sqlx::query(
            "CREATE TRIGGER IF NOT EXISTS memory_fragments_ad \
             AFTER DELETE ON memory_fragments BEGIN \
                 INSERT INTO memory_fragments_fts(memory_fragments_fts, rowid, content, key) \
                 VALUES ('delete', old.rowid, old.content, old.key); \
             END",
        )
        .execute(&self.pool)
        .await
        .context("failed to create memory FTS delete trigger")?;

        Ok(())
    }

    /// Insert a fragment. Pure insert: de-duplication and category
    /// auto-detection are the caller's responsibility (skill layer).
    pub async fn remember(&self, input: NewFragment) -> Result<MemoryFragment> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();
        let metadata_json = input.metadata.as_ref().map(|v| v.to_string());

        sqlx::query(
            "INSERT INTO memory_fragments (id, user_id, conversation_id, key, category, content, metadata, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&input.user_id)
        .bind(&input.conversation_id)
        .bind(&input.key)
        .bind(&input.category)
        .bind(&input.content)
        .bind(&metadata_json)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert memory fragment")?;

        Ok(MemoryFragment {
            id,
            user_id: input.user_id,
            conversation_id: input.conversation_id,
            key: input.key,
            category: input.category,
            content: input.content,
            metadata: input.metadata,
            created_at,
        })
    }

    /// Delete all fragments stored under a key. Returns the deleted count.
    pub async fn forget(&self, key: &str, user_id: Option<&str>) -> Result<u64> {
        let result = match user_id {
            Some(user) => {
                sqlx::query("DELETE FROM memory_fragments WHERE key = ? AND user_id = ?")
                    .bind(key)
                    .bind(user)
                    .execute(&self.pool)
                    .await
            }
            None => {
                sqlx::query("DELETE FROM memory_fragments WHERE key = ?")
                    .bind(key)
                    .execute(&self.pool)
                    .await
            }
        }
        .with_context(|| format!("failed to forget memories under key {key}"))?;

        Ok(result.rows_affected())
    }

    /// Delete all fragments under a key + category pair.
    pub async fn clear(&self, key: &str, category: &str, user_id: Option<&str>) -> Result<u64> {
        let result = match user_id {
            Some(user) => {
                sqlx::query(
                    "DELETE FROM memory_fragments WHERE key = ? AND category = ? AND user_id = ?",
                )
                .bind(key)
                .bind(category)
                .bind(user)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("DELETE FROM memory_fragments WHERE key = ? AND category = ?")
                    .bind(key)
                    .bind(category)
                    .execute(&self.pool)
                    .await
            }
        }
        .context("failed to clear memories")?;

        Ok(result.rows_affected())
    }

    /// Distinct category values present, optionally scoped to a user.
    pub async fn list_categories(&self, user_id: Option<&str>) -> Result<Vec<String>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT DISTINCT category FROM memory_fragments \
                     WHERE category IS NOT NULL AND user_id = ? ORDER BY category",
                )
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT DISTINCT category FROM memory_fragments \
                     WHERE category IS NOT NULL ORDER BY category",
                )
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to list memory categories")?;

        Ok(rows
            .into_iter()
            .filter_map(|row| row.try_get("category").ok())
            .collect())
    }

    /// All fragments stored under a key, oldest first.
    pub async fn by_key(&self, key: &str, user_id: Option<&str>) -> Result<Vec<MemoryFragment>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT id, user_id, conversation_id, key, category, content, metadata, created_at \
                     FROM memory_fragments WHERE key = ? AND user_id = ? ORDER BY created_at ASC",
                )
                .bind(key)
                .bind(user)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, conversation_id, key, category, content, metadata, created_at \
                     FROM memory_fragments WHERE key = ? ORDER BY created_at ASC",
                )
                .bind(key)
                .fetch_all(&self.pool)
                .await
            }
        }
        .with_context(|| format!("failed to load memories under key {key}"))?;

        Ok(rows.iter().map(row_to_fragment).collect())
    }

    /// Delete fragments under a key whose content matches exactly.
    pub async fn remove_item(
        &self,
        key: &str,
        content: &str,
        user_id: Option<&str>,
    ) -> Result<u64> {
        let result = match user_id {
            Some(user) => {
                sqlx::query(
                    "DELETE FROM memory_fragments WHERE key = ? AND content = ? AND user_id = ?",
                )
                .bind(key)
                .bind(content)
                .bind(user)
                .execute(&self.pool)
                .await
            }
            None => {
                sqlx::query("DELETE FROM memory_fragments WHERE key = ? AND content = ?")
                    .bind(key)
                    .bind(content)
                    .execute(&self.pool)
                    .await
            }
        }
        .with_context(|| format!("failed to remove item under key {key}"))?;

        Ok(result.rows_affected())
    }

    /// Exact-content duplicate check for a user, used by the remember skill
    /// before inserting.
    pub async fn has_identical(&self, content: &str, user_id: Option<&str>) -> Result<bool> {
        let row = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT 1 AS present FROM memory_fragments \
                     WHERE content = ? AND user_id = ? LIMIT 1",
                )
                .bind(content)
                .bind(user)
                .fetch_optional(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT 1 AS present FROM memory_fragments \
                     WHERE content = ? AND user_id IS NULL LIMIT 1",
                )
                .bind(content)
                .fetch_optional(&self.pool)
                .await
            }
        }
        .context("failed to check for duplicate memory")?;

        Ok(row.is_some())
    }
}

pub(crate) fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> MemoryFragment {
    let metadata: Option<String> = row.try_get::<Option<String>, _>("metadata").unwrap_or(None);

    MemoryFragment {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get::<Option<String>, _>("user_id").unwrap_or(None),
        conversation_id: row
            .try_get::<Option<String>, _>("conversation_id")
            .unwrap_or(None),
        key: row.try_get::<Option<String>, _>("key").unwrap_or(None),
        category: row.try_get::<Option<String>, _>("category").unwrap_or(None),
        content: row.try_get("content").unwrap_or_default(),
        metadata: metadata.and_then(|raw| serde_json::from_str(&raw).ok()),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}
