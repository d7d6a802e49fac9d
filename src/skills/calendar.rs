//! Calendar skill with its own event table, scoped to user and
//! conversation.

use crate::error::Result;
use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::{anyhow, bail, Context as _};
use futures::FutureExt as _;
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub title: String,
    pub starts_at: chrono::DateTime<chrono::Utc>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

pub struct CalendarStore {
    pool: SqlitePool,
}

impl CalendarStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calendar_events (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                conversation_id TEXT,
                title TEXT NOT NULL,
                starts_at TIMESTAMP NOT NULL,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create calendar_events table")?;
        Ok(())
    }

    pub async fn add(
        &self,
        user_id: Option<&str>,
        conversation_id: Option<&str>,
        title: &str,
        starts_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<CalendarEvent> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO calendar_events (id, user_id, conversation_id, title, starts_at, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(user_id)
        .bind(conversation_id)
        .bind(title)
        .bind(starts_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to insert calendar event")?;

        Ok(CalendarEvent {
            id,
            user_id: user_id.map(String::from),
            conversation_id: conversation_id.map(String::from),
            title: title.to_string(),
            starts_at,
            created_at,
        })
    }

    /// Upcoming events at or after `from`, soonest first.
    pub async fn upcoming(
        &self,
        user_id: Option<&str>,
        from: chrono::DateTime<chrono::Utc>,
        limit: i64,
    ) -> Result<Vec<CalendarEvent>> {
        let rows = match user_id {
            Some(user) => {
                sqlx::query(
                    "SELECT id, user_id, conversation_id, title, starts_at, created_at \
                     FROM calendar_events WHERE starts_at >= ? AND user_id = ? \
                     ORDER BY starts_at ASC LIMIT ?",
                )
                .bind(from)
                .bind(user)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, user_id, conversation_id, title, starts_at, created_at \
                     FROM calendar_events WHERE starts_at >= ? \
                     ORDER BY starts_at ASC LIMIT ?",
                )
                .bind(from)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("failed to load calendar events")?;

        Ok(rows
            .iter()
            .map(|row| CalendarEvent {
                id: row.try_get("id").unwrap_or_default(),
                user_id: row.try_get::<Option<String>, _>("user_id").unwrap_or(None),
                conversation_id: row
                    .try_get::<Option<String>, _>("conversation_id")
                    .unwrap_or(None),
                title: row.try_get("title").unwrap_or_default(),
                starts_at: row
                    .try_get("starts_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
                created_at: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            })
            .collect())
    }
}

pub fn calendar(store: Arc<CalendarStore>) -> Skill {
    Skill::new(
        "calendar",
        "Add an event to the user's calendar or list upcoming events.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["add", "list"],
                },
                "title": {
                    "type": "string",
                    "description": "Event title, required for add"
                },
                "starts_at": {
                    "type": "string",
                    "description": "Event start as RFC 3339, e.g. 2026-09-01T14:00:00Z, required for add"
                }
            },
            "required": ["action"],
        }),
        ActionClass::Write,
        Arc::new(move |ctx, args| {
            let store = store.clone();
            async move {
                let action = args
                    .get("action")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'action' argument"))?;

                match action {
                    "add" => {
                        let title = args
                            .get("title")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| anyhow!("missing 'title' argument"))?;
                        let starts_at = args
                            .get("starts_at")
                            .and_then(|v| v.as_str())
                            .ok_or_else(|| anyhow!("missing 'starts_at' argument"))?;
                        let starts_at = chrono::DateTime::parse_from_rfc3339(starts_at)
                            .map_err(|_| {
                                anyhow!("'starts_at' must be RFC 3339, e.g. 2026-09-01T14:00:00Z")
                            })?
                            .with_timezone(&chrono::Utc);

                        store
                            .add(
                                ctx.user_id.as_deref(),
                                ctx.conversation_id.as_deref(),
                                title,
                                starts_at,
                            )
                            .await?;
                        Ok(format!(
                            "Added '{title}' on {}.",
                            starts_at.format("%Y-%m-%d %H:%M UTC")
                        ))
                    }
                    "list" => {
                        let events = store
                            .upcoming(ctx.user_id.as_deref(), chrono::Utc::now(), 20)
                            .await?;
                        if events.is_empty() {
                            Ok("No upcoming events.".to_string())
                        } else {
                            let mut out = String::from("Upcoming events:\n");
                            for event in events {
                                out.push_str(&format!(
                                    "- {}: {}\n",
                                    event.starts_at.format("%Y-%m-%d %H:%M UTC"),
                                    event.title
                                ));
                            }
                            Ok(out)
                        }
                    }
                    other => bail!("unknown action '{other}'"),
                }
            }
            .boxed()
        }),
    )
}
