//! Scheduled notification persistence (SQLite).

use crate::error::Result;
use crate::notify::{NewNotification, NotificationStatus, ScheduledNotification};
use crate::GatewayKind;
use anyhow::Context as _;
use sqlx::{Row as _, SqlitePool};
use std::sync::Arc;

/// Notification store for CRUD and due-selection.
pub struct NotificationStore {
    pool: SqlitePool,
}

impl NotificationStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// Create the notification table if it doesn't exist.
    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scheduled_notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT,
                conversation_id TEXT,
                gateway TEXT NOT NULL,
                channel_id TEXT,
                message TEXT NOT NULL,
                cron_expression TEXT,
                send_at TIMESTAMP,
                status TEXT NOT NULL DEFAULT 'pending',
                last_error TEXT,
                sent_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to create scheduled_notifications table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_due \
             ON scheduled_notifications(status, send_at)",
        )
        .execute(&self.pool)
        .await
        .context("failed to create notification index")?;

        Ok(())
    }

    /// Insert a new pending notification.
    pub async fn create(&self, input: NewNotification) -> Result<ScheduledNotification> {
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = chrono::Utc::now();

        sqlx::query(
            "INSERT INTO scheduled_notifications \
             (id, user_id, conversation_id, gateway, channel_id, message, cron_expression, send_at, status, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'pending', ?)",
        )
        .bind(&id)
        .bind(&input.user_id)
        .bind(&input.conversation_id)
        .bind(input.gateway.as_str())
        .bind(&input.channel_id)
        .bind(&input.message)
        .bind(&input.cron_expression)
        .bind(input.send_at)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("failed to create notification")?;

        Ok(ScheduledNotification {
            id,
            user_id: input.user_id,
            conversation_id: input.conversation_id,
            gateway: input.gateway,
            channel_id: input.channel_id,
            message: input.message,
            cron_expression: input.cron_expression,
            send_at: input.send_at,
            status: NotificationStatus::Pending,
            last_error: None,
            sent_at: None,
            created_at,
        })
    }

    /// Select notifications whose send time has arrived (or that have no
    /// send time at all). Failed rows stay eligible when they carry a
    /// cron expression; a recurring item's next tick does not depend on
    /// earlier failures. Failed one-shots are terminal.
    pub async fn due(
        &self,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<ScheduledNotification>> {
        let rows = sqlx::query(
            "SELECT id, user_id, conversation_id, gateway, channel_id, message, cron_expression, \
                    send_at, status, last_error, sent_at, created_at \
             FROM scheduled_notifications \
             WHERE (status = 'pending' OR (status = 'failed' AND cron_expression IS NOT NULL)) \
               AND (send_at IS NULL OR send_at <= ?) \
             ORDER BY created_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .context("failed to select due notifications")?;

        Ok(rows.iter().map(row_to_notification).collect())
    }

    pub async fn get(&self, id: &str) -> Result<Option<ScheduledNotification>> {
        let row = sqlx::query(
            "SELECT id, user_id, conversation_id, gateway, channel_id, message, cron_expression, \
                    send_at, status, last_error, sent_at, created_at \
             FROM scheduled_notifications WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load notification {id}"))?;

        Ok(row.as_ref().map(row_to_notification))
    }

    /// One-shot success: pending -> sent (terminal).
    pub async fn mark_sent(&self, id: &str, now: chrono::DateTime<chrono::Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_notifications \
             SET status = 'sent', sent_at = ?, last_error = NULL WHERE id = ?",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark notification {id} sent"))?;
        Ok(())
    }

    /// Recurring success: stays pending, advances send_at to the next
    /// cron occurrence.
    pub async fn reschedule(
        &self,
        id: &str,
        next_send_at: chrono::DateTime<chrono::Utc>,
        sent_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_notifications \
             SET status = 'pending', send_at = ?, sent_at = ?, last_error = NULL WHERE id = ?",
        )
        .bind(next_send_at)
        .bind(sent_at)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to reschedule notification {id}"))?;
        Ok(())
    }

    /// Any dispatch failure: status failed with the error captured.
    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE scheduled_notifications SET status = 'failed', last_error = ? WHERE id = ?",
        )
        .bind(error)
        .bind(id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to mark notification {id} failed"))?;
        Ok(())
    }

    /// Push send_at forward without touching status. Used after a
    /// recurring delivery fails, so the row waits for its next cron
    /// occurrence instead of retrying every tick.
    pub async fn defer(&self, id: &str, send_at: chrono::DateTime<chrono::Utc>) -> Result<()> {
        sqlx::query("UPDATE scheduled_notifications SET send_at = ? WHERE id = ?")
            .bind(send_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to defer notification {id}"))?;
        Ok(())
    }

    /// Link a conversation created at dispatch time back onto the row.
    pub async fn link_conversation(&self, id: &str, conversation_id: &str) -> Result<()> {
        sqlx::query("UPDATE scheduled_notifications SET conversation_id = ? WHERE id = ?")
            .bind(conversation_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to link conversation on notification {id}"))?;
        Ok(())
    }
}

fn row_to_notification(row: &sqlx::sqlite::SqliteRow) -> ScheduledNotification {
    let gateway: String = row.try_get("gateway").unwrap_or_default();
    let status: String = row.try_get("status").unwrap_or_default();

    ScheduledNotification {
        id: row.try_get("id").unwrap_or_default(),
        user_id: row.try_get::<Option<String>, _>("user_id").unwrap_or(None),
        conversation_id: row
            .try_get::<Option<String>, _>("conversation_id")
            .unwrap_or(None),
        gateway: GatewayKind::parse(&gateway).unwrap_or(GatewayKind::Scheduler),
        channel_id: row.try_get::<Option<String>, _>("channel_id").unwrap_or(None),
        message: row.try_get("message").unwrap_or_default(),
        cron_expression: row
            .try_get::<Option<String>, _>("cron_expression")
            .unwrap_or(None),
        send_at: row.try_get("send_at").ok(),
        status: NotificationStatus::parse(&status).unwrap_or(NotificationStatus::Pending),
        last_error: row.try_get::<Option<String>, _>("last_error").unwrap_or(None),
        sent_at: row.try_get("sent_at").ok(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn setup_store() -> Arc<NotificationStore> {
        let pool = crate::db::connect_in_memory().await;
        let store = NotificationStore::new(pool);
        store.initialize().await.expect("schema should initialize");
        store
    }

    fn one_shot(message: &str, send_at: Option<chrono::DateTime<chrono::Utc>>) -> NewNotification {
        NewNotification {
            user_id: None,
            conversation_id: None,
            gateway: GatewayKind::Telegram,
            channel_id: Some("chat-1".into()),
            message: message.into(),
            cron_expression: None,
            send_at,
        }
    }

    #[tokio::test]
    async fn due_selection_honors_send_at() {
        let store = setup_store().await;
        let now = chrono::Utc::now();

        store
            .create(one_shot("immediate", None))
            .await
            .expect("create");
        store
            .create(one_shot("past", Some(now - Duration::minutes(5))))
            .await
            .expect("create");
        store
            .create(one_shot("future", Some(now + Duration::hours(1))))
            .await
            .expect("create");

        let due = store.due(now).await.expect("due");
        let messages: Vec<_> = due.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["immediate", "past"]);
    }

    #[tokio::test]
    async fn sent_notifications_leave_the_due_set() {
        let store = setup_store().await;
        let now = chrono::Utc::now();
        let created = store.create(one_shot("once", None)).await.expect("create");

        store.mark_sent(&created.id, now).await.expect("mark sent");

        assert!(store.due(now).await.expect("due").is_empty());
        let reloaded = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(reloaded.status, NotificationStatus::Sent);
        assert!(reloaded.sent_at.is_some());
    }

    #[tokio::test]
    async fn reschedule_keeps_recurring_pending() {
        let store = setup_store().await;
        let now = chrono::Utc::now();
        let created = store
            .create(NewNotification {
                cron_expression: Some("0 9 * * *".into()),
                ..one_shot("daily digest", None)
            })
            .await
            .expect("create");

        let next = now + Duration::hours(12);
        store
            .reschedule(&created.id, next, now)
            .await
            .expect("reschedule");

        let reloaded = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(reloaded.status, NotificationStatus::Pending);
        assert!(store.due(now).await.expect("due").is_empty());
        assert_eq!(store.due(next).await.expect("due").len(), 1);
    }

    #[tokio::test]
    async fn failed_recurring_stays_eligible() {
        let store = setup_store().await;
        let now = chrono::Utc::now();

        let recurring = store
            .create(NewNotification {
                cron_expression: Some("0 9 * * *".into()),
                ..one_shot("daily digest", None)
            })
            .await
            .expect("create");
        let once = store.create(one_shot("once", None)).await.expect("create");

        store
            .mark_failed(&recurring.id, "provider down")
            .await
            .expect("mark failed");
        store
            .mark_failed(&once.id, "provider down")
            .await
            .expect("mark failed");

        // The recurring row reappears on a later tick; the one-shot is
        // terminal.
        let due = store.due(now + Duration::days(2)).await.expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, recurring.id);
        assert_eq!(due[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn defer_pushes_send_at_without_touching_status() {
        let store = setup_store().await;
        let now = chrono::Utc::now();
        let created = store
            .create(NewNotification {
                cron_expression: Some("*/5 * * * *".into()),
                ..one_shot("flaky reminder", None)
            })
            .await
            .expect("create");

        store
            .mark_failed(&created.id, "gateway delivery failed")
            .await
            .expect("mark failed");
        store
            .defer(&created.id, now + Duration::minutes(5))
            .await
            .expect("defer");

        assert!(store.due(now).await.expect("due").is_empty());
        let later = store
            .due(now + Duration::minutes(6))
            .await
            .expect("due later");
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].status, NotificationStatus::Failed);
    }

    #[tokio::test]
    async fn failure_records_error() {
        let store = setup_store().await;
        let created = store.create(one_shot("doomed", None)).await.expect("create");

        store
            .mark_failed(&created.id, "telegram send returned false")
            .await
            .expect("mark failed");

        let reloaded = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(reloaded.status, NotificationStatus::Failed);
        assert_eq!(
            reloaded.last_error.as_deref(),
            Some("telegram send returned false")
        );
    }
}
