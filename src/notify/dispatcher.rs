//! Delivers due notifications and advances their lifecycle.

use crate::conversation::store::ConversationStore;
use crate::conversation::{NewMessage, Role};
use crate::gateway::GatewayManager;
use crate::notify::{next_cron_occurrence, NotificationStore, ScheduledNotification};
use crate::Result;
use std::sync::Arc;

pub struct NotificationDispatcher {
    store: Arc<NotificationStore>,
    conversations: Arc<ConversationStore>,
    gateways: Arc<GatewayManager>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<NotificationStore>,
        conversations: Arc<ConversationStore>,
        gateways: Arc<GatewayManager>,
    ) -> Self {
        Self {
            store,
            conversations,
            gateways,
        }
    }

    /// Deliver everything due at `now`. Each notification is handled in
    /// isolation; one failure never stops the rest of the batch. Returns
    /// how many due notifications were handled, delivered or not.
    pub async fn run_due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let due = self.store.due(now).await?;
        let mut handled = 0;

        for notification in due {
            handled += 1;
            if let Err(error) = self.dispatch(&notification, now).await {
                tracing::error!(
                    notification_id = %notification.id,
                    %error,
                    "notification dispatch failed"
                );
                if let Err(error) = self
                    .record_failure(&notification, &error.to_string(), now)
                    .await
                {
                    tracing::error!(notification_id = %notification.id, %error,
                        "failed to record notification failure");
                }
            }
        }

        Ok(handled)
    }

    /// One delivery attempt: send through the gateway, record the message
    /// in the linked conversation, then settle the row's status.
    async fn dispatch(
        &self,
        notification: &ScheduledNotification,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        let channel_id = notification.channel_id.as_deref().unwrap_or_default();

        let sent = self
            .gateways
            .deliver(notification.gateway, channel_id, &notification.message)
            .await;
        if !sent {
            self.record_failure(notification, "gateway delivery failed", now)
                .await?;
            return Ok(());
        }

        self.record_in_conversation(notification).await?;

        if let Some(expression) = notification.cron_expression.as_deref() {
            let next = next_cron_occurrence(expression, now)?;
            self.store.reschedule(&notification.id, next, now).await?;
            tracing::info!(
                notification_id = %notification.id,
                next_send_at = %next,
                "recurring notification delivered"
            );
        } else {
            self.store.mark_sent(&notification.id, now).await?;
            tracing::info!(notification_id = %notification.id, "notification delivered");
        }

        Ok(())
    }

    /// Mark the row failed and, for recurring rows, push send_at to the
    /// next cron occurrence so the retry follows the schedule instead of
    /// hammering every tick.
    async fn record_failure(
        &self,
        notification: &ScheduledNotification,
        error: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.store.mark_failed(&notification.id, error).await?;
        if let Some(expression) = notification.cron_expression.as_deref() {
            let next = next_cron_occurrence(expression, now)?;
            self.store.defer(&notification.id, next).await?;
        }
        Ok(())
    }

    /// Append the delivered text as an assistant turn so follow-up chat
    /// in that channel sees what was sent. Creates and links a
    /// conversation on first delivery.
    async fn record_in_conversation(&self, notification: &ScheduledNotification) -> Result<()> {
        let conversation_id = match &notification.conversation_id {
            Some(id) => id.clone(),
            None => {
                let conversation = self
                    .conversations
                    .find_or_create(
                        notification.gateway,
                        notification.channel_id.as_deref(),
                        Some("Scheduled notifications"),
                        notification.user_id.as_deref(),
                    )
                    .await?;
                self.store
                    .link_conversation(&notification.id, &conversation.id)
                    .await?;
                conversation.id
            }
        };

        self.conversations
            .append(
                &conversation_id,
                Role::Assistant,
                NewMessage::text(&notification.message),
            )
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::gateway::Gateway;
    use crate::notify::{NewNotification, NotificationStatus};
    use crate::{GatewayKind, InboundMessage};
    use async_trait::async_trait;
    use axum::http::HeaderMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    struct RecordingGateway {
        sent: Mutex<Vec<(String, String)>>,
        healthy: AtomicBool,
    }

    impl RecordingGateway {
        fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
                healthy: AtomicBool::new(healthy),
            })
        }
    }

    #[async_trait]
    impl Gateway for RecordingGateway {
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

        async fn deliver(&self, channel_id: &str, text: &str) -> bool {
            if !self.healthy.load(Ordering::SeqCst) {
                return false;
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel_id.to_string(), text.to_string()));
            true
        }
    }

    async fn setup(
        healthy: bool,
    ) -> (
        NotificationDispatcher,
        Arc<NotificationStore>,
        Arc<ConversationStore>,
        Arc<RecordingGateway>,
    ) {
        let pool = crate::db::connect_in_memory().await;
        let store = NotificationStore::new(pool.clone());
        store.initialize().await.expect("notifications schema");
        let conversations = ConversationStore::new(pool);
        conversations.initialize().await.expect("conversations schema");

        let gateway = RecordingGateway::new(healthy);
        let mut manager = GatewayManager::new();
        manager.register(gateway.clone());

        let dispatcher = NotificationDispatcher::new(
            store.clone(),
            conversations.clone(),
            Arc::new(manager),
        );
        (dispatcher, store, conversations, gateway)
    }

    fn reminder(cron: Option<&str>) -> NewNotification {
        NewNotification {
            user_id: Some("alice".into()),
            conversation_id: None,
            gateway: GatewayKind::Telegram,
            channel_id: Some("chat-7".into()),
            message: "water the plants".into(),
            cron_expression: cron.map(str::to_string),
            send_at: None,
        }
    }

    #[tokio::test]
    async fn one_shot_delivery_marks_sent_and_records_message() {
        let (dispatcher, store, conversations, gateway) = setup(true).await;
        let created = store.create(reminder(None)).await.expect("create");

        let handled = dispatcher.run_due(chrono::Utc::now()).await.expect("run");
        assert_eq!(handled, 1);

        assert_eq!(
            gateway.sent.lock().unwrap().as_slice(),
            &[("chat-7".to_string(), "water the plants".to_string())]
        );

        let row = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(row.status, NotificationStatus::Sent);

        let conversation_id = row.conversation_id.expect("linked conversation");
        let history = conversations
            .history(&conversation_id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, Role::Assistant);
        assert_eq!(history[0].content, "water the plants");
    }

    #[tokio::test]
    async fn recurring_delivery_stays_pending_with_future_send_at() {
        let (dispatcher, store, _conversations, _gateway) = setup(true).await;
        let created = store
            .create(reminder(Some("0 9 * * *")))
            .await
            .expect("create");

        let now = chrono::Utc::now();
        dispatcher.run_due(now).await.expect("run");

        let row = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(row.status, NotificationStatus::Pending);
        assert!(row.send_at.expect("next occurrence") > now);
    }

    #[tokio::test]
    async fn failed_delivery_marks_failed() {
        let (dispatcher, store, _conversations, gateway) = setup(false).await;
        let created = store.create(reminder(None)).await.expect("create");

        let handled = dispatcher.run_due(chrono::Utc::now()).await.expect("run");
        assert_eq!(handled, 1);
        assert!(gateway.sent.lock().unwrap().is_empty());

        let row = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(row.status, NotificationStatus::Failed);
        assert!(row.last_error.is_some());
    }

    #[tokio::test]
    async fn recurring_failure_defers_to_next_occurrence() {
        let (dispatcher, store, _conversations, gateway) = setup(false).await;
        let created = store
            .create(reminder(Some("0 9 * * *")))
            .await
            .expect("create");

        let now = chrono::Utc::now();
        dispatcher.run_due(now).await.expect("run");

        let row = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(row.status, NotificationStatus::Failed);
        assert!(row.last_error.is_some());
        let deferred_to = row.send_at.expect("next occurrence");
        assert!(deferred_to > now);

        // The gateway recovers; the next scheduled tick delivers and the
        // row goes back to pending.
        gateway.healthy.store(true, Ordering::SeqCst);
        let handled = dispatcher.run_due(deferred_to).await.expect("retry run");
        assert_eq!(handled, 1);
        assert_eq!(gateway.sent.lock().unwrap().len(), 1);

        let row = store.get(&created.id).await.expect("get").expect("row");
        assert_eq!(row.status, NotificationStatus::Pending);
        assert!(row.last_error.is_none());
        assert!(row.send_at.expect("rescheduled") > deferred_to);
    }

    #[tokio::test]
    async fn second_delivery_reuses_linked_conversation() {
        let (dispatcher, store, conversations, _gateway) = setup(true).await;
        store
            .create(reminder(Some("*/5 * * * *")))
            .await
            .expect("create");

        let now = chrono::Utc::now();
        dispatcher.run_due(now).await.expect("first run");
        dispatcher
            .run_due(now + chrono::Duration::hours(1))
            .await
            .expect("second run");

        let conversation = conversations
            .find_or_create(GatewayKind::Telegram, Some("chat-7"), None, None)
            .await
            .expect("conversation");
        let history = conversations
            .history(&conversation.id, 10)
            .await
            .expect("history");
        assert_eq!(history.len(), 2);
    }
}
