//! Notification scheduling skill: the agent's handle on reminders.

use crate::notify::{next_cron_occurrence, NewNotification, NotificationStore};
use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::{anyhow, bail};
use futures::FutureExt as _;
use std::sync::Arc;

pub fn schedule_notification(store: Arc<NotificationStore>) -> Skill {
    Skill::new(
        "schedule_notification",
        "Schedule a message to be sent to this chat later: once at a \
         given time, after a delay, or on a recurring cron schedule.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The text to deliver"
                },
                "send_at": {
                    "type": "string",
                    "description": "One-shot delivery time as RFC 3339"
                },
                "in_minutes": {
                    "type": "integer",
                    "description": "One-shot delay from now, in minutes"
                },
                "cron": {
                    "type": "string",
                    "description": "Recurring schedule as a 5-field cron expression"
                }
            },
            "required": ["message"],
        }),
        ActionClass::Write,
        Arc::new(move |ctx, args| {
            let store = store.clone();
            async move {
                let message = args
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow!("missing 'message' argument"))?;

                let (gateway, channel_id) = match (ctx.gateway, ctx.channel_id.clone()) {
                    (Some(gateway), Some(channel)) => (gateway, channel),
                    _ => bail!("this conversation has no deliverable channel"),
                };

                let cron = args.get("cron").and_then(|v| v.as_str());
                let send_at = args.get("send_at").and_then(|v| v.as_str());
                let in_minutes = args.get("in_minutes").and_then(|v| v.as_i64());

                let now = chrono::Utc::now();
                let (cron_expression, send_at) = match (cron, send_at, in_minutes) {
                    (Some(expression), None, None) => {
                        // Validate up front and seed send_at with the first occurrence.
                        let first = next_cron_occurrence(expression, now)?;
                        (Some(expression.to_string()), Some(first))
                    }
                    (None, Some(raw), None) => {
                        let at = chrono::DateTime::parse_from_rfc3339(raw)
                            .map_err(|_| anyhow!("'send_at' must be RFC 3339"))?
                            .with_timezone(&chrono::Utc);
                        (None, Some(at))
                    }
                    (None, None, Some(minutes)) if minutes > 0 => {
                        (None, Some(now + chrono::Duration::minutes(minutes)))
                    }
                    (None, None, Some(_)) => bail!("'in_minutes' must be positive"),
                    (None, None, None) => {
                        bail!("provide one of 'send_at', 'in_minutes', or 'cron'")
                    }
                    _ => bail!("'cron', 'send_at', and 'in_minutes' are mutually exclusive"),
                };

                let created = store
                    .create(NewNotification {
                        user_id: ctx.user_id.clone(),
                        conversation_id: ctx.conversation_id.clone(),
                        gateway,
                        channel_id: Some(channel_id),
                        message: message.to_string(),
                        cron_expression,
                        send_at,
                    })
                    .await?;

                match (&created.cron_expression, created.send_at) {
                    (Some(expression), Some(first)) => Ok(format!(
                        "Scheduled recurring notification ('{expression}'), next at {}.",
                        first.format("%Y-%m-%d %H:%M UTC")
                    )),
                    (_, Some(at)) => Ok(format!(
                        "Scheduled notification for {}.",
                        at.format("%Y-%m-%d %H:%M UTC")
                    )),
                    _ => Ok("Scheduled notification.".to_string()),
                }
            }
            .boxed()
        }),
    )
}
