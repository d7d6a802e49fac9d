//! Scheduled outbound notifications: one-shot and cron-recurring.

pub mod dispatcher;
pub mod store;

pub use dispatcher::NotificationDispatcher;
pub use store::NotificationStore;

use crate::error::ScheduleError;
use crate::GatewayKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr as _;

/// Delivery state of a scheduled notification.
///
/// `Sent` is terminal for one-shot notifications. Recurring notifications
/// loop back to `Pending` after each successful dispatch. `Failed` is
/// terminal for one-shot items; a recurring item's next tick is
/// independent of prior failures.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A scheduled outbound notification row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledNotification {
    pub id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub gateway: GatewayKind,
    pub channel_id: Option<String>,
    pub message: String,
    /// Recurring schedule. Mutually exclusive with `send_at`.
    pub cron_expression: Option<String>,
    /// One-shot delivery time. Mutually exclusive with `cron_expression`.
    pub send_at: Option<chrono::DateTime<chrono::Utc>>,
    pub status: NotificationStatus,
    pub last_error: Option<String>,
    pub sent_at: Option<chrono::DateTime<chrono::Utc>>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ScheduledNotification {
    pub fn is_recurring(&self) -> bool {
        self.cron_expression.is_some()
    }
}

/// Input for creating a notification.
#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub gateway: GatewayKind,
    pub channel_id: Option<String>,
    pub message: String,
    pub cron_expression: Option<String>,
    pub send_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Compute the next fire time for a cron expression, strictly after
/// `after`. Five-field expressions get a seconds field prepended so the
/// usual crontab shape works.
pub fn next_cron_occurrence(
    expression: &str,
    after: chrono::DateTime<chrono::Utc>,
) -> Result<chrono::DateTime<chrono::Utc>, ScheduleError> {
    let normalized = normalize_cron(expression);
    let schedule =
        cron::Schedule::from_str(&normalized).map_err(|error| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: error.to_string(),
        })?;

    schedule
        .after(&after)
        .next()
        .ok_or_else(|| ScheduleError::InvalidCron {
            expression: expression.to_string(),
            reason: "no upcoming occurrence".to_string(),
        })
}

fn normalize_cron(expression: &str) -> String {
    let fields = expression.split_whitespace().count();
    if fields == 5 {
        format!("0 {expression}")
    } else {
        expression.to_string()
    }
}
