//! Heartbeat: recurring assistant tasks parsed from a markdown checklist.

pub mod engine;
pub mod parser;
pub mod store;

pub use engine::HeartbeatEngine;
pub use store::HeartbeatRunStore;

use crate::error::ScheduleError;
use crate::notify::next_cron_occurrence;

/// How often a heartbeat item should run.
///
/// Cron schedules here are approximated to an interval (the gap between
/// the next two occurrences); only the notification scheduler evaluates
/// cron expressions exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatSchedule {
    EveryMinutes(i64),
    Cron(String),
}

impl HeartbeatSchedule {
    pub fn interval_minutes(&self) -> Result<i64, ScheduleError> {
        match self {
            Self::EveryMinutes(minutes) => Ok(*minutes),
            Self::Cron(expression) => {
                let now = chrono::Utc::now();
                let first = next_cron_occurrence(expression, now)?;
                let second = next_cron_occurrence(expression, first)?;
                Ok((second - first).num_minutes().max(1))
            }
        }
    }
}

/// One checklist entry. Ids are positional (`item-N` in file order), so
/// reordering the source file reshuffles run history across items.
#[derive(Debug, Clone)]
pub struct HeartbeatItem {
    pub id: String,
    pub instruction: String,
    pub schedule: HeartbeatSchedule,
    /// A checked box marks the item active; clearing it retires the item.
    pub enabled: bool,
}

/// Outcome of one heartbeat item execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A recorded heartbeat execution.
#[derive(Debug, Clone)]
pub struct HeartbeatRunRecord {
    pub id: String,
    pub item_id: String,
    pub instruction: String,
    pub status: RunStatus,
    pub output: String,
    pub executed_at: chrono::DateTime<chrono::Utc>,
}
