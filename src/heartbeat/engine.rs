//! The heartbeat engine: decides which checklist items are due and runs
//! them through the agent.

use crate::agent::AgentDispatcher;
use crate::conversation::store::ConversationStore;
use crate::error::{Result, ScheduleError};
use crate::heartbeat::parser::parse_source;
use crate::heartbeat::{HeartbeatItem, HeartbeatRunStore, RunStatus};
use crate::skills::truncate_output;
use crate::GatewayKind;
use std::path::PathBuf;
use std::sync::Arc;

const MAX_RECORDED_OUTPUT: usize = 2000;

pub struct HeartbeatEngine {
    source_path: PathBuf,
    runs: Arc<HeartbeatRunStore>,
    conversations: Arc<ConversationStore>,
    dispatcher: Arc<AgentDispatcher>,
}

impl HeartbeatEngine {
    pub fn new(
        source_path: PathBuf,
        runs: Arc<HeartbeatRunStore>,
        conversations: Arc<ConversationStore>,
        dispatcher: Arc<AgentDispatcher>,
    ) -> Self {
        Self {
            source_path,
            runs,
            conversations,
            dispatcher,
        }
    }

    /// Parse the checklist source. A missing file means no items; an
    /// unreadable file is an error.
    pub async fn load_items(&self) -> Result<Vec<HeartbeatItem>> {
        if !self.source_path.exists() {
            tracing::debug!(path = %self.source_path.display(), "no heartbeat source file");
            return Ok(Vec::new());
        }

        let source = tokio::fs::read_to_string(&self.source_path)
            .await
            .map_err(|error| {
                ScheduleError::SourceUnreadable(format!(
                    "{}: {error}",
                    self.source_path.display()
                ))
            })?;

        Ok(parse_source(&source))
    }

    /// Whether an item should run now, given its last recorded run.
    pub fn is_due(
        item: &HeartbeatItem,
        last_run: Option<chrono::DateTime<chrono::Utc>>,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        if !item.enabled {
            return Ok(false);
        }
        let interval = item.schedule.interval_minutes()?;
        Ok(match last_run {
            None => true,
            Some(last) => now - last >= chrono::Duration::minutes(interval),
        })
    }

    /// Run every due item, isolating failures per item. Returns how many
    /// items executed.
    pub async fn run_due_items(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize> {
        let items = self.load_items().await?;
        let mut executed = 0;

        for item in items {
            let last = self.runs.last_run(&item.id).await?.map(|r| r.executed_at);
            let due = match Self::is_due(&item, last, now) {
                Ok(due) => due,
                Err(error) => {
                    tracing::warn!(item_id = %item.id, %error, "unusable heartbeat schedule");
                    continue;
                }
            };
            if !due {
                continue;
            }

            executed += 1;
            if let Err(error) = self.run_item(&item).await {
                tracing::error!(item_id = %item.id, %error, "heartbeat item bookkeeping failed");
            }
        }

        Ok(executed)
    }

    /// Execute one item in its dedicated conversation and record the
    /// outcome. Agent failures are recorded, not propagated.
    async fn run_item(&self, item: &HeartbeatItem) -> Result<()> {
        // One stable conversation per item position, so the agent sees
        // its own previous task runs as history.
        let channel = format!("heartbeat:{}", item.id);
        let conversation = self
            .conversations
            .find_or_create(
                GatewayKind::Heartbeat,
                Some(&channel),
                Some(&item.instruction),
                None,
            )
            .await?;

        let prompt = format!(
            "Scheduled task: {}\n\nCarry out this task now and report the result briefly.",
            item.instruction
        );

        match self.dispatcher.chat(&conversation, &prompt).await {
            Ok(response) => {
                tracing::info!(item_id = %item.id, "heartbeat item succeeded");
                self.runs
                    .log_run(
                        &item.id,
                        &item.instruction,
                        RunStatus::Success,
                        &truncate_output(&response, MAX_RECORDED_OUTPUT),
                    )
                    .await?;
            }
            Err(error) => {
                tracing::error!(item_id = %item.id, %error, "heartbeat item failed");
                self.runs
                    .log_run(
                        &item.id,
                        &item.instruction,
                        RunStatus::Failed,
                        &truncate_output(&error.to_string(), MAX_RECORDED_OUTPUT),
                    )
                    .await?;
            }
        }

        Ok(())
    }
}
