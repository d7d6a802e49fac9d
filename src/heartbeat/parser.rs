//! Markdown checklist parsing for heartbeat items.
//!
//! Source format, one item per checklist line. A checked box marks the
//! item active; clearing it retires the item without deleting the line:
//!
//! ```text
//! - [x] Summarize unread messages @every(30m)
//! - [x] Check the calendar for tomorrow @daily
//! - [ ] Old task that no longer runs
//! ```

use crate::heartbeat::{HeartbeatItem, HeartbeatSchedule};
use std::sync::LazyLock;

static ITEM_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"(?m)^\s*-\s*\[([ xX])\]\s*(.+)$").expect("item regex"));

static EVERY_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"@every\((\d+)([mhd])\)").expect("every regex"));

static CRON_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"@cron\(([^)]+)\)").expect("cron regex"));

const DEFAULT_INTERVAL_MINUTES: i64 = 60;

/// Parse the checklist source into items, in file order.
///
/// Schedule annotations are stripped from the instruction text. Lines
/// that are not checklist entries are ignored, so the file can carry
/// headers and prose around the list.
pub fn parse_source(source: &str) -> Vec<HeartbeatItem> {
    ITEM_RE
        .captures_iter(source)
        .enumerate()
        .filter_map(|(index, captures)| {
            let enabled = &captures[1] != " ";
            let raw = captures[2].trim();

            let (schedule, instruction) = extract_schedule(raw);
            // Collapse the gaps left by stripped annotations.
            let instruction = instruction.split_whitespace().collect::<Vec<_>>().join(" ");
            if instruction.is_empty() {
                return None;
            }

            Some(HeartbeatItem {
                id: format!("item-{}", index + 1),
                instruction,
                schedule,
                enabled,
            })
        })
        .collect()
}

/// Pull the first schedule annotation out of the line and remove every
/// annotation from the remaining text.
fn extract_schedule(raw: &str) -> (HeartbeatSchedule, String) {
    let schedule = if let Some(captures) = EVERY_RE.captures(raw) {
        let amount: i64 = captures[1].parse().unwrap_or(DEFAULT_INTERVAL_MINUTES);
        let minutes = match &captures[2] {
            "h" => amount * 60,
            "d" => amount * 60 * 24,
            _ => amount,
        };
        HeartbeatSchedule::EveryMinutes(minutes.max(1))
    } else if let Some(captures) = CRON_RE.captures(raw) {
        HeartbeatSchedule::Cron(captures[1].trim().to_string())
    } else if raw.contains("@hourly") {
        HeartbeatSchedule::EveryMinutes(60)
    } else if raw.contains("@daily") {
        HeartbeatSchedule::EveryMinutes(60 * 24)
    } else if raw.contains("@weekly") {
        HeartbeatSchedule::EveryMinutes(60 * 24 * 7)
    } else {
        HeartbeatSchedule::EveryMinutes(DEFAULT_INTERVAL_MINUTES)
    };

    let mut text = EVERY_RE.replace_all(raw, "").into_owned();
    text = CRON_RE.replace_all(&text, "").into_owned();
    for marker in ["@hourly", "@daily", "@weekly"] {
        text = text.replace(marker, "");
    }

    (schedule, text)
}
