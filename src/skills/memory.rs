//! Memory skills: remember, recall, forget.
//!
//! De-duplication and category auto-detection live here, on top of the
//! store's pure insert.

use crate::memory::search::format_memory_context;
use crate::memory::{MemoryStore, NewFragment};
use crate::security::ActionClass;
use crate::skills::Skill;
use anyhow::anyhow;
use futures::FutureExt as _;
use std::sync::Arc;

/// Keyword buckets for automatic categorization when the model doesn't
/// supply a category. First bucket with a hit wins; no hit means
/// "personal".
const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "entertainment",
        &["watch", "movie", "show", "series", "music", "playlist", "game"],
    ),
    (
        "shopping",
        &["buy", "shopping", "order", "purchase", "groceries"],
    ),
    (
        "scheduling",
        &["remind", "schedule", "meeting", "appointment", "calendar"],
    ),
    (
        "health",
        &["doctor", "allergic", "allergy", "medication", "workout", "sleep"],
    ),
    ("work", &["work", "project", "deadline", "client", "invoice"]),
];

pub fn detect_category(content: &str) -> &'static str {
    let lowered = content.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lowered.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or("personal")
}

pub fn remember(memory: Arc<MemoryStore>) -> Skill {
    Skill::new(
        "remember",
        "Save a fact about the user for later recall. Use for durable \
         preferences and details, not transient chat.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "content": {
                    "type": "string",
                    "description": "The fact to remember, phrased in third person"
                },
                "category": {
                    "type": "string",
                    "description": "Optional bucket: personal, entertainment, shopping, scheduling, work, health"
                },
                "key": {
                    "type": "string",
                    "description": "Optional grouping tag for later forget-by-key"
                }
            },
            "required": ["content"],
        }),
        ActionClass::Write,
        Arc::new(move |ctx, args| {
            let memory = memory.clone();
            async move {
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| anyhow!("missing 'content' argument"))?;

                if memory.has_identical(content, ctx.user_id.as_deref()).await? {
                    return Ok("Already remembered.".to_string());
                }

                let category = args
                    .get("category")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| detect_category(content).to_string());

                memory
                    .remember(NewFragment {
                        content: content.to_string(),
                        user_id: ctx.user_id.clone(),
                        conversation_id: ctx.conversation_id.clone(),
                        key: args.get("key").and_then(|v| v.as_str()).map(str::to_string),
                        category: Some(category.clone()),
                        metadata: None,
                    })
                    .await?;

                Ok(format!("Remembered under '{category}'."))
            }
            .boxed()
        }),
    )
}

pub fn recall(memory: Arc<MemoryStore>) -> Skill {
    Skill::new(
        "recall",
        "Search remembered facts about the user.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "What to search for"
                },
                "category": {
                    "type": "string",
                    "description": "Optional category filter"
                }
            },
            "required": ["query"],
        }),
        ActionClass::Read,
        Arc::new(move |ctx, args| {
            let memory = memory.clone();
            async move {
                let query = args
                    .get("query")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'query' argument"))?;
                let category = args.get("category").and_then(|v| v.as_str());

                let fragments = memory
                    .get_relevant(query, ctx.user_id.as_deref(), 10, category)
                    .await?;

                if fragments.is_empty() {
                    Ok("Nothing relevant remembered.".to_string())
                } else {
                    Ok(format_memory_context(&fragments))
                }
            }
            .boxed()
        }),
    )
}

pub fn forget(memory: Arc<MemoryStore>) -> Skill {
    Skill::new(
        "forget",
        "Delete all remembered facts stored under a key.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "key": {
                    "type": "string",
                    "description": "The grouping tag whose facts should be deleted"
                }
            },
            "required": ["key"],
        }),
        ActionClass::Write,
        Arc::new(move |ctx, args| {
            let memory = memory.clone();
            async move {
                let key = args
                    .get("key")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| anyhow!("missing 'key' argument"))?;

                let deleted = memory.forget(key, ctx.user_id.as_deref()).await?;
                Ok(format!("Forgot {deleted} item(s) under '{key}'."))
            }
            .boxed()
        }),
    )
}
