//! Long-term memory: append-only fragments with lexical relevance search.

pub mod search;
pub mod store;

pub use store::MemoryStore;

use serde::{Deserialize, Serialize};

/// Closed category set used by the automatic classifier. Callers may also
/// supply free-form categories; these are just the known buckets.
pub const KNOWN_CATEGORIES: &[&str] = &[
    "personal",
    "entertainment",
    "shopping",
    "scheduling",
    "work",
    "health",
];

/// A small persisted fact, retrievable by lexical relevance search.
/// Content is never mutated after creation; remember/forget only insert
/// or delete whole fragments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub id: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    /// Caller-chosen grouping tag (e.g. "watchlist").
    pub key: Option<String>,
    pub category: Option<String>,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Input for inserting a fragment.
#[derive(Debug, Clone, Default)]
pub struct NewFragment {
    pub content: String,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    pub key: Option<String>,
    pub category: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl NewFragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}
