//! Ranked lexical retrieval over memory fragments.
//!
//! The preferred path builds a prefix-matching FTS5 query (implicit AND
//! across terms) ranked by bm25. When the FTS index is unavailable the
//! store falls back to substring containment ordered by recency, a
//! strictly weaker approximation kept as a correctness fallback.

use crate::error::Result;
use crate::memory::store::{row_to_fragment, MemoryStore};
use crate::memory::MemoryFragment;
use anyhow::Context as _;

/// Tokenize a query into prefix terms: split on whitespace, strip every
/// character that is not a letter, digit, or underscore (Unicode-aware),
/// drop empty tokens.
pub fn prepare_terms(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Build the FTS5 match expression: each term becomes a quoted
/// starts-with query, joined by spaces for implicit AND.
pub fn fts_match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|term| format!("\"{term}\"*"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl MemoryStore {
    /// Retrieve fragments relevant to `query`, most relevant first.
    ///
    /// Optional user and category filters are applied before the limit.
    /// A query with no usable terms returns an empty list rather than
    /// matching everything.
    pub async fn get_relevant(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<MemoryFragment>> {
        let terms = prepare_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        if self.fts_available() {
            self.search_indexed(&terms, user_id, limit, category).await
        } else {
            self.search_fallback(query, user_id, limit, category).await
        }
    }

    /// Indexed path: prefix terms over content + key, bm25-ranked
    /// (lower scores sort first).
    async fn search_indexed(
        &self,
        terms: &[String],
        user_id: Option<&str>,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<MemoryFragment>> {
        let match_expression = fts_match_expression(terms);

        let mut sql = String::from(
            "SELECT m.id, m.user_id, m.conversation_id, m.key, m.category, m.content, m.metadata, m.created_at \
             FROM memory_fragments_fts f \
             JOIN memory_fragments m ON m.rowid = f.rowid \
             WHERE memory_fragments_fts MATCH ?",
        );
        if category.is_some() {
            sql.push_str(" AND m.category = ?");
        }
        if user_id.is_some() {
            sql.push_str(" AND m.user_id = ?");
        }
        sql.push_str(" ORDER BY f.rank LIMIT ?");

        let mut query = sqlx::query(&sql).bind(&match_expression);
        if let Some(category) = category {
            query = query.bind(category);
        }
        if let Some(user) = user_id {
            query = query.bind(user);
        }

        let rows = query
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .with_context(|| format!("memory search failed for '{match_expression}'"))?;

        Ok(rows.iter().map(row_to_fragment).collect())
    }

    /// Fallback path: substring containment over content, newest first.
    pub(crate) async fn search_fallback(
        &self,
        raw_query: &str,
        user_id: Option<&str>,
        limit: i64,
        category: Option<&str>,
    ) -> Result<Vec<MemoryFragment>> {
        let pattern = format!("%{}%", raw_query.trim());

        let mut sql = String::from(
            "SELECT id, user_id, conversation_id, key, category, content, metadata, created_at \
             FROM memory_fragments WHERE content LIKE ?",
        );
        if category.is_some() {
            sql.push_str(" AND category = ?");
        }
        if user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ?");

        let mut query = sqlx::query(&sql).bind(&pattern);
        if let Some(category) = category {
            query = query.bind(category);
        }
        if let Some(user) = user_id {
            query = query.bind(user);
        }

        let rows = query
            .bind(limit)
            .fetch_all(self.pool())
            .await
            .context("memory fallback search failed")?;

        Ok(rows.iter().map(row_to_fragment).collect())
    }
}

/// Format fragments as the bulleted context block injected into prompts.
pub fn format_memory_context(fragments: &[MemoryFragment]) -> String {
    if fragments.is_empty() {
        return String::new();
    }

    let mut block = String::from("Relevant things you remember about this user:\n");
    for fragment in fragments {
        match &fragment.category {
            Some(category) => {
                block.push_str(&format!("- [{}] {}\n", category, fragment.content));
            }
            None => {
                block.push_str(&format!("- {}\n", fragment.content));
            }
        }
    }
    block
}
