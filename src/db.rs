//! SQLite connection setup.

use crate::error::Result;
use anyhow::Context as _;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr as _;

/// Open (creating if needed) the SQLite pool backing all stores.
///
/// Schema initialization is owned by the individual stores; each issues its
/// own `CREATE TABLE IF NOT EXISTS` DDL in `initialize()`.
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))
        .context("invalid sqlite path")?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

    Ok(pool)
}

/// In-memory pool for tests.
#[cfg(test)]
pub async fn connect_in_memory() -> SqlitePool {
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite should connect")
}
