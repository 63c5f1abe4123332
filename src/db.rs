use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Opens the relational metadata store (collections, file registry).
pub async fn connect_metadata(config: &Config) -> Result<SqlitePool> {
    open_pool(&config.store.metadata_db).await
}

/// Opens the vector store database.
pub async fn connect_vectors(config: &Config) -> Result<SqlitePool> {
    open_pool(&config.store.vector_db).await
}

async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
