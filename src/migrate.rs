use anyhow::Result;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Creates the metadata-store schema (collections + file registry).
pub async fn migrate_metadata(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            description TEXT NOT NULL DEFAULT '',
            creation_date INTEGER NOT NULL,
            owner TEXT NOT NULL,
            visibility TEXT NOT NULL DEFAULT 'private',
            embeddings_model TEXT NOT NULL DEFAULT '{}',
            vector_store_uuid TEXT NOT NULL DEFAULT ''
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS file_registry (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection_id INTEGER NOT NULL,
            original_filename TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_url TEXT NOT NULL DEFAULT '',
            file_size INTEGER NOT NULL DEFAULT 0,
            content_type TEXT NOT NULL DEFAULT 'text/plain',
            plugin_name TEXT NOT NULL,
            plugin_params TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'pending',
            document_count INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            owner TEXT NOT NULL,
            FOREIGN KEY (collection_id) REFERENCES collections(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_file_registry_collection ON file_registry(collection_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_file_registry_status ON file_registry(status)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Creates the vector-store schema (collections + embedded documents).
pub async fn migrate_vectors(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vs_collections (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS vs_documents (
            id TEXT PRIMARY KEY,
            collection_id TEXT NOT NULL,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            embedding BLOB NOT NULL,
            FOREIGN KEY (collection_id) REFERENCES vs_collections(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vs_documents_collection ON vs_documents(collection_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Opens both stores, applies their schemas, and closes the pools.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let metadata = db::connect_metadata(config).await?;
    migrate_metadata(&metadata).await?;
    metadata.close().await;

    let vectors = db::connect_vectors(config).await?;
    migrate_vectors(&vectors).await?;
    vectors.close().await;

    Ok(())
}

/// Outcome of database initialization, suitable for JSON output.
#[derive(Debug, Serialize)]
pub struct InitReport {
    pub metadata_initialized: bool,
    pub metadata_schema_valid: bool,
    pub vectors_initialized: bool,
    pub errors: Vec<String>,
}

impl InitReport {
    pub fn ok(&self) -> bool {
        self.metadata_initialized && self.metadata_schema_valid && self.vectors_initialized
    }
}

/// Initializes both stores and reports per-store success instead of failing
/// on the first error.
pub async fn init_databases(config: &Config) -> InitReport {
    let mut report = InitReport {
        metadata_initialized: false,
        metadata_schema_valid: false,
        vectors_initialized: false,
        errors: Vec::new(),
    };

    match db::connect_metadata(config).await {
        Ok(pool) => {
            match migrate_metadata(&pool).await {
                Ok(()) => report.metadata_initialized = true,
                Err(e) => report.errors.push(format!("metadata store: {e:#}")),
            }
            match metadata_schema_valid(&pool).await {
                Ok(valid) => {
                    report.metadata_schema_valid = valid;
                    if !valid {
                        report
                            .errors
                            .push("metadata store: schema check failed".to_string());
                    }
                }
                Err(e) => report.errors.push(format!("metadata store: {e:#}")),
            }
            pool.close().await;
        }
        Err(e) => report.errors.push(format!("metadata store: {e:#}")),
    }

    match db::connect_vectors(config).await {
        Ok(pool) => {
            match migrate_vectors(&pool).await {
                Ok(()) => report.vectors_initialized = true,
                Err(e) => report.errors.push(format!("vector store: {e:#}")),
            }
            pool.close().await;
        }
        Err(e) => report.errors.push(format!("vector store: {e:#}")),
    }

    report
}

async fn metadata_schema_valid(pool: &SqlitePool) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('collections', 'file_registry')",
    )
    .fetch_one(pool)
    .await?;
    Ok(count == 2)
}
