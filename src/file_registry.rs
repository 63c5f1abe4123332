//! File registry: every ingested file gets a row tracking where it was
//! stored, which plugin handled it, and how far through the pipeline it got.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::collections::get_collection;
use crate::models::{FileRecord, FileStatus};
use crate::vector_store::VectorStore;

const FILE_COLUMNS: &str = "id, collection_id, original_filename, file_path, file_url, file_size, \
     content_type, plugin_name, plugin_params, status, document_count, created_at, updated_at, owner";

/// Fields captured when a file enters the registry.
#[derive(Debug, Clone)]
pub struct NewFileRecord {
    pub collection_id: i64,
    pub original_filename: String,
    pub file_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub content_type: String,
    pub plugin_name: String,
    pub plugin_params: serde_json::Value,
    pub owner: String,
}

/// Inserts a registry row with status `pending`.
pub async fn register_file(pool: &SqlitePool, new: NewFileRecord) -> Result<FileRecord> {
    let now = Utc::now().timestamp();
    let result = sqlx::query(
        "INSERT INTO file_registry \
         (collection_id, original_filename, file_path, file_url, file_size, content_type, \
          plugin_name, plugin_params, status, document_count, created_at, updated_at, owner) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?, ?)",
    )
    .bind(new.collection_id)
    .bind(&new.original_filename)
    .bind(&new.file_path)
    .bind(&new.file_url)
    .bind(new.file_size)
    .bind(&new.content_type)
    .bind(&new.plugin_name)
    .bind(new.plugin_params.to_string())
    .bind(FileStatus::Pending.as_str())
    .bind(now)
    .bind(now)
    .bind(&new.owner)
    .execute(pool)
    .await?;

    get_file(pool, result.last_insert_rowid()).await
}

pub async fn get_file(pool: &SqlitePool, id: i64) -> Result<FileRecord> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM file_registry WHERE id = ?",
        FILE_COLUMNS
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => file_from_row(&row),
        None => bail!("File not found: {}", id),
    }
}

/// Files registered in a collection, optionally filtered by status, newest
/// first.
pub async fn list_files(
    pool: &SqlitePool,
    collection_id: i64,
    status: Option<FileStatus>,
) -> Result<Vec<FileRecord>> {
    let rows = match status {
        Some(status) => {
            sqlx::query(&format!(
                "SELECT {} FROM file_registry WHERE collection_id = ? AND status = ? ORDER BY id DESC",
                FILE_COLUMNS
            ))
            .bind(collection_id)
            .bind(status.as_str())
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "SELECT {} FROM file_registry WHERE collection_id = ? ORDER BY id DESC",
                FILE_COLUMNS
            ))
            .bind(collection_id)
            .fetch_all(pool)
            .await?
        }
    };

    rows.iter().map(file_from_row).collect()
}

/// Sets a file's status directly, advancing `updated_at`. This is the
/// administrative path (e.g. soft delete, retry via `failed -> pending`);
/// the pipeline goes through [`claim_for_processing`] and the `mark_*`
/// functions, which check transitions.
pub async fn update_file_status(
    pool: &SqlitePool,
    id: i64,
    status: FileStatus,
) -> Result<FileRecord> {
    let result = sqlx::query("UPDATE file_registry SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        bail!("File not found: {}", id);
    }
    get_file(pool, id).await
}

/// Moves a `pending` file to `processing` for the ingestion pipeline.
pub async fn claim_for_processing(pool: &SqlitePool, id: i64) -> Result<FileRecord> {
    let record = get_file(pool, id).await?;
    if !record.status.can_transition(FileStatus::Processing) {
        bail!(
            "Cannot move file {} from '{}' to 'processing'",
            id,
            record.status.as_str()
        );
    }
    update_file_status(pool, id, FileStatus::Processing).await
}

/// Marks a processed file `completed` and stores how many chunks it yielded.
pub async fn mark_completed(pool: &SqlitePool, id: i64, document_count: i64) -> Result<FileRecord> {
    let record = get_file(pool, id).await?;
    if !record.status.can_transition(FileStatus::Completed) {
        bail!(
            "Cannot move file {} from '{}' to 'completed'",
            id,
            record.status.as_str()
        );
    }
    sqlx::query(
        "UPDATE file_registry SET status = ?, document_count = ?, updated_at = ? WHERE id = ?",
    )
    .bind(FileStatus::Completed.as_str())
    .bind(document_count)
    .bind(Utc::now().timestamp())
    .bind(id)
    .execute(pool)
    .await?;
    get_file(pool, id).await
}

/// Marks a file `failed`. Runs in error paths, so its own failures are
/// reported rather than propagated.
pub async fn mark_failed(pool: &SqlitePool, id: i64) {
    if let Err(e) = update_file_status(pool, id, FileStatus::Failed).await {
        eprintln!("Warning: failed to mark file {} as failed: {:#}", id, e);
    }
}

/// A document reconstructed from its stored chunks.
#[derive(Debug, Clone)]
pub struct FileContent {
    pub record: FileRecord,
    pub content: String,
    pub content_type: String,
    pub chunk_count: usize,
}

/// Rebuilds a file's text from the vector store.
///
/// Chunks are matched by metadata `source` equal to the stored path, with a
/// fallback to `filename` for chunks whose `source` is not a path (URL
/// ingests record the page URL there), then ordered by `chunk_index` and
/// joined with newlines.
pub async fn file_content(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    file_id: i64,
) -> Result<FileContent> {
    let record = get_file(pool, file_id).await?;
    let collection = get_collection(pool, record.collection_id)
        .await
        .with_context(|| format!("File {} belongs to a missing collection", file_id))?;

    let mut docs = store
        .documents_by_field(&collection.vector_store_uuid, "source", &record.file_path)
        .await?;
    if docs.is_empty() {
        docs = store
            .documents_by_field(
                &collection.vector_store_uuid,
                "filename",
                &record.original_filename,
            )
            .await?;
    }
    if docs.is_empty() {
        bail!("No stored content found for file {}", file_id);
    }

    docs.sort_by_key(|d| d.metadata.get("chunk_index").and_then(|v| v.as_i64()).unwrap_or(0));
    let chunk_count = docs.len();
    let content = docs
        .into_iter()
        .map(|d| d.text)
        .collect::<Vec<_>>()
        .join("\n");

    let content_type = content_type_for(&record);
    Ok(FileContent {
        record,
        content,
        content_type,
        chunk_count,
    })
}

fn content_type_for(record: &FileRecord) -> String {
    let name = record.original_filename.to_lowercase();
    if record.file_url.starts_with("http://") || record.file_url.starts_with("https://") {
        "text/html".to_string()
    } else if name.ends_with(".md") {
        "text/markdown".to_string()
    } else {
        "text/plain".to_string()
    }
}

fn file_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileRecord> {
    let status: String = row.get("status");
    Ok(FileRecord {
        id: row.get("id"),
        collection_id: row.get("collection_id"),
        original_filename: row.get("original_filename"),
        file_path: row.get("file_path"),
        file_url: row.get("file_url"),
        file_size: row.get("file_size"),
        content_type: row.get("content_type"),
        plugin_name: row.get("plugin_name"),
        plugin_params: row.get("plugin_params"),
        status: FileStatus::parse(&status)?,
        document_count: row.get("document_count"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        owner: row.get("owner"),
    })
}
