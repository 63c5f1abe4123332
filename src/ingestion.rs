//! Ingestion service: stores uploads, registers them, runs ingest plugins,
//! and writes embedded chunks to the vector store.
//!
//! The full flow for one file is register → claim → plugin → embed → store,
//! with the registry row tracking how far it got. [`run_ingestion`] drives
//! the whole pipeline for an already-registered file; the `register_*`
//! functions cover the two entry points (file upload, URL list).

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::collections::{self, get_collection};
use crate::embedding::create_provider;
use crate::file_registry::{self, NewFileRecord};
use crate::models::{Collection, FileRecord, IngestedDocument};
use crate::plugin::{file_extension, validate_params, PluginRegistry};
use crate::progress::{IngestProgressEvent, IngestProgressReporter};
use crate::vector_store::{VectorDocument, VectorStore};

/// Chunks are embedded and written to the vector store in batches this size.
pub const INGEST_BATCH_SIZE: usize = 5;

/// Where a source file ended up after [`save_upload`].
#[derive(Debug, Clone)]
pub struct SavedUpload {
    pub file_path: PathBuf,
    pub file_url: String,
    pub original_filename: String,
    pub file_size: i64,
}

/// Copies a source file into the collection's storage directory under a
/// fresh uuid-based name, keeping the original extension.
pub fn save_upload(
    storage_root: &Path,
    owner: &str,
    collection_name: &str,
    source: &Path,
) -> Result<SavedUpload> {
    let original_filename = source
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid file name: {}", source.display()))?;

    let dir = storage_root.join(owner).join(collection_name);
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create storage directory: {}", dir.display()))?;

    let stored_name = match file_extension(&original_filename) {
        Some(ext) => format!("{}.{}", Uuid::new_v4().simple(), ext),
        None => Uuid::new_v4().simple().to_string(),
    };
    let dest = dir.join(stored_name);
    std::fs::copy(source, &dest).with_context(|| {
        format!(
            "Failed to copy {} to {}",
            source.display(),
            dest.display()
        )
    })?;
    let file_size = std::fs::metadata(&dest).map(|m| m.len() as i64).unwrap_or(0);

    Ok(SavedUpload {
        file_url: format!("file://{}", dest.display()),
        file_path: dest,
        original_filename,
        file_size,
    })
}

/// Stores a file and builds its registry entry without touching the
/// database.
///
/// The plugin must exist and `params` must pass its spec before anything is
/// written; the validated params (with defaults injected) are what gets
/// persisted.
pub fn prepare_file_ingestion(
    registry: &PluginRegistry,
    storage_root: &Path,
    collection: &Collection,
    source: &Path,
    plugin_name: &str,
    params: &Value,
) -> Result<NewFileRecord> {
    let plugin = registry
        .find_ingest(plugin_name)
        .ok_or_else(|| anyhow::anyhow!("Ingest plugin not found: '{}'", plugin_name))?;
    let validated = validate_params(&plugin.parameters(), params)?;

    let saved = save_upload(storage_root, &collection.owner, &collection.name, source)?;
    let content_type = mime_for_filename(&saved.original_filename);

    Ok(NewFileRecord {
        collection_id: collection.id,
        original_filename: saved.original_filename,
        file_path: saved.file_path.display().to_string(),
        file_url: saved.file_url,
        file_size: saved.file_size,
        content_type,
        plugin_name: plugin_name.to_string(),
        plugin_params: validated,
        owner: collection.owner.clone(),
    })
}

/// Stores a file and registers it for ingestion (status `pending`).
pub async fn register_file_ingestion(
    pool: &SqlitePool,
    registry: &PluginRegistry,
    storage_root: &Path,
    collection: &Collection,
    source: &Path,
    plugin_name: &str,
    params: &Value,
) -> Result<FileRecord> {
    let new = prepare_file_ingestion(
        registry,
        storage_root,
        collection,
        source,
        plugin_name,
        params,
    )?;
    file_registry::register_file(pool, new).await
}

/// Builds the registry entry for a URL list without touching the database.
///
/// A tracking file listing the URLs is written to the system temp dir; the
/// registry row points at it, with the first URL standing in for the
/// original filename.
pub fn prepare_url_ingestion(
    registry: &PluginRegistry,
    collection: &Collection,
    urls: &[String],
    params: &Value,
) -> Result<NewFileRecord> {
    if urls.is_empty() {
        bail!("No URLs provided");
    }
    let plugin = registry
        .find_ingest("url_ingest")
        .ok_or_else(|| anyhow::anyhow!("Ingest plugin not found: 'url_ingest'"))?;

    let mut full_params = params.as_object().cloned().unwrap_or_default();
    full_params.insert("urls".to_string(), serde_json::json!(urls));
    let validated = validate_params(&plugin.parameters(), &Value::Object(full_params))?;

    let tracking_path = stage_url_tracking_file(urls)?;
    let first_url = urls[0].clone();

    Ok(NewFileRecord {
        collection_id: collection.id,
        original_filename: first_url.clone(),
        file_path: tracking_path.display().to_string(),
        file_url: first_url,
        file_size: 0,
        content_type: "text/plain".to_string(),
        plugin_name: "url_ingest".to_string(),
        plugin_params: validated,
        owner: collection.owner.clone(),
    })
}

/// Registers a URL list for ingestion (status `pending`).
pub async fn register_url_ingestion(
    pool: &SqlitePool,
    registry: &PluginRegistry,
    collection: &Collection,
    urls: &[String],
    params: &Value,
) -> Result<FileRecord> {
    let new = prepare_url_ingestion(registry, collection, urls, params)?;
    file_registry::register_file(pool, new).await
}

fn stage_url_tracking_file(urls: &[String]) -> Result<PathBuf> {
    let dir = std::env::temp_dir().join("url_ingestion");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create tracking directory: {}", dir.display()))?;
    let path = dir.join(format!("{}.url", Uuid::new_v4().simple()));
    std::fs::write(&path, urls.join("\n"))
        .with_context(|| format!("Failed to write tracking file: {}", path.display()))?;
    Ok(path)
}

/// Runs the named ingest plugin over a stored file.
///
/// Params are validated against the plugin spec first; `file_url` is
/// injected afterwards so plugins can record where the file came from
/// without it appearing in their public parameter spec.
pub async fn run_plugin(
    registry: &PluginRegistry,
    plugin_name: &str,
    file_path: &Path,
    params: &Value,
    file_url: &str,
) -> Result<Vec<IngestedDocument>> {
    let plugin = registry
        .find_ingest(plugin_name)
        .ok_or_else(|| anyhow::anyhow!("Ingest plugin not found: '{}'", plugin_name))?;

    let mut validated = validate_params(&plugin.parameters(), params)?;
    if let Some(map) = validated.as_object_mut() {
        map.insert("file_url".to_string(), serde_json::json!(file_url));
    }

    plugin.ingest(file_path, &validated).await
}

/// Embeds chunks and writes them to the vector store in batches.
///
/// Each chunk gets a fresh `document_id` (uuid4 hex) and the shared
/// `ingestion_timestamp` added to its metadata. If the vector-store
/// collection has vanished it is recreated under its recorded uuid first.
/// Returns the number of chunks written.
pub async fn add_documents(
    store: &dyn VectorStore,
    collection: &Collection,
    documents: &[IngestedDocument],
    progress: &dyn IngestProgressReporter,
    file_label: &str,
) -> Result<usize> {
    if documents.is_empty() {
        return Ok(0);
    }
    if collection.vector_store_uuid.is_empty() {
        bail!(
            "Collection '{}' has no vector store collection",
            collection.name
        );
    }

    if !store.collection_exists(&collection.vector_store_uuid).await? {
        store
            .restore_collection(
                &collection.vector_store_uuid,
                &collection.name,
                collections::vector_metadata(collection),
            )
            .await
            .with_context(|| {
                format!(
                    "Failed to recreate vector store collection for '{}'",
                    collection.name
                )
            })?;
    }

    let provider = create_provider(&collection.embeddings_model)?;
    let timestamp = Utc::now().to_rfc3339();
    let total = documents.len() as u64;
    let mut added = 0usize;

    for batch in documents.chunks(INGEST_BATCH_SIZE) {
        progress.report(IngestProgressEvent::Embedding {
            file: file_label.to_string(),
            n: added as u64,
            total,
        });
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
        let embeddings = provider.embed(&texts).await?;
        if embeddings.len() != batch.len() {
            bail!(
                "Embedding count mismatch: got {}, expected {}",
                embeddings.len(),
                batch.len()
            );
        }

        let vector_docs: Vec<VectorDocument> = batch
            .iter()
            .zip(embeddings)
            .map(|(doc, embedding)| {
                let id = Uuid::new_v4().simple().to_string();
                let mut metadata = doc.metadata.clone();
                if let Some(map) = metadata.as_object_mut() {
                    map.insert("document_id".to_string(), serde_json::json!(id));
                    map.insert(
                        "ingestion_timestamp".to_string(),
                        serde_json::json!(timestamp),
                    );
                }
                VectorDocument {
                    id,
                    text: doc.text.clone(),
                    metadata,
                    embedding,
                }
            })
            .collect();

        progress.report(IngestProgressEvent::Storing {
            file: file_label.to_string(),
            n: added as u64,
            total,
        });
        store
            .add_documents(&collection.vector_store_uuid, &vector_docs)
            .await?;
        added += batch.len();
    }

    progress.report(IngestProgressEvent::Storing {
        file: file_label.to_string(),
        n: added as u64,
        total,
    });

    Ok(added)
}

/// Plugin → embed → store for one claimed file. Returns the chunk count.
async fn process_file(
    registry: &PluginRegistry,
    store: &dyn VectorStore,
    collection: &Collection,
    record: &FileRecord,
    progress: &dyn IngestProgressReporter,
) -> Result<usize> {
    let params: Value =
        serde_json::from_str(&record.plugin_params).unwrap_or_else(|_| serde_json::json!({}));

    progress.report(IngestProgressEvent::Extracting {
        file: record.original_filename.clone(),
    });
    let documents = run_plugin(
        registry,
        &record.plugin_name,
        Path::new(&record.file_path),
        &params,
        &record.file_url,
    )
    .await?;

    add_documents(
        store,
        collection,
        &documents,
        progress,
        &record.original_filename,
    )
    .await
}

/// Drives the full pipeline for a registered file: claim it, run its
/// plugin, store the chunks, and record the outcome on the registry row.
pub async fn run_ingestion(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    registry: &PluginRegistry,
    record_id: i64,
    progress: &dyn IngestProgressReporter,
) -> Result<FileRecord> {
    let record = file_registry::claim_for_processing(pool, record_id).await?;
    let collection = get_collection(pool, record.collection_id).await?;

    match process_file(registry, store, &collection, &record, progress).await {
        Ok(count) => file_registry::mark_completed(pool, record_id, count as i64).await,
        Err(e) => {
            file_registry::mark_failed(pool, record_id).await;
            Err(e.context(format!(
                "Ingestion failed for file {} ({})",
                record_id, record.original_filename
            )))
        }
    }
}

fn mime_for_filename(filename: &str) -> String {
    match file_extension(filename).as_deref() {
        Some("txt") => "text/plain",
        Some("md") => "text/markdown",
        Some("pdf") => "application/pdf",
        Some("docx") => {
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
        }
        Some("pptx") => {
            "application/vnd.openxmlformats-officedocument.presentationml.presentation"
        }
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    }
    .to_string()
}
