//! Background ingestion.
//!
//! Mirrors the foreground pipeline but runs it on a spawned task so callers
//! get the registry id back immediately and poll the file's status for
//! completion. The task reports failures through the registry row (status
//! `failed`) and stderr; it never takes the process down.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::file_registry::{self, NewFileRecord};
use crate::ingestion;
use crate::models::FileRecord;
use crate::plugin::PluginRegistry;
use crate::progress::NoProgress;
use crate::vector_store::VectorStore;

/// Registers a file (status `pending`) and spawns its ingestion.
///
/// Returns the fresh registry row and the join handle. The handle is mainly
/// useful for tests and orderly shutdown; production callers can drop it
/// and watch the row's status instead.
pub async fn schedule_ingestion(
    pool: SqlitePool,
    store: Arc<dyn VectorStore>,
    registry: Arc<PluginRegistry>,
    new: NewFileRecord,
) -> Result<(FileRecord, JoinHandle<()>)> {
    let record = file_registry::register_file(&pool, new).await?;
    let record_id = record.id;

    let handle = tokio::spawn(async move {
        let outcome = ingestion::run_ingestion(
            &pool,
            store.as_ref(),
            registry.as_ref(),
            record_id,
            &NoProgress,
        )
        .await;
        if let Err(e) = outcome {
            eprintln!(
                "Background ingestion failed for file {}: {:#}",
                record_id, e
            );
        }
    });

    Ok((record, handle))
}
