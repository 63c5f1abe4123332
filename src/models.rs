//! Core data models used throughout Corpus Keeper.
//!
//! These types represent collections, registered files, and the document
//! chunks and query hits that flow through the ingestion and query pipeline.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingsDefaults;

/// Who can see a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => anyhow::bail!(
                "Invalid visibility: '{}'. Must be 'private' or 'public'.",
                other
            ),
        }
    }
}

/// Lifecycle state of a registered file.
///
/// Files are registered as `pending`, claimed by the ingestion task as
/// `processing`, and finish as `completed` or `failed`. `deleted` is a soft
/// delete reachable from any live state, and `failed` files may be reset to
/// `pending` for a retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Deleted,
}

impl FileStatus {
    pub const ALL: [FileStatus; 5] = [
        FileStatus::Pending,
        FileStatus::Processing,
        FileStatus::Completed,
        FileStatus::Failed,
        FileStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
            FileStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            "deleted" => Ok(FileStatus::Deleted),
            other => anyhow::bail!(
                "Invalid status: '{}'. Must be one of: pending, processing, completed, failed, deleted.",
                other
            ),
        }
    }

    /// Whether the pipeline may move a file from `self` to `to`.
    pub fn can_transition(&self, to: FileStatus) -> bool {
        use FileStatus::*;
        match (self, to) {
            (Pending, Processing) => true,
            (Processing, Completed) | (Processing, Failed) => true,
            (Failed, Pending) => true,
            (Deleted, _) => false,
            (_, Deleted) => true,
            _ => false,
        }
    }
}

/// Embeddings configuration attached to a collection, stored as JSON.
///
/// Any field may be the literal `"default"`, which resolves from the
/// environment and then the server config at collection creation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmbeddingsModel {
    pub model: String,
    pub vendor: String,
    pub endpoint: String,
    pub apikey: String,
}

impl EmbeddingsModel {
    /// All fields set to the `"default"` sentinel.
    pub fn sentinel() -> Self {
        Self {
            model: "default".to_string(),
            vendor: "default".to_string(),
            endpoint: "default".to_string(),
            apikey: "default".to_string(),
        }
    }

    /// Replaces `"default"` fields from the environment and then `defaults`.
    pub fn resolved(&self, defaults: &EmbeddingsDefaults) -> Result<EmbeddingsModel> {
        let resolved = EmbeddingsModel {
            model: resolve_field(&self.model, "EMBEDDINGS_MODEL", &defaults.model),
            vendor: resolve_field(&self.vendor, "EMBEDDINGS_VENDOR", &defaults.vendor),
            endpoint: resolve_field(&self.endpoint, "EMBEDDINGS_ENDPOINT", &defaults.endpoint),
            apikey: resolve_field(&self.apikey, "EMBEDDINGS_APIKEY", &defaults.apikey),
        };

        for (field, value) in [
            ("vendor", &resolved.vendor),
            ("model", &resolved.model),
            ("endpoint", &resolved.endpoint),
        ] {
            if value.is_empty() {
                anyhow::bail!("Default embeddings {} is not configured", field);
            }
        }

        Ok(resolved)
    }
}

fn resolve_field(value: &str, env_var: &str, fallback: &str) -> String {
    if value != "default" {
        return value.to_string();
    }
    match std::env::var(env_var) {
        Ok(v) if !v.is_empty() => v,
        _ => fallback.to_string(),
    }
}

/// A document collection, backed by a metadata row and a vector-store
/// collection linked through `vector_store_uuid`.
#[derive(Debug, Clone)]
pub struct Collection {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub creation_date: i64,
    pub owner: String,
    pub visibility: Visibility,
    pub embeddings_model: EmbeddingsModel,
    pub vector_store_uuid: String,
}

impl Collection {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "name": self.name,
            "description": self.description,
            "creation_date": format_ts_iso(self.creation_date),
            "owner": self.owner,
            "visibility": self.visibility.as_str(),
            "embeddings_model": self.embeddings_model,
            "vector_store_uuid": self.vector_store_uuid,
        })
    }
}

/// A file registered for ingestion into a collection.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: i64,
    pub collection_id: i64,
    pub original_filename: String,
    pub file_path: String,
    pub file_url: String,
    pub file_size: i64,
    pub content_type: String,
    pub plugin_name: String,
    pub plugin_params: String,
    pub status: FileStatus,
    pub document_count: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub owner: String,
}

impl FileRecord {
    pub fn to_json(&self) -> serde_json::Value {
        let params: serde_json::Value =
            serde_json::from_str(&self.plugin_params).unwrap_or(serde_json::Value::Null);
        serde_json::json!({
            "id": self.id,
            "collection_id": self.collection_id,
            "original_filename": self.original_filename,
            "file_path": self.file_path,
            "file_url": self.file_url,
            "file_size": self.file_size,
            "content_type": self.content_type,
            "plugin_name": self.plugin_name,
            "plugin_params": params,
            "status": self.status.as_str(),
            "document_count": self.document_count,
            "created_at": format_ts_iso(self.created_at),
            "updated_at": format_ts_iso(self.updated_at),
            "owner": self.owner,
        })
    }
}

/// A chunk of document text produced by an ingest plugin.
#[derive(Debug, Clone)]
pub struct IngestedDocument {
    pub text: String,
    pub metadata: serde_json::Value,
}

/// A single hit returned by a query plugin.
#[derive(Debug, Clone, Serialize)]
pub struct QueryHit {
    pub similarity: f64,
    pub data: String,
    pub metadata: serde_json::Value,
}

pub fn format_ts_iso(ts: i64) -> String {
    DateTime::<Utc>::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}
