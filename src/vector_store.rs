//! Vector store abstraction and the built-in SQLite implementation.
//!
//! [`VectorStore`] is the seam where an external vector database plugs in.
//! The default [`SqliteVectorStore`] keeps one row per embedded chunk and
//! answers queries with a brute-force cosine scan; no index structures are
//! built. Query results carry cosine *distance* (`1 - similarity`), matching
//! the convention of hosted vector databases, so callers convert back with
//! `1.0 - distance`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};

/// A chunk to be inserted, with its embedding already computed.
#[derive(Debug, Clone)]
pub struct VectorDocument {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
}

/// A stored chunk, as returned by lookups.
#[derive(Debug, Clone)]
pub struct StoredDocument {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// A similarity-query result.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub text: String,
    pub metadata: serde_json::Value,
    pub distance: f64,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates a collection and returns its id.
    async fn create_collection(&self, name: &str, metadata: serde_json::Value) -> Result<String>;

    /// Recreates a collection under a previously issued id, keeping the
    /// metadata-store linkage intact.
    async fn restore_collection(
        &self,
        id: &str,
        name: &str,
        metadata: serde_json::Value,
    ) -> Result<()>;

    async fn delete_collection(&self, id: &str) -> Result<()>;

    /// Replaces a collection's stored metadata.
    async fn update_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<()>;

    async fn collection_exists(&self, id: &str) -> Result<bool>;

    /// Inserts documents into a collection.
    async fn add_documents(&self, collection_id: &str, documents: &[VectorDocument])
        -> Result<()>;

    /// Top-k nearest documents to `embedding`, ordered by ascending distance.
    async fn query(
        &self,
        collection_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>>;

    /// All documents whose metadata `field` equals `value`.
    async fn documents_by_field(
        &self,
        collection_id: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>>;

    /// Number of documents in a collection.
    async fn count(&self, collection_id: &str) -> Result<i64>;
}

/// Flat-scan vector store on a dedicated SQLite database.
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn create_collection(&self, name: &str, metadata: serde_json::Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.restore_collection(&id, name, metadata).await?;
        Ok(id)
    }

    async fn restore_collection(
        &self,
        id: &str,
        name: &str,
        metadata: serde_json::Value,
    ) -> Result<()> {
        sqlx::query("INSERT INTO vs_collections (id, name, metadata_json, created_at) VALUES (?, ?, ?, ?)")
            .bind(id)
            .bind(name)
            .bind(metadata.to_string())
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .with_context(|| format!("Failed to create vector collection '{}'", name))?;
        Ok(())
    }

    async fn delete_collection(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM vs_documents WHERE collection_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        sqlx::query("DELETE FROM vs_collections WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_metadata(&self, id: &str, metadata: serde_json::Value) -> Result<()> {
        sqlx::query("UPDATE vs_collections SET metadata_json = ? WHERE id = ?")
            .bind(metadata.to_string())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn collection_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vs_collections WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn add_documents(
        &self,
        collection_id: &str,
        documents: &[VectorDocument],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for doc in documents {
            sqlx::query(
                "INSERT INTO vs_documents (id, collection_id, text, metadata_json, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&doc.id)
            .bind(collection_id)
            .bind(&doc.text)
            .bind(doc.metadata.to_string())
            .bind(vec_to_blob(&doc.embedding))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection_id: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM vs_documents WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let blob: Vec<u8> = row.get("embedding");
            let candidate = blob_to_vec(&blob);
            let similarity = cosine_similarity(embedding, &candidate);
            hits.push(VectorHit {
                id: row.get("id"),
                text: row.get("text"),
                metadata: parse_metadata(row.get("metadata_json")),
                distance: 1.0 - similarity as f64,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        Ok(hits)
    }

    async fn documents_by_field(
        &self,
        collection_id: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<StoredDocument>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json FROM vs_documents WHERE collection_id = ?",
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;

        let mut matched = Vec::new();
        for row in rows {
            let metadata = parse_metadata(row.get("metadata_json"));
            if metadata.get(field).and_then(|v| v.as_str()) == Some(value) {
                matched.push(StoredDocument {
                    id: row.get("id"),
                    text: row.get("text"),
                    metadata,
                });
            }
        }

        Ok(matched)
    }

    async fn count(&self, collection_id: &str) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vs_documents WHERE collection_id = ?")
                .bind(collection_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

fn parse_metadata(raw: String) -> serde_json::Value {
    serde_json::from_str(&raw).unwrap_or(serde_json::Value::Null)
}
