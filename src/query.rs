//! Query service: resolves the collection, dispatches to a query plugin,
//! and wraps the results in a timed answer envelope.

use anyhow::{bail, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Instant;

use crate::collections::get_collection;
use crate::models::QueryHit;
use crate::plugin::{validate_params, PluginContext, PluginRegistry};
use crate::vector_store::VectorStore;

/// Wall-clock cost of answering a query.
#[derive(Debug, Clone, Serialize)]
pub struct QueryTiming {
    pub total_seconds: f64,
    pub total_ms: f64,
}

/// A complete query answer: hits, count, timing, and the echoed query text.
#[derive(Debug, Clone, Serialize)]
pub struct QueryAnswer {
    pub results: Vec<QueryHit>,
    pub count: usize,
    pub timing: QueryTiming,
    pub query: String,
}

/// Answers a query against one collection.
///
/// The collection must exist in both stores; a metadata row whose vector
/// collection has vanished is reported as such rather than returning an
/// empty answer.
pub async fn run_query(
    pool: &SqlitePool,
    store: Arc<dyn VectorStore>,
    registry: &PluginRegistry,
    collection_id: i64,
    query_text: &str,
    plugin_name: &str,
    params: &Value,
) -> Result<QueryAnswer> {
    let started = Instant::now();

    let collection = get_collection(pool, collection_id).await?;
    let vector_side_ok = !collection.vector_store_uuid.is_empty()
        && store.collection_exists(&collection.vector_store_uuid).await?;
    if !vector_side_ok {
        bail!(
            "Collection '{}' exists in the metadata store but not in the vector store. \
             Please recreate the collection.",
            collection.name
        );
    }

    let plugin = registry
        .find_query(plugin_name)
        .ok_or_else(|| anyhow::anyhow!("Query plugin not found: '{}'", plugin_name))?;
    let validated = validate_params(&plugin.parameters(), params)?;

    let ctx = PluginContext::new(store);
    let results = plugin.query(&ctx, &collection, query_text, &validated).await?;

    let elapsed = started.elapsed();
    Ok(QueryAnswer {
        count: results.len(),
        results,
        timing: QueryTiming {
            total_seconds: elapsed.as_secs_f64(),
            total_ms: elapsed.as_secs_f64() * 1000.0,
        },
        query: query_text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Collection;
    use crate::plugin::QueryPlugin;
    use crate::vector_store::SqliteVectorStore;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn setup(vector_uuid_exists: bool) -> (SqlitePool, Arc<dyn VectorStore>, i64) {
        let pool = memory_pool().await;
        crate::migrate::migrate_metadata(&pool).await.unwrap();
        let vectors = memory_pool().await;
        crate::migrate::migrate_vectors(&vectors).await.unwrap();
        let store = SqliteVectorStore::new(vectors);

        let uuid = if vector_uuid_exists {
            store
                .create_collection("docs", serde_json::json!({}))
                .await
                .unwrap()
        } else {
            "gone".to_string()
        };
        let result = sqlx::query(
            "INSERT INTO collections (name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid) \
             VALUES ('docs', '', 0, 'alice', 'private', ?, ?)",
        )
        .bind(r#"{"model":"m","vendor":"ollama","endpoint":"http://localhost:1/api/embed","apikey":""}"#)
        .bind(&uuid)
        .execute(&pool)
        .await
        .unwrap();

        (pool, Arc::new(store), result.last_insert_rowid())
    }

    struct CannedQuery;

    #[async_trait]
    impl QueryPlugin for CannedQuery {
        fn name(&self) -> &str {
            "canned"
        }

        fn description(&self) -> &str {
            "returns a fixed hit"
        }

        fn parameters(&self) -> Value {
            serde_json::json!({})
        }

        async fn query(
            &self,
            _ctx: &PluginContext,
            _collection: &Collection,
            query_text: &str,
            _params: &Value,
        ) -> Result<Vec<QueryHit>> {
            Ok(vec![QueryHit {
                similarity: 0.9,
                data: format!("hit for {}", query_text),
                metadata: serde_json::json!({}),
            }])
        }
    }

    #[tokio::test]
    async fn vanished_vector_collection_is_reported() {
        let (pool, store, id) = setup(false).await;
        let registry = PluginRegistry::with_builtins();
        let err = run_query(
            &pool,
            store,
            &registry,
            id,
            "anything",
            "similarity_query",
            &serde_json::json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not in the vector store"));
    }

    #[tokio::test]
    async fn unknown_plugin_is_reported() {
        let (pool, store, id) = setup(true).await;
        let registry = PluginRegistry::with_builtins();
        let err = run_query(
            &pool,
            store,
            &registry,
            id,
            "anything",
            "nope",
            &serde_json::json!({}),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Query plugin not found"));
    }

    #[tokio::test]
    async fn answer_envelope_carries_count_timing_and_query() {
        let (pool, store, id) = setup(true).await;
        let mut registry = PluginRegistry::new();
        registry.register_query(Box::new(CannedQuery));

        let answer = run_query(
            &pool,
            store,
            &registry,
            id,
            "what is rust",
            "canned",
            &serde_json::json!({}),
        )
        .await
        .unwrap();

        assert_eq!(answer.count, 1);
        assert_eq!(answer.results.len(), 1);
        assert_eq!(answer.query, "what is rust");
        assert!(answer.results[0].data.contains("what is rust"));
        assert!(answer.timing.total_seconds >= 0.0);
        assert!(answer.timing.total_ms >= answer.timing.total_seconds);
    }
}
