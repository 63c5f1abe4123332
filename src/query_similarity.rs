//! Built-in `similarity_query` plugin: embedding similarity search.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::{create_provider, embed_query};
use crate::models::{Collection, QueryHit};
use crate::plugin::{PluginContext, QueryPlugin};

/// Answers queries by embedding the query text and ranking stored chunks
/// by cosine similarity.
pub struct SimilarityQuery;

#[async_trait]
impl QueryPlugin for SimilarityQuery {
    fn name(&self) -> &str {
        "similarity_query"
    }

    fn description(&self) -> &str {
        "Rank stored chunks by cosine similarity to the query text"
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "top_k": {
                "type": "integer",
                "description": "Maximum number of results to return",
                "required": false,
                "default": 5
            },
            "threshold": {
                "type": "number",
                "description": "Minimum similarity score for a result to be included",
                "required": false,
                "default": 0.0
            }
        })
    }

    async fn query(
        &self,
        ctx: &PluginContext,
        collection: &Collection,
        query_text: &str,
        params: &Value,
    ) -> Result<Vec<QueryHit>> {
        if query_text.trim().is_empty() {
            bail!("Query text cannot be empty");
        }

        let top_k = params
            .get("top_k")
            .and_then(|v| v.as_u64())
            .unwrap_or(5)
            .max(1) as usize;
        let threshold = params
            .get("threshold")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);

        let provider = create_provider(&collection.embeddings_model)?;
        let embedding = embed_query(provider.as_ref(), query_text).await?;

        let hits = ctx
            .vector_store()
            .query(&collection.vector_store_uuid, &embedding, top_k)
            .await?;

        Ok(hits
            .into_iter()
            .map(|hit| QueryHit {
                similarity: 1.0 - hit.distance,
                data: hit.text,
                metadata: hit.metadata,
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect())
    }
}
