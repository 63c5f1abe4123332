//! Embedding providers and vector utilities.
//!
//! Every collection carries its own [`EmbeddingsModel`] config; [`create_provider`]
//! turns one into a boxed [`EmbeddingProvider`]:
//! - **[`OpenAIProvider`]** — OpenAI-compatible embeddings API, API key required.
//! - **[`OllamaProvider`]** — an Ollama `/api/embed` endpoint, batched.
//! - **`LocalProvider`** — on-device inference via fastembed (requires the
//!   `local-embeddings` feature).
//!
//! Vector utilities for the store layer:
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 BLOB encoding
//! - [`cosine_similarity`] — similarity between two embedding vectors
//!
//! # Retry Strategy
//!
//! The HTTP vendors use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

#[cfg(feature = "local-embeddings")]
mod local;

#[cfg(feature = "local-embeddings")]
pub use local::LocalProvider;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::models::EmbeddingsModel;

const EMBED_TIMEOUT_SECS: u64 = 60;
const MAX_RETRIES: u32 = 5;

const OPENAI_DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const OLLAMA_DEFAULT_ENDPOINT: &str = "http://localhost:11434/api/embed";

/// A backend that turns text into embedding vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Embeds a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn EmbeddingProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingProvider")
            .field("model", &self.model_name())
            .finish()
    }
}

/// Instantiates the provider for a collection's embeddings config.
///
/// ```rust
/// use corpus_keeper::embedding::create_provider;
/// use corpus_keeper::models::EmbeddingsModel;
///
/// let model = EmbeddingsModel {
///     model: "nomic-embed-text".to_string(),
///     vendor: "ollama".to_string(),
///     endpoint: "http://localhost:11434/api/embed".to_string(),
///     apikey: String::new(),
/// };
/// let provider = create_provider(&model).unwrap();
/// assert_eq!(provider.model_name(), "nomic-embed-text");
/// ```
pub fn create_provider(model: &EmbeddingsModel) -> Result<Box<dyn EmbeddingProvider>> {
    match model.vendor.as_str() {
        "openai" => Ok(Box::new(OpenAIProvider::new(model)?)),
        "ollama" => Ok(Box::new(OllamaProvider::new(model)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Box::new(LocalProvider::new(model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding inference requires --features local-embeddings"),
        other => bail!("Unsupported embeddings vendor: '{}'", other),
    }
}

/// Embeds a single query text.
pub async fn embed_query(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    let results = provider.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| anyhow::anyhow!("Empty embedding response"))
}

/// Proves an embeddings config works by running one test embedding.
/// Returns the vector dimensionality on success.
pub async fn validate_embeddings(model: &EmbeddingsModel) -> Result<usize> {
    let provider = create_provider(model)?;
    let vectors = provider.embed(&["test".to_string()]).await?;
    let dims = vectors.first().map(|v| v.len()).unwrap_or(0);
    if dims == 0 {
        bail!("Embeddings test returned an empty vector");
    }
    Ok(dims)
}

// ============ OpenAI Provider ============

/// Embedding provider for the OpenAI embeddings API (or any service that
/// speaks its request shape). The collection's `apikey` field is mandatory.
pub struct OpenAIProvider {
    model: String,
    endpoint: String,
    apikey: String,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingsModel) -> Result<Self> {
        if config.apikey.is_empty() {
            bail!("API key is required for OpenAI embeddings");
        }
        let endpoint = if config.endpoint.is_empty() {
            OPENAI_DEFAULT_ENDPOINT.to_string()
        } else {
            config.endpoint.clone()
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            endpoint,
            apikey: config.apikey.clone(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = send_with_retry(
            || {
                self.client
                    .post(&self.endpoint)
                    .header("Authorization", format!("Bearer {}", self.apikey))
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            "OpenAI",
        )
        .await?;

        parse_openai_response(&json)
    }
}

/// Extracts the `data[].embedding` arrays, in response order.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut embeddings = Vec::with_capacity(data.len());

    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        embeddings.push(vec);
    }

    Ok(embeddings)
}

// ============ Ollama Provider ============

/// Embedding provider for an Ollama instance. The collection's `endpoint`
/// is the full embed URL; the batch request body is `{"model", "input"}`.
pub struct OllamaProvider {
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingsModel) -> Result<Self> {
        let endpoint = if config.endpoint.is_empty() {
            OLLAMA_DEFAULT_ENDPOINT.to_string()
        } else {
            config.endpoint.clone()
        };
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(EMBED_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            model: config.model.clone(),
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = send_with_retry(
            || {
                self.client
                    .post(&self.endpoint)
                    .header("Content-Type", "application/json")
                    .json(&body)
            },
            "Ollama",
        )
        .await?;

        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}

// ============ Retry loop ============

/// Sends a request built by `build` with exponential backoff.
/// 429/5xx and network errors retry; other client errors fail immediately.
async fn send_with_retry<F>(build: F, vendor: &str) -> Result<serde_json::Value>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        vendor,
                        status,
                        body_text
                    ));
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", vendor, status, body_text);
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} embedding failed after retries", vendor)))
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes for the vector store's embedding column.
///
/// ```rust
/// use corpus_keeper::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`; `0.0` for empty vectors or vectors of
/// different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
