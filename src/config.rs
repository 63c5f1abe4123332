use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsDefaults,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Relational metadata store (collections, file registry).
    pub metadata_db: PathBuf,
    /// Vector store database.
    pub vector_db: PathBuf,
    /// Root directory for stored document files.
    pub storage_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            threshold: default_threshold(),
        }
    }
}

fn default_top_k() -> i64 {
    5
}
fn default_threshold() -> f64 {
    0.0
}

/// Server-wide fallback embeddings settings. A collection whose embeddings
/// config says `"default"` for a field resolves it from the environment
/// (`EMBEDDINGS_VENDOR`, `EMBEDDINGS_MODEL`, `EMBEDDINGS_APIKEY`,
/// `EMBEDDINGS_ENDPOINT`) and then from this section.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingsDefaults {
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub apikey: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
}

impl Default for EmbeddingsDefaults {
    fn default() -> Self {
        Self {
            vendor: default_vendor(),
            model: default_model(),
            apikey: String::new(),
            endpoint: default_endpoint(),
        }
    }
}

fn default_vendor() -> String {
    "ollama".to_string()
}
fn default_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_endpoint() -> String {
    "http://localhost:11434/api/embed".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate chunking
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    if config.chunking.chunk_overlap >= config.chunking.chunk_size {
        anyhow::bail!("chunking.chunk_overlap must be smaller than chunking.chunk_size");
    }

    // Validate query defaults
    if config.query.top_k < 1 {
        anyhow::bail!("query.top_k must be >= 1");
    }

    if !(-1.0..=1.0).contains(&config.query.threshold) {
        anyhow::bail!("query.threshold must be in [-1.0, 1.0]");
    }

    match config.embeddings.vendor.as_str() {
        "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embeddings vendor: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }

    Ok(config)
}
