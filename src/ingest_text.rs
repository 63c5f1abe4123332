//! Built-in `text_ingest` plugin for plain-text and markdown files.
//!
//! Reads the file as UTF-8, splits it with the configured strategy, and
//! attaches the standard chunk metadata (`source`, `filename`, `extension`,
//! `file_size`, `file_url`, `chunking_strategy`, per-chunk `chunk_index` and
//! `chunk_count`). The chunking helpers here are shared with the other
//! file-based ingest plugins.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;

use crate::chunk::{split_text, SplitStrategy};
use crate::models::IngestedDocument;
use crate::plugin::{file_extension, IngestPlugin, PluginKind};

/// Validated chunking settings extracted from plugin parameters.
pub(crate) struct ChunkingParams {
    pub size: usize,
    pub overlap: usize,
    pub strategy: SplitStrategy,
}

impl ChunkingParams {
    pub(crate) fn from_params(params: &Value) -> Result<Self> {
        let size = params
            .get("chunk_size")
            .and_then(|v| v.as_u64())
            .unwrap_or(1000) as usize;
        let overlap = params
            .get("chunk_overlap")
            .and_then(|v| v.as_u64())
            .unwrap_or(200) as usize;
        let strategy =
            SplitStrategy::parse(params.get("splitter").and_then(|v| v.as_str()).unwrap_or("recursive"))?;
        Ok(Self {
            size,
            overlap,
            strategy,
        })
    }
}

/// The chunking portion of a parameter spec map, shared by the file-based
/// ingest plugins.
pub(crate) fn chunking_parameters(default_chunk_size: u64) -> serde_json::Map<String, Value> {
    let spec = serde_json::json!({
        "chunk_size": {
            "type": "integer",
            "description": "Maximum chunk size in characters",
            "required": false,
            "default": default_chunk_size
        },
        "chunk_overlap": {
            "type": "integer",
            "description": "Characters of overlap between consecutive chunks",
            "required": false,
            "default": 200
        },
        "splitter": {
            "type": "string",
            "description": "Splitting strategy",
            "required": false,
            "default": "recursive",
            "enum": ["recursive", "character", "token"]
        }
    });
    match spec {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Splits extracted text and attaches the standard chunk metadata.
pub(crate) fn chunk_into_documents(
    text: &str,
    file_path: &Path,
    params: &Value,
    chunking: &ChunkingParams,
) -> Result<Vec<IngestedDocument>> {
    let file_size = std::fs::metadata(file_path).map(|m| m.len()).unwrap_or(0);
    let file_url = params
        .get("file_url")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_string();
    let extension = file_extension(&filename).unwrap_or_default();

    let pieces = split_text(text, chunking.strategy, chunking.size, chunking.overlap)?;
    let chunk_count = pieces.len();

    let documents = pieces
        .into_iter()
        .enumerate()
        .map(|(index, piece)| IngestedDocument {
            text: piece,
            metadata: serde_json::json!({
                "source": file_path.display().to_string(),
                "filename": filename,
                "extension": extension,
                "file_size": file_size,
                "file_url": file_url,
                "chunking_strategy": format!("splitter_{}", chunking.strategy.as_str()),
                "chunk_size": chunking.size,
                "chunk_overlap": chunking.overlap,
                "chunk_index": index,
                "chunk_count": chunk_count,
            }),
        })
        .collect();

    Ok(documents)
}

/// Ingests `.txt` and `.md` files.
pub struct TextIngest;

#[async_trait]
impl IngestPlugin for TextIngest {
    fn name(&self) -> &str {
        "text_ingest"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::FileIngest
    }

    fn description(&self) -> &str {
        "Ingest plain text and markdown files using configurable splitters"
    }

    fn supported_file_types(&self) -> &[&str] {
        &["txt", "md"]
    }

    fn parameters(&self) -> Value {
        Value::Object(chunking_parameters(1000))
    }

    async fn ingest(&self, file_path: &Path, params: &Value) -> Result<Vec<IngestedDocument>> {
        let text = std::fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;
        let chunking = ChunkingParams::from_params(params)?;
        chunk_into_documents(&text, file_path, params, &chunking)
    }
}
