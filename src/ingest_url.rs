//! Built-in `url_ingest` plugin: fetches remote pages and chunks them.
//!
//! Each URL is fetched, reduced to plain text when it is HTML, and chunked
//! independently so every chunk's metadata points back at the page it came
//! from. The combined content of all successful fetches is written to the
//! tracking file so `files show` can reproduce what was ingested.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

use crate::chunk::split_text;
use crate::ingest_text::{chunking_parameters, ChunkingParams};
use crate::models::IngestedDocument;
use crate::plugin::{IngestPlugin, PluginKind};

const FETCH_TIMEOUT_SECS: u64 = 30;

/// Separator between page contents in the tracking file.
pub const URL_CONTENT_SEPARATOR: &str = "\n\n---\n\n";

/// Ingests web pages by URL rather than from an uploaded file.
pub struct UrlIngest;

#[async_trait]
impl IngestPlugin for UrlIngest {
    fn name(&self) -> &str {
        "url_ingest"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::BaseIngest
    }

    fn description(&self) -> &str {
        "Fetch one or more URLs, strip markup, and split the text into chunks"
    }

    fn supported_file_types(&self) -> &[&str] {
        &[]
    }

    fn parameters(&self) -> Value {
        let mut spec = serde_json::Map::new();
        spec.insert(
            "urls".to_string(),
            serde_json::json!({
                "type": "array",
                "description": "URLs to fetch and ingest",
                "required": true,
                "default": null
            }),
        );
        spec.extend(chunking_parameters(2000));
        Value::Object(spec)
    }

    async fn ingest(&self, file_path: &Path, params: &Value) -> Result<Vec<IngestedDocument>> {
        let urls: Vec<String> = params
            .get("urls")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|u| u.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        if urls.is_empty() {
            bail!("No URLs provided");
        }

        let chunking = ChunkingParams::from_params(params)?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client")?;

        let mut documents = Vec::new();
        let mut fetched = Vec::new();
        for url in &urls {
            match fetch_url(&client, url).await {
                Ok(content) => {
                    documents.extend(chunk_url_content(url, &content, &chunking)?);
                    fetched.push(content);
                }
                Err(e) => {
                    eprintln!("Warning: failed to fetch {}: {:#}", url, e);
                }
            }
        }
        if fetched.is_empty() {
            bail!("Failed to fetch any of the {} URLs", urls.len());
        }

        std::fs::write(file_path, fetched.join(URL_CONTENT_SEPARATOR))
            .with_context(|| format!("Failed to write tracking file: {}", file_path.display()))?;

        Ok(documents)
    }
}

async fn fetch_url(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;
    let status = response.status();
    if !status.is_success() {
        bail!("{} returned HTTP {}", url, status);
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = response
        .text()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?;

    if content_type.contains("html") || looks_like_html(&body) {
        Ok(html_to_text(&body))
    } else {
        Ok(body)
    }
}

fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    let lower = head
        .get(..head.len().min(64))
        .unwrap_or("")
        .to_ascii_lowercase();
    lower.starts_with("<!doctype html") || lower.starts_with("<html")
}

fn chunk_url_content(
    url: &str,
    content: &str,
    chunking: &ChunkingParams,
) -> Result<Vec<IngestedDocument>> {
    let chunks = split_text(content, chunking.strategy, chunking.size, chunking.overlap)?;
    let chunk_count = chunks.len();
    let file_size = content.len() as u64;

    let mut documents = Vec::with_capacity(chunk_count);
    for (i, chunk) in chunks.into_iter().enumerate() {
        let metadata = serde_json::json!({
            "source": url,
            "filename": url,
            "extension": "url",
            "file_size": file_size,
            "file_url": url,
            "chunking_strategy": format!("splitter_{}", chunking.strategy.as_str()),
            "chunk_size": chunking.size,
            "chunk_overlap": chunking.overlap,
            "chunk_index": i,
            "chunk_count": chunk_count,
        });
        documents.push(IngestedDocument {
            text: chunk,
            metadata,
        });
    }
    Ok(documents)
}

/// Strips markup from an HTML page, keeping visible text. Block-level tags
/// become line breaks and script/style bodies are dropped. Parse errors end
/// extraction early rather than failing it; real pages are rarely valid XML.
pub fn html_to_text(html: &str) -> String {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(html.as_bytes());
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    let mut buf = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if matches!(name.as_slice(), b"script" | b"style") {
                    skip_depth += 1;
                } else if skip_depth == 0 && is_block_tag(&name) {
                    push_break(&mut out);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                let name = e.local_name().as_ref().to_ascii_lowercase();
                if matches!(name.as_slice(), b"script" | b"style") {
                    skip_depth = skip_depth.saturating_sub(1);
                } else if skip_depth == 0 && is_block_tag(&name) {
                    push_break(&mut out);
                }
            }
            Ok(quick_xml::events::Event::Empty(e)) => {
                if skip_depth == 0 && e.local_name().as_ref().eq_ignore_ascii_case(b"br") {
                    push_break(&mut out);
                }
            }
            Ok(quick_xml::events::Event::Text(t)) if skip_depth == 0 => {
                let text = t
                    .unescape()
                    .map(|c| c.into_owned())
                    .unwrap_or_else(|_| String::from_utf8_lossy(&t).into_owned());
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push(' ');
                    }
                    out.push_str(trimmed);
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(_) => break,
            _ => {}
        }
        buf.clear();
    }

    out.trim().to_string()
}

fn is_block_tag(name: &[u8]) -> bool {
    matches!(
        name,
        b"p" | b"div"
            | b"li"
            | b"tr"
            | b"h1"
            | b"h2"
            | b"h3"
            | b"h4"
            | b"h5"
            | b"h6"
            | b"blockquote"
            | b"pre"
            | b"section"
            | b"article"
    )
}

fn push_break(out: &mut String) {
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
}
