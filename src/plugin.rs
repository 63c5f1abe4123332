//! Plugin traits and registry for ingestion and query strategies.
//!
//! This module provides the trait-based extension system for Corpus Keeper.
//! Users can implement [`IngestPlugin`] and [`QueryPlugin`] in Rust to add
//! strategies that run alongside the built-in ones.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                PluginRegistry                 │
//! │  ┌────────────┐ ┌──────────────┐ ┌─────────┐ │
//! │  │ text_ingest│ │document_inges│ │url_inges│ │
//! │  └────────────┘ └──────────────┘ └─────────┘ │
//! │  ┌────────────────┐                           │
//! │  │similarity_query│        + custom plugins   │
//! │  └────────────────┘                           │
//! └──────────────┬────────────────────────────────┘
//!                ▼
//!   ingestion pipeline / query service
//! ```
//!
//! # Usage
//!
//! ```rust
//! use corpus_keeper::plugin::PluginRegistry;
//!
//! let mut plugins = PluginRegistry::with_builtins();
//! // plugins.register_ingest(Box::new(MyIngestPlugin::new()));
//! assert!(plugins.find_ingest("text_ingest").is_some());
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::models::{Collection, IngestedDocument, QueryHit};
use crate::vector_store::VectorStore;

// ═══════════════════════════════════════════════════════════════════════
// Ingest Plugin Trait
// ═══════════════════════════════════════════════════════════════════════

/// What a plugin consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Consumes an uploaded file (`text_ingest`, `document_ingest`).
    FileIngest,
    /// Consumes something else, tracked through a file (`url_ingest`).
    BaseIngest,
}

impl PluginKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::FileIngest => "file-ingest",
            PluginKind::BaseIngest => "base-ingest",
        }
    }
}

/// A strategy that turns a registered file into document chunks.
///
/// # Lifecycle
///
/// 1. The plugin is registered via [`PluginRegistry::register_ingest`].
/// 2. The ingestion pipeline validates caller parameters against
///    [`parameters`](IngestPlugin::parameters).
/// 3. [`ingest`](IngestPlugin::ingest) runs on the background task and its
///    chunks are embedded and written to the vector store.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use std::path::Path;
/// use corpus_keeper::models::IngestedDocument;
/// use corpus_keeper::plugin::{IngestPlugin, PluginKind};
///
/// pub struct CsvIngest;
///
/// #[async_trait]
/// impl IngestPlugin for CsvIngest {
///     fn name(&self) -> &str { "csv_ingest" }
///     fn kind(&self) -> PluginKind { PluginKind::FileIngest }
///     fn description(&self) -> &str { "Ingest CSV rows as documents" }
///     fn supported_file_types(&self) -> &[&str] { &["csv"] }
///     fn parameters(&self) -> Value { json!({}) }
///
///     async fn ingest(&self, _file_path: &Path, _params: &Value) -> Result<Vec<IngestedDocument>> {
///         Ok(vec![])
///     }
/// }
/// ```
#[async_trait]
pub trait IngestPlugin: Send + Sync {
    /// Plugin name used for dispatch (e.g. `"text_ingest"`).
    fn name(&self) -> &str;

    fn kind(&self) -> PluginKind;

    /// One-line description for plugin listings.
    fn description(&self) -> &str;

    /// File extensions this plugin accepts, lowercase, without dots.
    /// Empty for `base-ingest` plugins.
    fn supported_file_types(&self) -> &[&str];

    /// Parameter spec map: `{name: {type, description, required, default, enum?}}`.
    fn parameters(&self) -> Value;

    /// Produces document chunks from the file at `file_path`. `params` have
    /// already been validated against [`parameters`](IngestPlugin::parameters).
    async fn ingest(&self, file_path: &Path, params: &Value) -> Result<Vec<IngestedDocument>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Query Plugin Trait
// ═══════════════════════════════════════════════════════════════════════

/// Context bridge handed to query plugins at execution time.
pub struct PluginContext {
    vector_store: Arc<dyn VectorStore>,
}

impl PluginContext {
    pub fn new(vector_store: Arc<dyn VectorStore>) -> Self {
        Self { vector_store }
    }

    pub fn vector_store(&self) -> &dyn VectorStore {
        self.vector_store.as_ref()
    }
}

/// A strategy that answers a query against one collection.
#[async_trait]
pub trait QueryPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Parameter spec map, same shape as [`IngestPlugin::parameters`].
    fn parameters(&self) -> Value;

    /// Runs the query. `params` have already been validated.
    async fn query(
        &self,
        ctx: &PluginContext,
        collection: &Collection,
        query_text: &str,
        params: &Value,
    ) -> Result<Vec<QueryHit>>;
}

// ═══════════════════════════════════════════════════════════════════════
// Parameter Validation
// ═══════════════════════════════════════════════════════════════════════

/// Validate caller parameters against a plugin's spec map.
///
/// Rejects unknown and missing-required parameters, checks types and enum
/// constraints, and injects defaults for absent optional fields. Returns
/// the validated (and potentially enriched) parameters.
pub fn validate_params(spec: &Value, params: &Value) -> Result<Value> {
    let spec_obj = spec.as_object().cloned().unwrap_or_default();
    let params_obj = params.as_object().cloned().unwrap_or_default();

    for key in params_obj.keys() {
        if !spec_obj.contains_key(key) {
            bail!("unknown parameter: {}", key);
        }
    }

    let mut result = params_obj.clone();

    for (name, param_spec) in &spec_obj {
        match params_obj.get(name) {
            Some(value) => {
                // Type check
                if let Some(expected_type) = param_spec.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        bail!(
                            "parameter '{}' must be of type '{}', got {}",
                            name,
                            expected_type,
                            json_type_name(value)
                        );
                    }
                }

                // Enum validation
                if let Some(enum_values) = param_spec.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        let allowed: Vec<String> =
                            enum_values.iter().map(|v| v.to_string()).collect();
                        bail!(
                            "parameter '{}' must be one of [{}], got {}",
                            name,
                            allowed.join(", "),
                            value
                        );
                    }
                }
            }
            None => {
                let required = param_spec
                    .get("required")
                    .and_then(|r| r.as_bool())
                    .unwrap_or(false);
                if required {
                    bail!("missing required parameter: {}", name);
                }
                if let Some(default) = param_spec.get("default") {
                    if !default.is_null() {
                        result.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    Ok(Value::Object(result))
}

/// Return a human-readable name for a JSON value's type.
fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry holding both plugin families.
///
/// Use [`PluginRegistry::with_builtins`] to create a registry pre-loaded
/// with the built-in plugins, then optionally register custom ones.
pub struct PluginRegistry {
    ingest: Vec<Box<dyn IngestPlugin>>,
    query: Vec<Box<dyn QueryPlugin>>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            ingest: Vec::new(),
            query: Vec::new(),
        }
    }

    /// Create a registry pre-loaded with the built-in plugins:
    /// `text_ingest`, `document_ingest`, `url_ingest`, `similarity_query`.
    pub fn with_builtins() -> Self {
        use crate::ingest_document::DocumentIngest;
        use crate::ingest_text::TextIngest;
        use crate::ingest_url::UrlIngest;
        use crate::query_similarity::SimilarityQuery;

        let mut registry = Self::new();
        registry.register_ingest(Box::new(TextIngest));
        registry.register_ingest(Box::new(DocumentIngest));
        registry.register_ingest(Box::new(UrlIngest));
        registry.register_query(Box::new(SimilarityQuery));
        registry
    }

    pub fn register_ingest(&mut self, plugin: Box<dyn IngestPlugin>) {
        self.ingest.push(plugin);
    }

    pub fn register_query(&mut self, plugin: Box<dyn QueryPlugin>) {
        self.query.push(plugin);
    }

    pub fn ingest_plugins(&self) -> &[Box<dyn IngestPlugin>] {
        &self.ingest
    }

    pub fn query_plugins(&self) -> &[Box<dyn QueryPlugin>] {
        &self.query
    }

    /// Find an ingest plugin by name.
    pub fn find_ingest(&self, name: &str) -> Option<&dyn IngestPlugin> {
        self.ingest
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Find a query plugin by name.
    pub fn find_query(&self, name: &str) -> Option<&dyn QueryPlugin> {
        self.query
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.as_ref())
    }

    /// Ingest plugins whose supported file types match `filename`'s extension.
    pub fn ingest_plugins_for_file(&self, filename: &str) -> Vec<&dyn IngestPlugin> {
        let ext = match file_extension(filename) {
            Some(ext) => ext,
            None => return Vec::new(),
        };
        self.ingest
            .iter()
            .filter(|p| p.supported_file_types().contains(&ext.as_str()))
            .map(|p| p.as_ref())
            .collect()
    }

    /// Plugin descriptions for listings: name, kind, description, supported
    /// file types, and the parameter spec.
    pub fn describe(&self) -> Value {
        let ingest: Vec<Value> = self
            .ingest
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "kind": p.kind().as_str(),
                    "description": p.description(),
                    "supported_file_types": p.supported_file_types(),
                    "parameters": p.parameters(),
                })
            })
            .collect();
        let query: Vec<Value> = self
            .query
            .iter()
            .map(|p| {
                serde_json::json!({
                    "name": p.name(),
                    "description": p.description(),
                    "parameters": p.parameters(),
                })
            })
            .collect();
        serde_json::json!({ "ingest": ingest, "query": query })
    }

    pub fn is_empty(&self) -> bool {
        self.ingest.is_empty() && self.query.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ingest.len() + self.query.len()
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercased extension of `filename`, without the dot.
pub fn file_extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec() -> Value {
        json!({
            "chunk_size": {
                "type": "integer",
                "description": "Maximum chunk size in characters",
                "required": false,
                "default": 1000
            },
            "splitter": {
                "type": "string",
                "description": "Splitting strategy",
                "required": false,
                "default": "recursive",
                "enum": ["recursive", "character", "token"]
            },
            "urls": {
                "type": "array",
                "description": "URLs to fetch",
                "required": true,
                "default": null
            }
        })
    }

    #[test]
    fn injects_defaults_and_keeps_given_values() {
        let params = json!({"urls": ["https://example.com"], "chunk_size": 512});
        let validated = validate_params(&spec(), &params).unwrap();
        assert_eq!(validated["chunk_size"], 512);
        assert_eq!(validated["splitter"], "recursive");
        assert_eq!(validated["urls"][0], "https://example.com");
    }

    #[test]
    fn missing_required_is_an_error() {
        let err = validate_params(&spec(), &json!({})).unwrap_err();
        assert!(err.to_string().contains("missing required parameter: urls"));
    }

    #[test]
    fn unknown_parameter_is_an_error() {
        let params = json!({"urls": [], "depth": 2});
        let err = validate_params(&spec(), &params).unwrap_err();
        assert!(err.to_string().contains("unknown parameter: depth"));
    }

    #[test]
    fn type_mismatch_is_an_error() {
        let params = json!({"urls": [], "chunk_size": "big"});
        let err = validate_params(&spec(), &params).unwrap_err();
        assert!(err.to_string().contains("must be of type 'integer'"));
    }

    #[test]
    fn enum_violation_is_an_error() {
        let params = json!({"urls": [], "splitter": "semantic"});
        let err = validate_params(&spec(), &params).unwrap_err();
        assert!(err.to_string().contains("must be one of"));
    }

    #[test]
    fn null_defaults_are_not_injected() {
        let validated = validate_params(&spec(), &json!({"urls": []})).unwrap();
        assert!(validated.get("urls").is_some());
        assert!(!validated
            .as_object()
            .unwrap()
            .values()
            .any(|v| v.is_null()));
    }

    #[test]
    fn builtins_are_registered() {
        let registry = PluginRegistry::with_builtins();
        assert_eq!(registry.len(), 4);
        assert!(!registry.is_empty());
        assert!(registry.find_ingest("text_ingest").is_some());
        assert!(registry.find_ingest("document_ingest").is_some());
        assert!(registry.find_ingest("url_ingest").is_some());
        assert!(registry.find_query("similarity_query").is_some());
        assert!(registry.find_ingest("nope").is_none());
    }

    #[test]
    fn file_type_matching_uses_extensions() {
        let registry = PluginRegistry::with_builtins();

        let for_txt = registry.ingest_plugins_for_file("notes/README.TXT");
        assert!(for_txt.iter().any(|p| p.name() == "text_ingest"));

        let for_pdf = registry.ingest_plugins_for_file("report.pdf");
        assert!(for_pdf.iter().any(|p| p.name() == "document_ingest"));

        assert!(registry.ingest_plugins_for_file("data.csv").is_empty());
        assert!(registry.ingest_plugins_for_file("no-extension").is_empty());
    }

    #[test]
    fn describe_lists_both_families() {
        let registry = PluginRegistry::with_builtins();
        let listing = registry.describe();
        assert_eq!(listing["ingest"].as_array().unwrap().len(), 3);
        assert_eq!(listing["query"].as_array().unwrap().len(), 1);
        assert_eq!(listing["ingest"][0]["kind"], "file-ingest");
    }
}
