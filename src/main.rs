//! # Corpus Keeper CLI (`corpus`)
//!
//! The `corpus` binary is the primary interface for Corpus Keeper. It provides
//! commands for database initialization, collection management, document and
//! URL ingestion, file-registry inspection, and similarity queries.
//!
//! ## Usage
//!
//! ```bash
//! corpus --config ./config/corpus.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `corpus init` | Create both SQLite databases and run schema migrations |
//! | `corpus collections <action>` | Create, list, show, update, or delete collections |
//! | `corpus plugins` | List ingest and query plugins with their parameter specs |
//! | `corpus ingest file <collection> <path>...` | Ingest local files or directories |
//! | `corpus ingest url <collection> <url>...` | Fetch and ingest web pages |
//! | `corpus files <action>` | Inspect and manage registered files |
//! | `corpus query <collection> "<text>"` | Run a similarity query |
//! | `corpus completions <shell>` | Generate shell completions |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize both databases
//! corpus init --config ./config/corpus.toml
//!
//! # Create a collection with the default embeddings config
//! corpus collections create notes --description "Personal notes"
//!
//! # Ingest a whole directory of markdown files
//! corpus ingest file notes ./docs --include "*.md"
//!
//! # Fetch two pages into the same collection
//! corpus ingest url notes https://example.com/a https://example.com/b
//!
//! # Query with a similarity threshold
//! corpus query notes "release checklist" --top-k 8 --threshold 0.3
//!
//! # Re-queue a failed file
//! corpus files set-status 42 pending
//! ```

mod chunk;
mod collections;
mod config;
mod db;
mod embedding;
mod file_registry;
mod ingest_document;
mod ingest_text;
mod ingest_url;
mod ingestion;
mod migrate;
mod models;
mod plugin;
mod progress;
mod query;
mod query_similarity;
mod tasks;
mod vector_store;

use anyhow::{bail, Context};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use globset::{Glob, GlobSetBuilder};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use walkdir::WalkDir;

use crate::collections::{CollectionUpdate, ListOptions, NewCollection};
use crate::models::{Collection, EmbeddingsModel, FileRecord, FileStatus, Visibility};
use crate::plugin::PluginRegistry;
use crate::progress::ProgressMode;
use crate::vector_store::{SqliteVectorStore, VectorStore};

/// Corpus Keeper CLI — a local-first knowledge base with pluggable
/// document ingestion, embeddings, and similarity query.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/corpus.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "corpus",
    about = "Corpus Keeper — a local-first knowledge base with pluggable ingestion and similarity query",
    version,
    long_about = "Corpus Keeper organises documents into collections, runs them through a \
    plugin-driven pipeline (plain text, PDF/Office extraction, URL fetching) that chunks and \
    embeds their content, and answers similarity queries over the stored vectors."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/corpus.toml`. Store paths, chunking defaults,
    /// query defaults, and default embeddings are read from this file.
    #[arg(long, global = true, default_value = "./config/corpus.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize both database schemas.
    ///
    /// Creates the metadata store (collections, file registry) and the
    /// vector store, each in its own SQLite file. This command is
    /// idempotent — running it multiple times is safe.
    Init,

    /// Manage collections.
    ///
    /// A collection pairs a metadata row with a vector-store collection
    /// and carries its own embeddings configuration.
    Collections {
        #[command(subcommand)]
        action: CollectionsAction,
    },

    /// List available plugins.
    ///
    /// Prints every ingest and query plugin with its description, supported
    /// file types, and parameter spec as JSON.
    Plugins,

    /// Ingest documents into a collection.
    ///
    /// Files are copied into the storage root, registered (status
    /// `pending`), then run through their ingest plugin: extract, chunk,
    /// embed, store.
    Ingest {
        #[command(subcommand)]
        action: IngestAction,
    },

    /// Inspect and manage registered files.
    ///
    /// Every ingest registers a file record that tracks the pipeline
    /// status (`pending`, `processing`, `completed`, `failed`, `deleted`)
    /// and the stored chunk count.
    Files {
        #[command(subcommand)]
        action: FilesAction,
    },

    /// Run a similarity query against a collection.
    ///
    /// Embeds the query text with the collection's embeddings model and
    /// returns the closest stored chunks with similarity scores.
    Query {
        /// Collection id or name.
        collection: String,

        /// The query text.
        text: String,

        /// Query plugin to use.
        #[arg(long, default_value = "similarity_query")]
        plugin: String,

        /// Maximum number of results. Defaults to `query.top_k` from config.
        #[arg(long)]
        top_k: Option<i64>,

        /// Minimum similarity in [-1, 1]. Defaults to `query.threshold` from config.
        #[arg(long)]
        threshold: Option<f64>,

        /// Extra plugin parameters as `key=value` pairs.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Generate shell completions.
    ///
    /// Writes a completion script for the given shell to stdout.
    Completions {
        /// Target shell.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Collection management subcommands.
#[derive(Subcommand)]
enum CollectionsAction {
    /// Create a collection.
    ///
    /// Resolves the embeddings config (explicit flags, then environment,
    /// then config defaults), probes the embeddings endpoint, and creates
    /// the backing vector-store collection.
    Create {
        /// Collection name (unique).
        name: String,

        /// Human-readable description.
        #[arg(long, default_value = "")]
        description: String,

        /// Owning user.
        #[arg(long, default_value = "local")]
        owner: String,

        /// Visibility: `private` or `public`.
        #[arg(long)]
        visibility: Option<String>,

        /// Embeddings vendor override (`openai`, `ollama`, `local`).
        #[arg(long)]
        embeddings_vendor: Option<String>,

        /// Embeddings model override.
        #[arg(long)]
        embeddings_model: Option<String>,

        /// Embeddings endpoint override.
        #[arg(long)]
        embeddings_endpoint: Option<String>,

        /// Embeddings API key override.
        #[arg(long)]
        embeddings_apikey: Option<String>,
    },

    /// List collections.
    List {
        /// Only collections owned by this user.
        #[arg(long)]
        owner: Option<String>,

        /// Only collections with this visibility (`private` or `public`).
        #[arg(long)]
        visibility: Option<String>,

        /// Number of collections to skip.
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Maximum number of collections to return.
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },

    /// Show one collection.
    Show {
        /// Collection id or name.
        collection: String,
    },

    /// Update a collection's name, description, visibility, or embeddings.
    ///
    /// A changed embeddings config is resolved and probed exactly like on
    /// create before it replaces the stored one. Chunks already embedded
    /// with the previous model are left untouched.
    Update {
        /// Collection id or name.
        collection: String,

        /// New name (must stay unique).
        #[arg(long)]
        name: Option<String>,

        /// New description.
        #[arg(long)]
        description: Option<String>,

        /// New visibility: `private` or `public`.
        #[arg(long)]
        visibility: Option<String>,

        /// Embeddings vendor override (`openai`, `ollama`, `local`).
        #[arg(long)]
        embeddings_vendor: Option<String>,

        /// Embeddings model override.
        #[arg(long)]
        embeddings_model: Option<String>,

        /// Embeddings endpoint override.
        #[arg(long)]
        embeddings_endpoint: Option<String>,

        /// Embeddings API key override.
        #[arg(long)]
        embeddings_apikey: Option<String>,
    },

    /// Delete a collection, its file records, and its stored files.
    Delete {
        /// Collection id or name.
        collection: String,
    },
}

/// Ingestion subcommands.
#[derive(Subcommand)]
enum IngestAction {
    /// Ingest local files or directories.
    ///
    /// Directories are walked recursively; `--include` narrows the walk to
    /// matching paths. Each file is stored, registered, and run through its
    /// ingest plugin (picked by extension unless `--plugin` is given).
    File {
        /// Collection id or name.
        collection: String,

        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Ingest plugin to use for every file. Default: by file extension,
        /// falling back to `text_ingest`.
        #[arg(long)]
        plugin: Option<String>,

        /// Only ingest directory entries matching this glob (repeatable),
        /// e.g. `--include "*.md" --include "*.pdf"`.
        #[arg(long = "include")]
        include: Vec<String>,

        /// Plugin parameters as `key=value` pairs, e.g. `--param chunk_size=500`.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Queue all files first, then run their ingestions concurrently.
        /// Per-file progress reporting is disabled in this mode.
        #[arg(long)]
        background: bool,

        /// Progress reporting: `off`, `human`, or `json`.
        /// Default: `human` when stderr is a TTY, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },

    /// Fetch and ingest web pages.
    ///
    /// All URLs are fetched by one `url_ingest` run and land in a single
    /// file record; HTML is converted to plain text before chunking.
    Url {
        /// Collection id or name.
        collection: String,

        /// URLs to fetch.
        #[arg(required = true)]
        urls: Vec<String>,

        /// Plugin parameters as `key=value` pairs, e.g. `--param chunk_size=2000`.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,

        /// Queue the ingestion and wait for the spawned task to finish.
        #[arg(long)]
        background: bool,

        /// Progress reporting: `off`, `human`, or `json`.
        /// Default: `human` when stderr is a TTY, otherwise `off`.
        #[arg(long)]
        progress: Option<String>,
    },
}

/// File-registry subcommands.
#[derive(Subcommand)]
enum FilesAction {
    /// List files registered in a collection.
    List {
        /// Collection id or name.
        collection: String,

        /// Only files with this status (`pending`, `processing`,
        /// `completed`, `failed`, `deleted`).
        #[arg(long)]
        status: Option<String>,
    },

    /// Show one file record.
    Show {
        /// File id.
        file_id: i64,

        /// Also reconstruct and print the stored chunk text.
        #[arg(long)]
        content: bool,
    },

    /// Set a file's status directly.
    ///
    /// The administrative path around the pipeline's own transitions:
    /// soft-delete a file (`deleted`) or re-queue a failed one (`pending`).
    SetStatus {
        /// File id.
        file_id: i64,

        /// New status.
        status: String,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Coerce `key=value` pairs into a JSON object. Values that parse as
/// integers, floats, or booleans become typed JSON; everything else stays
/// a string.
fn params_to_json(params: &[(String, String)]) -> Value {
    let mut map = serde_json::Map::new();
    for (key, value) in params {
        let coerced = if let Ok(n) = value.parse::<i64>() {
            Value::from(n)
        } else if let Ok(f) = value.parse::<f64>() {
            Value::from(f)
        } else if let Ok(b) = value.parse::<bool>() {
            Value::from(b)
        } else {
            Value::from(value.clone())
        };
        map.insert(key.clone(), coerced);
    }
    Value::Object(map)
}

/// Default ingest plugin for a filename: first plugin claiming its
/// extension, otherwise `text_ingest`.
fn pick_ingest_plugin(registry: &PluginRegistry, filename: &str) -> String {
    registry
        .ingest_plugins_for_file(filename)
        .first()
        .map(|p| p.name().to_string())
        .unwrap_or_else(|| "text_ingest".to_string())
}

/// Expand files and directories into a sorted list of files to ingest.
/// `include` globs apply to directory walks only; explicit files always
/// pass.
fn collect_ingest_paths(paths: &[PathBuf], include: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut builder = GlobSetBuilder::new();
    for pattern in include {
        let glob =
            Glob::new(pattern).with_context(|| format!("Invalid include glob: '{}'", pattern))?;
        builder.add(glob);
    }
    let globs = builder.build()?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                if !include.is_empty() && !globs.is_match(entry.path()) {
                    continue;
                }
                files.push(entry.path().to_path_buf());
            }
        } else if path.is_file() {
            files.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    files.sort();
    Ok(files)
}

fn print_collection(c: &Collection) {
    println!("--- Collection ---");
    println!("id:          {}", c.id);
    println!("name:        {}", c.name);
    println!("description: {}", c.description);
    println!("owner:       {}", c.owner);
    println!("visibility:  {}", c.visibility.as_str());
    println!("created:     {}", models::format_ts_iso(c.creation_date));
    println!(
        "embeddings:  {} ({} @ {})",
        c.embeddings_model.model, c.embeddings_model.vendor, c.embeddings_model.endpoint
    );
    println!("vector uuid: {}", c.vector_store_uuid);
}

fn print_file(f: &FileRecord) {
    println!("--- File ---");
    println!("id:            {}", f.id);
    println!("collection_id: {}", f.collection_id);
    println!("filename:      {}", f.original_filename);
    println!("status:        {}", f.status.as_str());
    println!("plugin:        {}", f.plugin_name);
    println!("content_type:  {}", f.content_type);
    println!("size:          {}", f.file_size);
    println!("chunks:        {}", f.document_count);
    if !f.file_url.is_empty() {
        println!("url:           {}", f.file_url);
    }
    println!("created:       {}", models::format_ts_iso(f.created_at));
    println!("updated:       {}", models::format_ts_iso(f.updated_at));
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        let name = cmd.get_name().to_string();
        clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let report = migrate::init_databases(&cfg).await;
            for error in &report.errors {
                eprintln!("Error: {}", error);
            }
            if !report.ok() {
                bail!("Database initialization incomplete");
            }
            println!("Databases initialized successfully.");
            println!("  metadata: {}", cfg.store.metadata_db.display());
            println!("  vectors:  {}", cfg.store.vector_db.display());
        }

        Commands::Collections { action } => {
            let pool = db::connect_metadata(&cfg).await?;
            let vectors = db::connect_vectors(&cfg).await?;
            let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(vectors));

            match action {
                CollectionsAction::Create {
                    name,
                    description,
                    owner,
                    visibility,
                    embeddings_vendor,
                    embeddings_model,
                    embeddings_endpoint,
                    embeddings_apikey,
                } => {
                    let overridden = embeddings_vendor.is_some()
                        || embeddings_model.is_some()
                        || embeddings_endpoint.is_some()
                        || embeddings_apikey.is_some();
                    let model = overridden.then(|| EmbeddingsModel {
                        model: embeddings_model.unwrap_or_else(|| "default".to_string()),
                        vendor: embeddings_vendor.unwrap_or_else(|| "default".to_string()),
                        endpoint: embeddings_endpoint.unwrap_or_else(|| "default".to_string()),
                        apikey: embeddings_apikey.unwrap_or_else(|| "default".to_string()),
                    });

                    let created = collections::create_collection(
                        &pool,
                        store.as_ref(),
                        &cfg.embeddings,
                        NewCollection {
                            name,
                            description,
                            owner,
                            visibility,
                            embeddings_model: model,
                        },
                    )
                    .await?;
                    print_collection(&created);
                }
                CollectionsAction::List {
                    owner,
                    visibility,
                    skip,
                    limit,
                } => {
                    let visibility = visibility.as_deref().map(Visibility::parse).transpose()?;
                    let list = collections::list_collections(
                        &pool,
                        &ListOptions {
                            owner,
                            visibility,
                            skip,
                            limit,
                        },
                    )
                    .await?;

                    if list.collections.is_empty() {
                        println!("No collections.");
                    } else {
                        println!(
                            "{:<6} {:<24} {:<10} {:<12} DESCRIPTION",
                            "ID", "NAME", "VISIBILITY", "OWNER"
                        );
                        for c in &list.collections {
                            println!(
                                "{:<6} {:<24} {:<10} {:<12} {}",
                                c.id,
                                c.name,
                                c.visibility.as_str(),
                                c.owner,
                                c.description
                            );
                        }
                        println!();
                        println!("{} of {} collections", list.collections.len(), list.total);
                    }
                }
                CollectionsAction::Show { collection } => {
                    let found = collections::resolve_collection(&pool, &collection).await?;
                    print_collection(&found);
                    if !found.vector_store_uuid.is_empty() {
                        if let Ok(count) = store.count(&found.vector_store_uuid).await {
                            println!("chunks:      {}", count);
                        }
                    }
                }
                CollectionsAction::Update {
                    collection,
                    name,
                    description,
                    visibility,
                    embeddings_vendor,
                    embeddings_model,
                    embeddings_endpoint,
                    embeddings_apikey,
                } => {
                    let overridden = embeddings_vendor.is_some()
                        || embeddings_model.is_some()
                        || embeddings_endpoint.is_some()
                        || embeddings_apikey.is_some();
                    let model = overridden.then(|| EmbeddingsModel {
                        model: embeddings_model.unwrap_or_else(|| "default".to_string()),
                        vendor: embeddings_vendor.unwrap_or_else(|| "default".to_string()),
                        endpoint: embeddings_endpoint.unwrap_or_else(|| "default".to_string()),
                        apikey: embeddings_apikey.unwrap_or_else(|| "default".to_string()),
                    });

                    let existing = collections::resolve_collection(&pool, &collection).await?;
                    let updated = collections::update_collection(
                        &pool,
                        store.as_ref(),
                        &cfg.embeddings,
                        existing.id,
                        CollectionUpdate {
                            name,
                            description,
                            visibility,
                            embeddings_model: model,
                        },
                    )
                    .await?;
                    print_collection(&updated);
                }
                CollectionsAction::Delete { collection } => {
                    let existing = collections::resolve_collection(&pool, &collection).await?;
                    collections::delete_collection(
                        &pool,
                        store.as_ref(),
                        &cfg.store.storage_root,
                        existing.id,
                    )
                    .await?;
                    println!("Deleted collection {} (id {}).", existing.name, existing.id);
                }
            }
        }

        Commands::Plugins => {
            let registry = PluginRegistry::with_builtins();
            println!("{}", serde_json::to_string_pretty(&registry.describe())?);
        }

        Commands::Ingest { action } => {
            let pool = db::connect_metadata(&cfg).await?;
            let vectors = db::connect_vectors(&cfg).await?;
            let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(vectors));
            let registry = Arc::new(PluginRegistry::with_builtins());

            match action {
                IngestAction::File {
                    collection,
                    paths,
                    plugin,
                    include,
                    params,
                    background,
                    progress,
                } => {
                    let target = collections::resolve_collection(&pool, &collection).await?;
                    let files = collect_ingest_paths(&paths, &include)?;
                    if files.is_empty() {
                        bail!("No files matched");
                    }
                    let params = params_to_json(&params);
                    let mode = match progress.as_deref() {
                        Some(value) => ProgressMode::parse(value)?,
                        None => ProgressMode::default_for_tty(),
                    };

                    if background {
                        let mut queued = Vec::new();
                        let mut handles = Vec::new();
                        for file in &files {
                            let plugin_name = plugin.clone().unwrap_or_else(|| {
                                pick_ingest_plugin(
                                    &registry,
                                    &file.file_name().unwrap_or_default().to_string_lossy(),
                                )
                            });
                            let new = ingestion::prepare_file_ingestion(
                                &registry,
                                &cfg.store.storage_root,
                                &target,
                                file,
                                &plugin_name,
                                &params,
                            )?;
                            let (record, handle) = tasks::schedule_ingestion(
                                pool.clone(),
                                store.clone(),
                                registry.clone(),
                                new,
                            )
                            .await?;
                            println!("File {} queued: {}", record.id, record.original_filename);
                            queued.push(record.id);
                            handles.push(handle);
                        }
                        for handle in handles {
                            let _ = handle.await;
                        }

                        let mut completed = 0;
                        let mut failed = 0;
                        for id in queued {
                            let record = file_registry::get_file(&pool, id).await?;
                            match record.status {
                                FileStatus::Completed => completed += 1,
                                _ => failed += 1,
                            }
                        }
                        println!("{} completed, {} failed.", completed, failed);
                        if failed > 0 {
                            bail!("{} of {} files failed", failed, completed + failed);
                        }
                    } else {
                        let reporter = mode.reporter();
                        let mut ok = 0;
                        let mut failed = 0;
                        for file in &files {
                            let plugin_name = plugin.clone().unwrap_or_else(|| {
                                pick_ingest_plugin(
                                    &registry,
                                    &file.file_name().unwrap_or_default().to_string_lossy(),
                                )
                            });
                            let record = ingestion::register_file_ingestion(
                                &pool,
                                &registry,
                                &cfg.store.storage_root,
                                &target,
                                file,
                                &plugin_name,
                                &params,
                            )
                            .await?;
                            match ingestion::run_ingestion(
                                &pool,
                                store.as_ref(),
                                &registry,
                                record.id,
                                reporter.as_ref(),
                            )
                            .await
                            {
                                Ok(done) => {
                                    ok += 1;
                                    println!(
                                        "File {} ingested: {} ({} chunks)",
                                        done.id, done.original_filename, done.document_count
                                    );
                                }
                                Err(e) => {
                                    failed += 1;
                                    eprintln!("Error: {:#}", e);
                                }
                            }
                        }
                        if failed > 0 {
                            bail!("{} of {} files failed", failed, ok + failed);
                        }
                    }
                }
                IngestAction::Url {
                    collection,
                    urls,
                    params,
                    background,
                    progress,
                } => {
                    let target = collections::resolve_collection(&pool, &collection).await?;
                    let params = params_to_json(&params);
                    let mode = match progress.as_deref() {
                        Some(value) => ProgressMode::parse(value)?,
                        None => ProgressMode::default_for_tty(),
                    };

                    if background {
                        let new =
                            ingestion::prepare_url_ingestion(&registry, &target, &urls, &params)?;
                        let (record, handle) = tasks::schedule_ingestion(
                            pool.clone(),
                            store.clone(),
                            registry.clone(),
                            new,
                        )
                        .await?;
                        println!("File {} queued: {}", record.id, record.original_filename);
                        let _ = handle.await;
                        let record = file_registry::get_file(&pool, record.id).await?;
                        print_file(&record);
                        if record.status != FileStatus::Completed {
                            bail!("URL ingestion failed for file {}", record.id);
                        }
                    } else {
                        let record = ingestion::register_url_ingestion(
                            &pool, &registry, &target, &urls, &params,
                        )
                        .await?;
                        let reporter = mode.reporter();
                        let done = ingestion::run_ingestion(
                            &pool,
                            store.as_ref(),
                            &registry,
                            record.id,
                            reporter.as_ref(),
                        )
                        .await?;
                        println!(
                            "File {} ingested: {} ({} chunks)",
                            done.id, done.original_filename, done.document_count
                        );
                    }
                }
            }
        }

        Commands::Files { action } => {
            let pool = db::connect_metadata(&cfg).await?;

            match action {
                FilesAction::List { collection, status } => {
                    let target = collections::resolve_collection(&pool, &collection).await?;
                    let status = status.as_deref().map(FileStatus::parse).transpose()?;
                    let files = file_registry::list_files(&pool, target.id, status).await?;

                    if files.is_empty() {
                        println!("No files.");
                    } else {
                        println!(
                            "{:<6} {:<12} {:>8} {:>10} FILENAME",
                            "ID", "STATUS", "CHUNKS", "SIZE"
                        );
                        for f in &files {
                            println!(
                                "{:<6} {:<12} {:>8} {:>10} {}",
                                f.id,
                                f.status.as_str(),
                                f.document_count,
                                f.file_size,
                                f.original_filename
                            );
                        }
                    }
                }
                FilesAction::Show { file_id, content } => {
                    if content {
                        let vectors = db::connect_vectors(&cfg).await?;
                        let store = SqliteVectorStore::new(vectors);
                        let full = file_registry::file_content(&pool, &store, file_id).await?;
                        print_file(&full.record);
                        println!();
                        println!("--- Content ({}) ---", full.content_type);
                        println!("{}", full.content);
                    } else {
                        let record = file_registry::get_file(&pool, file_id).await?;
                        print_file(&record);
                    }
                }
                FilesAction::SetStatus { file_id, status } => {
                    let status = FileStatus::parse(&status)?;
                    let record = file_registry::update_file_status(&pool, file_id, status).await?;
                    println!("File {} status set to {}.", record.id, record.status.as_str());
                }
            }
        }

        Commands::Query {
            collection,
            text,
            plugin,
            top_k,
            threshold,
            params,
        } => {
            let pool = db::connect_metadata(&cfg).await?;
            let vectors = db::connect_vectors(&cfg).await?;
            let store: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(vectors));
            let registry = PluginRegistry::with_builtins();

            let target = collections::resolve_collection(&pool, &collection).await?;

            let mut params = params_to_json(&params);
            if let Some(map) = params.as_object_mut() {
                map.insert(
                    "top_k".to_string(),
                    Value::from(top_k.unwrap_or(cfg.query.top_k)),
                );
                map.insert(
                    "threshold".to_string(),
                    Value::from(threshold.unwrap_or(cfg.query.threshold)),
                );
            }

            let answer =
                query::run_query(&pool, store, &registry, target.id, &text, &plugin, &params)
                    .await?;

            if answer.results.is_empty() {
                println!("No results.");
            } else {
                for (i, hit) in answer.results.iter().enumerate() {
                    let flat = hit.data.replace('\n', " ");
                    let excerpt: String = flat.trim().chars().take(160).collect();
                    println!("{}. [{:.4}] {}", i + 1, hit.similarity, excerpt);
                    if let Some(source) = hit.metadata.get("source").and_then(Value::as_str) {
                        println!("    source: {}", source);
                    }
                    if let Some(index) = hit.metadata.get("chunk_index") {
                        println!("    chunk: {}", index);
                    }
                    println!();
                }
                println!(
                    "{} results in {:.0} ms",
                    answer.count, answer.timing.total_ms
                );
            }
        }

        Commands::Completions { .. } => {
            // Handled above (before config loading)
            unreachable!()
        }
    }

    Ok(())
}
