//! End-to-end tests for the ingestion and query pipeline.
//!
//! Everything embedding-related runs against a stub endpoint on a local
//! port that speaks the Ollama `/api/embed` wire shape, so no test touches
//! the network. The stub returns deterministic keyword-count vectors, which
//! makes similarity ordering and threshold cuts provable.

use corpus_keeper::collections::{self, CollectionUpdate, NewCollection};
use corpus_keeper::config::Config;
use corpus_keeper::db;
use corpus_keeper::file_registry;
use corpus_keeper::ingestion;
use corpus_keeper::migrate;
use corpus_keeper::models::{Collection, EmbeddingsModel, FileStatus, Visibility};
use corpus_keeper::plugin::PluginRegistry;
use corpus_keeper::progress::NoProgress;
use corpus_keeper::query::run_query;
use corpus_keeper::tasks;
use corpus_keeper::vector_store::{SqliteVectorStore, VectorStore};
use serde_json::json;
use sqlx::Row;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

// ─── Stub embedding endpoint ────────────────────────────────────────

const KEYWORDS: [&str; 8] = [
    "rust", "cargo", "ownership", "borrow", "pasta", "garlic", "basil", "oven",
];

/// One dimension per keyword counting its occurrences, plus a small bias
/// dimension so no vector is all-zero. Cosine similarity is scale-free, so
/// texts about the same keywords score high against each other and near
/// zero against texts about the others.
fn stub_embedding(text: &str) -> Vec<f32> {
    let lower = text.to_lowercase();
    let mut dims: Vec<f32> = KEYWORDS
        .iter()
        .map(|kw| lower.matches(kw).count() as f32)
        .collect();
    dims.push(0.001);
    dims
}

/// Reads one HTTP request off the stream: headers up to the blank line,
/// then `Content-Length` bytes of body.
async fn read_http_request(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            return Vec::new();
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[header_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body
}

async fn respond(stream: &mut TcpStream, content_type: &str, payload: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        content_type,
        payload.len(),
        payload
    );
    stream.write_all(response.as_bytes()).await.ok();
    stream.shutdown().await.ok();
}

/// Serves the `/api/embed` shape (`{"model", "input": [..]}` in,
/// `{"embeddings": [[..]]}` out) with [`stub_embedding`] vectors. Returns
/// the endpoint URL.
async fn spawn_embed_stub() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let body = read_http_request(&mut stream).await;
                let request: serde_json::Value =
                    serde_json::from_slice(&body).unwrap_or_else(|_| json!({}));
                let inputs: Vec<String> = match request.get("input") {
                    Some(serde_json::Value::Array(items)) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    Some(serde_json::Value::String(s)) => vec![s.clone()],
                    _ => Vec::new(),
                };
                let embeddings: Vec<Vec<f32>> =
                    inputs.iter().map(|t| stub_embedding(t)).collect();
                let payload = json!({ "embeddings": embeddings }).to_string();
                respond(&mut stream, "application/json", &payload).await;
            });
        }
    });
    format!("http://{}/api/embed", addr)
}

/// Serves a fixed HTML page on every path. Returns the page URL.
async fn spawn_page_stub(html: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                read_http_request(&mut stream).await;
                respond(&mut stream, "text/html; charset=utf-8", html).await;
            });
        }
    });
    format!("http://{}/guide", addr)
}

// ─── Helpers ────────────────────────────────────────────────────────

struct TestEnv {
    config: Config,
    pool: sqlx::SqlitePool,
    store: Arc<dyn VectorStore>,
    registry: Arc<PluginRegistry>,
}

fn test_config(tmp: &TempDir, endpoint: &str) -> Config {
    let root = tmp.path();
    let config_content = format!(
        r#"
[store]
metadata_db = "{}"
vector_db = "{}"
storage_root = "{}"

[chunking]
chunk_size = 1000
chunk_overlap = 200

[embeddings]
vendor = "ollama"
model = "stub-embed"
endpoint = "{}"
"#,
        root.join("meta.db").display(),
        root.join("vectors.db").display(),
        root.join("files").display(),
        endpoint
    );
    toml::from_str(&config_content).unwrap()
}

async fn setup(tmp: &TempDir, endpoint: &str) -> TestEnv {
    let config = test_config(tmp, endpoint);
    migrate::run_migrations(&config).await.unwrap();
    let pool = db::connect_metadata(&config).await.unwrap();
    let vectors = db::connect_vectors(&config).await.unwrap();
    TestEnv {
        config,
        pool,
        store: Arc::new(SqliteVectorStore::new(vectors)),
        registry: Arc::new(PluginRegistry::with_builtins()),
    }
}

/// Creates a collection whose embeddings config resolves entirely from the
/// test defaults, i.e. the stub endpoint.
async fn make_collection(env: &TestEnv, name: &str) -> Collection {
    collections::create_collection(
        &env.pool,
        env.store.as_ref(),
        &env.config.embeddings,
        NewCollection {
            name: name.to_string(),
            description: String::new(),
            owner: "tester".to_string(),
            visibility: None,
            embeddings_model: None,
        },
    )
    .await
    .unwrap()
}

fn write_file(tmp: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = tmp.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

async fn ingest_file(env: &TestEnv, collection: &Collection, path: &PathBuf) -> i64 {
    let record = ingestion::register_file_ingestion(
        &env.pool,
        &env.registry,
        &env.config.store.storage_root,
        collection,
        path,
        "text_ingest",
        &json!({}),
    )
    .await
    .unwrap();
    let done = ingestion::run_ingestion(
        &env.pool,
        env.store.as_ref(),
        &env.registry,
        record.id,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(done.status, FileStatus::Completed);
    done.id
}

// ─── Tests ──────────────────────────────────────────────────────────

/// Creating a collection probes the embeddings endpoint and writes to both
/// stores; deleting it clears both sides again.
#[tokio::test]
async fn collection_lifecycle_spans_both_stores() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;

    let collection = make_collection(&env, "notes").await;
    assert!(!collection.vector_store_uuid.is_empty());
    assert_eq!(collection.embeddings_model.model, "stub-embed");
    assert_eq!(collection.embeddings_model.endpoint, endpoint);
    assert!(env
        .store
        .collection_exists(&collection.vector_store_uuid)
        .await
        .unwrap());

    collections::delete_collection(
        &env.pool,
        env.store.as_ref(),
        &env.config.store.storage_root,
        collection.id,
    )
    .await
    .unwrap();

    assert!(!env
        .store
        .collection_exists(&collection.vector_store_uuid)
        .await
        .unwrap());
    let err = collections::get_collection(&env.pool, collection.id)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Collection not found"));
}

/// Ingested files become queryable, and the similarity threshold drops
/// chunks about unrelated topics.
#[tokio::test]
async fn file_ingest_then_query_ranks_matching_chunks() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "docs").await;

    let rust = write_file(
        &tmp,
        "rust.md",
        "Rust ownership and borrow rules. Cargo builds Rust crates.",
    );
    let pasta = write_file(
        &tmp,
        "pasta.md",
        "Pasta with garlic and basil, finished in the oven.",
    );
    ingest_file(&env, &collection, &rust).await;
    ingest_file(&env, &collection, &pasta).await;
    assert_eq!(
        env.store.count(&collection.vector_store_uuid).await.unwrap(),
        2
    );

    let answer = run_query(
        &env.pool,
        env.store.clone(),
        &env.registry,
        collection.id,
        "rust cargo ownership",
        "similarity_query",
        &json!({"top_k": 5, "threshold": 0.5}),
    )
    .await
    .unwrap();

    assert_eq!(answer.query, "rust cargo ownership");
    assert_eq!(answer.count, answer.results.len());
    assert!(!answer.results.is_empty());
    for hit in &answer.results {
        assert!(hit.similarity >= 0.5);
        assert!(hit.data.to_lowercase().contains("rust"));
    }
    assert!(answer.timing.total_seconds >= 0.0);

    // Same query against the cooking side of the corpus.
    let answer = run_query(
        &env.pool,
        env.store.clone(),
        &env.registry,
        collection.id,
        "garlic basil oven",
        "similarity_query",
        &json!({"top_k": 5, "threshold": 0.5}),
    )
    .await
    .unwrap();
    assert_eq!(answer.count, 1);
    assert!(answer.results[0].data.contains("Pasta"));
}

/// Background ingestion settles the registry row to `completed` with the
/// chunk count, and the chunks really are in the vector store.
#[tokio::test]
async fn background_ingestion_completes_and_counts_chunks() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "docs").await;

    let body = (0..8)
        .map(|i| format!("Paragraph {} covers rust ownership in some depth.", i))
        .collect::<Vec<_>>()
        .join("\n\n");
    let path = write_file(&tmp, "notes.txt", &body);

    let new = ingestion::prepare_file_ingestion(
        &env.registry,
        &env.config.store.storage_root,
        &collection,
        &path,
        "text_ingest",
        &json!({"chunk_size": 120, "chunk_overlap": 20}),
    )
    .unwrap();
    let (record, handle) = tasks::schedule_ingestion(
        env.pool.clone(),
        env.store.clone(),
        env.registry.clone(),
        new,
    )
    .await
    .unwrap();
    assert_eq!(record.status, FileStatus::Pending);

    handle.await.unwrap();

    let settled = file_registry::get_file(&env.pool, record.id).await.unwrap();
    assert_eq!(settled.status, FileStatus::Completed);
    assert!(settled.document_count > 1);
    assert_eq!(
        env.store.count(&collection.vector_store_uuid).await.unwrap(),
        settled.document_count
    );
}

/// URL ingestion fetches the page through HTTP, strips markup, and stores
/// the visible text under the URL.
#[tokio::test]
async fn url_ingest_fetches_the_page_and_strips_markup() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "web").await;

    let page = spawn_page_stub(
        "<html><head><title>Pasta</title><style>body { color: red; }</style></head>\
         <body><h1>Weeknight pasta</h1><p>Garlic basil pasta baked in the oven.</p>\
         <script>alert(1);</script></body></html>",
    )
    .await;

    let record = ingestion::register_url_ingestion(
        &env.pool,
        &env.registry,
        &collection,
        &[page.clone()],
        &json!({}),
    )
    .await
    .unwrap();
    assert_eq!(record.original_filename, page);

    let done = ingestion::run_ingestion(
        &env.pool,
        env.store.as_ref(),
        &env.registry,
        record.id,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(done.status, FileStatus::Completed);
    assert!(done.document_count >= 1);

    let content = file_registry::file_content(&env.pool, env.store.as_ref(), done.id)
        .await
        .unwrap();
    assert_eq!(content.content_type, "text/html");
    assert!(content.content.contains("Garlic basil pasta baked in the oven."));
    assert!(!content.content.contains("alert"));
    assert!(!content.content.contains("color"));
    assert_eq!(content.chunk_count as i64, done.document_count);
}

/// A failed ingestion can be reset to `pending` and run again once the
/// underlying problem is fixed.
#[tokio::test]
async fn failed_ingestion_can_be_retried() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "docs").await;

    let path = write_file(&tmp, "plan.txt", "Rust plan: learn ownership with cargo.");
    let record = ingestion::register_file_ingestion(
        &env.pool,
        &env.registry,
        &env.config.store.storage_root,
        &collection,
        &path,
        "text_ingest",
        &json!({}),
    )
    .await
    .unwrap();

    // Break the stored copy so the first run fails.
    std::fs::remove_file(&record.file_path).unwrap();
    let err = ingestion::run_ingestion(
        &env.pool,
        env.store.as_ref(),
        &env.registry,
        record.id,
        &NoProgress,
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("Ingestion failed"));
    let failed = file_registry::get_file(&env.pool, record.id).await.unwrap();
    assert_eq!(failed.status, FileStatus::Failed);

    // Put the file back and retry through the administrative reset.
    std::fs::write(&record.file_path, "Rust plan: learn ownership with cargo.").unwrap();
    file_registry::update_file_status(&env.pool, record.id, FileStatus::Pending)
        .await
        .unwrap();
    let done = ingestion::run_ingestion(
        &env.pool,
        env.store.as_ref(),
        &env.registry,
        record.id,
        &NoProgress,
    )
    .await
    .unwrap();
    assert_eq!(done.status, FileStatus::Completed);
    assert_eq!(done.document_count, 1);
}

/// Stored content is rebuilt chunk by chunk in the original order.
#[tokio::test]
async fn file_content_rebuilds_chunks_in_order() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "docs").await;

    let body = "Alpha covers rust ownership and why borrows end at scope exit.\n\n\
                Bravo covers cargo workspaces and how features unify.\n\n\
                Charlie covers pasta, garlic, and what the oven changes.";
    let path = write_file(&tmp, "sections.txt", body);

    let record = ingestion::register_file_ingestion(
        &env.pool,
        &env.registry,
        &env.config.store.storage_root,
        &collection,
        &path,
        "text_ingest",
        &json!({"chunk_size": 80, "chunk_overlap": 10}),
    )
    .await
    .unwrap();
    let done = ingestion::run_ingestion(
        &env.pool,
        env.store.as_ref(),
        &env.registry,
        record.id,
        &NoProgress,
    )
    .await
    .unwrap();
    assert!(done.document_count > 1);

    let content = file_registry::file_content(&env.pool, env.store.as_ref(), done.id)
        .await
        .unwrap();
    assert_eq!(content.chunk_count as i64, done.document_count);
    assert_eq!(content.content_type, "text/plain");

    let alpha = content.content.find("Alpha").unwrap();
    let bravo = content.content.find("Bravo").unwrap();
    let charlie = content.content.find("Charlie").unwrap();
    assert!(alpha < bravo);
    assert!(bravo < charlie);
}

/// Collection updates land in the metadata store and are mirrored onto the
/// vector-store collection's metadata snapshot. Swapping the embeddings
/// model re-resolves `"default"` sentinels and probes the new endpoint
/// before the change is stored.
#[tokio::test]
async fn collection_update_mirrors_metadata_to_the_vector_store() {
    let tmp = TempDir::new().unwrap();
    let endpoint = spawn_embed_stub().await;
    let env = setup(&tmp, &endpoint).await;
    let collection = make_collection(&env, "drafts").await;

    collections::update_collection(
        &env.pool,
        env.store.as_ref(),
        &env.config.embeddings,
        collection.id,
        CollectionUpdate {
            name: None,
            description: Some("working notes".to_string()),
            visibility: Some("public".to_string()),
            embeddings_model: None,
        },
    )
    .await
    .unwrap();

    // Only the model name is explicit; vendor, endpoint, and apikey come
    // back from the config defaults, which point at the stub server.
    let swapped = collections::update_collection(
        &env.pool,
        env.store.as_ref(),
        &env.config.embeddings,
        collection.id,
        CollectionUpdate {
            embeddings_model: Some(EmbeddingsModel {
                model: "stub-embed-large".to_string(),
                vendor: "default".to_string(),
                endpoint: "default".to_string(),
                apikey: "default".to_string(),
            }),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(swapped.embeddings_model.model, "stub-embed-large");
    assert_eq!(swapped.embeddings_model.endpoint, endpoint);

    let updated = collections::get_collection(&env.pool, collection.id)
        .await
        .unwrap();
    assert_eq!(updated.description, "working notes");
    assert_eq!(updated.visibility, Visibility::Public);
    assert_eq!(updated.embeddings_model.model, "stub-embed-large");

    let vectors = db::connect_vectors(&env.config).await.unwrap();
    let row = sqlx::query("SELECT metadata_json FROM vs_collections WHERE id = ?")
        .bind(&collection.vector_store_uuid)
        .fetch_one(&vectors)
        .await
        .unwrap();
    let metadata: serde_json::Value =
        serde_json::from_str(&row.get::<String, _>("metadata_json")).unwrap();
    assert_eq!(metadata["description"], "working notes");
    assert_eq!(metadata["visibility"], "public");
    assert_eq!(metadata["metadata_id"], collection.id);
    assert_eq!(metadata["embeddings_model"]["model"], "stub-embed-large");
}
