//! Collection lifecycle: create, fetch, list, update, delete.
//!
//! Every collection lives in two places at once: a row in the metadata
//! store and a collection in the vector store, linked by
//! `vector_store_uuid`. Creation keeps the two consistent by probing the
//! embeddings config before any write and rolling the metadata row back if
//! the vector side fails. Deletion goes the other way: vector-side errors
//! are tolerated so a half-broken collection can still be removed.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use crate::config::EmbeddingsDefaults;
use crate::embedding::validate_embeddings;
use crate::models::{format_ts_iso, Collection, EmbeddingsModel, Visibility};
use crate::vector_store::VectorStore;

/// Request to create a collection. `visibility` defaults to private and a
/// missing `embeddings_model` means "resolve everything from defaults".
#[derive(Debug, Clone)]
pub struct NewCollection {
    pub name: String,
    pub description: String,
    pub owner: String,
    pub visibility: Option<String>,
    pub embeddings_model: Option<EmbeddingsModel>,
}

/// Partial update; `None` fields are left unchanged. A new embeddings
/// config may still carry `"default"` sentinels and is probed before it
/// replaces the stored one.
#[derive(Debug, Clone, Default)]
pub struct CollectionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub visibility: Option<String>,
    pub embeddings_model: Option<EmbeddingsModel>,
}

/// One page of collections plus the total matching count.
#[derive(Debug, Clone)]
pub struct CollectionList {
    pub total: usize,
    pub collections: Vec<Collection>,
}

/// Filters and pagination for [`list_collections`].
#[derive(Debug, Clone)]
pub struct ListOptions {
    pub owner: Option<String>,
    pub visibility: Option<Visibility>,
    pub skip: usize,
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            owner: None,
            visibility: None,
            skip: 0,
            limit: 100,
        }
    }
}

pub async fn create_collection(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    defaults: &EmbeddingsDefaults,
    new: NewCollection,
) -> Result<Collection> {
    let existing = sqlx::query("SELECT id FROM collections WHERE name = ?")
        .bind(&new.name)
        .fetch_optional(pool)
        .await?;
    if existing.is_some() {
        bail!("Collection '{}' already exists", new.name);
    }

    let visibility = Visibility::parse(new.visibility.as_deref().unwrap_or("private"))?;
    let model = new
        .embeddings_model
        .unwrap_or_else(EmbeddingsModel::sentinel)
        .resolved(defaults)?;

    // Probe the embeddings config before touching either store.
    validate_embeddings(&model)
        .await
        .with_context(|| format!("Embeddings validation failed for collection '{}'", new.name))?;

    let creation_date = Utc::now().timestamp();
    let model_json = serde_json::to_string(&model)?;
    let result = sqlx::query(
        "INSERT INTO collections (name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid) \
         VALUES (?, ?, ?, ?, ?, ?, '')",
    )
    .bind(&new.name)
    .bind(&new.description)
    .bind(creation_date)
    .bind(&new.owner)
    .bind(visibility.as_str())
    .bind(&model_json)
    .execute(pool)
    .await?;
    let id = result.last_insert_rowid();

    let collection = Collection {
        id,
        name: new.name,
        description: new.description,
        creation_date,
        owner: new.owner,
        visibility,
        embeddings_model: model,
        vector_store_uuid: String::new(),
    };

    let uuid = match store
        .create_collection(&collection.name, vector_metadata(&collection))
        .await
    {
        Ok(uuid) if !uuid.is_empty() => uuid,
        Ok(_) => {
            rollback_collection_row(pool, id).await;
            bail!(
                "Vector store returned an empty id for collection '{}'",
                collection.name
            );
        }
        Err(e) => {
            rollback_collection_row(pool, id).await;
            return Err(e.context(format!(
                "Failed to create vector store collection for '{}'",
                collection.name
            )));
        }
    };

    sqlx::query("UPDATE collections SET vector_store_uuid = ? WHERE id = ?")
        .bind(&uuid)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(Collection {
        vector_store_uuid: uuid,
        ..collection
    })
}

async fn rollback_collection_row(pool: &SqlitePool, id: i64) {
    if let Err(e) = sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await
    {
        eprintln!(
            "Warning: failed to roll back collection row {}: {}",
            id, e
        );
    }
}

/// Metadata mirrored onto the vector-store collection.
pub(crate) fn vector_metadata(collection: &Collection) -> serde_json::Value {
    serde_json::json!({
        "owner": collection.owner,
        "description": collection.description,
        "visibility": collection.visibility.as_str(),
        "metadata_id": collection.id,
        "creation_date": format_ts_iso(collection.creation_date),
        "embeddings_model": collection.embeddings_model,
    })
}

pub async fn get_collection(pool: &SqlitePool, id: i64) -> Result<Collection> {
    let row = sqlx::query(
        "SELECT id, name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid \
         FROM collections WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => collection_from_row(&row),
        None => bail!("Collection not found: {}", id),
    }
}

pub async fn get_collection_by_name(pool: &SqlitePool, name: &str) -> Result<Collection> {
    let row = sqlx::query(
        "SELECT id, name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid \
         FROM collections WHERE name = ?",
    )
    .bind(name)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => collection_from_row(&row),
        None => bail!("Collection not found: {}", name),
    }
}

/// Looks a collection up by numeric id or, failing that, by name.
pub async fn resolve_collection(pool: &SqlitePool, selector: &str) -> Result<Collection> {
    if let Ok(id) = selector.parse::<i64>() {
        return get_collection(pool, id).await;
    }
    get_collection_by_name(pool, selector).await
}

pub async fn list_collections(pool: &SqlitePool, options: &ListOptions) -> Result<CollectionList> {
    let rows = sqlx::query(
        "SELECT id, name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid \
         FROM collections ORDER BY id ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut matching = Vec::new();
    for row in &rows {
        let collection = collection_from_row(row)?;
        if let Some(ref owner) = options.owner {
            if &collection.owner != owner {
                continue;
            }
        }
        if let Some(visibility) = options.visibility {
            if collection.visibility != visibility {
                continue;
            }
        }
        matching.push(collection);
    }

    let total = matching.len();
    let collections = matching
        .into_iter()
        .skip(options.skip)
        .take(options.limit)
        .collect();

    Ok(CollectionList { total, collections })
}

pub async fn update_collection(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    defaults: &EmbeddingsDefaults,
    id: i64,
    changes: CollectionUpdate,
) -> Result<Collection> {
    let existing = get_collection(pool, id).await?;

    let visibility = match changes.visibility {
        Some(ref v) => Visibility::parse(v)?,
        None => existing.visibility,
    };
    let name = changes.name.unwrap_or_else(|| existing.name.clone());
    let description = changes
        .description
        .unwrap_or_else(|| existing.description.clone());

    if name != existing.name {
        let taken = sqlx::query("SELECT id FROM collections WHERE name = ? AND id != ?")
            .bind(&name)
            .bind(id)
            .fetch_optional(pool)
            .await?;
        if taken.is_some() {
            bail!("Collection '{}' already exists", name);
        }
    }

    // A replacement embeddings config goes through the same resolve-and-probe
    // path as create before anything is written.
    let embeddings_model = match changes.embeddings_model {
        Some(model) => {
            let model = model.resolved(defaults)?;
            validate_embeddings(&model)
                .await
                .with_context(|| {
                    format!("Embeddings validation failed for collection '{}'", name)
                })?;
            model
        }
        None => existing.embeddings_model.clone(),
    };

    let model_json = serde_json::to_string(&embeddings_model)?;
    sqlx::query(
        "UPDATE collections SET name = ?, description = ?, visibility = ?, embeddings_model = ? \
         WHERE id = ?",
    )
    .bind(&name)
    .bind(&description)
    .bind(visibility.as_str())
    .bind(&model_json)
    .bind(id)
    .execute(pool)
    .await?;

    let updated = Collection {
        name,
        description,
        visibility,
        embeddings_model,
        ..existing
    };

    // Renames only touch the metadata store; the vector-store linkage is by
    // uuid. Description and visibility are mirrored best-effort.
    if !updated.vector_store_uuid.is_empty() {
        if let Err(e) = store
            .update_metadata(&updated.vector_store_uuid, vector_metadata(&updated))
            .await
        {
            eprintln!(
                "Warning: failed to update vector store metadata for collection {}: {:#}",
                id, e
            );
        }
    }

    Ok(updated)
}

pub async fn delete_collection(
    pool: &SqlitePool,
    store: &dyn VectorStore,
    storage_root: &Path,
    id: i64,
) -> Result<()> {
    let collection = get_collection(pool, id).await?;

    // Vector side first; failures there must not strand the metadata row.
    if !collection.vector_store_uuid.is_empty() {
        if let Err(e) = store.delete_collection(&collection.vector_store_uuid).await {
            eprintln!(
                "Warning: failed to delete vector store collection {}: {:#}",
                collection.vector_store_uuid, e
            );
        }
    }

    sqlx::query("DELETE FROM file_registry WHERE collection_id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM collections WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    let files_dir = storage_root.join(&collection.owner).join(&collection.name);
    if files_dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&files_dir) {
            eprintln!(
                "Warning: failed to remove stored files at {}: {}",
                files_dir.display(),
                e
            );
        }
    }

    Ok(())
}

fn collection_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Collection> {
    let id: i64 = row.get("id");
    let embeddings_json: String = row.get("embeddings_model");
    let embeddings_model: EmbeddingsModel = serde_json::from_str(&embeddings_json)
        .with_context(|| format!("Invalid embeddings_model JSON for collection {}", id))?;
    let visibility: String = row.get("visibility");

    Ok(Collection {
        id,
        name: row.get("name"),
        description: row.get("description"),
        creation_date: row.get("creation_date"),
        owner: row.get("owner"),
        visibility: Visibility::parse(&visibility)?,
        embeddings_model,
        vector_store_uuid: row.get("vector_store_uuid"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::{migrate_metadata, migrate_vectors};
    use crate::vector_store::SqliteVectorStore;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn memory_pool() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    async fn test_stores() -> (SqlitePool, SqliteVectorStore) {
        let metadata = memory_pool().await;
        migrate_metadata(&metadata).await.unwrap();
        let vectors = memory_pool().await;
        migrate_vectors(&vectors).await.unwrap();
        (metadata, SqliteVectorStore::new(vectors))
    }

    async fn insert_collection(pool: &SqlitePool, store: &SqliteVectorStore, name: &str, owner: &str, visibility: &str) -> i64 {
        let model = serde_json::to_string(&EmbeddingsModel {
            model: "nomic-embed-text".to_string(),
            vendor: "ollama".to_string(),
            endpoint: "http://localhost:11434/api/embed".to_string(),
            apikey: String::new(),
        })
        .unwrap();
        let uuid = store
            .create_collection(name, serde_json::json!({"owner": owner}))
            .await
            .unwrap();
        let result = sqlx::query(
            "INSERT INTO collections (name, description, creation_date, owner, visibility, embeddings_model, vector_store_uuid) \
             VALUES (?, '', 0, ?, ?, ?, ?)",
        )
        .bind(name)
        .bind(owner)
        .bind(visibility)
        .bind(&model)
        .bind(&uuid)
        .execute(pool)
        .await
        .unwrap();
        result.last_insert_rowid()
    }

    #[tokio::test]
    async fn duplicate_name_is_rejected_before_probing() {
        let (pool, store) = test_stores().await;
        insert_collection(&pool, &store, "docs", "alice", "private").await;

        // Endpoint is unreachable; the duplicate check must fire first.
        let err = create_collection(
            &pool,
            &store,
            &crate::config::EmbeddingsDefaults::default(),
            NewCollection {
                name: "docs".to_string(),
                description: String::new(),
                owner: "alice".to_string(),
                visibility: None,
                embeddings_model: Some(EmbeddingsModel {
                    model: "m".to_string(),
                    vendor: "ollama".to_string(),
                    endpoint: "http://localhost:1/api/embed".to_string(),
                    apikey: String::new(),
                }),
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn invalid_visibility_is_rejected() {
        let (pool, store) = test_stores().await;
        let err = create_collection(
            &pool,
            &store,
            &crate::config::EmbeddingsDefaults::default(),
            NewCollection {
                name: "docs".to_string(),
                description: String::new(),
                owner: "alice".to_string(),
                visibility: Some("internal".to_string()),
                embeddings_model: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Invalid visibility"));
    }

    #[tokio::test]
    async fn lookup_by_id_and_name() {
        let (pool, store) = test_stores().await;
        let id = insert_collection(&pool, &store, "docs", "alice", "private").await;

        let by_id = get_collection(&pool, id).await.unwrap();
        assert_eq!(by_id.name, "docs");
        assert_eq!(by_id.owner, "alice");
        assert!(!by_id.vector_store_uuid.is_empty());

        let by_name = get_collection_by_name(&pool, "docs").await.unwrap();
        assert_eq!(by_name.id, id);

        let resolved = resolve_collection(&pool, "docs").await.unwrap();
        assert_eq!(resolved.id, id);

        let err = get_collection(&pool, 999).await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn list_filters_and_paginates() {
        let (pool, store) = test_stores().await;
        insert_collection(&pool, &store, "a", "alice", "private").await;
        insert_collection(&pool, &store, "b", "alice", "public").await;
        insert_collection(&pool, &store, "c", "bob", "public").await;

        let all = list_collections(&pool, &ListOptions::default()).await.unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.collections.len(), 3);

        let alices = list_collections(
            &pool,
            &ListOptions {
                owner: Some("alice".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(alices.total, 2);

        let public = list_collections(
            &pool,
            &ListOptions {
                visibility: Some(Visibility::Public),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(public.total, 2);

        let page = list_collections(
            &pool,
            &ListOptions {
                skip: 1,
                limit: 1,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.collections.len(), 1);
        assert_eq!(page.collections[0].name, "b");
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let (pool, store) = test_stores().await;
        let id = insert_collection(&pool, &store, "docs", "alice", "private").await;

        let updated = update_collection(
            &pool,
            &store,
            &EmbeddingsDefaults::default(),
            id,
            CollectionUpdate {
                description: Some("knowledge base".to_string()),
                visibility: Some("public".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(updated.name, "docs");
        assert_eq!(updated.description, "knowledge base");
        assert_eq!(updated.visibility, Visibility::Public);

        let reloaded = get_collection(&pool, id).await.unwrap();
        assert_eq!(reloaded.description, "knowledge base");
        assert_eq!(reloaded.visibility, Visibility::Public);
    }

    #[tokio::test]
    async fn rename_to_taken_name_is_rejected() {
        let (pool, store) = test_stores().await;
        insert_collection(&pool, &store, "docs", "alice", "private").await;
        let id = insert_collection(&pool, &store, "notes", "alice", "private").await;

        let err = update_collection(
            &pool,
            &store,
            &EmbeddingsDefaults::default(),
            id,
            CollectionUpdate {
                name: Some("docs".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[tokio::test]
    async fn delete_removes_both_sides() {
        let (pool, store) = test_stores().await;
        let id = insert_collection(&pool, &store, "docs", "alice", "private").await;
        let collection = get_collection(&pool, id).await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        delete_collection(&pool, &store, dir.path(), id).await.unwrap();

        assert!(get_collection(&pool, id).await.is_err());
        assert!(!store
            .collection_exists(&collection.vector_store_uuid)
            .await
            .unwrap());
    }
}
