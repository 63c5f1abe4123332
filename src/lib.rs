//! # Corpus Keeper
//!
//! A local-first knowledge-base core with pluggable ingestion and retrieval.
//!
//! Corpus Keeper organises documents into collections, runs them through a
//! plugin-driven pipeline (plain text, PDF/Office extraction, URL fetching)
//! that chunks and embeds their content, and answers similarity queries over
//! the stored vectors via a CLI.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌─────────────┐
//! │   Plugins    │──▶│  Pipeline   │──▶│  SQLite ×2  │
//! │ text/doc/url │   │ chunk+embed │   │ meta │ vec  │
//! └──────────────┘   └─────────────┘   └──────┬──────┘
//!                                             │
//!                          ┌──────────────────┤
//!                          ▼                  ▼
//!                    ┌──────────┐       ┌──────────┐
//!                    │   CLI    │       │  Query   │
//!                    │ (corpus) │       │ plugins  │
//!                    └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! corpus init                              # create both databases
//! corpus collections create notes          # register a collection
//! corpus ingest file notes ./docs/faq.md   # chunk + embed a document
//! corpus query notes "release checklist"   # similarity search
//! corpus files list notes                  # ingestion status
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`collections`] | Collection CRUD across both stores |
//! | [`file_registry`] | Per-file ingestion records and status |
//! | [`plugin`] | Ingest/query plugin traits and registry |
//! | [`chunk`] | Text chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`vector_store`] | Vector persistence and similarity scan |
//! | [`ingestion`] | Upload staging and the ingest pipeline |
//! | [`query`] | Query dispatch and result envelope |
//! | [`db`] | Database connections |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod collections;
pub mod config;
pub mod db;
pub mod embedding;
pub mod file_registry;
pub mod ingest_document;
pub mod ingest_text;
pub mod ingest_url;
pub mod ingestion;
pub mod migrate;
pub mod models;
pub mod plugin;
pub mod progress;
pub mod query;
pub mod query_similarity;
pub mod tasks;
pub mod vector_store;
