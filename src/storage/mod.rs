//! Storage layer for Quarry
//!
//! Defines the backend contract the retrieval and folder lifecycle code
//! consumes, plus a SQLite + tantivy implementation of it.

pub mod chunk_store;
pub mod database;

use crate::embedding::KeywordIndexError;
use crate::retrieval::SearchResult;
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

pub use chunk_store::ChunkStore;
pub use database::{Database, DbPool};

/// Scalar metadata attached to a chunk (source path, sequence, language, ...)
pub type Metadata = BTreeMap<String, serde_json::Value>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Keyword index error: {0}")]
    KeywordIndex(#[from] KeywordIndexError),

    #[error("Metadata serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage task failed: {0}")]
    Task(String),

    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Task(e.to_string())
    }
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Chunk storage with vector similarity and keyword search
///
/// Implementations own their concurrency (connection pools, index locks).
/// Callers surface every error; nothing here is retried.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Nearest chunks by cosine similarity, best first
    async fn vector_search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        similarity_threshold: f32,
    ) -> StorageResult<Vec<SearchResult>>;

    /// Chunks ranked by BM25 relevance, best first
    async fn keyword_search(&self, query: &str, top_k: usize) -> StorageResult<Vec<SearchResult>>;

    /// Insert or replace chunks; all slices must have the same length
    async fn upsert_documents(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        documents: &[String],
        metadatas: &[Metadata],
    ) -> StorageResult<()>;

    /// Delete chunks by id, returning how many existed
    async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<usize>;

    /// Delete every chunk whose metadata matches all entries of `filter`
    async fn delete_by_metadata(&self, filter: &Metadata) -> StorageResult<usize>;

    /// Total number of stored chunks
    async fn get_count(&self) -> StorageResult<usize>;
}
