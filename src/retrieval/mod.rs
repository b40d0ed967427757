//! Hybrid retrieval & reranking
//!
//! Combines vector similarity and BM25 keyword search with Reciprocal Rank
//! Fusion, then optionally reorders the fused candidates with a reranker.

mod deduplication;
mod fusion;
mod hybrid;
pub mod providers;
mod reranker;

pub use deduplication::deduplicate_results;
pub use fusion::{reciprocal_rank_fusion, FusionConfig, FusionError};
pub use hybrid::{QueryService, SearchError};
pub use providers::{RerankerKind, RerankerRegistry};
pub use reranker::{RerankError, RerankStage, RerankerProvider, RerankerSource};

use crate::storage::Metadata;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A retrieved chunk with its scores as it moves through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Chunk identifier, unique within a store
    pub chunk_id: String,

    /// Chunk content
    pub text: String,

    /// Source path, sequence, language, ...
    #[serde(default)]
    pub metadata: Metadata,

    /// Relevance in [0.0, 1.0], higher is better
    pub score: f64,

    /// Raw similarity from vector search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vector_score: Option<f64>,

    /// Raw BM25 score from keyword search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bm25_score: Option<f64>,

    /// Provider-defined relevance from the reranker, not normalized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,

    /// 1-indexed position before reranking
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_rank: Option<usize>,
}

impl SearchResult {
    pub fn new(chunk_id: impl Into<String>, text: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            text: text.into(),
            metadata: Metadata::new(),
            score,
            vector_score: None,
            bm25_score: None,
            rerank_score: None,
            original_rank: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The `source` metadata entry, if it is a string
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(|v| v.as_str())
    }

    /// Get a short preview of the text (first N characters)
    pub fn preview(&self, max_chars: usize) -> String {
        match self.text.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &self.text[..end]),
            None => self.text.clone(),
        }
    }
}

/// Which first-stage retrievers a query uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    Vector,
    Keyword,
    #[default]
    Hybrid,
}

impl FromStr for QueryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(QueryMode::Vector),
            "keyword" | "bm25" => Ok(QueryMode::Keyword),
            "hybrid" => Ok(QueryMode::Hybrid),
            other => Err(format!("Unknown query mode: {}", other)),
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryMode::Vector => "vector",
            QueryMode::Keyword => "keyword",
            QueryMode::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

/// Search query with retrieval options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text
    pub text: String,

    /// Maximum number of results
    pub top_k: usize,

    pub mode: QueryMode,

    /// Minimum cosine similarity for vector hits
    pub similarity_threshold: f32,

    /// Override of the configured reranking switch
    pub rerank: Option<bool>,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, top_k: usize) -> Self {
        Self {
            text: text.into(),
            top_k,
            mode: QueryMode::Hybrid,
            similarity_threshold: 0.0,
            rerank: None,
        }
    }

    pub fn with_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rerank(mut self, rerank: bool) -> Self {
        self.rerank = Some(rerank);
        self
    }
}
