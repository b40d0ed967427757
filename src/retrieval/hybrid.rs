//! Query pipeline: vector and keyword retrieval, fusion, optional rerank

use crate::config::{RerankerConfig, RetrievalConfig};
use crate::embedding::EmbeddingProvider;
use crate::retrieval::{
    deduplicate_results, reciprocal_rank_fusion, FusionConfig, QueryMode, RerankStage,
    SearchQuery, SearchResult,
};
use crate::storage::{StorageBackend, StorageError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Embedding generation failed: {0}")]
    EmbeddingError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid retrieval configuration: {0}")]
    InvalidConfig(String),
}

/// Answers search queries against a storage backend
pub struct QueryService {
    embedding_provider: Arc<dyn EmbeddingProvider>,
    storage: Arc<dyn StorageBackend>,
    reranker: Option<RerankStage>,
    fusion: FusionConfig,
    reranker_config: RerankerConfig,
}

impl QueryService {
    pub fn new(
        embedding_provider: Arc<dyn EmbeddingProvider>,
        storage: Arc<dyn StorageBackend>,
        retrieval: &RetrievalConfig,
        reranker_config: RerankerConfig,
    ) -> Result<Self, SearchError> {
        let fusion = FusionConfig::new(
            retrieval.rrf_k,
            retrieval.vector_weight,
            retrieval.keyword_weight,
        )
        .map_err(|e| SearchError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            embedding_provider,
            storage,
            reranker: None,
            fusion,
            reranker_config,
        })
    }

    /// Attach a rerank stage; queries use it when reranking is switched on
    pub fn with_reranker(mut self, stage: RerankStage) -> Self {
        self.reranker = Some(stage);
        self
    }

    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Run a query and return at most `query.top_k` results, best first
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchResult>, SearchError> {
        if query.text.trim().is_empty() {
            return Err(SearchError::InvalidQuery(
                "Query text cannot be empty".to_string(),
            ));
        }
        if query.top_k == 0 {
            return Err(SearchError::InvalidQuery(
                "top_k must be at least 1".to_string(),
            ));
        }

        if self.storage.get_count().await? == 0 {
            tracing::debug!("Store is empty, nothing to search");
            return Ok(Vec::new());
        }

        let rerank = self.should_rerank(query);
        let candidate_count = if rerank {
            self.reranker_config.stage1_top_k(query.top_k)
        } else {
            query.top_k
        };

        let candidates = match query.mode {
            QueryMode::Vector => {
                self.vector_search(&query.text, candidate_count, query.similarity_threshold)
                    .await?
            }
            QueryMode::Keyword => self.storage.keyword_search(&query.text, candidate_count).await?,
            QueryMode::Hybrid => {
                let (vector_results, keyword_results) = tokio::join!(
                    self.vector_search(&query.text, candidate_count, query.similarity_threshold),
                    self.storage.keyword_search(&query.text, candidate_count)
                );
                reciprocal_rank_fusion(
                    &vector_results?,
                    &keyword_results?,
                    candidate_count,
                    &self.fusion,
                )
            }
        };

        tracing::debug!(
            "{} search for {:?} produced {} candidates",
            query.mode,
            query.text,
            candidates.len()
        );

        let results = match (&self.reranker, rerank) {
            (Some(stage), true) => stage.rerank(candidates, &query.text, query.top_k).await,
            _ => {
                let mut candidates = candidates;
                candidates.truncate(query.top_k);
                candidates
            }
        };

        Ok(deduplicate_results(results))
    }

    fn should_rerank(&self, query: &SearchQuery) -> bool {
        let requested = query.rerank.unwrap_or(self.reranker_config.enabled);
        if requested && self.reranker.is_none() {
            tracing::warn!("Reranking requested but no reranker is configured");
        }
        requested && self.reranker.is_some()
    }

    async fn vector_search(
        &self,
        text: &str,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let provider = self.embedding_provider.clone();
        let text = text.to_string();

        let embedding = tokio::task::spawn_blocking(move || provider.embed(&text))
            .await
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?
            .map_err(|e| SearchError::EmbeddingError(e.to_string()))?;

        Ok(self
            .storage
            .vector_search(&embedding, top_k, similarity_threshold)
            .await?)
    }
}
