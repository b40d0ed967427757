//! Cross-encoder reranking using FastEmbed

use crate::retrieval::reranker::{RerankError, RerankerProvider};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "bge-reranker-base";

/// Local cross-encoder reranker
///
/// The model is loaded once at construction (downloaded on first use) and
/// inference runs on the blocking pool.
pub struct CrossEncoderReranker {
    model: Arc<TextRerank>,
    model_name: String,
}

impl CrossEncoderReranker {
    /// Load the named model; blocks while the weights are fetched and loaded
    pub fn new(model_name: &str) -> Result<Self, RerankError> {
        let model = resolve_model(model_name)?;

        tracing::info!("Initializing reranker model: {}", model_name);

        let init_options = RerankInitOptions::new(model).with_show_download_progress(true);

        let model = TextRerank::try_new(init_options)
            .map_err(|e| RerankError::InitializationError(e.to_string()))?;

        Ok(Self {
            model: Arc::new(model),
            model_name: model_name.to_string(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn resolve_model(model_name: &str) -> Result<RerankerModel, RerankError> {
    match model_name {
        "bge-reranker-base" | "BAAI/bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "bge-reranker-v2-m3" | "BAAI/bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jina-reranker-v1-turbo-en" | "jinaai/jina-reranker-v1-turbo-en" => {
            Ok(RerankerModel::JINARerankerV1TurboEn)
        }
        other => Err(RerankError::InitializationError(format!(
            "Unsupported reranker model: {}. Supported: bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
            other
        ))),
    }
}

#[async_trait]
impl RerankerProvider for CrossEncoderReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f64)>, RerankError> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        if query.is_empty() {
            return Err(RerankError::InvalidInput(
                "Query cannot be empty".to_string(),
            ));
        }

        let model = self.model.clone();
        let query = query.to_string();
        let documents = documents.to_vec();

        let results = tokio::task::spawn_blocking(move || {
            let docs: Vec<&str> = documents.iter().map(|s| s.as_str()).collect();
            model.rerank(query.as_str(), docs, false, None)
        })
        .await
        .map_err(|e| RerankError::RerankingError(e.to_string()))?
        .map_err(|e| RerankError::RerankingError(e.to_string()))?;

        let mut scored: Vec<(usize, f64)> = results
            .into_iter()
            .map(|r| (r.index, r.score as f64))
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored)
    }

    fn provider_name(&self) -> &str {
        "CrossEncoder"
    }

    async fn is_available(&self) -> bool {
        // Construction fails if the model cannot be loaded
        true
    }
}
