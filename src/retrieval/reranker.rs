//! Reranking stage with fallback to the pre-rerank order

use crate::retrieval::SearchResult;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RerankError {
    #[error("Reranker initialization failed: {0}")]
    InitializationError(String),

    #[error("Reranking failed: {0}")]
    RerankingError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Reranker unavailable: {0}")]
    Unavailable(String),

    #[error("Unknown reranker provider: {0}")]
    UnknownProvider(String),
}

/// A relevance scorer for a small candidate set
#[async_trait]
pub trait RerankerProvider: Send + Sync {
    /// Score `documents` against `query`
    ///
    /// Returns at most `top_k` `(index, score)` pairs, best first. Scores are
    /// provider-defined and not normalized.
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<Vec<(usize, f64)>, RerankError>;

    fn provider_name(&self) -> &str;

    /// Cheap health check; `false` means callers should not attempt to rerank
    async fn is_available(&self) -> bool;
}

/// Hands out a reranker provider on demand
#[async_trait]
pub trait RerankerSource: Send + Sync {
    async fn acquire(&self) -> Result<Arc<dyn RerankerProvider>, RerankError>;
}

/// Reorders fused candidates with a reranker, never failing the query
pub struct RerankStage {
    source: Arc<dyn RerankerSource>,
    timeout: Duration,
}

impl RerankStage {
    pub fn new(source: Arc<dyn RerankerSource>, timeout: Duration) -> Self {
        Self { source, timeout }
    }

    /// Rerank `results` for `query`, returning at most `top_k` entries
    ///
    /// Acquiring the provider, its health check and scoring share one
    /// deadline. Any error, unavailable provider or expired deadline yields
    /// `results[..top_k]` untouched.
    pub async fn rerank(
        &self,
        results: Vec<SearchResult>,
        query: &str,
        top_k: usize,
    ) -> Vec<SearchResult> {
        if results.is_empty() {
            return results;
        }

        let documents: Vec<String> = results.iter().map(|r| r.text.clone()).collect();

        let (provider_name, scored) =
            match tokio::time::timeout(self.timeout, self.score(query, &documents, top_k)).await {
                Ok(Ok(scored)) => scored,
                Ok(Err(e)) => {
                    tracing::warn!("Reranking failed, using fused order: {}", e);
                    return fallback(results, top_k);
                }
                Err(_) => {
                    tracing::warn!(
                        "Reranking timed out after {:?}, using fused order",
                        self.timeout
                    );
                    return fallback(results, top_k);
                }
            };

        let mut used = HashSet::new();
        let mut reranked = Vec::with_capacity(scored.len().min(top_k));

        for (index, relevance) in scored {
            if reranked.len() >= top_k {
                break;
            }
            let Some(original) = results.get(index) else {
                tracing::warn!("Reranker returned out-of-range index {}", index);
                continue;
            };
            if !used.insert(index) {
                continue;
            }

            let mut result = original.clone();
            result.rerank_score = Some(relevance);
            result.original_rank = Some(index + 1);
            reranked.push(result);
        }

        tracing::debug!(
            "Reranked {} candidates with {}, returning {}",
            results.len(),
            provider_name,
            reranked.len()
        );

        reranked
    }

    async fn score(
        &self,
        query: &str,
        documents: &[String],
        top_k: usize,
    ) -> Result<(String, Vec<(usize, f64)>), RerankError> {
        let provider = self.source.acquire().await?;
        let name = provider.provider_name().to_string();

        if !provider.is_available().await {
            return Err(RerankError::Unavailable(name));
        }

        let scored = provider.rerank(query, documents, top_k).await?;

        Ok((name, scored))
    }
}

fn fallback(mut results: Vec<SearchResult>, top_k: usize) -> Vec<SearchResult> {
    results.truncate(top_k);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Scores(Vec<(usize, f64)>),
        Fail,
        Hang,
    }

    struct MockReranker {
        available: bool,
        health_delay: Option<Duration>,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl MockReranker {
        fn new(available: bool, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                available,
                health_delay: None,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn stalled_health_check(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                available: true,
                health_delay: Some(Duration::from_secs(3600)),
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RerankerProvider for MockReranker {
        async fn rerank(
            &self,
            _query: &str,
            _documents: &[String],
            _top_k: usize,
        ) -> Result<Vec<(usize, f64)>, RerankError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Scores(scores) => Ok(scores.clone()),
                Behavior::Fail => Err(RerankError::RerankingError("boom".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                }
            }
        }

        fn provider_name(&self) -> &str {
            "Mock"
        }

        async fn is_available(&self) -> bool {
            if let Some(delay) = self.health_delay {
                tokio::time::sleep(delay).await;
            }
            self.available
        }
    }

    struct MockSource {
        provider: Option<Arc<MockReranker>>,
        acquired: AtomicUsize,
    }

    #[async_trait]
    impl RerankerSource for MockSource {
        async fn acquire(&self) -> Result<Arc<dyn RerankerProvider>, RerankError> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            match &self.provider {
                Some(p) => Ok(p.clone() as Arc<dyn RerankerProvider>),
                None => Err(RerankError::InitializationError("no model".to_string())),
            }
        }
    }

    fn stage(provider: Option<Arc<MockReranker>>) -> (RerankStage, Arc<MockSource>) {
        let source = Arc::new(MockSource {
            provider,
            acquired: AtomicUsize::new(0),
        });
        (
            RerankStage::new(source.clone(), Duration::from_millis(200)),
            source,
        )
    }

    fn candidates(n: usize) -> Vec<SearchResult> {
        (0..n)
            .map(|i| {
                let mut r = SearchResult::new(
                    format!("chunk_{}", i),
                    format!("Document {} content", i),
                    1.0 - i as f64 * 0.1,
                );
                r.vector_score = Some(1.0 - i as f64 * 0.1);
                r
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_input_skips_provider() {
        let provider = MockReranker::new(true, Behavior::Scores(vec![]));
        let (stage, source) = stage(Some(provider.clone()));

        let out = stage.rerank(Vec::new(), "query", 5).await;

        assert!(out.is_empty());
        assert_eq!(source.acquired.load(Ordering::SeqCst), 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_rerank_reorders_and_annotates() {
        let mut input = candidates(10);
        input[0].bm25_score = Some(0.8);
        input[2].bm25_score = Some(0.6);

        let provider = MockReranker::new(
            true,
            Behavior::Scores(vec![(5, 0.95), (2, 0.85), (0, 0.75)]),
        );
        let (stage, _) = stage(Some(provider));

        let out = stage.rerank(input.clone(), "query", 3).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].text, "Document 5 content");
        assert_eq!(out[1].text, "Document 2 content");
        assert_eq!(out[2].text, "Document 0 content");

        assert_eq!(out[0].rerank_score, Some(0.95));
        assert_eq!(out[1].rerank_score, Some(0.85));
        assert_eq!(out[2].rerank_score, Some(0.75));

        assert_eq!(out[0].original_rank, Some(6));
        assert_eq!(out[1].original_rank, Some(3));
        assert_eq!(out[2].original_rank, Some(1));

        for result in &out {
            let idx = result.original_rank.unwrap() - 1;
            assert_eq!(result.vector_score, input[idx].vector_score);
            assert_eq!(result.bm25_score, input[idx].bm25_score);
            assert_eq!(result.metadata, input[idx].metadata);
        }
    }

    #[tokio::test]
    async fn test_provider_error_falls_back() {
        let input = candidates(10);
        let provider = MockReranker::new(true, Behavior::Fail);
        let (stage, _) = stage(Some(provider.clone()));

        let out = stage.rerank(input.clone(), "query", 4).await;

        assert_eq!(out, input[..4].to_vec());
        assert!(out.iter().all(|r| r.rerank_score.is_none()));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unavailable_provider_falls_back_without_scoring() {
        let input = candidates(5);
        let provider = MockReranker::new(false, Behavior::Scores(vec![(4, 9.0)]));
        let (stage, _) = stage(Some(provider.clone()));

        let out = stage.rerank(input.clone(), "query", 3).await;

        assert_eq!(out, input[..3].to_vec());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_acquisition_failure_falls_back() {
        let input = candidates(5);
        let (stage, _) = stage(None);

        let out = stage.rerank(input.clone(), "query", 10).await;

        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_timeout_falls_back() {
        let input = candidates(4);
        let provider = MockReranker::new(true, Behavior::Hang);
        let (stage, _) = stage(Some(provider));

        let out = stage.rerank(input.clone(), "query", 2).await;

        assert_eq!(out, input[..2].to_vec());
    }

    #[tokio::test]
    async fn test_stalled_health_check_falls_back() {
        let input = candidates(4);
        let provider = MockReranker::stalled_health_check(Behavior::Scores(vec![(3, 9.0)]));
        let (stage, _) = stage(Some(provider.clone()));

        let out = tokio::time::timeout(
            Duration::from_secs(3),
            stage.rerank(input.clone(), "query", 2),
        )
        .await
        .expect("rerank must finish within its own deadline");

        assert_eq!(out, input[..2].to_vec());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    struct StalledSource;

    #[async_trait]
    impl RerankerSource for StalledSource {
        async fn acquire(&self) -> Result<Arc<dyn RerankerProvider>, RerankError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(RerankError::InitializationError("never".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stalled_acquisition_falls_back() {
        let input = candidates(3);
        let stage = RerankStage::new(Arc::new(StalledSource), Duration::from_millis(200));

        let out = tokio::time::timeout(
            Duration::from_secs(3),
            stage.rerank(input.clone(), "query", 5),
        )
        .await
        .expect("rerank must finish within its own deadline");

        assert_eq!(out, input);
    }

    #[tokio::test]
    async fn test_bad_indices_are_skipped() {
        let input = candidates(3);
        let provider = MockReranker::new(
            true,
            Behavior::Scores(vec![(7, 9.0), (1, 8.0), (1, 7.5), (2, 6.0), (0, 5.0)]),
        );
        let (stage, _) = stage(Some(provider));

        let out = stage.rerank(input, "query", 2).await;

        let ranks: Vec<_> = out.iter().map(|r| r.original_rank).collect();
        assert_eq!(ranks, vec![Some(2), Some(3)]);
    }

    #[tokio::test]
    async fn test_rerank_score_not_normalized() {
        let input = candidates(2);
        let provider = MockReranker::new(true, Behavior::Scores(vec![(1, 8.5), (0, 2.0)]));
        let (stage, _) = stage(Some(provider));

        let out = stage.rerank(input.clone(), "query", 2).await;

        assert_eq!(out[0].rerank_score, Some(8.5));
        // Pre-rerank score stays as fused
        assert_eq!(out[0].score, input[1].score);
    }
}
