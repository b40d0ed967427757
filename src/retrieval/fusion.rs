//! Reciprocal Rank Fusion for combining vector and keyword result lists

use crate::retrieval::SearchResult;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FusionError {
    #[error("Invalid weight configuration: weights must be finite, non-negative and not both zero")]
    InvalidWeights,

    #[error("Invalid RRF k: must be at least 1")]
    InvalidK,
}

/// Configuration for fusion algorithm
#[derive(Debug, Clone, PartialEq)]
pub struct FusionConfig {
    /// Smoothing constant; larger values flatten the gap between ranks
    pub rrf_k: usize,

    /// Weight for vector results
    pub vector_weight: f64,

    /// Weight for keyword results
    pub keyword_weight: f64,
}

impl FusionConfig {
    pub fn new(rrf_k: usize, vector_weight: f64, keyword_weight: f64) -> Result<Self, FusionError> {
        if rrf_k == 0 {
            return Err(FusionError::InvalidK);
        }

        let valid = |w: f64| w.is_finite() && w >= 0.0;
        if !valid(vector_weight) || !valid(keyword_weight) || vector_weight + keyword_weight <= 0.0
        {
            return Err(FusionError::InvalidWeights);
        }

        Ok(Self {
            rrf_k,
            vector_weight,
            keyword_weight,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60,
            vector_weight: 0.5,
            keyword_weight: 0.5,
        }
    }
}

/// Apply Reciprocal Rank Fusion to combine two ranked lists
///
/// Each chunk scores `weight / (rank + rrf_k)` per list it appears in, with
/// `rank` 0-indexed. The output is the union of both lists, ordered by fused
/// score descending and normalized so the best result scores exactly 1.0,
/// then truncated to `top_k`.
///
/// Payload (text, metadata) comes from the vector list when a chunk is in
/// both. Ties keep first-seen order: vector list order, then keyword list
/// order. A chunk listed twice in the same list only counts at its best rank.
pub fn reciprocal_rank_fusion(
    vector_results: &[SearchResult],
    keyword_results: &[SearchResult],
    top_k: usize,
    config: &FusionConfig,
) -> Vec<SearchResult> {
    let rrf_k = config.rrf_k as f64;
    let mut fused: Vec<SearchResult> = Vec::with_capacity(vector_results.len() + keyword_results.len());
    let mut positions: HashMap<&str, usize> = HashMap::new();

    // Vector results
    let mut seen = std::collections::HashSet::new();
    for (rank, result) in vector_results.iter().enumerate() {
        if !seen.insert(result.chunk_id.as_str()) {
            continue;
        }
        let contribution = config.vector_weight / (rank as f64 + rrf_k);

        match positions.get(result.chunk_id.as_str()) {
            Some(&pos) => fused[pos].score += contribution,
            None => {
                let mut entry = result.clone();
                entry.score = contribution;
                entry.vector_score = result.vector_score.or(Some(result.score));
                entry.rerank_score = None;
                entry.original_rank = None;
                positions.insert(result.chunk_id.as_str(), fused.len());
                fused.push(entry);
            }
        }
    }

    // Keyword results
    let mut seen = std::collections::HashSet::new();
    for (rank, result) in keyword_results.iter().enumerate() {
        if !seen.insert(result.chunk_id.as_str()) {
            continue;
        }
        let contribution = config.keyword_weight / (rank as f64 + rrf_k);
        let bm25_score = result.bm25_score.or(Some(result.score));

        match positions.get(result.chunk_id.as_str()) {
            Some(&pos) => {
                let entry = &mut fused[pos];
                entry.score += contribution;
                entry.bm25_score = bm25_score;
            }
            None => {
                let mut entry = result.clone();
                entry.score = contribution;
                entry.bm25_score = bm25_score;
                entry.rerank_score = None;
                entry.original_rank = None;
                positions.insert(result.chunk_id.as_str(), fused.len());
                fused.push(entry);
            }
        }
    }

    // Stable sort: equal scores keep first-seen order
    fused.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let max_score = fused.first().map(|r| r.score).filter(|s| *s > 0.0).unwrap_or(1.0);
    for result in &mut fused {
        result.score /= max_score;
    }

    fused.truncate(top_k);

    tracing::debug!(
        "Fused {} vector + {} keyword results into {}",
        vector_results.len(),
        keyword_results.len(),
        fused.len()
    );

    fused
}
