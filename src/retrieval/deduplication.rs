//! Result deduplication by chunk ID

use crate::retrieval::SearchResult;
use std::collections::HashSet;

/// Deduplicate results by chunk_id, keeping the first (highest-ranked) instance
pub fn deduplicate_results(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen: HashSet<String> = HashSet::new();

    results
        .into_iter()
        .filter(|result| seen.insert(result.chunk_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deduplication() {
        let results = vec![
            SearchResult::new("c1", "text1", 0.9),
            SearchResult::new("c2", "text2", 0.8),
            SearchResult::new("c1", "text1", 0.7), // Duplicate
        ];

        let deduped = deduplicate_results(results);

        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].chunk_id, "c1");
        assert_eq!(deduped[0].score, 0.9); // Keeps first
        assert_eq!(deduped[1].chunk_id, "c2");
    }
}
