//! Reciprocal Rank Fusion for combining search results

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use std::cmp::Ordering;

use super::{SearchResult, SearchType};

/// RRF K constant
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fuse ranked id lists.
///
/// RRF formula: score(id) = sum over lists containing id of 1 / (k + rank),
/// with ranks starting at 1 in each list. Sorted by score descending, ties by
/// ascending id. Repeated ids within one list count at their first rank.
pub fn fuse_ranks(lists: &[&[i64]], rrf_k: f64) -> Vec<(i64, f64)> {
    let mut scores: HashMap<i64, f64> = HashMap::new();

    for list in lists {
        let mut seen = HashSet::with_capacity(list.len());
        for (rank, &id) in list.iter().enumerate() {
            if !seen.insert(id) {
                continue;
            }
            *scores.entry(id).or_insert(0.0) += 1.0 / (rrf_k + rank as f64 + 1.0);
        }
    }

    let mut fused: Vec<(i64, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| match b.1.total_cmp(&a.1) {
        Ordering::Equal => a.0.cmp(&b.0),
        other => other,
    });
    fused
}

/// Merge vector and keyword results into at most `limit` hybrid results.
///
/// When only one list has results it passes through unchanged, keeping its own
/// `search_type` and scores.
pub fn reciprocal_rank_fusion(
    vector_results: Vec<SearchResult>,
    keyword_results: Vec<SearchResult>,
    rrf_k: f64,
    limit: usize,
) -> Vec<SearchResult> {
    match (vector_results.is_empty(), keyword_results.is_empty()) {
        (true, true) => return Vec::new(),
        (false, true) => return truncated(vector_results, limit),
        (true, false) => return truncated(keyword_results, limit),
        (false, false) => {}
    }

    let vector_ids: Vec<i64> = vector_results.iter().map(|r| r.id).collect();
    let keyword_ids: Vec<i64> = keyword_results.iter().map(|r| r.id).collect();
    let fused = fuse_ranks(&[&vector_ids, &keyword_ids], rrf_k);

    let mut by_id: HashMap<i64, SearchResult> = HashMap::with_capacity(fused.len());
    for result in keyword_results.into_iter().chain(vector_results) {
        by_id.insert(result.id, result);
    }

    fused
        .into_iter()
        .take(limit)
        .filter_map(|(id, score)| {
            by_id.remove(&id).map(|mut result| {
                result.score = score;
                result.search_type = SearchType::Hybrid;
                result
            })
        })
        .collect()
}

fn truncated(mut results: Vec<SearchResult>, limit: usize) -> Vec<SearchResult> {
    results.truncate(limit);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::ReferenceType;

    fn result(id: i64, score: f64, search_type: SearchType) -> SearchResult {
        SearchResult {
            id,
            project_id: 1,
            reference_path: format!("f{}", id),
            reference_type: ReferenceType::SourceFile,
            commit_sha: None,
            chunk_index: 0,
            text: String::new(),
            token_count: 0,
            meta: serde_json::Value::Null,
            score,
            search_type,
        }
    }

    #[test]
    fn test_rrf_crossed_lists() {
        let fused = fuse_ranks(&[&[5, 2, 9], &[2, 5, 7]], 60.0);
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();

        // 5 and 2 both sit at ranks 1 and 2, so they tie and the lower id wins
        assert_eq!(ids, vec![2, 5, 7, 9]);

        let score = |id| fused.iter().find(|(i, _)| *i == id).unwrap().1;
        assert_eq!(score(5), 1.0 / 61.0 + 1.0 / 62.0);
        assert_eq!(score(2), score(5));
        assert_eq!(score(9), 1.0 / 63.0);
        assert_eq!(score(7), 1.0 / 63.0);
        assert!((score(5) - 0.03253).abs() < 1e-5);
        assert!((score(9) - 0.01587).abs() < 1e-5);
    }

    #[test]
    fn test_rrf_agreement_ranks_first() {
        let fused = fuse_ranks(&[&[5, 2, 9], &[5, 7, 2]], 60.0);
        let ids: Vec<i64> = fused.iter().map(|(id, _)| *id).collect();

        assert_eq!(ids, vec![5, 2, 7, 9]);
        assert_eq!(fused[0].1, 2.0 / 61.0);
        assert_eq!(fused[1].1, 1.0 / 62.0 + 1.0 / 63.0);
    }

    #[test]
    fn test_single_list_passes_through() {
        let vector = vec![
            result(3, 0.9, SearchType::Vector),
            result(1, 0.5, SearchType::Vector),
            result(2, 0.1, SearchType::Vector),
        ];
        let fused = reciprocal_rank_fusion(vector.clone(), Vec::new(), 60.0, 2);

        assert_eq!(fused, vector[..2].to_vec());

        let keyword = vec![result(4, 7.0, SearchType::Keyword)];
        let fused = reciprocal_rank_fusion(Vec::new(), keyword.clone(), 60.0, 5);
        assert_eq!(fused, keyword);
    }

    #[test]
    fn test_both_lists_marked_hybrid() {
        let vector = vec![
            result(5, 0.9, SearchType::Vector),
            result(2, 0.8, SearchType::Vector),
            result(9, 0.7, SearchType::Vector),
        ];
        let keyword = vec![
            result(2, 3.0, SearchType::Keyword),
            result(5, 2.0, SearchType::Keyword),
            result(7, 1.0, SearchType::Keyword),
        ];

        let fused = reciprocal_rank_fusion(vector, keyword, 60.0, 3);
        let ids: Vec<i64> = fused.iter().map(|r| r.id).collect();

        assert_eq!(ids, vec![2, 5, 7]);
        assert!(fused.iter().all(|r| r.search_type == SearchType::Hybrid));
        assert_eq!(fused[2].score, 1.0 / 63.0);
    }

    #[test]
    fn test_empty_inputs() {
        assert!(reciprocal_rank_fusion(Vec::new(), Vec::new(), 60.0, 10).is_empty());
    }

    #[test]
    fn test_duplicate_ids_use_first_rank() {
        let fused = fuse_ranks(&[&[1, 1, 2]], 60.0);
        assert_eq!(fused, vec![(1, 1.0 / 61.0), (2, 1.0 / 63.0)]);
    }
}
