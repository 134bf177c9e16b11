//! Keyword search with a fixed fallback chain
//!
//! Native full-text when the store has it, otherwise BM25 over the project's
//! chunks, otherwise case-insensitive substring matching. One mode is chosen
//! up front for each query and nothing else runs for that query.

use std::cmp::Ordering;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::bm25::{self, Bm25};
use super::{SearchResult, SearchType};
use crate::capability::{CapabilitySnapshot, KeywordMode};
use crate::storage::{EvidenceStore, ProjectId, StoreError, StoredChunk};

/// Keyword results and the mode that produced them.
///
/// `mode` is `None` when the search was cancelled before a mode could be chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct KeywordOutcome {
    pub mode: Option<KeywordMode>,
    pub results: Vec<SearchResult>,
}

impl KeywordOutcome {
    fn cancelled() -> Self {
        Self {
            mode: None,
            results: Vec::new(),
        }
    }
}

pub fn keyword_search(
    store: &dyn EvidenceStore,
    capabilities: &CapabilitySnapshot,
    project_id: ProjectId,
    query: &str,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<KeywordOutcome, StoreError> {
    if cancel.is_cancelled() {
        return Ok(KeywordOutcome::cancelled());
    }

    if capabilities.native_full_text_available {
        info!("Keyword search for project {}: mode=native", project_id);
        let results = match store.query_by_native_full_text(project_id, query, limit) {
            Ok(rows) => rows
                .into_iter()
                .map(|row| SearchResult::from_chunk(row.chunk, row.score, SearchType::Keyword))
                .collect(),
            Err(StoreError::Unsupported { message, .. }) => {
                warn!("Native full-text search failed: {}", message);
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        return Ok(KeywordOutcome {
            mode: Some(KeywordMode::Native),
            results,
        });
    }

    let chunks = store.scan_all_chunks(project_id)?;
    if cancel.is_cancelled() {
        debug!("Keyword search for project {} cancelled after scan", project_id);
        return Ok(KeywordOutcome::cancelled());
    }
    let query_tokens = bm25::tokenize(query);

    let (mode, results) = if chunks.is_empty() || query_tokens.is_empty() {
        (KeywordMode::Substring, substring_search(chunks, query, limit))
    } else {
        (KeywordMode::Bm25, bm25_search(chunks, &query_tokens, limit))
    };

    info!(
        "Keyword search for project {}: mode={} hits={}",
        project_id,
        mode,
        results.len()
    );

    Ok(KeywordOutcome {
        mode: Some(mode),
        results,
    })
}

/// Rank by BM25, descending, ties by ascending id; zero scores are dropped.
pub fn bm25_search(chunks: Vec<StoredChunk>, query_tokens: &[String], limit: usize) -> Vec<SearchResult> {
    let documents: Vec<Vec<String>> = chunks.iter().map(|c| bm25::tokenize(&c.text)).collect();
    let scores = Bm25::default().score(&documents, query_tokens);

    let mut scored: Vec<(StoredChunk, f64)> = chunks
        .into_iter()
        .zip(scores)
        .filter(|(_, score)| *score > 0.0)
        .collect();

    scored.sort_by(|(a, sa), (b, sb)| match sb.total_cmp(sa) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
    scored.truncate(limit);

    debug!("BM25 matched {} chunks", scored.len());

    scored
        .into_iter()
        .map(|(chunk, score)| SearchResult::from_chunk(chunk, score, SearchType::Keyword))
        .collect()
}

/// Whole-query containment, ascending id, uniform score of 1.0
pub fn substring_search(chunks: Vec<StoredChunk>, query: &str, limit: usize) -> Vec<SearchResult> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut matches: Vec<SearchResult> = chunks
        .into_iter()
        .filter(|c| c.text.to_lowercase().contains(&needle))
        .map(|c| SearchResult::from_chunk(c, 1.0, SearchType::Keyword))
        .collect();

    matches.sort_by_key(|r| r.id);
    matches.truncate(limit);
    matches
}
