use serde::{Deserialize, Serialize};
use std::fmt;

use crate::storage::{ProjectId, ReferenceType, StoredChunk};

/// Which search produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Vector,
    Keyword,
    Hybrid,
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SearchType::Vector => "vector",
            SearchType::Keyword => "keyword",
            SearchType::Hybrid => "hybrid",
        })
    }
}

/// One ranked hit.
///
/// `score` is only comparable between results of the same `search_type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: i64,
    pub project_id: ProjectId,
    pub reference_path: String,
    pub reference_type: ReferenceType,
    pub commit_sha: Option<String>,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub meta: serde_json::Value,
    pub score: f64,
    pub search_type: SearchType,
}

impl SearchResult {
    pub fn from_chunk(chunk: StoredChunk, score: f64, search_type: SearchType) -> Self {
        Self {
            id: chunk.id,
            project_id: chunk.project_id,
            reference_path: chunk.reference_path,
            reference_type: chunk.reference_type,
            commit_sha: chunk.commit_sha,
            chunk_index: chunk.chunk_index,
            text: chunk.text,
            token_count: chunk.token_count,
            meta: chunk.meta,
            score,
            search_type,
        }
    }
}
