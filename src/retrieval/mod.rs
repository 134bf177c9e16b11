//! Hybrid retrieval
//!
//! Vector similarity and keyword search run side by side and are merged with
//! Reciprocal Rank Fusion. Keyword search falls back from native full-text to
//! BM25 to substring matching depending on what the store supports.

pub mod bm25;
mod fusion;
mod hybrid;
mod keyword;
mod result;
mod vector;

pub use bm25::Bm25;
pub use fusion::{fuse_ranks, reciprocal_rank_fusion, DEFAULT_RRF_K};
pub use hybrid::{HybridSearchEngine, SearchOutcome, VectorStatus};
pub use keyword::{bm25_search, keyword_search, substring_search, KeywordOutcome};
pub use result::{SearchResult, SearchType};
pub use vector::vector_search;
