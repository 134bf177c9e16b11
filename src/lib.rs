//! evidx - evidence indexing and hybrid retrieval
//!
//! Splits project evidence into token-bounded chunks, embeds them through one
//! of several providers, and answers queries by fusing vector similarity and
//! keyword rankings with Reciprocal Rank Fusion. Keyword search degrades from
//! native full-text to BM25 to substring matching as store features go missing.

pub mod capability;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod ingest;
pub mod retrieval;
pub mod storage;

pub use error::{EvidxError, Result};
