//! Evidence storage
//!
//! `EvidenceStore` is the contract the retrieval and ingestion paths consume;
//! `SqliteEvidenceStore` implements it on a pooled SQLite database.

pub mod database;

pub use database::{DbPool, SqliteEvidenceStore, StoreOptions};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Project identifier; every chunk belongs to exactly one project.
pub type ProjectId = i64;

#[derive(Error, Debug)]
pub enum StoreError {
    /// An optional backend feature is missing. Expected; drives fallback selection.
    #[error("{feature} is not supported by this store: {message}")]
    Unsupported {
        feature: &'static str,
        message: String,
    },

    /// The store cannot be reached
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Embedding dimension mismatch for project {project_id}: expected {expected}, got {actual}")]
    DimensionMismatch {
        project_id: ProjectId,
        expected: usize,
        actual: usize,
    },

    #[error("Chunk {0} not found")]
    ChunkNotFound(i64),
}

impl StoreError {
    /// Connection loss or a broken database; fatal for the caller.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Sqlite(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, StoreError::Unsupported { .. })
    }
}

/// Logical category of the text a chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceType {
    SourceFile,
    Configuration,
    Readme,
    ModelCard,
    DatasetCard,
}

impl ReferenceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceType::SourceFile => "source_file",
            ReferenceType::Configuration => "configuration",
            ReferenceType::Readme => "readme",
            ReferenceType::ModelCard => "model_card",
            ReferenceType::DatasetCard => "dataset_card",
        }
    }

    /// Classify a file by its path
    pub fn infer_from_path(path: &str) -> Self {
        let lower = path.to_lowercase();
        let file_name = lower.rsplit(['/', '\\']).next().unwrap_or(&lower);

        if file_name.contains("readme") {
            ReferenceType::Readme
        } else if [".yaml", ".yml", ".json", ".toml"]
            .iter()
            .any(|ext| file_name.ends_with(ext))
        {
            ReferenceType::Configuration
        } else {
            ReferenceType::SourceFile
        }
    }
}

impl fmt::Display for ReferenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("Unknown reference type: {0}")]
pub struct ParseReferenceTypeError(String);

impl FromStr for ReferenceType {
    type Err = ParseReferenceTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "source_file" => Ok(ReferenceType::SourceFile),
            "configuration" => Ok(ReferenceType::Configuration),
            "readme" => Ok(ReferenceType::Readme),
            "model_card" => Ok(ReferenceType::ModelCard),
            "dataset_card" => Ok(ReferenceType::DatasetCard),
            other => Err(ParseReferenceTypeError(other.to_string())),
        }
    }
}

/// A chunk ready to be written
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub project_id: ProjectId,
    pub reference_type: ReferenceType,
    pub reference_path: String,
    pub commit_sha: Option<String>,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    /// Absent, or exactly the project's pinned dimension
    pub embedding: Option<Vec<f32>>,
    pub embedding_model: Option<String>,
    pub content_hash: String,
    pub meta: serde_json::Value,
}

/// Hex blake3 digest of chunk text
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// A persisted chunk without its vector
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunk {
    pub id: i64,
    pub project_id: ProjectId,
    pub reference_type: ReferenceType,
    pub reference_path: String,
    pub commit_sha: Option<String>,
    pub chunk_index: usize,
    pub text: String,
    pub token_count: usize,
    pub content_hash: String,
    pub meta: serde_json::Value,
    /// Length of the stored embedding, if any
    pub embedding_dimension: Option<usize>,
}

/// A chunk with a backend-computed value: cosine distance for vector
/// queries (lower is closer), relevance for full-text queries (higher is better).
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: StoredChunk,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(i64),
    /// Same project, reference, index and content hash already stored
    Duplicate,
}

/// Persistence contract for evidence chunks.
///
/// Implementations are blocking; async callers run them on a blocking pool.
/// Probes never mutate persistent state and report a missing feature as
/// `StoreError::Unsupported`.
pub trait EvidenceStore: Send + Sync {
    /// Idempotent on `(project_id, reference_path, chunk_index, content_hash)`
    fn insert_chunk(&self, chunk: &NewChunk) -> Result<InsertOutcome, StoreError>;

    fn chunk_exists(
        &self,
        project_id: ProjectId,
        reference_path: &str,
        chunk_index: usize,
        content_hash: &str,
    ) -> Result<bool, StoreError>;

    /// Nearest chunks by cosine distance, ascending, ties by ascending id
    fn query_by_vector_distance(
        &self,
        project_id: ProjectId,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Full-text matches by relevance, descending, ties by ascending id
    fn query_by_native_full_text(
        &self,
        project_id: ProjectId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError>;

    /// Every chunk of the project in ascending id order
    fn scan_all_chunks(&self, project_id: ProjectId) -> Result<Vec<StoredChunk>, StoreError>;

    fn count_chunks(&self, project_id: ProjectId) -> Result<usize, StoreError>;

    /// Dimension pinned for the project by its first stored embedding
    fn embedding_dimension(&self, project_id: ProjectId) -> Result<Option<usize>, StoreError>;

    /// Drop every embedding of the project and unpin its dimension
    fn clear_embeddings(&self, project_id: ProjectId) -> Result<usize, StoreError>;

    fn set_embedding(
        &self,
        chunk_id: i64,
        embedding: &[f32],
        model: Option<&str>,
    ) -> Result<(), StoreError>;

    fn probe_vector_search(&self) -> Result<(), StoreError>;

    fn probe_full_text(&self) -> Result<(), StoreError>;
}

/// Run a blocking store call off the async workers.
///
/// A panicked worker is reported as an infrastructure failure.
pub(crate) async fn run_blocking<T, F>(f: F) -> crate::error::Result<T>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| crate::error::EvidxError::Infrastructure(format!("store worker failed: {}", e)))?
        .map_err(crate::error::EvidxError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_type_inference() {
        assert_eq!(ReferenceType::infer_from_path("README.md"), ReferenceType::Readme);
        assert_eq!(
            ReferenceType::infer_from_path("docs/readme_ml.txt"),
            ReferenceType::Readme
        );
        assert_eq!(
            ReferenceType::infer_from_path("conf/train.YAML"),
            ReferenceType::Configuration
        );
        assert_eq!(
            ReferenceType::infer_from_path("pyproject.toml"),
            ReferenceType::Configuration
        );
        assert_eq!(
            ReferenceType::infer_from_path("src/train.py"),
            ReferenceType::SourceFile
        );
        // Directory names do not count
        assert_eq!(
            ReferenceType::infer_from_path("readme_assets/model.py"),
            ReferenceType::SourceFile
        );
    }

    #[test]
    fn test_reference_type_round_trip_names() {
        for t in [
            ReferenceType::SourceFile,
            ReferenceType::Configuration,
            ReferenceType::Readme,
            ReferenceType::ModelCard,
            ReferenceType::DatasetCard,
        ] {
            assert_eq!(t.as_str().parse::<ReferenceType>().unwrap(), t);
        }
        assert!("blob".parse::<ReferenceType>().is_err());
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("abc"), content_hash("abc"));
        assert_ne!(content_hash("abc"), content_hash("abd"));
        assert_eq!(content_hash("abc").len(), 64);
    }

    #[test]
    fn test_error_classification() {
        let unsupported = StoreError::Unsupported {
            feature: "vector search",
            message: "no such function".to_string(),
        };
        assert!(unsupported.is_unsupported());
        assert!(!unsupported.is_infrastructure());

        assert!(StoreError::Connection("refused".to_string()).is_infrastructure());
        assert!(!StoreError::ChunkNotFound(1).is_infrastructure());
    }
}
