//! Backend capability detection
//!
//! Probed once per session. The resulting snapshot is immutable and shared
//! read-only by every search; picking up a backend change needs a new probe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::storage::{EvidenceStore, StoreError};

/// Which optional store features are usable this session
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapabilitySnapshot {
    pub vector_search_available: bool,
    pub native_full_text_available: bool,
    pub detected_at: DateTime<Utc>,
}

impl CapabilitySnapshot {
    /// Snapshot with preset flags, for tests and callers that already know
    pub fn fixed(vector_search_available: bool, native_full_text_available: bool) -> Self {
        Self {
            vector_search_available,
            native_full_text_available,
            detected_at: Utc::now(),
        }
    }
}

pub struct CapabilityDetector;

impl CapabilityDetector {
    /// Probe both features.
    ///
    /// A missing feature yields `false`; any other probe failure is returned as
    /// an error, since it means the store itself is unusable.
    pub fn detect(store: &dyn EvidenceStore) -> Result<CapabilitySnapshot, StoreError> {
        let vector_search_available = Self::probe("vector search", store.probe_vector_search())?;
        let native_full_text_available =
            Self::probe("native full-text", store.probe_full_text())?;

        let snapshot = CapabilitySnapshot {
            vector_search_available,
            native_full_text_available,
            detected_at: Utc::now(),
        };

        info!(
            "Store capabilities: vector={} full_text={}",
            snapshot.vector_search_available, snapshot.native_full_text_available
        );

        Ok(snapshot)
    }

    fn probe(name: &str, outcome: Result<(), StoreError>) -> Result<bool, StoreError> {
        match outcome {
            Ok(()) => Ok(true),
            Err(StoreError::Unsupported { message, .. }) => {
                debug!("{} unavailable: {}", name, message);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Keyword strategy serving a query; exactly one runs per query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeywordMode {
    Native,
    Bm25,
    Substring,
}

impl KeywordMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeywordMode::Native => "native",
            KeywordMode::Bm25 => "bm25",
            KeywordMode::Substring => "substring",
        }
    }
}

impl fmt::Display for KeywordMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observability view of what a project's searches can use
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityReport {
    pub vector_available: bool,
    pub full_text_mode: KeywordMode,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub embedding_dimension: Option<usize>,
    pub embedding_ready: bool,
    pub rrf_k: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InsertOutcome, NewChunk, ProjectId, ScoredChunk, StoredChunk};

    struct ProbeOnly {
        vector: fn() -> Result<(), StoreError>,
        full_text: fn() -> Result<(), StoreError>,
    }

    fn ok() -> Result<(), StoreError> {
        Ok(())
    }

    fn unsupported() -> Result<(), StoreError> {
        Err(StoreError::Unsupported {
            feature: "test",
            message: "no such module: fts5".to_string(),
        })
    }

    fn down() -> Result<(), StoreError> {
        Err(StoreError::Connection("refused".to_string()))
    }

    impl EvidenceStore for ProbeOnly {
        fn insert_chunk(&self, _: &NewChunk) -> Result<InsertOutcome, StoreError> {
            unimplemented!()
        }
        fn chunk_exists(&self, _: ProjectId, _: &str, _: usize, _: &str) -> Result<bool, StoreError> {
            unimplemented!()
        }
        fn query_by_vector_distance(
            &self,
            _: ProjectId,
            _: &[f32],
            _: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            unimplemented!()
        }
        fn query_by_native_full_text(
            &self,
            _: ProjectId,
            _: &str,
            _: usize,
        ) -> Result<Vec<ScoredChunk>, StoreError> {
            unimplemented!()
        }
        fn scan_all_chunks(&self, _: ProjectId) -> Result<Vec<StoredChunk>, StoreError> {
            unimplemented!()
        }
        fn count_chunks(&self, _: ProjectId) -> Result<usize, StoreError> {
            unimplemented!()
        }
        fn embedding_dimension(&self, _: ProjectId) -> Result<Option<usize>, StoreError> {
            unimplemented!()
        }
        fn clear_embeddings(&self, _: ProjectId) -> Result<usize, StoreError> {
            unimplemented!()
        }
        fn set_embedding(&self, _: i64, _: &[f32], _: Option<&str>) -> Result<(), StoreError> {
            unimplemented!()
        }
        fn probe_vector_search(&self) -> Result<(), StoreError> {
            (self.vector)()
        }
        fn probe_full_text(&self) -> Result<(), StoreError> {
            (self.full_text)()
        }
    }

    #[test]
    fn test_detect_both_available() {
        let store = ProbeOnly {
            vector: ok,
            full_text: ok,
        };
        let snapshot = CapabilityDetector::detect(&store).unwrap();
        assert!(snapshot.vector_search_available);
        assert!(snapshot.native_full_text_available);
    }

    #[test]
    fn test_unsupported_is_not_an_error() {
        let store = ProbeOnly {
            vector: unsupported,
            full_text: ok,
        };
        let snapshot = CapabilityDetector::detect(&store).unwrap();
        assert!(!snapshot.vector_search_available);
        assert!(snapshot.native_full_text_available);
    }

    #[test]
    fn test_connection_failure_surfaces() {
        let store = ProbeOnly {
            vector: ok,
            full_text: down,
        };
        let err = CapabilityDetector::detect(&store).unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[test]
    fn test_keyword_mode_serialization() {
        assert_eq!(serde_json::to_string(&KeywordMode::Bm25).unwrap(), "\"bm25\"");
        assert_eq!(KeywordMode::Substring.to_string(), "substring");
    }
}
