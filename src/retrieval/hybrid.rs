//! Hybrid search combining vector and keyword search

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::fusion::reciprocal_rank_fusion;
use super::keyword::{keyword_search, KeywordOutcome};
use super::vector::vector_search;
use super::SearchResult;
use crate::capability::{CapabilityReport, CapabilitySnapshot, KeywordMode};
use crate::config::SearchConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EvidxError, Result};
use crate::storage::{run_blocking, EvidenceStore, ProjectId};

/// How the vector leg of a query ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorStatus {
    Completed,
    /// Store has no vector search
    Unavailable,
    /// No provider configured, or it has no credentials
    NoProvider,
    /// The query itself could not be embedded
    EmbeddingFailed,
    TimedOut,
    /// Blank query or zero limit
    NotRun,
}

/// Full account of one hybrid query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    /// Keyword mode that executed, `None` if the keyword leg timed out first
    pub keyword_mode: Option<KeywordMode>,
    pub vector_status: VectorStatus,
    pub vector_hits: usize,
    pub keyword_hits: usize,
}

impl SearchOutcome {
    fn not_run() -> Self {
        Self {
            results: Vec::new(),
            keyword_mode: None,
            vector_status: VectorStatus::NotRun,
            vector_hits: 0,
            keyword_hits: 0,
        }
    }
}

/// Hybrid search engine over one evidence store
pub struct HybridSearchEngine {
    store: Arc<dyn EvidenceStore>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    capabilities: Arc<CapabilitySnapshot>,
    config: SearchConfig,
}

impl HybridSearchEngine {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        capabilities: Arc<CapabilitySnapshot>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            provider,
            capabilities,
            config,
        }
    }

    pub fn capabilities(&self) -> &CapabilitySnapshot {
        &self.capabilities
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Ranked results for `query`, at most `k`
    pub async fn search(&self, project_id: ProjectId, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        Ok(self.search_detailed(project_id, query, k).await?.results)
    }

    /// Runs both legs concurrently under one deadline and fuses what comes back.
    ///
    /// Sub-search failures degrade to empty contributions. Only store
    /// infrastructure errors are returned.
    pub async fn search_detailed(
        &self,
        project_id: ProjectId,
        query: &str,
        k: usize,
    ) -> Result<SearchOutcome> {
        let query = query.trim();
        if query.is_empty() || k == 0 {
            return Ok(SearchOutcome::not_run());
        }

        let fetch = k.saturating_mul(self.config.overfetch_factor.max(1));
        let deadline = Instant::now() + Duration::from_millis(self.config.sub_search_timeout_ms);
        let cancel = CancellationToken::new();

        let (vector, keyword) = tokio::join!(
            self.vector_leg(project_id, query, fetch, deadline, &cancel),
            self.keyword_leg(project_id, query, fetch, deadline, &cancel),
        );
        let (vector_status, vector_results) = vector?;
        let keyword = keyword?;

        let vector_hits = vector_results.len();
        let keyword_hits = keyword.results.len();
        let results = reciprocal_rank_fusion(vector_results, keyword.results, self.config.rrf_k, k);

        debug!(
            "Fused {} vector + {} keyword results into {}",
            vector_hits,
            keyword_hits,
            results.len()
        );
        info!(
            "Hybrid search for project {} returned {} results (vector: {:?}, keyword: {})",
            project_id,
            results.len(),
            vector_status,
            keyword.mode.map(|m| m.as_str()).unwrap_or("timed out")
        );

        Ok(SearchOutcome {
            results,
            keyword_mode: keyword.mode,
            vector_status,
            vector_hits,
            keyword_hits,
        })
    }

    async fn vector_leg(
        &self,
        project_id: ProjectId,
        query: &str,
        limit: usize,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<(VectorStatus, Vec<SearchResult>)> {
        if !self.capabilities.vector_search_available {
            return Ok((VectorStatus::Unavailable, Vec::new()));
        }
        let provider = match &self.provider {
            Some(p) if p.is_ready() => Arc::clone(p),
            _ => return Ok((VectorStatus::NoProvider, Vec::new())),
        };

        let work = async {
            let embedding = match provider.embed(query).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("Query embedding failed, skipping vector search: {}", e);
                    return Ok((VectorStatus::EmbeddingFailed, Vec::new()));
                }
            };

            let store = Arc::clone(&self.store);
            let token = cancel.clone();
            let results = run_blocking(move || {
                vector_search(store.as_ref(), project_id, &embedding, limit, &token)
            })
            .await?;
            Ok::<_, EvidxError>((VectorStatus::Completed, results))
        };

        match timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!("Vector search for project {} timed out", project_id);
                Ok((VectorStatus::TimedOut, Vec::new()))
            }
        }
    }

    async fn keyword_leg(
        &self,
        project_id: ProjectId,
        query: &str,
        limit: usize,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<KeywordOutcome> {
        let store = Arc::clone(&self.store);
        let capabilities = Arc::clone(&self.capabilities);
        let query = query.to_string();
        let token = cancel.clone();

        let work = run_blocking(move || {
            keyword_search(store.as_ref(), &capabilities, project_id, &query, limit, &token)
        });

        match timeout_at(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => {
                cancel.cancel();
                warn!("Keyword search for project {} timed out", project_id);
                Ok(KeywordOutcome {
                    mode: None,
                    results: Vec::new(),
                })
            }
        }
    }

    /// Capability report as the next query would see it.
    ///
    /// Without a project the keyword mode is the nominal fallback, since the
    /// substring case depends on a project's corpus being empty.
    pub async fn capability_report(&self, project_id: Option<ProjectId>) -> Result<CapabilityReport> {
        let full_text_mode = match project_id {
            _ if self.capabilities.native_full_text_available => KeywordMode::Native,
            None => KeywordMode::Bm25,
            Some(project_id) => {
                let store = Arc::clone(&self.store);
                let count = run_blocking(move || store.count_chunks(project_id)).await?;
                if count > 0 {
                    KeywordMode::Bm25
                } else {
                    KeywordMode::Substring
                }
            }
        };

        let provider = self.provider.as_deref();
        Ok(CapabilityReport {
            vector_available: self.capabilities.vector_search_available,
            full_text_mode,
            embedding_provider: provider.map(|p| p.kind().to_string()),
            embedding_model: provider.map(|p| p.model_name().to_string()),
            embedding_dimension: provider.map(|p| p.dimension()),
            embedding_ready: provider.map(|p| p.is_ready()).unwrap_or(false),
            rrf_k: self.config.rrf_k,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{InsertOutcome, NewChunk, ScoredChunk, StoreError, StoredChunk};

    /// Store that fails every call with a connection error
    struct Unreachable;

    impl EvidenceStore for Unreachable {
        fn insert_chunk(&self, _chunk: &NewChunk) -> std::result::Result<InsertOutcome, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn chunk_exists(
            &self,
            _project_id: ProjectId,
            _reference_path: &str,
            _chunk_index: usize,
            _content_hash: &str,
        ) -> std::result::Result<bool, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn query_by_vector_distance(
            &self,
            _project_id: ProjectId,
            _query: &[f32],
            _limit: usize,
        ) -> std::result::Result<Vec<ScoredChunk>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn query_by_native_full_text(
            &self,
            _project_id: ProjectId,
            _query: &str,
            _limit: usize,
        ) -> std::result::Result<Vec<ScoredChunk>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn scan_all_chunks(&self, _project_id: ProjectId) -> std::result::Result<Vec<StoredChunk>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn count_chunks(&self, _project_id: ProjectId) -> std::result::Result<usize, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn embedding_dimension(&self, _project_id: ProjectId) -> std::result::Result<Option<usize>, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn clear_embeddings(&self, _project_id: ProjectId) -> std::result::Result<usize, StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn set_embedding(
            &self,
            _chunk_id: i64,
            _embedding: &[f32],
            _model: Option<&str>,
        ) -> std::result::Result<(), StoreError> {
            Err(StoreError::Connection("down".into()))
        }
        fn probe_vector_search(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
        fn probe_full_text(&self) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    fn engine(snapshot: CapabilitySnapshot) -> HybridSearchEngine {
        HybridSearchEngine::new(
            Arc::new(Unreachable),
            None,
            Arc::new(snapshot),
            SearchConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_blank_query_is_not_run() {
        let engine = engine(CapabilitySnapshot::fixed(false, false));

        let outcome = engine.search_detailed(1, "   ", 5).await.unwrap();
        assert_eq!(outcome, SearchOutcome::not_run());

        assert!(engine.search(1, "cats", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connection_failure_is_fatal() {
        let engine = engine(CapabilitySnapshot::fixed(false, true));

        let err = engine.search(1, "cats", 5).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    #[tokio::test]
    async fn test_vector_leg_without_provider() {
        let engine = engine(CapabilitySnapshot::fixed(true, false));

        // keyword leg still hits the broken store
        assert!(engine.search_detailed(1, "cats", 5).await.is_err());

        let (status, results) = engine
            .vector_leg(1, "cats", 5, Instant::now() + Duration::from_secs(1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(status, VectorStatus::NoProvider);
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_capability_report_native() {
        let engine = engine(CapabilitySnapshot::fixed(true, true));
        let report = engine.capability_report(Some(1)).await.unwrap();

        assert!(report.vector_available);
        assert_eq!(report.full_text_mode, KeywordMode::Native);
        assert!(!report.embedding_ready);
        assert_eq!(report.embedding_provider, None);
        assert_eq!(report.rrf_k, 60.0);
    }
}
