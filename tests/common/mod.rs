#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use evidx::embedding::{EmbeddingError, EmbeddingProvider, EmbeddingResult, ProviderKind};
use evidx::storage::{
    EvidenceStore, InsertOutcome, NewChunk, ProjectId, ScoredChunk, SqliteEvidenceStore,
    StoreError, StoreOptions, StoredChunk,
};

/// Axes of the concept space used by `ConceptProvider`
pub const CONCEPTS: [&str; 3] = ["cat", "dog", "pet"];

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    Normal,
    /// Every call fails with a permanent error
    Broken,
    /// Every call sleeps before answering
    Slow(Duration),
}

/// Deterministic embedder: one axis per concept word found in the text, plus a
/// small constant axis so that no vector is zero.
pub struct ConceptProvider {
    pub behaviour: Behaviour,
    pub dimension: usize,
    pub ready: bool,
    pub calls: AtomicUsize,
}

impl ConceptProvider {
    pub fn new() -> Self {
        Self {
            behaviour: Behaviour::Normal,
            dimension: CONCEPTS.len() + 1,
            ready: true,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_behaviour(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            ..Self::new()
        }
    }

    /// Pads vectors to `dimension` with zeros
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::new()
        }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; self.dimension];
        for (axis, concept) in CONCEPTS.iter().enumerate() {
            if axis < self.dimension && lower.contains(concept) {
                v[axis] = 1.0;
            }
        }
        if CONCEPTS.len() < self.dimension {
            v[CONCEPTS.len()] = 0.1;
        }
        v
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for ConceptProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            Behaviour::Normal => {}
            Behaviour::Broken => {
                return Err(EmbeddingError::AuthenticationFailed {
                    message: "bad key".to_string(),
                })
            }
            Behaviour::Slow(delay) => tokio::time::sleep(delay).await,
        }
        Ok(self.vector_for(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "concept-test"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn is_ready(&self) -> bool {
        self.ready
    }
}

/// Store wrapper that counts which keyword strategy touched the backend
pub struct CountingStore {
    pub inner: SqliteEvidenceStore,
    pub native_queries: AtomicUsize,
    pub scans: AtomicUsize,
    pub vector_queries: AtomicUsize,
    /// Blocks every scan for this long
    pub scan_delay: Duration,
    /// Cancelled by every scan before it returns
    pub cancel_on_scan: Option<CancellationToken>,
}

impl CountingStore {
    pub fn new(inner: SqliteEvidenceStore) -> Self {
        Self {
            inner,
            native_queries: AtomicUsize::new(0),
            scans: AtomicUsize::new(0),
            vector_queries: AtomicUsize::new(0),
            scan_delay: Duration::ZERO,
            cancel_on_scan: None,
        }
    }

    pub fn with_scan_delay(mut self, delay: Duration) -> Self {
        self.scan_delay = delay;
        self
    }

    pub fn cancelling_on_scan(mut self, token: CancellationToken) -> Self {
        self.cancel_on_scan = Some(token);
        self
    }

    pub fn native(&self) -> usize {
        self.native_queries.load(Ordering::SeqCst)
    }

    pub fn scanned(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

impl EvidenceStore for CountingStore {
    fn insert_chunk(&self, chunk: &NewChunk) -> Result<InsertOutcome, StoreError> {
        self.inner.insert_chunk(chunk)
    }

    fn chunk_exists(
        &self,
        project_id: ProjectId,
        reference_path: &str,
        chunk_index: usize,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        self.inner
            .chunk_exists(project_id, reference_path, chunk_index, content_hash)
    }

    fn query_by_vector_distance(
        &self,
        project_id: ProjectId,
        vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.vector_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_by_vector_distance(project_id, vector, k)
    }

    fn query_by_native_full_text(
        &self,
        project_id: ProjectId,
        query: &str,
        k: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        self.native_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query_by_native_full_text(project_id, query, k)
    }

    fn scan_all_chunks(&self, project_id: ProjectId) -> Result<Vec<StoredChunk>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if !self.scan_delay.is_zero() {
            std::thread::sleep(self.scan_delay);
        }
        let chunks = self.inner.scan_all_chunks(project_id);
        if let Some(token) = &self.cancel_on_scan {
            token.cancel();
        }
        chunks
    }

    fn count_chunks(&self, project_id: ProjectId) -> Result<usize, StoreError> {
        self.inner.count_chunks(project_id)
    }

    fn embedding_dimension(&self, project_id: ProjectId) -> Result<Option<usize>, StoreError> {
        self.inner.embedding_dimension(project_id)
    }

    fn clear_embeddings(&self, project_id: ProjectId) -> Result<usize, StoreError> {
        self.inner.clear_embeddings(project_id)
    }

    fn set_embedding(
        &self,
        chunk_id: i64,
        embedding: &[f32],
        model: Option<&str>,
    ) -> Result<(), StoreError> {
        self.inner.set_embedding(chunk_id, embedding, model)
    }

    fn probe_vector_search(&self) -> Result<(), StoreError> {
        self.inner.probe_vector_search()
    }

    fn probe_full_text(&self) -> Result<(), StoreError> {
        self.inner.probe_full_text()
    }
}

pub fn open_store(temp: &TempDir, options: StoreOptions) -> SqliteEvidenceStore {
    SqliteEvidenceStore::open(&temp.path().join("evidence.sqlite"), options)
        .expect("store opens")
}

pub fn options(vector_functions: bool, full_text: bool) -> StoreOptions {
    StoreOptions {
        pool_size: 4,
        vector_functions,
        full_text,
    }
}

/// The three-chunk pets corpus, ids 1..=3 in insertion order, with embeddings
pub fn seed_pets(store: &dyn EvidenceStore, project_id: ProjectId, provider: Option<&ConceptProvider>) -> Vec<i64> {
    ["A cat sat on the mat", "A dog sat on the rug", "Cats and dogs are pets"]
        .iter()
        .enumerate()
        .map(|(n, text)| {
            let chunk = new_chunk(
                project_id,
                &format!("pets/{}.txt", n + 1),
                0,
                text,
                provider.map(|p| p.vector_for(text)),
            );
            match store.insert_chunk(&chunk).expect("insert") {
                InsertOutcome::Inserted(id) => id,
                InsertOutcome::Duplicate => panic!("unexpected duplicate"),
            }
        })
        .collect()
}

pub fn new_chunk(
    project_id: ProjectId,
    path: &str,
    index: usize,
    text: &str,
    embedding: Option<Vec<f32>>,
) -> NewChunk {
    NewChunk {
        project_id,
        reference_type: evidx::storage::ReferenceType::infer_from_path(path),
        reference_path: path.to_string(),
        commit_sha: None,
        chunk_index: index,
        text: text.to_string(),
        token_count: text.split_whitespace().count(),
        embedding_model: embedding.as_ref().map(|_| "concept-test".to_string()),
        embedding,
        content_hash: evidx::storage::content_hash(text),
        meta: serde_json::json!({}),
    }
}
