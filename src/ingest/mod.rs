//! Evidence ingestion
//!
//! Each source is chunked, chunks already stored are dropped, the rest are
//! embedded when vector search can use them, and everything is written to the
//! store. A chunk whose embedding fails is still stored so keyword search can
//! find it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capability::CapabilitySnapshot;
use crate::chunking::{Chunker, TextChunk};
use crate::embedding::{BatchEmbedder, EmbeddingResult};
use crate::error::{EvidxError, Result};
use crate::storage::{
    content_hash, run_blocking, EvidenceStore, InsertOutcome, NewChunk, ProjectId, StoreError,
};

pub use crate::storage::ReferenceType;

/// One piece of evidence to index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceSource {
    pub reference_path: String,
    pub reference_type: ReferenceType,
    pub commit_sha: Option<String>,
    pub text: String,
    /// Copied into every chunk's metadata
    #[serde(default)]
    pub meta: Value,
}

impl EvidenceSource {
    /// Source whose type is inferred from its path
    pub fn from_path(reference_path: impl Into<String>, text: impl Into<String>) -> Self {
        let reference_path = reference_path.into();
        Self {
            reference_type: ReferenceType::infer_from_path(&reference_path),
            reference_path,
            commit_sha: None,
            text: text.into(),
            meta: Value::Null,
        }
    }

    pub fn with_commit(mut self, commit_sha: impl Into<String>) -> Self {
        self.commit_sha = Some(commit_sha.into());
        self
    }
}

/// Counts from one `ingest` call
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Sources chunked successfully
    pub references: usize,
    /// Sources the tokenizer rejected
    pub skipped_references: usize,
    pub chunks_inserted: usize,
    pub chunks_duplicate: usize,
    pub chunks_without_embedding: usize,
}

/// Write path from evidence sources to the store
pub struct Ingestor {
    store: Arc<dyn EvidenceStore>,
    chunker: Chunker,
    embedder: Option<BatchEmbedder>,
    capabilities: Arc<CapabilitySnapshot>,
}

struct PendingChunk {
    chunk: TextChunk,
    hash: String,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn EvidenceStore>,
        chunker: Chunker,
        embedder: Option<BatchEmbedder>,
        capabilities: Arc<CapabilitySnapshot>,
    ) -> Self {
        Self {
            store,
            chunker,
            embedder,
            capabilities,
        }
    }

    /// Embedder to use for new chunks, if embeddings would be searchable
    fn active_embedder(&self) -> Option<&BatchEmbedder> {
        if !self.capabilities.vector_search_available {
            return None;
        }
        self.embedder.as_ref().filter(|e| e.provider().is_ready())
    }

    pub async fn ingest(&self, project_id: ProjectId, sources: &[EvidenceSource]) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        let embedder = self.active_embedder();
        if embedder.is_none() {
            info!("Ingesting without embeddings for project {}", project_id);
        }

        for source in sources {
            let chunks = match self.chunker.chunk(&source.text) {
                Ok(chunks) => chunks,
                Err(e) => {
                    warn!("Skipping {}: {}", source.reference_path, e);
                    report.skipped_references += 1;
                    continue;
                }
            };
            report.references += 1;

            let pending = self.new_chunks(project_id, source, chunks).await?;
            report.chunks_duplicate += pending.duplicates;
            if pending.chunks.is_empty() {
                debug!(
                    "{}: nothing new ({} chunks already stored)",
                    source.reference_path, pending.duplicates
                );
                continue;
            }

            let embeddings = match embedder {
                Some(embedder) => {
                    let texts: Vec<String> = pending.chunks.iter().map(|p| p.chunk.text.clone()).collect();
                    embedder.embed_all(&texts).await.0
                }
                None => Vec::new(),
            };
            let model = embedder.map(|e| e.provider().model_name().to_string());

            let rows = build_rows(project_id, source, pending.total, pending.chunks, embeddings, model);
            let store = Arc::clone(&self.store);
            let written = run_blocking(move || write_rows(store.as_ref(), rows)).await?;

            report.chunks_inserted += written.inserted;
            report.chunks_duplicate += written.duplicates;
            report.chunks_without_embedding += written.without_embedding;
        }

        info!(
            "Ingested {} references into project {}: {} chunks inserted, {} duplicates, {} without embedding, {} references skipped",
            report.references,
            project_id,
            report.chunks_inserted,
            report.chunks_duplicate,
            report.chunks_without_embedding,
            report.skipped_references
        );

        Ok(report)
    }

    /// Drop every embedding of the project and embed all its chunks again.
    ///
    /// Used after switching provider or dimension. Returns the number of
    /// chunks that received a new embedding.
    pub async fn reembed_project(&self, project_id: ProjectId) -> Result<usize> {
        let embedder = self
            .embedder
            .as_ref()
            .filter(|e| e.provider().is_ready())
            .ok_or_else(|| EvidxError::Config("No ready embedding provider configured".to_string()))?;

        let store = Arc::clone(&self.store);
        let cleared = run_blocking(move || store.clear_embeddings(project_id)).await?;
        debug!("Cleared {} embeddings for project {}", cleared, project_id);

        let store = Arc::clone(&self.store);
        let chunks = run_blocking(move || store.scan_all_chunks(project_id)).await?;
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let (results, _) = embedder.embed_all(&texts).await;
        let model = embedder.provider().model_name().to_string();

        let updates: Vec<(i64, String, usize, EmbeddingResult<Vec<f32>>)> = chunks
            .into_iter()
            .zip(results)
            .map(|(c, r)| (c.id, c.reference_path, c.chunk_index, r))
            .collect();

        let store = Arc::clone(&self.store);
        let embedded = run_blocking(move || {
            let mut embedded = 0;
            for (id, path, index, result) in updates {
                match result {
                    Ok(vector) => match store.set_embedding(id, &vector, Some(&model)) {
                        Ok(()) => embedded += 1,
                        Err(StoreError::DimensionMismatch { expected, actual, .. }) => {
                            warn!(
                                "{} chunk {}: embedding has {} dimensions, project uses {}",
                                path, index, actual, expected
                            );
                        }
                        Err(e) => return Err(e),
                    },
                    Err(e) => warn!("{} chunk {}: embedding failed: {}", path, index, e),
                }
            }
            Ok(embedded)
        })
        .await?;

        info!("Re-embedded {} chunks for project {}", embedded, project_id);
        Ok(embedded)
    }

    async fn new_chunks(
        &self,
        project_id: ProjectId,
        source: &EvidenceSource,
        chunks: Vec<TextChunk>,
    ) -> Result<NewChunks> {
        let total = chunks.len();
        let pending: Vec<PendingChunk> = chunks
            .into_iter()
            .map(|chunk| PendingChunk {
                hash: content_hash(&chunk.text),
                chunk,
            })
            .collect();

        let store = Arc::clone(&self.store);
        let path = source.reference_path.clone();
        let keys: Vec<(usize, String)> = pending.iter().map(|p| (p.chunk.index, p.hash.clone())).collect();
        let exists = run_blocking(move || {
            keys.iter()
                .map(|(index, hash)| store.chunk_exists(project_id, &path, *index, hash))
                .collect::<std::result::Result<Vec<bool>, StoreError>>()
        })
        .await?;

        let mut duplicates = 0;
        let chunks = pending
            .into_iter()
            .zip(exists)
            .filter_map(|(p, stored)| {
                if stored {
                    duplicates += 1;
                    None
                } else {
                    Some(p)
                }
            })
            .collect();

        Ok(NewChunks {
            chunks,
            duplicates,
            total,
        })
    }
}

struct NewChunks {
    chunks: Vec<PendingChunk>,
    duplicates: usize,
    total: usize,
}

#[derive(Default)]
struct WriteCounts {
    inserted: usize,
    duplicates: usize,
    without_embedding: usize,
}

/// Metadata stored with every chunk: the source's own object plus chunk extents
fn chunk_meta(source: &EvidenceSource, chunk: &TextChunk, total_chunks: usize) -> Value {
    let mut meta = match &source.meta {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("source_meta".to_string(), other.clone());
            map
        }
    };
    meta.insert("total_chunks".to_string(), json!(total_chunks));
    meta.insert("source_bytes".to_string(), json!(source.text.len()));
    meta.insert("start_byte".to_string(), json!(chunk.start_byte));
    meta.insert("end_byte".to_string(), json!(chunk.end_byte));
    Value::Object(meta)
}

fn build_rows(
    project_id: ProjectId,
    source: &EvidenceSource,
    total_chunks: usize,
    pending: Vec<PendingChunk>,
    embeddings: Vec<EmbeddingResult<Vec<f32>>>,
    model: Option<String>,
) -> Vec<NewChunk> {
    let mut embeddings = embeddings.into_iter();

    pending
        .into_iter()
        .map(|p| {
            let embedding = match embeddings.next() {
                Some(Ok(vector)) => Some(vector),
                Some(Err(e)) => {
                    warn!(
                        "{} chunk {}: storing without embedding: {}",
                        source.reference_path, p.chunk.index, e
                    );
                    None
                }
                None => None,
            };

            NewChunk {
                project_id,
                reference_type: source.reference_type,
                reference_path: source.reference_path.clone(),
                commit_sha: source.commit_sha.clone(),
                chunk_index: p.chunk.index,
                meta: chunk_meta(source, &p.chunk, total_chunks),
                token_count: p.chunk.token_count,
                text: p.chunk.text,
                embedding_model: embedding.as_ref().and(model.clone()),
                embedding,
                content_hash: p.hash,
            }
        })
        .collect()
}

fn write_rows(store: &dyn EvidenceStore, rows: Vec<NewChunk>) -> std::result::Result<WriteCounts, StoreError> {
    let mut counts = WriteCounts::default();

    for mut row in rows {
        let outcome = match store.insert_chunk(&row) {
            Err(StoreError::DimensionMismatch { expected, actual, .. }) => {
                warn!(
                    "{} chunk {}: embedding has {} dimensions, project uses {}; storing without embedding",
                    row.reference_path, row.chunk_index, actual, expected
                );
                row.embedding = None;
                row.embedding_model = None;
                store.insert_chunk(&row)?
            }
            other => other?,
        };

        match outcome {
            InsertOutcome::Inserted(_) => {
                counts.inserted += 1;
                if row.embedding.is_none() {
                    counts.without_embedding += 1;
                }
            }
            InsertOutcome::Duplicate => counts.duplicates += 1,
        }
    }

    Ok(counts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::{ChunkError, Tokenizer};
    use crate::storage::{SqliteEvidenceStore, StoreOptions};
    use std::ops::Range;
    use tempfile::TempDir;

    struct Rejecting;

    impl Tokenizer for Rejecting {
        fn tokenize(&self, text: &str) -> std::result::Result<Vec<Range<usize>>, ChunkError> {
            if text.contains("\u{0}") {
                Err(ChunkError::Tokenization("nul byte".to_string()))
            } else {
                Ok(vec![0..text.len()])
            }
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    fn store(temp: &TempDir) -> Arc<dyn EvidenceStore> {
        Arc::new(SqliteEvidenceStore::open(&temp.path().join("e.sqlite"), StoreOptions::default()).unwrap())
    }

    #[test]
    fn test_chunk_meta_merges_source_meta() {
        let mut source = EvidenceSource::from_path("README.md", "hello world");
        source.meta = json!({"repo": "demo"});
        let chunk = TextChunk {
            index: 0,
            text: "hello world".to_string(),
            token_count: 2,
            start_byte: 0,
            end_byte: 11,
        };

        let meta = chunk_meta(&source, &chunk, 1);
        assert_eq!(meta["repo"], "demo");
        assert_eq!(meta["total_chunks"], 1);
        assert_eq!(meta["source_bytes"], 11);
        assert_eq!(meta["end_byte"], 11);

        source.meta = json!("note");
        assert_eq!(chunk_meta(&source, &chunk, 1)["source_meta"], "note");
    }

    #[test]
    fn test_source_type_inference() {
        let source = EvidenceSource::from_path("docs/README.md", "x").with_commit("abc123");
        assert_eq!(source.reference_type, ReferenceType::Readme);
        assert_eq!(source.commit_sha.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_tokenizer_failure_skips_reference() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let chunker = Chunker::new(Arc::new(Rejecting), 10, 0).unwrap();
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            chunker,
            None,
            Arc::new(CapabilitySnapshot::fixed(false, false)),
        );

        let sources = vec![
            EvidenceSource::from_path("bad.txt", "a\u{0}b"),
            EvidenceSource::from_path("good.txt", "fine text"),
        ];
        let report = ingestor.ingest(1, &sources).await.unwrap();

        assert_eq!(report.references, 1);
        assert_eq!(report.skipped_references, 1);
        assert_eq!(report.chunks_inserted, 1);
        assert_eq!(report.chunks_without_embedding, 1);
        assert_eq!(store.count_chunks(1).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_empty_source_stores_nothing() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Chunker::with_defaults(),
            None,
            Arc::new(CapabilitySnapshot::fixed(false, false)),
        );

        let report = ingestor
            .ingest(1, &[EvidenceSource::from_path("empty.txt", "   \n ")])
            .await
            .unwrap();

        assert_eq!(report.references, 1);
        assert_eq!(report.chunks_inserted, 0);
        assert_eq!(store.count_chunks(1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_reembed_requires_provider() {
        let temp = TempDir::new().unwrap();
        let ingestor = Ingestor::new(
            store(&temp),
            Chunker::with_defaults(),
            None,
            Arc::new(CapabilitySnapshot::fixed(true, true)),
        );

        assert!(matches!(
            ingestor.reembed_project(1).await,
            Err(EvidxError::Config(_))
        ));
    }
}
