/// Nearest-neighbour search over stored embeddings
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{SearchResult, SearchType};
use crate::storage::{EvidenceStore, ProjectId, StoreError};

/// Top `limit` chunks by cosine similarity (`1 - distance`).
///
/// Empty when the project has no embeddings, when the query vector's length
/// differs from the stored dimension, when the store lacks vector support, or
/// when `cancel` fires before a round trip.
pub fn vector_search(
    store: &dyn EvidenceStore,
    project_id: ProjectId,
    query_vector: &[f32],
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<SearchResult>, StoreError> {
    if limit == 0 || query_vector.is_empty() || cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    let stored_dimension = match store.embedding_dimension(project_id)? {
        Some(d) => d,
        None => {
            debug!("Project {} has no embeddings", project_id);
            return Ok(Vec::new());
        }
    };

    if stored_dimension != query_vector.len() {
        warn!(
            "Query vector has {} dimensions but project {} stores {}; skipping vector search",
            query_vector.len(),
            project_id,
            stored_dimension
        );
        return Ok(Vec::new());
    }

    if cancel.is_cancelled() {
        return Ok(Vec::new());
    }

    let rows = match store.query_by_vector_distance(project_id, query_vector, limit) {
        Ok(rows) => rows,
        Err(StoreError::Unsupported { message, .. }) => {
            debug!("Vector search unavailable: {}", message);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e),
    };

    Ok(rows
        .into_iter()
        .map(|row| SearchResult::from_chunk(row.chunk, 1.0 - row.score, SearchType::Vector))
        .collect())
}
