mod common;

use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

use common::{new_chunk, open_store, options, ConceptProvider};
use evidx::storage::{EvidenceStore, InsertOutcome, StoreError};

#[test]
fn test_pinned_dimension_survives_reopen() {
    let temp = TempDir::new().unwrap();
    let provider = ConceptProvider::new();

    {
        let store = open_store(&temp, options(true, true));
        let chunk = new_chunk(1, "a.txt", 0, "cat", Some(provider.vector_for("cat")));
        store.insert_chunk(&chunk).unwrap();
    }

    let store = open_store(&temp, options(true, true));
    assert_eq!(store.embedding_dimension(1).unwrap(), Some(4));
    assert_eq!(store.count_chunks(1).unwrap(), 1);

    let wide = new_chunk(1, "b.txt", 0, "dog", Some(vec![0.5; 6]));
    match store.insert_chunk(&wide) {
        Err(StoreError::DimensionMismatch {
            project_id,
            expected,
            actual,
        }) => {
            assert_eq!(project_id, 1);
            assert_eq!(expected, 4);
            assert_eq!(actual, 6);
        }
        other => panic!("expected dimension mismatch, got {:?}", other),
    }
    assert_eq!(store.count_chunks(1).unwrap(), 1);
}

#[test]
fn test_concurrent_writers_share_the_pool() {
    let temp = TempDir::new().unwrap();
    let store = Arc::new(open_store(&temp, options(false, true)));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for n in 0..10 {
                    let path = format!("w{}/{}.txt", worker, n);
                    let chunk = new_chunk(1, &path, 0, &format!("worker {} note {}", worker, n), None);
                    assert!(matches!(
                        store.insert_chunk(&chunk).unwrap(),
                        InsertOutcome::Inserted(_)
                    ));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.count_chunks(1).unwrap(), 40);
    let ids: Vec<i64> = store.scan_all_chunks(1).unwrap().iter().map(|c| c.id).collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    sorted.dedup();
    assert_eq!(ids, sorted);
}

#[test]
fn test_native_full_text_is_project_scoped() {
    let temp = TempDir::new().unwrap();
    let store = open_store(&temp, options(false, true));

    store
        .insert_chunk(&new_chunk(1, "one.txt", 0, "gradient clipping threshold", None))
        .unwrap();
    store
        .insert_chunk(&new_chunk(2, "two.txt", 0, "gradient accumulation steps", None))
        .unwrap();

    let hits = store.query_by_native_full_text(2, "gradient", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.project_id, 2);
    assert_eq!(hits[0].chunk.reference_path, "two.txt");

    // no stemming: plural forms are distinct terms
    assert!(store.query_by_native_full_text(1, "thresholds", 10).unwrap().is_empty());
}

#[test]
fn test_full_text_index_backfilled_when_enabled_later() {
    let temp = TempDir::new().unwrap();

    {
        let store = open_store(&temp, options(false, false));
        store
            .insert_chunk(&new_chunk(1, "early.txt", 0, "written before the index existed", None))
            .unwrap();
        assert!(store
            .query_by_native_full_text(1, "index", 5)
            .unwrap_err()
            .is_unsupported());
    }

    let store = open_store(&temp, options(false, true));
    let hits = store.query_by_native_full_text(1, "index", 5).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].chunk.reference_path, "early.txt");
}
