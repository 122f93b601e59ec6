// End-to-end behavior of the HnswVectorDb handle: single vs batch shapes,
// self-match on a realistic corpus, update and delete semantics.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tempfile::TempDir;
use vectordb_engine::{
    DistanceMetric, Document, FsyncPolicy, HnswVectorDb, IndexMode, OneOrMany, VectorDbConfig,
    VectorDbError,
};

fn test_config() -> VectorDbConfig {
    let mut config = VectorDbConfig::default();
    config.persistence.fsync_policy = FsyncPolicy::None;
    config
}

fn random_docs(n: usize, dim: usize, seed: u64) -> Vec<Document> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let embedding: Vec<f32> = (0..dim).map(|_| rng.gen_range(-1.0f32..1.0)).collect();
            Document::new(format!("doc-{}", i), embedding)
                .with_attribute("text", format!("document number {}", i))
        })
        .collect()
}

/// Documents with components drawn from [0, 1), like `rand()` output.
fn unit_cube_docs(n: usize, dim: usize, seed: u64) -> Vec<Document> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let embedding: Vec<f32> = (0..dim).map(|_| rng.gen_range(0.0f32..1.0)).collect();
            Document::new(format!("d{}", i), embedding)
                .with_attribute("text", format!("text of d{}", i))
        })
        .collect()
}

fn random_embedding(dim: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
    (0..dim).map(|_| rng.gen_range(0.0f32..1.0)).collect()
}

#[test]
fn test_self_match_on_2000_random_vectors() {
    for seed in 0..5 {
        let dir = TempDir::new().unwrap();
        let db = HnswVectorDb::open_or_create(dir.path(), 128, DistanceMetric::Cosine).unwrap();

        let docs = unit_cube_docs(2000, 128, seed);
        assert_eq!(db.index(&docs).unwrap(), 2000);
        assert_eq!(db.len(), 2000);

        let mut rng = ChaCha8Rng::seed_from_u64(seed + 1000);
        let queries: Vec<Document> = (0..10)
            .map(|_| docs[rng.gen_range(0..docs.len())].clone())
            .collect();

        let results = db.search(&queries, 10).unwrap();
        let results = results.into_many().expect("batch input gives batch output");
        assert_eq!(results.len(), 10);

        for (query, result) in queries.iter().zip(&results) {
            assert_eq!(result.query_id, query.id);
            assert_eq!(result.len(), 10);
            let top = result.top().unwrap();
            assert_eq!(top.id, query.id, "seed {}", seed);
            assert!(top.score < 1e-3, "self-match score {} for {}", top.score, query.id);
            assert_eq!(top.text(), query.text());

            let scores = result.scores();
            assert!(scores.windows(2).all(|w| w[0] <= w[1]), "scores not ascending: {:?}", scores);
        }
    }
}

#[test]
fn test_index_delete_update_flow_on_defaults() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_or_create(dir.path(), 128, DistanceMetric::Cosine).unwrap();
    let mut rng = ChaCha8Rng::seed_from_u64(77);

    let docs = unit_cube_docs(2000, 128, 7);
    assert_eq!(db.index(&docs).unwrap(), 2000);

    let queries: Vec<Document> = docs.iter().step_by(200).cloned().collect();
    let results = db.search_many(&queries, 10).unwrap();
    for (query, result) in queries.iter().zip(&results) {
        assert_eq!(result.len(), 10);
        assert_eq!(result.top().unwrap().id, query.id);
    }

    // Delete by id; the embedding the caller sends along is irrelevant
    let victim = &docs[400];
    let by_id = Document::new(victim.id.clone(), random_embedding(128, &mut rng));
    assert_eq!(db.delete(by_id).unwrap(), 1);
    assert!(db.get(&victim.id).is_none());
    let result = db.search_one(victim, 10).unwrap();
    assert_eq!(result.len(), 10);
    assert!(result.matches.iter().all(|m| m.id != victim.id));

    // Same embedding, new text
    let target = &docs[600];
    let edited = Document::new(target.id.clone(), target.embedding.clone())
        .with_attribute("text", "rewritten text");
    assert_eq!(db.update(edited.clone()).unwrap(), 1);
    let result = db.search_one(&edited, 10).unwrap();
    let top = result.top().unwrap();
    assert_eq!(top.id, target.id);
    assert_eq!(top.text(), Some("rewritten text"));
    assert!(top.score < 1e-3);
    assert_eq!(db.len(), 1999);
}

#[test]
fn test_self_match_for_every_metric() {
    for metric in [
        DistanceMetric::Cosine,
        DistanceMetric::SquaredEuclidean,
        DistanceMetric::InnerProduct,
    ] {
        let dir = TempDir::new().unwrap();
        let db = HnswVectorDb::open_with_config(dir.path(), 16, metric, test_config()).unwrap();
        // Unit-norm vectors keep inner product self-maximal
        let docs: Vec<Document> = random_docs(300, 16, 7)
            .into_iter()
            .map(|mut d| {
                let norm = d.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
                d.embedding.iter_mut().for_each(|x| *x /= norm);
                d
            })
            .collect();
        db.index(&docs).unwrap();

        for query in docs.iter().step_by(30) {
            let result = db.search_one(query, 3).unwrap();
            assert_eq!(result.top().unwrap().id, query.id, "metric {}", metric);
        }
    }
}

#[test]
fn test_single_input_gives_single_output() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, test_config())
        .unwrap();
    let docs = random_docs(50, 8, 1);
    db.index(&docs).unwrap();

    let single = db.search(docs[3].clone(), 4).unwrap();
    assert!(single.is_one());
    let single = single.into_one().unwrap();
    assert_eq!(single.top().unwrap().id, "doc-3");

    let batch = db.search(vec![docs[3].clone()], 4).unwrap();
    assert!(!batch.is_one());
    assert_eq!(batch.into_vec(), vec![single]);
}

#[test]
fn test_limit_larger_than_live_count() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, test_config())
        .unwrap();
    let docs = random_docs(6, 8, 2);
    db.index(&docs).unwrap();
    db.delete_ids(["doc-0", "doc-1"]).unwrap();

    let result = db.search_one(&docs[2], 100).unwrap();
    assert_eq!(result.len(), 4);
    assert!(result.matches.iter().all(|m| m.id != "doc-0" && m.id != "doc-1"));
}

#[test]
fn test_deleted_documents_never_returned() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 32, DistanceMetric::SquaredEuclidean, test_config())
        .unwrap();
    let docs = random_docs(500, 32, 3);
    db.index(&docs).unwrap();

    let deleted: Vec<Document> = docs.iter().filter(|d| d.id.ends_with('7')).cloned().collect();
    assert_eq!(db.delete(&deleted).unwrap(), deleted.len());
    assert_eq!(db.len(), 500 - deleted.len());

    for doc in &deleted {
        assert!(db.get(&doc.id).is_none());
        let result = db.search_one(doc, 10).unwrap();
        assert_eq!(result.len(), 10);
        assert!(result.matches.iter().all(|m| !m.id.ends_with('7')));
    }

    // Deleting again is NotFound and changes nothing
    let err = db.delete(deleted[0].clone()).unwrap_err();
    assert!(matches!(err, VectorDbError::NotFound { .. }));
    assert_eq!(db.len(), 500 - deleted.len());
}

#[test]
fn test_reindex_after_delete() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, test_config())
        .unwrap();
    let docs = random_docs(20, 8, 4);
    db.index(&docs).unwrap();
    db.delete_ids(["doc-5"]).unwrap();

    let replacement = Document::new("doc-5", docs[9].embedding.clone());
    db.index(replacement).unwrap();
    let result = db.search_one(&docs[9], 2).unwrap();
    let ids: Vec<&str> = result.matches.iter().map(|m| m.id.as_str()).collect();
    assert!(ids.contains(&"doc-5") && ids.contains(&"doc-9"), "{:?}", ids);
}

#[test]
fn test_update_moves_document() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 16, DistanceMetric::Cosine, test_config())
        .unwrap();
    let docs = random_docs(200, 16, 5);
    db.index(&docs).unwrap();

    // Move doc-0 onto doc-100's position
    let moved = Document::new("doc-0", docs[100].embedding.clone()).with_attribute("text", "moved");
    assert_eq!(db.update(moved).unwrap(), 1);
    assert_eq!(db.len(), 200);
    assert_eq!(db.get("doc-0").unwrap().text(), Some("moved"));

    let near_old = db.search_one(&docs[0], 5).unwrap();
    // Nothing lives at the old position any more
    assert!(near_old.matches.iter().all(|m| m.score > 1e-3), "{:?}", near_old);

    let near_new = db.search_one(&docs[100], 2).unwrap();
    let ids: Vec<&str> = near_new.matches.iter().map(|m| m.id.as_str()).collect();
    assert!(ids.contains(&"doc-0") && ids.contains(&"doc-100"), "{:?}", ids);

    let stats = db.stats();
    assert_eq!(stats.live_documents, 200);
    assert_eq!(stats.tombstoned_records, 1);
    assert_eq!(stats.graph_nodes, 201);
}

#[test]
fn test_upsert_mode_replaces_live_documents() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.index_mode = IndexMode::Upsert;
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, config).unwrap();

    let docs = random_docs(10, 8, 6);
    db.index(&docs).unwrap();
    assert_eq!(db.index(&docs).unwrap(), 10);
    assert_eq!(db.len(), 10);
    assert_eq!(db.stats().tombstoned_records, 10);
}

#[test]
fn test_dimension_errors_carry_context() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, test_config())
        .unwrap();
    let err = db.index(Document::new("short", vec![0.1; 7])).unwrap_err();
    match err {
        VectorDbError::DimensionMismatch { id, expected, actual } => {
            assert_eq!(id, "short");
            assert_eq!(expected, 8);
            assert_eq!(actual, 7);
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert!(db.is_empty());
    assert!(matches!(
        db.search(Document::new("q", vec![0.1; 8]), 3),
        Err(VectorDbError::EmptyIndex)
    ));
}

#[test]
fn test_empty_batches_are_noops() {
    let dir = TempDir::new().unwrap();
    let db = HnswVectorDb::open_with_config(dir.path(), 8, DistanceMetric::Cosine, test_config())
        .unwrap();
    assert_eq!(db.index(Vec::<Document>::new()).unwrap(), 0);
    assert_eq!(db.stats().last_seq, 0);

    db.index(random_docs(3, 8, 8)).unwrap();
    let empty = db.search(Vec::<Document>::new(), 3).unwrap();
    assert_eq!(empty, OneOrMany::Many(Vec::new()));
}

#[test]
fn test_concurrent_readers_and_writer() {
    let dir = TempDir::new().unwrap();
    let db = Arc::new(
        HnswVectorDb::open_with_config(dir.path(), 16, DistanceMetric::Cosine, test_config())
            .unwrap(),
    );
    let docs = random_docs(400, 16, 9);
    db.index(&docs[..200]).unwrap();

    let writer = {
        let db = Arc::clone(&db);
        let docs = docs[200..].to_vec();
        std::thread::spawn(move || {
            for chunk in docs.chunks(20) {
                db.index(chunk).unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|t| {
            let db = Arc::clone(&db);
            let queries: Vec<Document> = docs[..200].iter().skip(t).step_by(4).cloned().collect();
            std::thread::spawn(move || {
                for query in &queries {
                    let result = db.search_one(query, 1).unwrap();
                    assert_eq!(result.top().unwrap().id, query.id);
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }
    assert_eq!(db.len(), 400);
}
