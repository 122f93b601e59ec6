// Property: whatever sequence of index/update/delete calls a session makes,
// reopening the workspace reconstructs exactly the live documents a simple
// model says should exist.

use proptest::prelude::*;
use std::collections::HashMap;
use tempfile::TempDir;
use vectordb_engine::{DistanceMetric, Document, FsyncPolicy, HnswVectorDb, VectorDbConfig};

const DIM: usize = 4;

#[derive(Debug, Clone)]
enum Op {
    Index(u8, [i8; DIM]),
    Update(u8, [i8; DIM]),
    Delete(u8),
    Reopen,
    Snapshot,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    let key = 0u8..12;
    let embedding = prop::array::uniform4(-100i8..100);
    prop_oneof![
        4 => (key.clone(), embedding.clone()).prop_map(|(k, e)| Op::Index(k, e)),
        2 => (key.clone(), embedding).prop_map(|(k, e)| Op::Update(k, e)),
        2 => key.prop_map(Op::Delete),
        1 => Just(Op::Reopen),
        1 => Just(Op::Snapshot),
    ]
}

fn to_doc(key: u8, embedding: [i8; DIM]) -> Document {
    // Offset keeps every embedding away from the zero vector
    let embedding = embedding.iter().map(|&x| x as f32 / 10.0 + 20.0).collect();
    Document::new(format!("k{}", key), embedding)
}

fn config() -> VectorDbConfig {
    let mut config = VectorDbConfig::default();
    config.persistence.fsync_policy = FsyncPolicy::None;
    config.persistence.snapshot_interval_mutations = 7;
    config.persistence.retained_snapshots = 1;
    config
}

fn open(dir: &TempDir) -> HnswVectorDb {
    HnswVectorDb::open_with_config(dir.path(), DIM, DistanceMetric::SquaredEuclidean, config())
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn test_reopen_matches_model(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let dir = TempDir::new().unwrap();
        let mut db = open(&dir);
        let mut model: HashMap<String, Vec<f32>> = HashMap::new();

        for op in ops {
            match op {
                Op::Index(k, e) => {
                    let doc = to_doc(k, e);
                    let result = db.index(doc.clone());
                    if model.contains_key(&doc.id) {
                        prop_assert!(result.is_err());
                    } else {
                        prop_assert_eq!(result.unwrap(), 1);
                        model.insert(doc.id, doc.embedding);
                    }
                }
                Op::Update(k, e) => {
                    let doc = to_doc(k, e);
                    let result = db.update(doc.clone());
                    if model.contains_key(&doc.id) {
                        prop_assert_eq!(result.unwrap(), 1);
                        model.insert(doc.id, doc.embedding);
                    } else {
                        prop_assert!(result.is_err());
                    }
                }
                Op::Delete(k) => {
                    let id = format!("k{}", k);
                    let result = db.delete_ids([id.as_str()]);
                    prop_assert_eq!(result.is_ok(), model.remove(&id).is_some());
                }
                Op::Reopen => {
                    drop(db);
                    db = open(&dir);
                }
                Op::Snapshot => {
                    db.create_snapshot().unwrap();
                }
            }
        }

        drop(db);
        let db = open(&dir);
        prop_assert_eq!(db.len(), model.len());
        for (id, embedding) in &model {
            let doc = db.get(id);
            prop_assert!(doc.is_some(), "missing {}", id);
            prop_assert_eq!(&doc.unwrap().embedding, embedding);

            let hit = db.search_embedding(embedding, 1).unwrap();
            prop_assert_eq!(hit[0].score, 0.0);
        }
    }
}
