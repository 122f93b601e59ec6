//! Record storage for the vector database.
//!
//! The store owns every embedding ever indexed, addressed by a dense
//! `internal_id` (the position in `records`). Deletion never removes a record:
//! it sets the tombstone flag, so internal ids stay stable for the HNSW graph,
//! which only grows.
//!
//! The store only applies logged records (`apply_insert` / `apply_tombstone`),
//! idempotently. Duplicate-id and not-found rules are checked when the
//! database plans a mutation, before anything reaches the log.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::document::Metadata;
use crate::error::{Result, VectorDbError};

/// One stored embedding and its attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub internal_id: u64,
    pub external_id: String,
    pub embedding: Vec<f32>,
    pub attributes: Metadata,
    pub tombstoned: bool,
}

impl Record {
    pub fn is_live(&self) -> bool {
        !self.tombstoned
    }
}

/// Embedding lookup by internal id, used by the graph for distance computation.
pub trait EmbeddingLookup {
    fn embedding(&self, internal_id: u64) -> Option<&[f32]>;
}

/// Dense record table plus the external-id → live-internal-id map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VectorStore {
    dimension: usize,
    records: Vec<Record>,
    live: HashMap<String, u64>,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: Vec::new(),
            live: HashMap::new(),
        }
    }

    /// Rebuild a store from snapshot records. Records must be dense and ordered.
    pub fn from_records(dimension: usize, records: Vec<Record>) -> Result<Self> {
        let mut store = Self::new(dimension);
        for record in records {
            if record.internal_id != store.records.len() as u64 {
                return Err(VectorDbError::InvalidArgument(format!(
                    "snapshot records are not dense: expected internal id {}, found {}",
                    store.records.len(),
                    record.internal_id
                )));
            }
            store.check_dimension(&record.external_id, &record.embedding)?;
            if record.is_live() {
                store
                    .live
                    .insert(record.external_id.clone(), record.internal_id);
            }
            store.records.push(record);
        }
        Ok(store)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Internal id the next insert will receive.
    pub fn next_internal_id(&self) -> u64 {
        self.records.len() as u64
    }

    /// Records ever inserted, tombstoned ones included.
    pub fn total_count(&self) -> usize {
        self.records.len()
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.records.len() - self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn live_internal_id(&self, external_id: &str) -> Option<u64> {
        self.live.get(external_id).copied()
    }

    pub fn check_dimension(&self, id: &str, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(VectorDbError::dimension(id, self.dimension, embedding.len()));
        }
        Ok(())
    }

    /// Live record by internal id.
    pub fn lookup(&self, internal_id: u64) -> Result<&Record> {
        match self.records.get(internal_id as usize) {
            Some(record) if record.is_live() => Ok(record),
            _ => Err(VectorDbError::not_found(internal_id.to_string())),
        }
    }

    /// Live record by external id.
    pub fn get(&self, external_id: &str) -> Option<&Record> {
        self.live_internal_id(external_id)
            .and_then(|id| self.records.get(id as usize))
    }

    /// Insert a logged record. Returns `false` when the internal id is already
    /// present, which makes replay idempotent.
    pub fn apply_insert(&mut self, record: Record) -> bool {
        let next = self.next_internal_id();
        if record.internal_id < next {
            return false;
        }
        debug_assert_eq!(
            record.internal_id, next,
            "logged inserts must arrive in internal-id order"
        );
        if record.is_live() {
            // A stale live entry for this external id would break uniqueness.
            if let Some(previous) = self
                .live
                .insert(record.external_id.clone(), record.internal_id)
            {
                if let Some(prev) = self.records.get_mut(previous as usize) {
                    prev.tombstoned = true;
                }
            }
        }
        self.records.push(record);
        true
    }

    /// Tombstone the given internal ids. Already tombstoned or unknown ids are
    /// ignored. Returns how many records changed state.
    pub fn apply_tombstone(&mut self, internal_ids: &[u64]) -> usize {
        let mut changed = 0;
        for &id in internal_ids {
            let Some(record) = self.records.get_mut(id as usize) else {
                continue;
            };
            if record.tombstoned {
                continue;
            }
            record.tombstoned = true;
            if self.live.get(&record.external_id) == Some(&id) {
                self.live.remove(&record.external_id);
            }
            changed += 1;
        }
        changed
    }
}

impl EmbeddingLookup for VectorStore {
    fn embedding(&self, internal_id: u64) -> Option<&[f32]> {
        self.records
            .get(internal_id as usize)
            .map(|r| r.embedding.as_slice())
    }
}
