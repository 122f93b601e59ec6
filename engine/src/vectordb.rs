//! `HnswVectorDb`: the embeddable database handle.
//!
//! Ties the vector store, the HNSW graph and the mutation log together:
//!
//! - mutations are planned against the current state, appended to the log
//!   (one lock + fsync per batch), and only then applied in memory
//! - searches over-fetch from the graph and drop tombstoned records,
//!   widening the candidate set when too many were filtered out
//!
//! One writer at a time (a mutex around the log); any number of readers
//! (a read lock on the in-memory state). The write lock on the state is held
//! only while applying operations that are already durable.

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DistanceMetric, IndexMode, VectorDbConfig};
use crate::document::{Document, Match, OneOrMany, QueryMatches};
use crate::error::{Result, VectorDbError};
use crate::hnsw_index::HnswIndex;
use crate::metrics;
use crate::mutation_log::{apply_op, MutationLog, ReplayStats};
use crate::persistence::WalOp;
use crate::vector_store::{Record, VectorStore};
use crate::workspace::Workspace;

/// In-memory state guarded by one lock so readers see store and graph agree.
struct State {
    store: VectorStore,
    index: HnswIndex,
}

/// Point-in-time counters of a database handle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DbStats {
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub live_documents: usize,
    pub tombstoned_records: usize,
    pub graph_nodes: usize,
    pub graph_edges: usize,
    pub graph_top_level: usize,
    pub graph_memory_bytes: usize,
    pub last_seq: u64,
    pub mutations_since_snapshot: u64,
    pub wal_segments: usize,
    pub snapshots: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MutationKind {
    Index,
    Update,
    Delete,
}

impl MutationKind {
    fn as_str(self) -> &'static str {
        match self {
            MutationKind::Index => "index",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// Turns caller documents into log operations against the current state
/// plus the effects of earlier documents in the same batch.
struct Planner<'a> {
    store: &'a VectorStore,
    mode: IndexMode,
    next_id: u64,
    /// `Some(id)`: live under a new internal id, `None`: deleted in this batch
    overrides: HashMap<String, Option<u64>>,
}

impl<'a> Planner<'a> {
    fn new(store: &'a VectorStore, mode: IndexMode) -> Self {
        Self {
            store,
            mode,
            next_id: store.next_internal_id(),
            overrides: HashMap::new(),
        }
    }

    fn live_id(&self, external_id: &str) -> Option<u64> {
        match self.overrides.get(external_id) {
            Some(state) => *state,
            None => self.store.live_internal_id(external_id),
        }
    }

    fn new_record(&mut self, doc: &Document) -> Result<Record> {
        self.store.check_dimension(&doc.id, &doc.embedding)?;
        let record = Record {
            internal_id: self.next_id,
            external_id: doc.id.clone(),
            embedding: doc.embedding.clone(),
            attributes: doc.attributes.clone(),
            tombstoned: false,
        };
        self.next_id += 1;
        self.overrides
            .insert(doc.id.clone(), Some(record.internal_id));
        Ok(record)
    }

    fn plan(&mut self, kind: MutationKind, doc: &Document) -> Result<WalOp> {
        match kind {
            MutationKind::Index => self.plan_index(doc),
            MutationKind::Update => self.plan_update(doc),
            MutationKind::Delete => self.plan_delete(&doc.id),
        }
    }

    fn plan_index(&mut self, doc: &Document) -> Result<WalOp> {
        match (self.live_id(&doc.id), self.mode) {
            (None, _) => Ok(WalOp::Insert {
                record: self.new_record(doc)?,
            }),
            (Some(_), IndexMode::Strict) => {
                self.store.check_dimension(&doc.id, &doc.embedding)?;
                Err(VectorDbError::DuplicateId { id: doc.id.clone() })
            }
            (Some(_), IndexMode::Upsert) => self.plan_update(doc),
        }
    }

    fn plan_update(&mut self, doc: &Document) -> Result<WalOp> {
        self.store.check_dimension(&doc.id, &doc.embedding)?;
        let old = self
            .live_id(&doc.id)
            .ok_or_else(|| VectorDbError::not_found(doc.id.as_str()))?;
        Ok(WalOp::Update {
            superseded: vec![old],
            record: self.new_record(doc)?,
        })
    }

    fn plan_delete(&mut self, external_id: &str) -> Result<WalOp> {
        let old = self
            .live_id(external_id)
            .ok_or_else(|| VectorDbError::not_found(external_id))?;
        self.overrides.insert(external_id.to_string(), None);
        Ok(WalOp::Tombstone {
            external_id: external_id.to_string(),
            internal_ids: vec![old],
        })
    }
}

/// Embeddable HNSW vector database bound to one workspace directory.
pub struct HnswVectorDb {
    config: VectorDbConfig,
    dimension: usize,
    metric: DistanceMetric,
    root: PathBuf,
    replay_stats: ReplayStats,
    log: Mutex<MutationLog>,
    state: RwLock<State>,
}

impl HnswVectorDb {
    /// Open (or create) the workspace at `path` with default configuration.
    pub fn open_or_create(
        path: impl AsRef<Path>,
        dimension: usize,
        metric: DistanceMetric,
    ) -> Result<Self> {
        Self::open_with_config(path, dimension, metric, VectorDbConfig::default())
    }

    /// Open (or create) the workspace at `path`.
    ///
    /// Existing workspaces are replayed from their newest snapshot and WAL.
    /// A workspace created with another dimension or metric is refused with
    /// `ConfigMismatch`, and one already open elsewhere with
    /// `WorkspaceLocked`. The graph build parameters of an existing workspace
    /// replace those in `config.hnsw`; only `ef_search` is taken as given.
    #[instrument(level = "info", skip(path, config), fields(workspace = %path.as_ref().display()))]
    pub fn open_with_config(
        path: impl AsRef<Path>,
        dimension: usize,
        metric: DistanceMetric,
        mut config: VectorDbConfig,
    ) -> Result<Self> {
        config
            .validate()
            .map_err(|e| VectorDbError::InvalidConfig(format!("{:#}", e)))?;

        let workspace = Workspace::open_or_create(path, dimension, metric, &config.hnsw)?;
        let root = workspace.root().to_path_buf();
        config.hnsw = workspace.hnsw().clone();
        let (log, recovered) = MutationLog::open(workspace, &config.persistence)?;

        info!(
            workspace = %root.display(),
            live = recovered.store.live_count(),
            last_seq = log.last_seq(),
            "vector database ready"
        );

        Ok(Self {
            config,
            dimension,
            metric,
            root,
            replay_stats: recovered.stats,
            log: Mutex::new(log),
            state: RwLock::new(State {
                store: recovered.store,
                index: recovered.index,
            }),
        })
    }

    /// Index one document or a batch. Returns how many were acknowledged.
    #[instrument(level = "debug", skip(self, docs))]
    pub fn index(&self, docs: impl Into<OneOrMany<Document>>) -> Result<usize> {
        let docs = docs.into();
        self.mutate(MutationKind::Index, docs.as_slice())
    }

    /// Replace the embedding and attributes of live documents.
    #[instrument(level = "debug", skip(self, docs))]
    pub fn update(&self, docs: impl Into<OneOrMany<Document>>) -> Result<usize> {
        let docs = docs.into();
        self.mutate(MutationKind::Update, docs.as_slice())
    }

    /// Delete live documents by the ids of `docs` (embeddings are ignored).
    #[instrument(level = "debug", skip(self, docs))]
    pub fn delete(&self, docs: impl Into<OneOrMany<Document>>) -> Result<usize> {
        let docs = docs.into();
        self.mutate(MutationKind::Delete, docs.as_slice())
    }

    /// Delete live documents by id.
    pub fn delete_ids<I, S>(&self, ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let docs: Vec<Document> = ids
            .into_iter()
            .map(|id| Document::new(id.as_ref(), Vec::new()))
            .collect();
        self.mutate(MutationKind::Delete, &docs)
    }

    /// Plan → log → apply. Documents after the first invalid one are not
    /// processed; the valid prefix is still committed and the error returned.
    fn mutate(&self, kind: MutationKind, docs: &[Document]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }
        let mut log = self.log.lock();

        let (ops, failure) = {
            let state = self.state.read();
            let mut planner = Planner::new(&state.store, self.config.index_mode);
            let mut ops = Vec::with_capacity(docs.len());
            let mut failure = None;
            for doc in docs {
                match planner.plan(kind, doc) {
                    Ok(op) => ops.push(op),
                    Err(e) => {
                        debug!(doc_id = %doc.id, error = %e, op = kind.as_str(), "rejected document");
                        failure = Some(e);
                        break;
                    }
                }
            }
            (ops, failure)
        };

        let acknowledged = ops.len();
        if acknowledged > 0 {
            let entries = log.append_batch(ops)?;
            let mut state = self.state.write();
            let State { store, index } = &mut *state;
            for entry in entries {
                apply_op(store, index, entry.op)?;
            }
        }

        match kind {
            MutationKind::Index => metrics::DOCUMENTS_INDEXED_TOTAL.inc_by(acknowledged as f64),
            MutationKind::Update => metrics::DOCUMENTS_UPDATED_TOTAL.inc_by(acknowledged as f64),
            MutationKind::Delete => metrics::DOCUMENTS_DELETED_TOTAL.inc_by(acknowledged as f64),
        }

        if log.snapshot_due() {
            let state = self.state.read();
            if let Err(e) = log.create_snapshot(&state.store, &state.index) {
                error!(error = %e, "failed to create snapshot after {}", kind.as_str());
            }
        }

        match failure {
            Some(e) => {
                warn!(
                    op = kind.as_str(),
                    acknowledged,
                    batch = docs.len(),
                    error = %e,
                    "batch stopped at invalid document"
                );
                Err(e)
            }
            None => Ok(acknowledged),
        }
    }

    /// Nearest live documents for each query; the output has the input's shape.
    #[instrument(level = "debug", skip(self, queries))]
    pub fn search(
        &self,
        queries: impl Into<OneOrMany<Document>>,
        limit: usize,
    ) -> Result<OneOrMany<QueryMatches>> {
        self.check_limit(limit)?;
        let state = self.state.read();
        let state: &State = &state;
        match queries.into() {
            OneOrMany::One(query) => Ok(OneOrMany::One(self.search_locked(state, &query, limit)?)),
            OneOrMany::Many(queries) => {
                let results = queries
                    .par_iter()
                    .map(|query| self.search_locked(state, query, limit))
                    .collect::<Result<Vec<_>>>()?;
                Ok(OneOrMany::Many(results))
            }
        }
    }

    /// Single-query search.
    pub fn search_one(&self, query: &Document, limit: usize) -> Result<QueryMatches> {
        self.check_limit(limit)?;
        let state = self.state.read();
        self.search_locked(&state, query, limit)
    }

    /// Batch search; results are in query order.
    pub fn search_many(&self, queries: &[Document], limit: usize) -> Result<Vec<QueryMatches>> {
        self.check_limit(limit)?;
        let state = self.state.read();
        let state: &State = &state;
        queries
            .par_iter()
            .map(|query| self.search_locked(state, query, limit))
            .collect()
    }

    /// Search by a bare embedding.
    pub fn search_embedding(&self, embedding: &[f32], limit: usize) -> Result<Vec<Match>> {
        self.check_limit(limit)?;
        let state = self.state.read();
        self.nearest_live(&state, "", embedding, limit)
    }

    fn check_limit(&self, limit: usize) -> Result<()> {
        if limit == 0 || limit > self.config.search.max_limit {
            return Err(VectorDbError::InvalidArgument(format!(
                "limit must be in range [1, {}], got {}",
                self.config.search.max_limit, limit
            )));
        }
        Ok(())
    }

    fn search_locked(&self, state: &State, query: &Document, limit: usize) -> Result<QueryMatches> {
        let matches = self.nearest_live(state, &query.id, &query.embedding, limit)?;
        Ok(QueryMatches {
            query_id: query.id.clone(),
            matches,
        })
    }

    /// Over-fetch, drop tombstoned records, and widen the candidate set while
    /// the graph still has more nodes than were requested.
    fn nearest_live(
        &self,
        state: &State,
        query_id: &str,
        embedding: &[f32],
        limit: usize,
    ) -> Result<Vec<Match>> {
        if embedding.len() != self.dimension {
            return Err(VectorDbError::dimension(query_id, self.dimension, embedding.len()));
        }
        if state.store.is_empty() {
            return Err(VectorDbError::EmptyIndex);
        }
        let timer = metrics::SEARCH_LATENCY_SECONDS.start_timer();
        metrics::SEARCHES_TOTAL.inc();

        let search = &self.config.search;
        let mut fetch = limit.saturating_mul(search.overfetch_factor).max(limit);
        let mut attempt = 0;
        let matches = loop {
            let ef = self.config.hnsw.ef_search.max(fetch);
            let candidates = state.index.search(embedding, fetch, ef, &state.store)?;
            let mut matches: Vec<Match> = candidates
                .into_iter()
                .filter_map(|c| state.store.lookup(c.internal_id).ok().map(|r| (c, r)))
                .map(|(c, record)| Match {
                    id: record.external_id.clone(),
                    score: c.distance,
                    attributes: record.attributes.clone(),
                })
                .collect();

            let exhausted = state.index.len() <= fetch;
            if matches.len() >= limit || exhausted || attempt >= search.max_search_retries {
                matches.truncate(limit);
                break matches;
            }
            attempt += 1;
            metrics::SEARCH_RETRIES_TOTAL.inc();
            debug!(
                query_id,
                found = matches.len(),
                limit,
                fetch,
                attempt,
                "too many tombstones in candidate set; widening search"
            );
            fetch = fetch.saturating_mul(2);
        };

        timer.observe_duration();
        Ok(matches)
    }

    /// Live document by id.
    pub fn get(&self, id: &str) -> Option<Document> {
        let state = self.state.read();
        state.store.get(id).map(|r| Document {
            id: r.external_id.clone(),
            embedding: r.embedding.clone(),
            attributes: r.attributes.clone(),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().store.live_internal_id(id).is_some()
    }

    /// Live document count.
    pub fn len(&self) -> usize {
        self.state.read().store.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn config(&self) -> &VectorDbConfig {
        &self.config
    }

    /// Workspace directory.
    pub fn workspace(&self) -> &Path {
        &self.root
    }

    /// What recovery found when this handle was opened.
    pub fn replay_stats(&self) -> &ReplayStats {
        &self.replay_stats
    }

    pub fn stats(&self) -> DbStats {
        let log = self.log.lock();
        let state = self.state.read();
        DbStats {
            dimension: self.dimension,
            metric: self.metric,
            live_documents: state.store.live_count(),
            tombstoned_records: state.store.tombstone_count(),
            graph_nodes: state.index.len(),
            graph_edges: state.index.edge_count(),
            graph_top_level: state.index.top_level(),
            graph_memory_bytes: state.index.estimate_memory_bytes(),
            last_seq: log.last_seq(),
            mutations_since_snapshot: log.mutations_since_snapshot(),
            wal_segments: log.manifest().wal_segments.len(),
            snapshots: log.manifest().snapshots.len(),
        }
    }

    /// Write a snapshot now and compact the log. Returns the snapshot path.
    #[instrument(level = "info", skip(self))]
    pub fn create_snapshot(&self) -> Result<PathBuf> {
        let mut log = self.log.lock();
        let state = self.state.read();
        log.create_snapshot(&state.store, &state.index)
    }

    /// fsync the active log segment regardless of the fsync policy.
    pub fn sync(&self) -> Result<()> {
        self.log.lock().sync()
    }
}

impl std::fmt::Debug for HnswVectorDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HnswVectorDb")
            .field("workspace", &self.root)
            .field("dimension", &self.dimension)
            .field("metric", &self.metric)
            .finish_non_exhaustive()
    }
}
