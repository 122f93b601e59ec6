//! Durable mutation log: append, replay, snapshot rotation and compaction.
//!
//! Recovery loads the newest snapshot that passes validation, then applies
//! every WAL entry with a higher sequence number, in manifest order. Applying
//! an entry is idempotent, so entries already covered by the snapshot (or
//! replayed twice) leave the state unchanged.
//!
//! Each session appends to its own segment named after the first sequence
//! number it will hold. Only the final segment may end in a torn frame; it is
//! truncated back to the last good frame before new writes begin.

use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::config::PersistenceConfig;
use crate::error::{Result, VectorDbError};
use crate::hnsw_index::HnswIndex;
use crate::metrics;
use crate::persistence::{
    parse_seq, snapshot_name, truncate_segment, wal_segment_name, Manifest, Snapshot, WalEntry,
    WalOp, WalReader, WalWriter,
};
use crate::vector_store::{EmbeddingLookup, Record, VectorStore};
use crate::workspace::Workspace;

/// What recovery found on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Sequence number of the snapshot recovery started from
    pub snapshot_seq: Option<u64>,
    /// Corrupt snapshots skipped in favor of an older one
    pub snapshot_fallbacks: usize,
    /// WAL segments scanned
    pub segments: usize,
    /// Entries applied on top of the snapshot
    pub entries_applied: usize,
    /// Entries already covered by the snapshot
    pub entries_skipped: usize,
    /// A torn final frame was discarded
    pub torn_tail: bool,
}

/// In-memory state rebuilt from the workspace.
pub struct Recovered {
    pub store: VectorStore,
    pub index: HnswIndex,
    pub stats: ReplayStats,
}

/// Apply one logged operation to the in-memory state.
///
/// Inserts of known internal ids and tombstones of tombstoned records are
/// no-ops, which is what makes replay idempotent.
pub fn apply_op(store: &mut VectorStore, index: &mut HnswIndex, op: WalOp) -> Result<()> {
    match op {
        WalOp::Insert { record } => apply_record(store, index, record),
        WalOp::Update { superseded, record } => {
            store.apply_tombstone(&superseded);
            apply_record(store, index, record)
        }
        WalOp::Tombstone { internal_ids, .. } => {
            store.apply_tombstone(&internal_ids);
            Ok(())
        }
    }
}

fn apply_record(store: &mut VectorStore, index: &mut HnswIndex, record: Record) -> Result<()> {
    let internal_id = record.internal_id;
    let next = store.next_internal_id();
    if internal_id > next {
        return Err(VectorDbError::InvalidArgument(format!(
            "record '{}' has internal id {} but the next free id is {}",
            record.external_id, internal_id, next
        )));
    }
    if internal_id == next {
        store.apply_insert(record);
    }
    if let Some(embedding) = store.embedding(internal_id) {
        index.insert(internal_id, embedding, &*store)?;
    }
    Ok(())
}

/// Append side of the log plus the manifest it maintains.
pub struct MutationLog {
    workspace: Workspace,
    manifest: Manifest,
    writer: WalWriter,
    config: PersistenceConfig,
    next_seq: u64,
    mutations_since_snapshot: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl MutationLog {
    /// Recover the workspace state and open a fresh segment for this session.
    #[instrument(level = "info", skip_all, fields(workspace = %workspace.root().display()))]
    pub fn open(workspace: Workspace, config: &PersistenceConfig) -> Result<(Self, Recovered)> {
        let started = Instant::now();

        let mut manifest = Manifest::load_or_create(workspace.manifest_path())?;
        remove_orphans(&workspace, &manifest)?;

        let (mut store, mut index, mut stats) = load_latest_snapshot(&workspace, &manifest);
        let mut last_seq = stats.snapshot_seq.unwrap_or(0);
        let base_seq = last_seq;

        let segments = manifest.wal_segments.clone();
        for (i, name) in segments.iter().enumerate() {
            let is_final = i + 1 == segments.len();
            let path = workspace.file_path(name);
            if !path.exists() {
                return Err(VectorDbError::CorruptLog {
                    path,
                    reason: "segment listed in MANIFEST is missing".to_string(),
                });
            }

            let outcome = WalReader::open(&path, config.max_entry_bytes)?.read_all()?;
            stats.segments += 1;

            if let Some(reason) = &outcome.torn_tail {
                if !is_final {
                    return Err(VectorDbError::CorruptLog {
                        path,
                        reason: reason.clone(),
                    });
                }
                warn!(
                    wal_segment = %name,
                    valid_entries = outcome.entries.len(),
                    valid_len = outcome.valid_len,
                    reason = %reason,
                    "discarding torn WAL tail"
                );
                metrics::WAL_CORRUPT_TAIL_TOTAL.inc();
                stats.torn_tail = true;
                if outcome.valid_len < 4 {
                    // Not even a header made it to disk; the segment held nothing.
                    std::fs::remove_file(&path)?;
                    manifest.wal_segments.retain(|s| s != name);
                    manifest.save(workspace.manifest_path())?;
                } else {
                    truncate_segment(&path, outcome.valid_len)?;
                }
            }

            for entry in outcome.entries {
                if entry.seq <= last_seq {
                    stats.entries_skipped += 1;
                    continue;
                }
                if entry.seq != last_seq + 1 {
                    return Err(VectorDbError::CorruptLog {
                        path,
                        reason: format!(
                            "sequence gap: expected {}, found {}",
                            last_seq + 1,
                            entry.seq
                        ),
                    });
                }
                let seq = entry.seq;
                apply_op(&mut store, &mut index, entry.op).map_err(|e| {
                    VectorDbError::CorruptLog {
                        path: path.clone(),
                        reason: format!("entry {} cannot be applied: {}", seq, e),
                    }
                })?;
                last_seq = seq;
                stats.entries_applied += 1;
            }
        }

        metrics::WAL_ENTRIES_REPLAYED_TOTAL.inc_by(stats.entries_applied as f64);

        let next_seq = last_seq + 1;
        let writer = open_session_segment(&workspace, &mut manifest, next_seq, config)?;

        info!(
            live = store.live_count(),
            total = store.total_count(),
            last_seq,
            snapshot_seq = ?stats.snapshot_seq,
            entries_applied = stats.entries_applied,
            torn_tail = stats.torn_tail,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "workspace recovered"
        );

        let log = Self {
            workspace,
            manifest,
            writer,
            config: config.clone(),
            next_seq,
            mutations_since_snapshot: last_seq - base_seq,
            poisoned: false,
        };
        Ok((log, Recovered { store, index, stats }))
    }

    /// Durably append `ops` as consecutive entries.
    ///
    /// Returns the entries in order; nothing is applied in memory here.
    #[instrument(level = "debug", skip(self, ops), fields(ops = ops.len(), first_seq = self.next_seq))]
    pub fn append_batch(&mut self, ops: Vec<WalOp>) -> Result<Vec<WalEntry>> {
        if self.poisoned {
            return Err(VectorDbError::CorruptLog {
                path: self.writer.path().to_path_buf(),
                reason: "an earlier append failed and could not be rolled back".to_string(),
            });
        }
        if ops.is_empty() {
            return Ok(Vec::new());
        }

        let entries: Vec<WalEntry> = ops
            .into_iter()
            .enumerate()
            .map(|(i, op)| WalEntry::new(self.next_seq + i as u64, op))
            .collect();

        let timer = metrics::WAL_APPEND_LATENCY_SECONDS.start_timer();
        let good_len = self.writer.bytes_written();
        if let Err(e) = self.writer.append_batch(&entries) {
            warn!(error = %format!("{:#}", e), "WAL append failed; rolling back segment");
            if let Err(rollback_err) = self.writer.rollback_to(good_len) {
                warn!(
                    wal_segment = %self.writer.path().display(),
                    error = %format!("{:#}", rollback_err),
                    "WAL rollback failed; refusing further appends"
                );
                self.poisoned = true;
            }
            return Err(e.into());
        }
        timer.observe_duration();

        self.next_seq += entries.len() as u64;
        self.mutations_since_snapshot += entries.len() as u64;
        metrics::WAL_APPENDS_TOTAL.inc_by(entries.len() as f64);
        Ok(entries)
    }

    /// Whether the configured mutation interval has elapsed.
    pub fn snapshot_due(&self) -> bool {
        self.config.snapshot_interval_mutations > 0
            && self.mutations_since_snapshot >= self.config.snapshot_interval_mutations
    }

    /// Persist `store`/`index` as of the last appended entry, rotate the WAL
    /// and drop snapshots and segments that are no longer needed.
    #[instrument(level = "info", skip(self, store, index), fields(seq = self.last_seq()))]
    pub fn create_snapshot(&mut self, store: &VectorStore, index: &HnswIndex) -> Result<PathBuf> {
        let seq = self.last_seq();
        let name = snapshot_name(seq);
        let path = self.workspace.file_path(&name);
        if self.manifest.latest_snapshot() == Some(name.as_str()) {
            debug!(snapshot = %name, "snapshot already up to date");
            return Ok(path);
        }

        let timer = metrics::SNAPSHOT_LATENCY_SECONDS.start_timer();

        Snapshot::new(seq, store.records().to_vec(), index.clone()).save(&path)?;
        self.manifest.snapshots.push(name);

        // Rotate so the covered segments become immutable and removable.
        let next_segment = wal_segment_name(self.next_seq);
        if self.manifest.wal_segments.last() != Some(&next_segment) {
            self.writer.sync()?;
            self.writer =
                WalWriter::create(self.workspace.file_path(&next_segment), self.config.fsync_policy)?;
            self.manifest.wal_segments.push(next_segment);
        }

        let mut obsolete = Vec::new();
        while self.manifest.snapshots.len() > self.config.retained_snapshots {
            obsolete.push(self.manifest.snapshots.remove(0));
        }
        // Until the retention set is full the WAL stays complete, so a
        // corrupt newest snapshot can still be rebuilt from the log.
        let compact = self.manifest.snapshots.len() >= self.config.retained_snapshots;
        let oldest_retained = self
            .manifest
            .snapshots
            .first()
            .and_then(|s| parse_seq(s))
            .unwrap_or(seq);
        // Segment i holds seqs [start_i, start_{i+1}); drop it once the
        // oldest retained snapshot covers all of them.
        while compact && self.manifest.wal_segments.len() > 1 {
            let covered = parse_seq(&self.manifest.wal_segments[1])
                .map(|next_start| next_start <= oldest_retained + 1)
                .unwrap_or(false);
            if !covered {
                break;
            }
            obsolete.push(self.manifest.wal_segments.remove(0));
        }

        self.manifest.save(self.workspace.manifest_path())?;
        for name in &obsolete {
            let stale = self.workspace.file_path(name);
            if let Err(e) = std::fs::remove_file(&stale) {
                warn!(file = %stale.display(), error = %e, "failed to remove obsolete file");
            }
        }

        self.mutations_since_snapshot = 0;
        metrics::SNAPSHOTS_TOTAL.inc();
        timer.observe_duration();
        info!(
            snapshot = %path.display(),
            records = store.total_count(),
            removed = obsolete.len(),
            "snapshot written"
        );
        Ok(path)
    }

    /// fsync the active segment regardless of the configured policy.
    pub fn sync(&mut self) -> Result<()> {
        self.writer.sync()?;
        Ok(())
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Sequence number of the last durable entry (0 if none).
    pub fn last_seq(&self) -> u64 {
        self.next_seq - 1
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn mutations_since_snapshot(&self) -> u64 {
        self.mutations_since_snapshot
    }

    pub fn active_segment(&self) -> &std::path::Path {
        self.writer.path()
    }
}

/// Newest snapshot that loads and matches the workspace, or empty state.
fn load_latest_snapshot(
    workspace: &Workspace,
    manifest: &Manifest,
) -> (VectorStore, HnswIndex, ReplayStats) {
    let mut stats = ReplayStats::default();
    for name in manifest.snapshots.iter().rev() {
        let path = workspace.file_path(name);
        match restore_snapshot(workspace, &path) {
            Ok((store, index, seq)) => {
                info!(snapshot = %name, seq, records = store.total_count(), "snapshot loaded");
                stats.snapshot_seq = Some(seq);
                return (store, index, stats);
            }
            Err(e) => {
                warn!(snapshot = %name, error = %e, "snapshot unusable; trying an older one");
                metrics::SNAPSHOT_FALLBACKS_TOTAL.inc();
                stats.snapshot_fallbacks += 1;
            }
        }
    }
    let store = VectorStore::new(workspace.dimension());
    let index = HnswIndex::new(workspace.dimension(), workspace.metric(), workspace.hnsw());
    (store, index, stats)
}

fn restore_snapshot(
    workspace: &Workspace,
    path: &std::path::Path,
) -> Result<(VectorStore, HnswIndex, u64)> {
    let snapshot = Snapshot::load(path)?;
    if snapshot.dimension != workspace.dimension() || snapshot.metric != workspace.metric() {
        return Err(VectorDbError::ConfigMismatch {
            field: "snapshot",
            expected: format!("{}/{}", workspace.dimension(), workspace.metric()),
            actual: format!("{}/{}", snapshot.dimension, snapshot.metric),
        });
    }
    if snapshot.graph.len() != snapshot.records.len() {
        return Err(VectorDbError::InvalidArgument(format!(
            "snapshot graph has {} nodes for {} records",
            snapshot.graph.len(),
            snapshot.records.len()
        )));
    }
    let store = VectorStore::from_records(snapshot.dimension, snapshot.records)?;
    Ok((store, snapshot.graph, snapshot.seq))
}

/// Delete leftovers of interrupted writes: temp files, and segments or
/// snapshots that never made it into the manifest.
fn remove_orphans(workspace: &Workspace, manifest: &Manifest) -> Result<()> {
    for entry in std::fs::read_dir(workspace.root())? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let is_temp = name.ends_with(".tmp");
        let is_log_file = parse_seq(&name).is_some();
        let listed = manifest.snapshots.contains(&name) || manifest.wal_segments.contains(&name);
        if is_temp || (is_log_file && !listed) {
            debug!(file = %name, "removing orphaned file");
            std::fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Segment for this session's appends, registered in the manifest.
fn open_session_segment(
    workspace: &Workspace,
    manifest: &mut Manifest,
    next_seq: u64,
    config: &PersistenceConfig,
) -> Result<WalWriter> {
    let name = wal_segment_name(next_seq);
    let path = workspace.file_path(&name);
    if manifest.wal_segments.last() == Some(&name) {
        // The previous session logged nothing after opening this segment.
        return Ok(WalWriter::open_append(&path, config.fsync_policy)?);
    }
    let writer = WalWriter::create(&path, config.fsync_policy)?;
    manifest.wal_segments.push(name);
    manifest.save(workspace.manifest_path())?;
    debug!(wal_segment = %path.display(), "opened session segment");
    Ok(writer)
}
