//! Workspace directory: layout, identity metadata, and the writer lock.
//!
//! An opened [`Workspace`] holds the exclusive lock on `LOCK` until it is
//! dropped, so at most one handle appends to a workspace at a time.
//!
//! ```text
//! <workspace>/
//!   meta.json            dimension, metric, graph parameters, format version
//!   MANIFEST             snapshots + WAL segments, in order
//!   LOCK                 fs2 exclusive lock target
//!   wal_<seq>.wal        mutation log segments
//!   snapshot_<seq>.snap  state snapshots
//! ```

use anyhow::Context;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

use crate::config::{DistanceMetric, HnswConfig};
use crate::error::{Result, VectorDbError};
use crate::persistence::{now_secs, FORMAT_VERSION};

const META_FILE: &str = "meta.json";
const MANIFEST_FILE: &str = "MANIFEST";
const LOCK_FILE: &str = "LOCK";

/// HNSW parameters that shape the graph. Fixed at creation so that log
/// replay rebuilds the graph the previous sessions built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphParams {
    pub m: usize,
    pub m_max0: usize,
    pub ef_construction: usize,
    pub max_level: usize,
    pub level_seed: u64,
}

impl GraphParams {
    pub fn from_config(config: &HnswConfig) -> Self {
        Self {
            m: config.m,
            m_max0: config.m_max0,
            ef_construction: config.ef_construction,
            max_level: config.max_level,
            level_seed: config.level_seed,
        }
    }

    /// `requested` with its build parameters replaced by these.
    /// `ef_search` only affects queries and is taken from `requested`.
    pub fn apply(&self, requested: &HnswConfig) -> HnswConfig {
        HnswConfig {
            m: self.m,
            m_max0: self.m_max0,
            ef_construction: self.ef_construction,
            ef_search: requested.ef_search,
            max_level: self.max_level,
            level_seed: self.level_seed,
        }
    }
}

/// Identity of a workspace, written once at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub format_version: u32,
    pub dimension: usize,
    pub metric: DistanceMetric,
    pub graph: GraphParams,
    pub created_at: u64,
}

/// An opened workspace directory. Holds the writer lock while alive.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    meta: WorkspaceMeta,
    hnsw: HnswConfig,
    lock_file: File,
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.lock_file) {
            warn!(workspace = %self.root.display(), error = %e, "failed to release workspace lock");
        }
    }
}

impl Workspace {
    /// Open `root`, creating it (and its metadata) on first use, and take
    /// the exclusive writer lock.
    ///
    /// Fails with `WorkspaceLocked` while another handle has the workspace
    /// open, and with `ConfigMismatch` when an existing workspace was created
    /// with a different dimension or metric. Graph parameters of an existing
    /// workspace win over the ones in `hnsw`.
    #[instrument(level = "debug", skip(root, hnsw), fields(workspace = %root.as_ref().display()))]
    pub fn open_or_create(
        root: impl AsRef<Path>,
        dimension: usize,
        metric: DistanceMetric,
        hnsw: &HnswConfig,
    ) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorDbError::InvalidArgument(
                "dimension must be > 0".to_string(),
            ));
        }
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;

        let lock_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(root.join(LOCK_FILE))?;
        if let Err(e) = lock_file.try_lock_exclusive() {
            if e.kind() == fs2::lock_contended_error().kind() {
                return Err(VectorDbError::WorkspaceLocked { path: root });
            }
            return Err(e.into());
        }

        let meta_path = root.join(META_FILE);
        let requested = GraphParams::from_config(hnsw);
        let meta = if meta_path.exists() {
            let meta = load_meta(&meta_path)?;
            check_meta(&meta, dimension, metric)?;
            if meta.graph != requested {
                warn!(
                    stored = ?meta.graph,
                    requested = ?requested,
                    "workspace keeps the graph parameters it was created with"
                );
            }
            debug!(dimension, %metric, "opened existing workspace");
            meta
        } else {
            let meta = WorkspaceMeta {
                format_version: FORMAT_VERSION,
                dimension,
                metric,
                graph: requested,
                created_at: now_secs(),
            };
            save_meta(&meta_path, &meta)?;
            info!(workspace = %root.display(), dimension, %metric, "created workspace");
            meta
        };
        let hnsw = meta.graph.apply(hnsw);

        Ok(Self {
            root,
            meta,
            hnsw,
            lock_file,
        })
    }

    /// Metadata of an existing workspace, `None` if `root` holds none yet.
    pub fn read_meta(root: impl AsRef<Path>) -> Result<Option<WorkspaceMeta>> {
        let meta_path = root.as_ref().join(META_FILE);
        if !meta_path.exists() {
            return Ok(None);
        }
        load_meta(&meta_path).map(Some)
    }

    /// HNSW configuration in effect: stored graph parameters plus the
    /// caller's `ef_search`.
    pub fn hnsw(&self) -> &HnswConfig {
        &self.hnsw
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &WorkspaceMeta {
        &self.meta
    }

    pub fn dimension(&self) -> usize {
        self.meta.dimension
    }

    pub fn metric(&self) -> DistanceMetric {
        self.meta.metric
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Path of a segment or snapshot listed in the manifest.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

fn load_meta(path: &Path) -> Result<WorkspaceMeta> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let meta: WorkspaceMeta = serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(meta)
}

fn save_meta(path: &Path, meta: &WorkspaceMeta) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    let json = serde_json::to_string_pretty(meta).context("Failed to serialize meta.json")?;
    let mut file = File::create(&temp_path)?;
    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

fn check_meta(meta: &WorkspaceMeta, dimension: usize, metric: DistanceMetric) -> Result<()> {
    if meta.format_version != FORMAT_VERSION {
        return Err(VectorDbError::ConfigMismatch {
            field: "format_version",
            expected: meta.format_version.to_string(),
            actual: FORMAT_VERSION.to_string(),
        });
    }
    if meta.dimension != dimension {
        return Err(VectorDbError::ConfigMismatch {
            field: "dimension",
            expected: meta.dimension.to_string(),
            actual: dimension.to_string(),
        });
    }
    if meta.metric != metric {
        return Err(VectorDbError::ConfigMismatch {
            field: "metric",
            expected: meta.metric.to_string(),
            actual: metric.to_string(),
        });
    }
    Ok(())
}
