// engine/src/config.rs
//
// Configuration for the embedded vector database.
//
// Sources, lowest to highest priority:
// 1. Built-in defaults
// 2. Config file (YAML/TOML/JSON), optional
// 3. Environment variables (VECTORDB__SECTION__KEY)
//
// Embedding dimensionality and distance metric are not part of this file:
// they identify a workspace and are passed to `HnswVectorDb::open_or_create`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

// ============================================================================
// Main Configuration Structure
// ============================================================================

/// Complete tunable configuration of one database handle.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct VectorDbConfig {
    /// HNSW graph construction and search parameters
    pub hnsw: HnswConfig,

    /// Tombstone over-fetch policy of the query path
    pub search: SearchConfig,

    /// Mutation log and snapshot settings
    pub persistence: PersistenceConfig,

    /// Behavior of `index()` when a document id is already live
    pub index_mode: IndexMode,

    /// Logging configuration (used by the CLI)
    pub logging: LoggingConfig,
}

// ============================================================================
// HNSW Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HnswConfig {
    /// Number of links per node on layers >= 1 (M parameter)
    pub m: usize,

    /// Number of links per node on layer 0 (usually 2 * M)
    pub m_max0: usize,

    /// Size of dynamic candidate list during construction
    pub ef_construction: usize,

    /// Size of dynamic candidate list during search (raised to k when smaller)
    pub ef_search: usize,

    /// Highest layer a node may be assigned to
    pub max_level: usize,

    /// Seed of the level generator; same seed + same inserts = same graph
    pub level_seed: u64,
}

impl HnswConfig {
    /// Level multiplier `1 / ln(M)` of the geometric level distribution.
    pub fn level_multiplier(&self) -> f64 {
        1.0 / (self.m.max(2) as f64).ln()
    }
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self {
            m: 16,
            m_max0: 32,
            ef_construction: 200,
            ef_search: 100,
            max_level: 16,
            level_seed: 0x5EED_1DB5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Cosine distance (1 - cosine similarity)
    #[default]
    Cosine,
    /// Squared Euclidean distance (L2 without the square root)
    #[serde(alias = "euclidean", alias = "l2")]
    SquaredEuclidean,
    /// Inner product distance (1 - dot product)
    #[serde(alias = "ip", alias = "dot")]
    InnerProduct,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::SquaredEuclidean => "squared_euclidean",
            DistanceMetric::InnerProduct => "inner_product",
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cosine" => Ok(DistanceMetric::Cosine),
            "squared_euclidean" | "euclidean" | "l2" => Ok(DistanceMetric::SquaredEuclidean),
            "inner_product" | "ip" | "dot" => Ok(DistanceMetric::InnerProduct),
            other => anyhow::bail!(
                "unknown distance metric '{}': expected cosine, squared_euclidean or inner_product",
                other
            ),
        }
    }
}

// ============================================================================
// Search Configuration
// ============================================================================

/// Bounds of the over-fetch-and-filter loop that hides tombstoned records.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    /// Initial candidate count is `limit * overfetch_factor`
    pub overfetch_factor: usize,

    /// How many times the candidate count may double before giving up
    pub max_search_retries: usize,

    /// Limit used by the CLI when none is given
    pub default_limit: usize,

    /// Hard cap on `limit`
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            overfetch_factor: 2,
            max_search_retries: 4,
            default_limit: 10,
            max_limit: 10_000,
        }
    }
}

// ============================================================================
// Persistence Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PersistenceConfig {
    /// Durability of each log append
    pub fsync_policy: FsyncPolicy,

    /// Snapshot every N logged mutations (0 = only on demand)
    pub snapshot_interval_mutations: u64,

    /// Number of snapshots kept for fallback recovery
    pub retained_snapshots: usize,

    /// Frames larger than this are treated as corruption during replay
    pub max_entry_bytes: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            fsync_policy: FsyncPolicy::DataOnly,
            snapshot_interval_mutations: 10_000,
            retained_snapshots: 2,
            max_entry_bytes: 64 * 1024 * 1024, // 64 MB
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FsyncPolicy {
    /// Flush to the OS only (fastest, entries may be lost on power failure)
    None,
    /// fsync data only (good balance)
    #[default]
    DataOnly,
    /// fsync data and metadata (safest, slowest)
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexMode {
    /// Indexing a live id fails with `DuplicateId`
    #[default]
    Strict,
    /// Indexing a live id replaces it, like `update`
    Upsert,
}

// ============================================================================
// Logging Configuration
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: LogLevel,

    /// Log format (json or text)
    pub format: LogFormat,

    /// Log to file (path, or None for stderr only)
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            file: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

// ============================================================================
// Configuration Loading
// ============================================================================

impl VectorDbConfig {
    /// Load configuration with priority chain:
    /// 1. Environment variables (VECTORDB__*)
    /// 2. Config file (if provided)
    /// 3. Built-in defaults
    pub fn load(config_file: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        let defaults = Self::default();
        let defaults_json =
            serde_json::to_string(&defaults).context("Failed to serialize defaults")?;
        builder = builder.add_source(config::File::from_str(
            &defaults_json,
            config::FileFormat::Json,
        ));

        if let Some(path) = config_file {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("VECTORDB")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder.build().context("Failed to build config")?;

        let config: Self = settings
            .try_deserialize()
            .context("Failed to deserialize config")?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<()> {
        // HNSW validation
        anyhow::ensure!(
            self.hnsw.m >= 2 && self.hnsw.m <= 128,
            "HNSW M parameter must be in range [2, 128], got {}",
            self.hnsw.m
        );
        anyhow::ensure!(
            self.hnsw.m_max0 >= self.hnsw.m,
            "HNSW m_max0 ({}) must be >= m ({})",
            self.hnsw.m_max0,
            self.hnsw.m
        );
        anyhow::ensure!(
            self.hnsw.ef_construction >= self.hnsw.m,
            "HNSW ef_construction ({}) must be >= m ({})",
            self.hnsw.ef_construction,
            self.hnsw.m
        );
        anyhow::ensure!(
            self.hnsw.ef_search > 0,
            "HNSW ef_search must be > 0, got {}",
            self.hnsw.ef_search
        );
        anyhow::ensure!(
            self.hnsw.max_level > 0 && self.hnsw.max_level <= 32,
            "HNSW max_level must be in range [1, 32], got {}",
            self.hnsw.max_level
        );

        // Search validation
        anyhow::ensure!(
            self.search.overfetch_factor >= 1,
            "search.overfetch_factor must be >= 1, got {}",
            self.search.overfetch_factor
        );
        anyhow::ensure!(
            self.search.default_limit > 0
                && self.search.default_limit <= self.search.max_limit,
            "search.default_limit must be in range [1, {}], got {}",
            self.search.max_limit,
            self.search.default_limit
        );

        // Persistence validation
        anyhow::ensure!(
            self.persistence.retained_snapshots >= 1,
            "persistence.retained_snapshots must be >= 1, got {}",
            self.persistence.retained_snapshots
        );
        anyhow::ensure!(
            self.persistence.max_entry_bytes >= 1024,
            "persistence.max_entry_bytes must be >= 1024, got {}",
            self.persistence.max_entry_bytes
        );

        Ok(())
    }
}
