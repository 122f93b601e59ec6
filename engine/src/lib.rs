//! Embeddable HNSW vector database.
//!
//! Documents (stable id, attributes, one embedding) are indexed into an
//! in-memory HNSW graph; every mutation is first written to a segmented,
//! checksummed log inside a workspace directory, and periodic snapshots
//! bound replay time on reopen.
//!
//! ```no_run
//! use vectordb_engine::{DistanceMetric, Document, HnswVectorDb};
//!
//! # fn main() -> vectordb_engine::Result<()> {
//! let db = HnswVectorDb::open_or_create("./workspace", 3, DistanceMetric::Cosine)?;
//! db.index(Document::new("doc-1", vec![0.1, 0.2, 0.3]).with_attribute("text", "hello"))?;
//! let hits = db.search_one(&Document::new("q", vec![0.1, 0.2, 0.25]), 5)?;
//! println!("{:?}", hits.top());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod distance;
pub mod document;
pub mod error;
pub mod hnsw_index;
pub mod logging;
pub mod metrics;
pub mod mutation_log;
pub mod persistence;
pub mod vector_store;
pub mod vectordb;
pub mod workspace;

pub use config::{
    DistanceMetric, FsyncPolicy, HnswConfig, IndexMode, LogFormat, LogLevel, LoggingConfig,
    PersistenceConfig, SearchConfig, VectorDbConfig,
};
pub use document::{Document, Match, Metadata, OneOrMany, QueryMatches};
pub use error::{Result, VectorDbError};
pub use hnsw_index::{HnswIndex, SearchResult};
pub use mutation_log::ReplayStats;
pub use vector_store::{EmbeddingLookup, Record, VectorStore};
pub use vectordb::{DbStats, HnswVectorDb};
pub use workspace::{GraphParams, Workspace};
