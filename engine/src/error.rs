//! Error types surfaced by the vector database.

use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by [`HnswVectorDb`](crate::HnswVectorDb) and its components.
#[derive(Debug, Error)]
pub enum VectorDbError {
    /// Embedding length differs from the index dimensionality.
    #[error("dimension mismatch for document '{id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Offending document id (empty for anonymous queries).
        id: String,
        /// Configured dimensionality.
        expected: usize,
        /// Length of the supplied embedding.
        actual: usize,
    },

    /// No live record carries this id.
    #[error("document not found: '{id}'")]
    NotFound {
        /// The external (or stringified internal) id.
        id: String,
    },

    /// Strict insert of an id that is already live.
    #[error("document '{id}' is already indexed")]
    DuplicateId {
        /// The colliding external id.
        id: String,
    },

    /// Search issued while no live record exists.
    #[error("index is empty: nothing to search")]
    EmptyIndex,

    /// The workspace was created with different settings.
    #[error("workspace {field} mismatch: workspace has {expected}, caller requested {actual}")]
    ConfigMismatch {
        /// Setting that differs (`dimension`, `metric`).
        field: &'static str,
        /// Value persisted in the workspace.
        expected: String,
        /// Value the caller asked for.
        actual: String,
    },

    /// Another handle has the workspace open.
    #[error("workspace {} is locked by another handle", path.display())]
    WorkspaceLocked {
        /// Root of the locked workspace.
        path: PathBuf,
    },

    /// The mutation log cannot be replayed.
    #[error("corrupt mutation log {}: {reason}", path.display())]
    CorruptLog {
        /// Segment or snapshot that failed.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Caller passed an argument outside the accepted range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Filesystem error outside the log/snapshot codecs.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure inside the WAL, snapshot or manifest codecs.
    #[error("persistence error: {0:#}")]
    Persistence(#[from] anyhow::Error),
}

impl VectorDbError {
    pub(crate) fn dimension(id: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            id: id.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, VectorDbError>;
