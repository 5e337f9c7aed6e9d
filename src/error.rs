//! Error taxonomy for the retrieval engine.
//!
//! Fatal errors abort the operation and surface to the caller; per-file
//! failures are logged and aggregated into the run report by the indexer;
//! query-level failures come back as structured responses, never panics.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, QuarryError>;

#[derive(Debug, Error)]
pub enum QuarryError {
    /// The configured project root does not exist or is not a directory.
    #[error("project root not found: {0}")]
    MissingProjectRoot(PathBuf),

    /// The data directory could not be created or opened.
    #[error("data directory unusable: {path}: {source}")]
    DataDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Stored index was built with a different embedding dimension.
    /// Requires `force` to rebuild.
    #[error("embedding dimension changed: index has {stored}, engine produces {actual}; re-run with force")]
    DimensionMismatch { stored: usize, actual: usize },

    /// A durable artifact failed to read or write.
    #[error("storage failure at {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// Embedding engine failure (initialisation or a batch).
    #[error("embedding engine: {0}")]
    Embedding(String),

    /// An index that a query needs has not been built yet.
    #[error("index not available: {0}; run `quarry index` first")]
    IndexNotAvailable(&'static str),

    /// A malformed search filter or query parameter.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Git(#[from] git2::Error),
}

impl QuarryError {
    pub fn storage(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Storage {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
