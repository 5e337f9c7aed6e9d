//! Engine configuration.
//!
//! Defaults first, environment overrides second. All knobs are optional;
//! a bare `Config::for_root(path)` is a fully working configuration.

use crate::types::content_hash;
use std::path::{Path, PathBuf};

/// Environment variables honoured by [`Config::from_env`].
pub const ENV_PROJECT_ROOT: &str = "PROJECT_ROOT";
pub const ENV_DATA_DIR: &str = "DATA_DIR";
pub const ENV_EMBEDDING_MODEL: &str = "EMBEDDING_MODEL";
pub const ENV_EMBEDDING_DIMENSIONS: &str = "EMBEDDING_DIMENSIONS";
pub const ENV_CHUNK_OVERLAP_RATIO: &str = "CHUNK_OVERLAP_RATIO";
pub const ENV_CHUNK_GROUNDING_LINES: &str = "CHUNK_GROUNDING_LINES";
pub const ENV_LOG_LEVEL: &str = "LOG_LEVEL";

/// Project-local ignore file, applied on top of `.gitignore` and built-ins.
pub const IGNORE_FILE: &str = ".quarryignore";

/// Exponential-decay half-life for the git recency ranking factor.
pub const RECENCY_HALF_LIFE_DAYS: f32 = 30.0;

#[derive(Debug, Clone)]
pub struct Config {
    pub project_root: PathBuf,
    /// Per-project index directory, default `~/.quarry/<project-hash>/`.
    pub data_dir: PathBuf,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    /// Chunks above this estimated token count are split into windows.
    pub max_chunk_tokens: usize,
    /// Fraction of the window carried over between consecutive splits.
    pub overlap_ratio: f32,
    /// Lines of the original symbol prepended to every split window.
    pub grounding_lines: usize,
    /// Shorter uncovered spans are coalesced into a neighbour block chunk.
    pub min_block_lines: usize,
    pub embed_batch_size: usize,
    pub embed_inflight_batches: usize,
    pub embed_timeout_secs: u64,
    /// Soft deadline for query paths, after which partial results return.
    pub query_deadline_ms: u64,
}

impl Config {
    /// Configuration for a project root with all defaults.
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        let project_root = root.into();
        let data_dir = default_data_dir(&project_root);
        Self {
            project_root,
            data_dir,
            embedding_model: "all-minilm-l6-v2".to_string(),
            embedding_dimensions: 384,
            max_chunk_tokens: 400,
            overlap_ratio: 0.15,
            grounding_lines: 5,
            min_block_lines: 3,
            embed_batch_size: 32,
            embed_inflight_batches: 4,
            embed_timeout_secs: 30,
            query_deadline_ms: 2000,
        }
    }

    /// Configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let root = std::env::var(ENV_PROJECT_ROOT)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let mut config = Self::for_root(root);

        if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(model) = std::env::var(ENV_EMBEDDING_MODEL) {
            config.embedding_model = model;
        }
        if let Some(dims) = parse_env(ENV_EMBEDDING_DIMENSIONS) {
            config.embedding_dimensions = dims;
        }
        if let Some(ratio) = parse_env::<f32>(ENV_CHUNK_OVERLAP_RATIO) {
            if (0.0..1.0).contains(&ratio) {
                config.overlap_ratio = ratio;
            }
        }
        if let Some(lines) = parse_env(ENV_CHUNK_GROUNDING_LINES) {
            config.grounding_lines = lines;
        }

        config
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    // Durable artifact paths under the data dir.

    pub fn file_index_path(&self) -> PathBuf {
        self.data_dir.join("file-index.json")
    }

    pub fn index_state_path(&self) -> PathBuf {
        self.data_dir.join("index-state.json")
    }

    pub fn xref_path(&self) -> PathBuf {
        self.data_dir.join("xref-graph.json")
    }

    pub fn bm25_path(&self) -> PathBuf {
        self.data_dir.join("bm25-index.json")
    }

    pub fn fuzzy_path(&self) -> PathBuf {
        self.data_dir.join("fuzzy-index.json")
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vector")
    }
}

fn parse_env<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok()?.trim().parse().ok()
}

/// `~/.quarry/<project-hash>/`, where the hash is taken over the canonical
/// root path so two checkouts of the same repo get distinct index dirs.
fn default_data_dir(root: &Path) -> PathBuf {
    let canonical = root
        .canonicalize()
        .unwrap_or_else(|_| root.to_path_buf());
    let project_hash = content_hash(canonical.to_string_lossy().as_bytes());

    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".quarry").join(project_hash)
}
