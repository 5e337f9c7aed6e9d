//! Core types for the retrieval engine.
//!
//! This module defines the data structures shared across the pipeline:
//! crawler output, chunks, ranking signals, and run reports.

use lasso::Spur;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Interned string handle for memory-efficient symbol storage.
pub type InternedString = Spur;

// ============================================================================
// Languages
// ============================================================================

/// Supported source languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    TypeScript,
    Tsx,
    JavaScript,
    Python,
    Go,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::TypeScript => "typescript",
            Self::Tsx => "tsx",
            Self::JavaScript => "javascript",
            Self::Python => "python",
            Self::Go => "go",
        }
    }

    /// Resolve a language from a file extension, if the extension is mapped.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Self::Rust),
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "py" | "pyi" => Some(Self::Python),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

impl std::str::FromStr for Language {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rust" => Ok(Self::Rust),
            "typescript" => Ok(Self::TypeScript),
            "tsx" => Ok(Self::Tsx),
            "javascript" => Ok(Self::JavaScript),
            "python" => Ok(Self::Python),
            "go" => Ok(Self::Go),
            _ => Err(()),
        }
    }
}

// ============================================================================
// Crawler output
// ============================================================================

/// A source file discovered by the crawler. Created fresh on every scan,
/// never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledFile {
    /// Path relative to the project root, with `/` separators.
    pub relative_path: String,
    /// Absolute path on disk.
    pub absolute_path: PathBuf,
    pub language: Language,
    /// 16-hex truncation of the blake3 digest of the file bytes.
    pub hash: String,
    pub size: u64,
    /// Filesystem mtime, milliseconds since the Unix epoch.
    pub modified_at: u64,
    /// Normalised recent-commit position, most recent = 1.0.
    pub git_priority: Option<f32>,
    pub has_uncommitted_changes: Option<bool>,
}

/// Result of a crawl over the project root.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub files: Vec<CrawledFile>,
    pub total_files: usize,
    pub total_size: u64,
    /// Language tag -> file count. Sums to `total_files`.
    pub languages: BTreeMap<String, usize>,
    pub git_aware: bool,
}

// ============================================================================
// Chunks
// ============================================================================

/// The shape of code a chunk covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Function,
    Method,
    Class,
    Interface,
    Type,
    Struct,
    Enum,
    Module,
    Block,
}

impl ChunkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Type => "type",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Module => "module",
            Self::Block => "block",
        }
    }

    /// Declaration kinds always carry a name; `Block` chunks never do.
    pub fn is_declaration(&self) -> bool {
        !matches!(self, Self::Block)
    }
}

impl std::str::FromStr for ChunkKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(Self::Function),
            "method" => Ok(Self::Method),
            "class" => Ok(Self::Class),
            "interface" => Ok(Self::Interface),
            "type" => Ok(Self::Type),
            "struct" => Ok(Self::Struct),
            "enum" => Ok(Self::Enum),
            "module" => Ok(Self::Module),
            "block" => Ok(Self::Block),
            _ => Err(()),
        }
    }
}

/// The durable unit of retrieval: a contiguous source slice plus metadata.
///
/// The embedding vector lives beside the chunk in the vector store, not on
/// the chunk itself, so metadata can stay resident without the vectors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable id: `<relative_path>:<start>-<end>:<hash8>`.
    pub id: String,
    pub relative_path: String,
    pub file_path: PathBuf,
    pub language: Language,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive. Always >= `start_line`.
    pub end_line: usize,
    pub kind: ChunkKind,
    /// Non-null for declaration kinds.
    pub name: Option<String>,
    /// Enclosing symbol names, innermost last. Split parts append `#<n>`.
    pub scope: Vec<String>,
    /// Exact source slice covered by the span at index time.
    pub code: String,
    pub docstring: Option<String>,
    /// 16-hex blake3 truncation of `code`.
    pub content_hash: String,
    /// Open-ended per-language metadata columns.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    /// Fully-qualified name: scope chain plus own name, joined with `.`.
    pub fn fqn(&self) -> Option<String> {
        let name = self.name.as_deref()?;
        if self.scope.is_empty() {
            Some(name.to_string())
        } else {
            Some(format!("{}.{}", self.scope.join("."), name))
        }
    }

    pub fn line_count(&self) -> usize {
        self.end_line - self.start_line + 1
    }
}

/// Derive the stable chunk id from its path, span, and content hash.
pub fn chunk_id(relative_path: &str, start_line: usize, end_line: usize, content_hash: &str) -> String {
    let prefix = &content_hash[..content_hash.len().min(8)];
    format!("{relative_path}:{start_line}-{end_line}:{prefix}")
}

// ============================================================================
// Search results & ranking
// ============================================================================

/// How a query is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    SemanticOnly,
    LexicalOnly,
    #[default]
    Hybrid,
}

/// Per-candidate ranking signals, all normalised to [0, 1] before fusion.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RankSignals {
    pub semantic: f32,
    pub lexical: f32,
    pub git_recency: f32,
    pub export: f32,
    pub entry_point: f32,
}

/// A ranked chunk returned from search.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub signals: RankSignals,
}

// ============================================================================
// Run reports
// ============================================================================

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_processed: usize,
    pub chunks_created: usize,
    pub files_skipped: usize,
    pub files_updated: usize,
    pub files_deleted: usize,
    /// Language tag -> files processed.
    pub languages: BTreeMap<String, usize>,
    pub duration_ms: u64,
    pub success: bool,
    /// Per-file recoverable failures, `path: reason`.
    pub errors: Vec<String>,
}

/// Current milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// 16-hex truncation of the blake3 digest of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let digest = blake3::hash(bytes);
    digest.to_hex()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic_and_16_hex() {
        let a = content_hash(b"fn main() {}");
        let b = content_hash(b"fn main() {}");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let c = content_hash(b"fn main() { }");
        assert_ne!(a, c);
    }

    #[test]
    fn chunk_id_embeds_span_and_hash_prefix() {
        let id = chunk_id("src/lib.rs", 10, 42, "deadbeefcafef00d");
        assert_eq!(id, "src/lib.rs:10-42:deadbeef");
    }

    #[test]
    fn fqn_joins_scope_chain() {
        let chunk = Chunk {
            id: "x".into(),
            relative_path: "src/a.ts".into(),
            file_path: PathBuf::from("/p/src/a.ts"),
            language: Language::TypeScript,
            start_line: 1,
            end_line: 3,
            kind: ChunkKind::Method,
            name: Some("run".into()),
            scope: vec!["A".into()],
            code: String::new(),
            docstring: None,
            content_hash: "0".repeat(16),
            metadata: BTreeMap::new(),
        };
        assert_eq!(chunk.fqn().as_deref(), Some("A.run"));
    }

    #[test]
    fn language_extension_table() {
        assert_eq!(Language::from_extension("rs"), Some(Language::Rust));
        assert_eq!(Language::from_extension("tsx"), Some(Language::Tsx));
        assert_eq!(Language::from_extension("pyi"), Some(Language::Python));
        assert_eq!(Language::from_extension("md"), None);
    }
}
