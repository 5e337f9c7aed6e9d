#![allow(clippy::collapsible_if)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::manual_map)]

//! Quarry - a local, per-project code retrieval engine.
//!
//! Answers two questions quickly and with a small memory footprint:
//! "where in this codebase is X?" and "who calls / is called by this
//! symbol?". Single-tenant, single-process; code never leaves the host.
//!
//! # Architecture
//!
//! Indexing flows through one pipeline:
//!
//! 1. **Crawl**: walk the project root with ignore rules, resolve languages,
//!    hash content, annotate git recency ([`crawler`], [`gitio`]).
//! 2. **Parse & chunk**: tree-sitter extraction into semantic nodes, then
//!    AST-aware chunking with overlap splits ([`parser`], [`chunker`]).
//! 3. **Index**: embeddings into a disk-backed vector store, tokens into a
//!    BM25 index, definitions and call sites into the xref graph, names into
//!    the fuzzy index ([`vector`], [`bm25`], [`xref`], [`fuzzy`]).
//! 4. **Record**: the file catalogue and index state plan the next
//!    incremental run ([`catalog`]).
//!
//! Queries fuse semantic and lexical retrieval with git-recency, export, and
//! entry-point signals ([`search`]), serve callers/callees from the xref
//! graph ([`xref`]), and widen code windows by containing symbol
//! ([`context`]).
//!
//! # Usage
//!
//! ```ignore
//! use quarry_index::{Config, Indexer, IndexOptions};
//!
//! let config = Config::for_root("/path/to/repo");
//! let engine = quarry_index::embed::default_engine(&config)?;
//! let indexer = Indexer::new(config.clone(), engine.clone());
//! let report = indexer.run(&IndexOptions::default()).await?;
//!
//! let searcher = quarry_index::HybridSearcher::open(&config, engine)?;
//! let results = searcher.search("retry policy", &Default::default())?;
//! ```

pub mod bm25;
pub mod catalog;
pub mod chunker;
pub mod cli;
pub mod config;
pub mod context;
pub mod crawler;
pub mod embed;
pub mod error;
pub mod fuzzy;
pub mod gitio;
pub mod indexer;
pub mod lang;
pub mod parser;
pub mod search;
pub mod storage;
pub mod types;
pub mod vector;
pub mod xref;

// Re-exports
pub use catalog::{FileCatalog, IndexState, IndexedFile};
pub use config::Config;
pub use context::{ContextReader, ContextRequest, ContextResponse};
pub use crawler::Crawler;
pub use embed::{EmbeddingEngine, HashedEmbedder};
pub use error::{QuarryError, Result};
pub use fuzzy::{FuzzyIndex, FuzzyMatch};
pub use gitio::GitTracker;
pub use indexer::{collect_stats, IndexOptions, Indexer, StatsReport};
pub use parser::AstParser;
pub use search::{HybridSearcher, QueryOptions, RankWeights};
pub use types::*;
pub use vector::{SearchFilter, VectorStore};
pub use xref::{XrefDirection, XrefGraph, XrefResponse};

/// Crate version, stamped into reports.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
