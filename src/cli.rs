//! quarry - CLI for the local code retrieval engine.
//!
//! Designed for automation: `--json` emits machine-readable output, errors
//! go to stderr, results to stdout, exit code 0 on success.
//!
//! ```bash
//! # Index the current project
//! quarry index
//!
//! # Hybrid search
//! quarry search "retry policy" -k 5
//!
//! # Fuzzy symbol lookup
//! quarry symbols getuserbyid
//!
//! # Who calls / is called by a symbol
//! quarry xrefs greet --direction callers
//!
//! # Code window around a symbol
//! quarry context src/a.ts --symbol greet
//! ```

use crate::config::Config;
use crate::context::{ContextReader, ContextRequest};
use crate::embed;
use crate::error::QuarryError;
use crate::indexer::{collect_stats, IndexOptions, Indexer};
use crate::search::{HybridSearcher, QueryOptions};
use crate::types::{ChunkKind, Language, SearchMode};
use crate::vector::{SearchFilter, VectorStore};
use crate::xref::{XrefDirection, XrefGraph};
use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quarry")]
#[command(version)]
#[command(about = "Local code retrieval - hybrid search and xrefs for AI agents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Project root to operate on
    #[arg(short, long, global = true, default_value = ".")]
    root: PathBuf,

    /// Index data directory (default: ~/.quarry/<project-hash>/)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index incrementally
    Index {
        /// Discard existing state and rebuild from scratch
        #[arg(long)]
        force: bool,

        /// Ignore uncommitted working-tree changes when planning
        #[arg(long)]
        committed_only: bool,
    },

    /// Search the index
    Search {
        query: String,

        /// Maximum results
        #[arg(short = 'k', long, default_value = "10")]
        limit: usize,

        /// Mode: hybrid, semantic, lexical
        #[arg(long, default_value = "hybrid")]
        mode: String,

        /// Restrict to a chunk type (function, class, struct, ...)
        #[arg(long)]
        filter_type: Option<String>,

        /// Restrict to a language tag
        #[arg(long)]
        filter_language: Option<String>,

        /// Globs results must match (repeatable)
        #[arg(long, value_name = "GLOB")]
        include: Vec<String>,

        /// Globs results must not match (repeatable)
        #[arg(long, value_name = "GLOB")]
        exclude: Vec<String>,

        /// Disable the recency/export/entry-point ranking layer
        #[arg(long)]
        no_ranking: bool,

        /// Override the semantic fusion weight (0.0 - 1.0)
        #[arg(long)]
        semantic_weight: Option<f32>,
    },

    /// Fuzzy symbol lookup
    Symbols {
        query: String,

        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,

        #[arg(long, default_value = "0.4")]
        threshold: f32,
    },

    /// Callers and callees of a symbol
    Xrefs {
        symbol: String,

        /// Direction: callers, callees, both
        #[arg(short, long, default_value = "both")]
        direction: String,

        #[arg(long, default_value = "20")]
        max_results: usize,
    },

    /// Read a code window from a file
    Context {
        file: String,

        #[arg(long)]
        symbol: Option<String>,

        #[arg(long)]
        start_line: Option<usize>,

        #[arg(long)]
        end_line: Option<usize>,

        #[arg(long, default_value = "5")]
        context_lines: usize,
    },

    /// Index statistics
    Stats,
}

/// Entry point used by the `quarry` binary.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Environment first (embedding model, chunking knobs, DATA_DIR), then
    // the --root flag decides the project and its default data dir.
    let env = Config::from_env();
    let mut config = Config::for_root(cli.root.clone());
    config.embedding_model = env.embedding_model;
    config.embedding_dimensions = env.embedding_dimensions;
    config.overlap_ratio = env.overlap_ratio;
    config.grounding_lines = env.grounding_lines;
    if std::env::var(crate::config::ENV_DATA_DIR).is_ok() {
        config.data_dir = env.data_dir;
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }

    match cli.command {
        Commands::Index {
            force,
            committed_only,
        } => {
            let engine = embed::default_engine(&config)?;
            let indexer = Indexer::new(config, engine);
            let report = indexer
                .run(&IndexOptions {
                    force,
                    include_uncommitted: !committed_only,
                })
                .await?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "indexed {} files ({} chunks) in {}ms; {} updated, {} deleted, {} skipped",
                    report.files_processed,
                    report.chunks_created,
                    report.duration_ms,
                    report.files_updated,
                    report.files_deleted,
                    report.files_skipped,
                );
                for error in &report.errors {
                    eprintln!("warn: {error}");
                }
            }
        }

        Commands::Search {
            query,
            limit,
            mode,
            filter_type,
            filter_language,
            include,
            exclude,
            no_ranking,
            semantic_weight,
        } => {
            let engine = embed::default_engine(&config)?;
            let searcher = HybridSearcher::open(&config, engine)
                .context("open index (run `quarry index` first)")?;

            let options = QueryOptions {
                limit,
                mode: parse_mode(&mode)?,
                filter: SearchFilter {
                    kind: filter_type.as_deref().map(parse_kind).transpose()?,
                    language: filter_language.as_deref().map(parse_language).transpose()?,
                    path_prefix: None,
                },
                include_paths: include,
                exclude_paths: exclude,
                use_ranking: !no_ranking,
                semantic_weight,
            };

            let results = searcher.search(&query, &options)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("no results");
            } else {
                for result in &results {
                    println!(
                        "{:.3}  {}:{}-{}  {} {}",
                        result.score,
                        result.chunk.relative_path,
                        result.chunk.start_line,
                        result.chunk.end_line,
                        result.chunk.kind.as_str(),
                        result.chunk.name.as_deref().unwrap_or("<block>"),
                    );
                    if let Some(signature) =
                        result.chunk.metadata.get(crate::chunker::SIGNATURE_KEY)
                    {
                        println!("       {signature}");
                    }
                }
            }
        }

        Commands::Symbols {
            query,
            limit,
            threshold,
        } => {
            let fuzzy = crate::fuzzy::FuzzyIndex::load(&config.fuzzy_path())?;
            let matches = fuzzy.search(&query, limit, threshold, None);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&matches)?);
            } else if matches.is_empty() {
                println!("no symbols match '{query}'");
            } else {
                for m in &matches {
                    println!(
                        "{:.2}  {}  {}:{}",
                        m.score,
                        m.name,
                        m.metadata.file_path,
                        m.metadata.line.unwrap_or(0),
                    );
                }
            }
        }

        Commands::Xrefs {
            symbol,
            direction,
            max_results,
        } => {
            let xref = XrefGraph::new();
            let loaded = xref.load(&config.xref_path())?;
            if !loaded {
                return Err(QuarryError::IndexNotAvailable("xref graph").into());
            }

            let direction: XrefDirection = direction
                .parse()
                .map_err(|_| QuarryError::InvalidQuery(format!("bad direction: {direction}")))?;
            let response = xref.lookup(&symbol, direction, max_results);

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                if !response.callers.is_empty() {
                    println!("callers of {symbol}:");
                    for site in &response.callers {
                        println!("  {} at {}:{}", site.caller_fqn, site.file, site.line);
                    }
                }
                if !response.callees.is_empty() {
                    println!("callees of {symbol}:");
                    for callee in &response.callees {
                        println!("  {callee}");
                    }
                }
                if !response.suggestions.is_empty() {
                    println!("symbol not found; did you mean:");
                    for suggestion in &response.suggestions {
                        println!("  {suggestion}");
                    }
                }
                if response.callers.is_empty()
                    && response.callees.is_empty()
                    && response.suggestions.is_empty()
                {
                    println!("no references for {symbol}");
                }
            }
        }

        Commands::Context {
            file,
            symbol,
            start_line,
            end_line,
            context_lines,
        } => {
            let dim = VectorStore::stored_dim(&config.vector_dir())
                .unwrap_or(config.embedding_dimensions);
            let vector = VectorStore::open(&config.vector_dir(), dim)?;
            let reader = ContextReader::new(&config.project_root, &vector);

            let request = ContextRequest {
                file,
                symbol,
                start_line,
                end_line,
                context_lines,
            };
            let response = reader.read(&request)?;

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                println!(
                    "{}:{}-{}",
                    request.file, response.start_line, response.end_line
                );
                println!("{}", response.code);
            }
        }

        Commands::Stats => {
            let stats = collect_stats(&config)?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!(
                    "{} files, {} chunks, {} definitions, {} call sites",
                    stats.total_files,
                    stats.total_chunks,
                    stats.xrefs.definitions,
                    stats.xrefs.call_sites,
                );
                for (language, count) in &stats.languages {
                    println!("  {language}: {count} chunks");
                }
            }
        }
    }

    Ok(())
}

fn parse_mode(s: &str) -> Result<SearchMode> {
    match s {
        "hybrid" => Ok(SearchMode::Hybrid),
        "semantic" => Ok(SearchMode::SemanticOnly),
        "lexical" => Ok(SearchMode::LexicalOnly),
        other => Err(QuarryError::InvalidQuery(format!("bad mode: {other}")).into()),
    }
}

fn parse_kind(s: &str) -> Result<ChunkKind> {
    s.parse()
        .map_err(|_| QuarryError::InvalidQuery(format!("bad chunk type: {s}")).into())
}

fn parse_language(s: &str) -> Result<Language> {
    s.parse()
        .map_err(|_| QuarryError::InvalidQuery(format!("bad language: {s}")).into())
}
