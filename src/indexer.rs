//! Indexing orchestrator.
//!
//! Drives one incremental run end-to-end: plan the delta (git diff when a
//! previous commit is known, content-hash comparison otherwise), parse and
//! chunk changed files off the async runtime, embed in bounded batches, and
//! apply updates to the vector, BM25, xref, and fuzzy indices in a fixed
//! per-file order before the catalogue records the new hash. Per-file
//! failures are logged and skipped; only the taxonomy's fatal cases abort.

use crate::catalog::{FileCatalog, IndexState, IndexedFile};
use crate::chunker::{embedding_text, ChunkPolicy, SemanticChunker};
use crate::config::Config;
use crate::crawler::Crawler;
use crate::embed::EmbeddingEngine;
use crate::error::{QuarryError, Result};
use crate::fuzzy::{FuzzyIndex, FuzzyMeta};
use crate::gitio::{DiffSet, GitTracker};
use crate::parser::{AstParser, CallSite, ParsedNode};
use crate::types::{now_millis, Chunk, CrawlReport, CrawledFile, IndexReport};
use crate::vector::VectorStore;
use crate::xref::XrefGraph;
use crate::bm25::{chunk_tokens, Bm25Index};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task;

#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Discard all derived state and rebuild from scratch.
    pub force: bool,
    /// Merge working-tree changes into the git delta.
    pub include_uncommitted: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            force: false,
            include_uncommitted: true,
        }
    }
}

struct ScanOutcome {
    crawl: CrawlReport,
    head: Option<String>,
    branch: Option<String>,
    /// Commit delta since the last indexed commit, when both are known.
    git_delta: Option<DiffSet>,
    working: Option<DiffSet>,
}

struct FileOutput {
    file: CrawledFile,
    chunks: Vec<Chunk>,
    embeddings: Vec<Vec<f32>>,
    nodes: Vec<ParsedNode>,
    calls: Vec<CallSite>,
}

/// The single writer over all durable indices.
pub struct Indexer {
    config: Config,
    engine: Arc<dyn EmbeddingEngine>,
    parser: Arc<AstParser>,
    cancel: Arc<AtomicBool>,
}

impl Indexer {
    pub fn new(config: Config, engine: Arc<dyn EmbeddingEngine>) -> Self {
        Self {
            config,
            engine,
            parser: Arc::new(AstParser::new()),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between files; setting it stops the run without writing
    /// the index state.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Execute one indexing run and return its summary.
    pub async fn run(&self, options: &IndexOptions) -> Result<IndexReport> {
        let started = Instant::now();
        let mut report = IndexReport::default();

        let prev_state = IndexState::load(&self.config.index_state_path())?;
        let scan = self.scan(prev_state.as_ref(), options).await?;

        // Full reindex when forced or when no usable previous state exists;
        // a dimension change surfaces below when the store is opened.
        let mut full_reindex = options.force || prev_state.is_none();

        let vector_dir = self.config.vector_dir();
        let mut vector = match VectorStore::open(&vector_dir, self.engine.dim()) {
            Ok(store) => store,
            Err(QuarryError::DimensionMismatch { stored, actual }) if options.force => {
                tracing::info!(stored, actual, "dimension changed, forced rebuild");
                VectorStore::wipe(&vector_dir)?;
                full_reindex = true;
                VectorStore::open(&vector_dir, actual)?
            }
            Err(e) => return Err(e),
        };
        if full_reindex && !vector.is_empty() {
            VectorStore::wipe(&vector_dir)?;
            vector = VectorStore::open(&vector_dir, self.engine.dim())?;
        }

        let mut bm25 = if full_reindex {
            Bm25Index::new()
        } else {
            Bm25Index::load(&self.config.bm25_path())?
        };
        let xref = XrefGraph::new();
        if !full_reindex {
            xref.load(&self.config.xref_path())?;
        }
        let mut fuzzy = if full_reindex {
            FuzzyIndex::new()
        } else {
            FuzzyIndex::load(&self.config.fuzzy_path())?
        };
        let mut catalog = if full_reindex {
            FileCatalog::new()
        } else {
            FileCatalog::load(&self.config.file_index_path())?
        };

        // Self-heal: an artifact that vanished (quarantined as corrupt by
        // its loader above, or deleted) means the projections are out of
        // lock-step with the catalogue. Rebuild everything.
        let artifact_missing = !self.config.bm25_path().exists()
            || !self.config.xref_path().exists()
            || !self.config.fuzzy_path().exists()
            || !self.config.file_index_path().exists();
        if !full_reindex && artifact_missing {
            tracing::warn!("derived index artifact missing; forcing full rebuild");
            full_reindex = true;
            VectorStore::wipe(&vector_dir)?;
            vector = VectorStore::open(&vector_dir, self.engine.dim())?;
            bm25 = Bm25Index::new();
            xref.clear();
            fuzzy = FuzzyIndex::new();
            catalog = FileCatalog::new();
        }

        let (to_index, to_remove) = plan_delta(&scan, &catalog, full_reindex);
        tracing::info!(
            to_index = to_index.len(),
            to_remove = to_remove.len(),
            full = full_reindex,
            "indexing plan ready"
        );

        for path in &to_remove {
            remove_file(path, &mut vector, &mut bm25, &xref, &mut fuzzy, &mut catalog)?;
            report.files_deleted += 1;
        }

        let cancelled = self
            .index_files(to_index, &mut vector, &mut bm25, &xref, &mut fuzzy, &mut catalog, &mut report)
            .await?;

        report.duration_ms = started.elapsed().as_millis() as u64;

        if cancelled {
            tracing::warn!("indexing cancelled; state not written");
            report.success = false;
            return Ok(report);
        }

        xref.build_reverse_references();

        bm25.save(&self.config.bm25_path())?;
        xref.save(&self.config.xref_path())?;
        fuzzy.save(&self.config.fuzzy_path())?;
        catalog.save(&self.config.file_index_path(), &self.config.project_root)?;

        IndexState {
            last_indexed_commit: scan.head.clone(),
            last_indexed_at: now_millis(),
            branch: scan.branch.clone(),
            total_files: scan.crawl.total_files,
            includes_uncommitted: scan.working.is_some(),
        }
        .save(&self.config.index_state_path())?;

        report.duration_ms = started.elapsed().as_millis() as u64;
        report.success = true;
        tracing::info!(
            processed = report.files_processed,
            chunks = report.chunks_created,
            deleted = report.files_deleted,
            skipped = report.files_skipped,
            ms = report.duration_ms,
            "index run complete"
        );
        Ok(report)
    }

    async fn scan(
        &self,
        prev_state: Option<&IndexState>,
        options: &IndexOptions,
    ) -> Result<ScanOutcome> {
        let root = self.config.project_root.clone();
        let last_commit = prev_state.and_then(|s| s.last_indexed_commit.clone());
        let include_uncommitted = options.include_uncommitted;

        task::spawn_blocking(move || -> Result<ScanOutcome> {
            let git = GitTracker::open(&root);
            let crawl = Crawler::new(&root).crawl(&git)?;

            let head = git.head_commit();
            let git_delta = match (&last_commit, &head) {
                (Some(last), Some(head)) if last != head => Some(git.diff(last, head)),
                (Some(_), Some(_)) => Some(DiffSet::default()),
                _ => None,
            };
            let working = (include_uncommitted && git.is_repo())
                .then(|| git.working_tree_changes());

            Ok(ScanOutcome {
                crawl,
                head,
                branch: git.current_branch(),
                git_delta,
                working,
            })
        })
        .await
        .map_err(join_error)?
    }

    /// Parse, chunk, and embed files with bounded concurrency, applying each
    /// file's updates as it completes. Returns whether the run was cancelled.
    #[allow(clippy::too_many_arguments)]
    async fn index_files(
        &self,
        to_index: Vec<CrawledFile>,
        vector: &mut VectorStore,
        bm25: &mut Bm25Index,
        xref: &XrefGraph,
        fuzzy: &mut FuzzyIndex,
        catalog: &mut FileCatalog,
        report: &mut IndexReport,
    ) -> Result<bool> {
        let policy = ChunkPolicy::from(&self.config);
        let batch_size = self.config.embed_batch_size.max(1);
        let timeout = Duration::from_secs(self.config.embed_timeout_secs);

        let mut outputs = stream::iter(to_index.into_iter().map(|file| {
            let parser = self.parser.clone();
            let engine = self.engine.clone();
            let policy = policy.clone();
            async move {
                let path = file.relative_path.clone();
                let result =
                    process_file(file, parser, policy, engine, batch_size, timeout).await;
                (path, result)
            }
        }))
        .buffer_unordered(self.config.embed_inflight_batches.max(1));

        while let Some((path, result)) = outputs.next().await {
            if self.cancel.load(Ordering::Relaxed) {
                return Ok(true);
            }

            match result {
                Ok(output) => {
                    let updated = catalog.get_file(&output.file.relative_path).is_some();
                    let chunk_count = output.chunks.len();
                    let language = output.file.language.as_str().to_string();

                    apply_file(output, vector, bm25, xref, fuzzy, catalog)?;

                    report.files_processed += 1;
                    report.chunks_created += chunk_count;
                    if updated {
                        report.files_updated += 1;
                    }
                    *report.languages.entry(language).or_default() += 1;
                }
                Err(e) => {
                    tracing::warn!(file = %path, error = %e, "file skipped");
                    report.files_skipped += 1;
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }

        Ok(self.cancel.load(Ordering::Relaxed))
    }
}

/// Build `(files_to_index, files_to_remove)` from the scan.
fn plan_delta(
    scan: &ScanOutcome,
    catalog: &FileCatalog,
    full_reindex: bool,
) -> (Vec<CrawledFile>, Vec<String>) {
    if full_reindex {
        return (scan.crawl.files.clone(), Vec::new());
    }

    match &scan.git_delta {
        Some(delta) => {
            let mut changed: HashSet<String> = HashSet::new();
            let mut removed: HashSet<String> = HashSet::new();

            for set in [Some(delta), scan.working.as_ref()].into_iter().flatten() {
                changed.extend(set.added.iter().cloned());
                changed.extend(set.modified.iter().cloned());
                changed.extend(set.renamed.values().cloned());
                removed.extend(set.deleted.iter().cloned());
                removed.extend(set.renamed.keys().cloned());
            }

            // Paranoia against missed git events: any crawled file the
            // catalogue has never seen gets indexed too. Files whose stored
            // hash already matches are skipped even when the delta lists
            // them (a working-tree change indexed by the previous run).
            let to_index: Vec<CrawledFile> = scan
                .crawl
                .files
                .iter()
                .filter(|f| {
                    changed.contains(&f.relative_path)
                        || catalog.get_file(&f.relative_path).is_none()
                })
                .filter(|f| {
                    catalog
                        .get_file(&f.relative_path)
                        .map(|stored| stored.hash != f.hash)
                        .unwrap_or(true)
                })
                .cloned()
                .collect();

            let live: HashSet<&str> = scan
                .crawl
                .files
                .iter()
                .map(|f| f.relative_path.as_str())
                .collect();
            let to_remove: Vec<String> = removed
                .into_iter()
                .filter(|path| {
                    !live.contains(path.as_str()) && catalog.get_file(path).is_some()
                })
                .collect();

            (to_index, to_remove)
        }
        None => {
            let to_index = catalog
                .changed_files(&scan.crawl.files)
                .into_iter()
                .cloned()
                .collect();
            let to_remove = catalog.deleted_files(&scan.crawl.files);
            (to_index, to_remove)
        }
    }
}

async fn process_file(
    file: CrawledFile,
    parser: Arc<AstParser>,
    policy: ChunkPolicy,
    engine: Arc<dyn EmbeddingEngine>,
    batch_size: usize,
    timeout: Duration,
) -> Result<FileOutput> {
    let source = tokio::fs::read_to_string(&file.absolute_path).await?;

    let parsed = task::spawn_blocking({
        let file = file.clone();
        move || {
            let chunker = SemanticChunker::new(policy);
            match parser.parse(&source, file.language) {
                Some(tree) => {
                    let nodes = parser.extract_nodes(&tree, &source, file.language);
                    let calls = parser.extract_calls(&tree, &source, file.language);
                    let chunks = chunker.chunk_file(
                        &source,
                        file.language,
                        &file.relative_path,
                        &file.absolute_path,
                        &nodes,
                    );
                    (chunks, nodes, calls)
                }
                None => {
                    let chunks = chunker.chunk_unparsed(
                        &source,
                        file.language,
                        &file.relative_path,
                        &file.absolute_path,
                    );
                    (chunks, Vec::new(), Vec::new())
                }
            }
        }
    })
    .await
    .map_err(join_error)?;
    let (chunks, nodes, calls) = parsed;

    let mut embeddings = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(embedding_text).collect();
        embeddings.extend(embed_with_retry(&engine, texts, timeout).await?);
    }

    Ok(FileOutput {
        file,
        chunks,
        embeddings,
        nodes,
        calls,
    })
}

/// One retry on timeout, then the file is skipped for this run.
async fn embed_with_retry(
    engine: &Arc<dyn EmbeddingEngine>,
    texts: Vec<String>,
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    for attempt in 0..2u8 {
        let engine = engine.clone();
        let batch = texts.clone();
        let work = task::spawn_blocking(move || engine.embed(&batch));

        match tokio::time::timeout(timeout, work).await {
            Ok(joined) => return joined.map_err(join_error)?,
            Err(_) if attempt == 0 => {
                tracing::warn!(batch = texts.len(), "embedding batch timed out, retrying");
            }
            Err(_) => {
                return Err(QuarryError::Embedding(format!(
                    "batch of {} texts timed out twice",
                    texts.len()
                )))
            }
        }
    }
    unreachable!("retry loop returns")
}

/// Per-file update order pinned by the consistency contract:
/// vector delete -> vector upsert -> bm25 remove -> bm25 add -> xref rewrite
/// -> fuzzy rewrite -> catalogue update.
fn apply_file(
    output: FileOutput,
    vector: &mut VectorStore,
    bm25: &mut Bm25Index,
    xref: &XrefGraph,
    fuzzy: &mut FuzzyIndex,
    catalog: &mut FileCatalog,
) -> Result<()> {
    let FileOutput {
        file,
        chunks,
        embeddings,
        nodes,
        calls,
    } = output;
    let rel = file.relative_path.clone();

    let old_ids: Vec<String> = vector
        .get_by_file(&rel)
        .iter()
        .map(|c| c.id.clone())
        .collect();

    vector.delete_by_file(&rel)?;
    let chunk_count = chunks.len();
    let records: Vec<(Chunk, Vec<f32>)> = chunks.into_iter().zip(embeddings).collect();
    let upserted: Vec<Chunk> = records.iter().map(|(c, _)| c.clone()).collect();
    vector.upsert(records)?;

    for id in &old_ids {
        bm25.remove(id);
    }
    for chunk in &upserted {
        bm25.add(&chunk.id, &chunk_tokens(chunk));
    }

    xref.remove_file(&rel);
    xref.add_to_graph(&rel, &nodes, &calls);

    fuzzy.remove_file(&rel);
    for node in &nodes {
        if let Some(name) = &node.name {
            fuzzy.insert(
                name,
                FuzzyMeta {
                    file_path: rel.clone(),
                    kind: node.kind,
                    line: Some(node.start_line),
                },
            );
        }
    }

    catalog.update_file(IndexedFile {
        relative_path: rel,
        hash: file.hash,
        mtime: file.modified_at,
        indexed_at: now_millis(),
        chunk_count,
    });

    Ok(())
}

/// Deletion cascades to every index before the catalogue forgets the file.
fn remove_file(
    relative_path: &str,
    vector: &mut VectorStore,
    bm25: &mut Bm25Index,
    xref: &XrefGraph,
    fuzzy: &mut FuzzyIndex,
    catalog: &mut FileCatalog,
) -> Result<()> {
    let ids: Vec<String> = vector
        .get_by_file(relative_path)
        .iter()
        .map(|c| c.id.clone())
        .collect();

    vector.delete_by_file(relative_path)?;
    for id in &ids {
        bm25.remove(id);
    }
    xref.remove_file(relative_path);
    fuzzy.remove_file(relative_path);
    catalog.remove_file(relative_path);
    Ok(())
}

fn join_error(e: tokio::task::JoinError) -> QuarryError {
    QuarryError::Io(std::io::Error::other(e))
}

// ----------------------------------------------------------------------------
// Stats surface
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, serde::Serialize)]
pub struct GitInfo {
    pub is_repo: bool,
    pub branch: Option<String>,
    pub head_commit: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatsReport {
    pub total_files: usize,
    pub total_chunks: usize,
    pub languages: std::collections::BTreeMap<String, usize>,
    pub xrefs: crate::xref::XrefStats,
    pub storage: crate::vector::VectorStats,
    pub git: GitInfo,
}

/// Aggregate statistics across the catalogue, indices, and git.
pub fn collect_stats(config: &Config) -> Result<StatsReport> {
    let catalog = FileCatalog::load(&config.file_index_path())?;

    let dim = VectorStore::stored_dim(&config.vector_dir())
        .unwrap_or(config.embedding_dimensions);
    let vector = VectorStore::open(&config.vector_dir(), dim)?;

    let xref = XrefGraph::new();
    xref.load(&config.xref_path())?;

    let mut languages = std::collections::BTreeMap::new();
    for chunk in vector.chunks() {
        *languages
            .entry(chunk.language.as_str().to_string())
            .or_default() += 1;
    }

    let git = GitTracker::open(&config.project_root);

    Ok(StatsReport {
        total_files: catalog.size(),
        total_chunks: vector.len(),
        languages,
        xrefs: xref.stats(),
        storage: vector.stats(),
        git: GitInfo {
            is_repo: git.is_repo(),
            branch: git.current_branch(),
            head_commit: git.head_commit(),
        },
    })
}
