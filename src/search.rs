//! Hybrid search and second-stage ranking.
//!
//! Semantic and lexical retrieval run in parallel, over-fetching three times
//! the requested result count. Candidates are merged by chunk id and ranked
//! with a weighted sum of normalised factors: semantic similarity, lexical
//! score, git recency, export markers, and entry-point boost. Raw BM25 is
//! never compared to raw cosine; every factor is in [0, 1] before fusion.

use crate::bm25::Bm25Index;
use crate::config::{Config, RECENCY_HALF_LIFE_DAYS};
use crate::embed::EmbeddingEngine;
use crate::error::{QuarryError, Result};
use crate::gitio::GitTracker;
use crate::lang::{export_regex, is_entry_point};
use crate::types::{now_millis, Chunk, RankSignals, ScoredChunk, SearchMode};
use crate::vector::{SearchFilter, VectorStore};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashMap;
use std::sync::Arc;

/// Over-fetch multiplier for both retrieval legs.
const OVERFETCH: usize = 3;

/// Fusion weights, normalised before use.
#[derive(Debug, Clone, Copy)]
pub struct RankWeights {
    pub semantic: f32,
    pub lexical: f32,
    pub git_recency: f32,
    pub export: f32,
    pub entry_point: f32,
}

impl Default for RankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            lexical: 0.2,
            git_recency: 0.1,
            export: 0.1,
            entry_point: 0.1,
        }
    }
}

impl RankWeights {
    fn normalised(mut self) -> Self {
        let sum = self.semantic + self.lexical + self.git_recency + self.export + self.entry_point;
        if sum > 0.0 {
            self.semantic /= sum;
            self.lexical /= sum;
            self.git_recency /= sum;
            self.export /= sum;
            self.entry_point /= sum;
        }
        self
    }

    /// Weights for a mode: in non-hybrid modes the corresponding retrieval
    /// factor dominates while the ranking layer keeps its boosts.
    fn for_mode(mode: SearchMode, semantic_override: Option<f32>, use_ranking: bool) -> Self {
        let mut weights = Self::default();
        if let Some(semantic) = semantic_override {
            let semantic = semantic.clamp(0.0, 1.0);
            weights.semantic = semantic;
            weights.lexical = (1.0 - semantic) * 0.4;
        }
        match mode {
            SearchMode::SemanticOnly => {
                weights.semantic = 1.0;
                weights.lexical = 0.0;
            }
            SearchMode::LexicalOnly => {
                weights.semantic = 0.0;
                weights.lexical = 1.0;
            }
            SearchMode::Hybrid => {}
        }
        if !use_ranking {
            weights.git_recency = 0.0;
            weights.export = 0.0;
            weights.entry_point = 0.0;
        }
        weights.normalised()
    }
}

/// Query options for the request surface.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub limit: usize,
    pub mode: SearchMode,
    pub filter: SearchFilter,
    /// Globs a result path must match (all of them).
    pub include_paths: Vec<String>,
    /// Globs a result path must not match (any of them).
    pub exclude_paths: Vec<String>,
    pub use_ranking: bool,
    pub semantic_weight: Option<f32>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            mode: SearchMode::Hybrid,
            filter: SearchFilter::default(),
            include_paths: Vec::new(),
            exclude_paths: Vec::new(),
            use_ranking: true,
            semantic_weight: None,
        }
    }
}

struct Candidate {
    chunk: Chunk,
    semantic: f32,
    lexical: f32,
}

/// Read-side search engine over the on-disk indices.
pub struct HybridSearcher {
    engine: Arc<dyn EmbeddingEngine>,
    vector: VectorStore,
    bm25: Bm25Index,
    /// relative path -> last-commit epoch seconds, for the recency factor.
    recency: HashMap<String, i64>,
    /// Soft deadline after which partial results are returned.
    deadline_ms: u64,
}

impl HybridSearcher {
    /// Open the persisted indices for querying. Missing indices surface as
    /// structured errors, not panics.
    pub fn open(config: &Config, engine: Arc<dyn EmbeddingEngine>) -> Result<Self> {
        let vector = VectorStore::open(&config.vector_dir(), engine.dim())?;
        let bm25 = Bm25Index::load(&config.bm25_path())?;

        let git = GitTracker::open(&config.project_root);
        let recency = git
            .recently_modified(500)
            .into_iter()
            .map(|f| (f.relative_path, f.last_commit_epoch))
            .collect();

        Ok(Self {
            engine,
            vector,
            bm25,
            recency,
            deadline_ms: config.query_deadline_ms,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.vector.is_empty() && self.bm25.is_empty()
    }

    /// Execute a query: both retrieval legs in parallel, then fusion.
    pub fn search(&self, query: &str, options: &QueryOptions) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Err(QuarryError::InvalidQuery("empty query".into()));
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }

        let fetch = options.limit.max(1) * OVERFETCH;
        let filter = (!options.filter.is_empty()).then_some(&options.filter);
        let deadline =
            std::time::Instant::now() + std::time::Duration::from_millis(self.deadline_ms);

        let (semantic_hits, lexical_hits) = std::thread::scope(|scope| {
            let semantic = scope.spawn(move || -> Result<_> {
                if options.mode == SearchMode::LexicalOnly {
                    return Ok(Vec::new());
                }
                let query_vec = self.engine.embed_query(query)?;
                self.vector
                    .search_bounded(&query_vec, fetch, filter, Some(deadline))
            });
            let lexical = scope.spawn(|| {
                if options.mode == SearchMode::SemanticOnly {
                    return Vec::new();
                }
                self.bm25.search_normalized(query, fetch)
            });
            (semantic.join(), lexical.join())
        });
        let semantic_hits = semantic_hits
            .map_err(|_| QuarryError::InvalidQuery("semantic search panicked".into()))??;
        let lexical_hits = lexical_hits
            .map_err(|_| QuarryError::InvalidQuery("lexical search panicked".into()))?;

        // Merge by chunk id, semantic leg first so insertion order is the
        // tie-break.
        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, Candidate> = HashMap::new();

        for hit in semantic_hits {
            let similarity = (1.0 - hit.distance).clamp(0.0, 1.0);
            order.push(hit.chunk.id.clone());
            merged.insert(
                hit.chunk.id.clone(),
                Candidate {
                    chunk: hit.chunk,
                    semantic: similarity,
                    lexical: 0.0,
                },
            );
        }
        for hit in lexical_hits {
            match merged.get_mut(&hit.id) {
                Some(candidate) => candidate.lexical = hit.score,
                None => {
                    let Some(chunk) = self.vector.get_by_id(&hit.id) else {
                        continue;
                    };
                    if let Some(filter) = filter {
                        if !filter.matches(&chunk) {
                            continue;
                        }
                    }
                    order.push(hit.id.clone());
                    merged.insert(
                        hit.id.clone(),
                        Candidate {
                            chunk,
                            semantic: 0.0,
                            lexical: hit.score,
                        },
                    );
                }
            }
        }

        let scope_filter = ScopeFilter::compile(&options.include_paths, &options.exclude_paths)?;
        let weights =
            RankWeights::for_mode(options.mode, options.semantic_weight, options.use_ranking);
        let now_epoch = (now_millis() / 1000) as i64;

        let mut results: Vec<ScoredChunk> = Vec::with_capacity(order.len());
        for id in order {
            let Some(candidate) = merged.remove(&id) else { continue };
            if !scope_filter.allows(&candidate.chunk.relative_path) {
                continue;
            }

            let signals = RankSignals {
                semantic: candidate.semantic,
                lexical: candidate.lexical,
                git_recency: self.recency_factor(&candidate.chunk.relative_path, now_epoch),
                export: export_factor(&candidate.chunk),
                entry_point: entry_point_factor(&candidate.chunk),
            };
            let score = weights.semantic * signals.semantic
                + weights.lexical * signals.lexical
                + weights.git_recency * signals.git_recency
                + weights.export * signals.export
                + weights.entry_point * signals.entry_point;

            results.push(ScoredChunk {
                chunk: candidate.chunk,
                score,
                signals,
            });
        }

        // Stable sort keeps insertion order for equal scores.
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(options.limit);
        Ok(results)
    }

    /// `exp(-days / half_life)`; files git has no record of sit at 0.5.
    fn recency_factor(&self, relative_path: &str, now_epoch: i64) -> f32 {
        match self.recency.get(relative_path) {
            Some(&last_commit) => {
                let days = ((now_epoch - last_commit).max(0) as f32) / 86_400.0;
                (-days / RECENCY_HALF_LIFE_DAYS).exp()
            }
            None => 0.5,
        }
    }
}

fn export_factor(chunk: &Chunk) -> f32 {
    if export_regex(chunk.language).is_match(&chunk.code) {
        1.0
    } else {
        0.0
    }
}

fn entry_point_factor(chunk: &Chunk) -> f32 {
    if is_entry_point(&chunk.relative_path) {
        1.0
    } else {
        0.0
    }
}

struct ScopeFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl ScopeFilter {
    fn compile(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_globset(include)?,
            exclude: build_globset(exclude)?,
        })
    }

    fn allows(&self, relative_path: &str) -> bool {
        if let Some(include) = &self.include {
            if !include.is_match(relative_path) {
                return false;
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(relative_path) {
                return false;
            }
        }
        true
    }
}

fn build_globset(patterns: &[String]) -> Result<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| QuarryError::InvalidQuery(format!("bad glob {pattern}: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map(Some)
        .map_err(|e| QuarryError::InvalidQuery(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = RankWeights::default().normalised();
        let sum = w.semantic + w.lexical + w.git_recency + w.export + w.entry_point;
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mode_weights_dominate() {
        let w = RankWeights::for_mode(SearchMode::SemanticOnly, None, true);
        assert_eq!(w.lexical, 0.0);
        assert!(w.semantic > w.git_recency);

        let w = RankWeights::for_mode(SearchMode::LexicalOnly, None, true);
        assert_eq!(w.semantic, 0.0);
        assert!(w.lexical > w.export);
    }

    #[test]
    fn ranking_disabled_keeps_retrieval_factors_only() {
        let w = RankWeights::for_mode(SearchMode::Hybrid, None, false);
        assert_eq!(w.git_recency, 0.0);
        assert_eq!(w.export, 0.0);
        assert_eq!(w.entry_point, 0.0);
        assert!((w.semantic + w.lexical - 1.0).abs() < 1e-6);
    }

    #[test]
    fn scope_filter_includes_and_excludes() {
        let filter = ScopeFilter::compile(
            &["src/**".to_string()],
            &["src/generated/**".to_string()],
        )
        .unwrap();
        assert!(filter.allows("src/a.rs"));
        assert!(!filter.allows("tests/a.rs"));
        assert!(!filter.allows("src/generated/x.rs"));
    }

    #[test]
    fn bad_glob_is_a_query_error() {
        assert!(ScopeFilter::compile(&["[".to_string()], &[]).is_err());
    }
}
