//! Fuzzy symbol lookup.
//!
//! Symbol names are normalised (camelCase, snake_case, PascalCase, and
//! acronym runs collapse to lowercase space-separated tokens) and ranked by
//! Levenshtein similarity with a substring boost. Exact case-insensitive
//! matches always score 1.0.

use crate::error::Result;
use crate::storage;
use crate::types::ChunkKind;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Where a symbol lives; carried alongside every fuzzy match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FuzzyMeta {
    pub file_path: String,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FuzzyEntry {
    pub normalized: String,
    pub metadata: FuzzyMeta,
}

/// A scored fuzzy match.
#[derive(Debug, Clone, Serialize)]
pub struct FuzzyMatch {
    pub name: String,
    pub score: f32,
    pub metadata: FuzzyMeta,
}

/// Symbol-name index with Levenshtein-scored lookup.
#[derive(Debug, Clone, Default)]
pub struct FuzzyIndex {
    symbols: HashMap<String, FuzzyEntry>,
}

/// Durable form: `symbols: [[name, entry]]`, sorted by name.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FuzzyDocument {
    symbols: Vec<(String, FuzzyEntry)>,
}

impl FuzzyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn insert(&mut self, name: &str, metadata: FuzzyMeta) {
        self.symbols.insert(
            name.to_string(),
            FuzzyEntry {
                normalized: normalize(name),
                metadata,
            },
        );
    }

    /// Drop every entry pointing into `relative_path`.
    pub fn remove_file(&mut self, relative_path: &str) {
        self.symbols
            .retain(|_, entry| entry.metadata.file_path != relative_path);
    }

    pub fn clear(&mut self) {
        self.symbols.clear();
    }

    /// Ranked fuzzy lookup.
    ///
    /// Scoring: exact case-insensitive match is 1.0; otherwise the best of
    /// the Levenshtein similarities over normalised and raw lowercase forms,
    /// plus 0.2 when the query appears as a substring of either form,
    /// clamped to 1.0. Results below `threshold` are dropped.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        threshold: f32,
        kinds: Option<&[ChunkKind]>,
    ) -> Vec<FuzzyMatch> {
        let query_lower = query.to_lowercase();
        let query_norm = normalize(query);

        let mut matches: Vec<FuzzyMatch> = self
            .symbols
            .iter()
            .filter(|(_, entry)| {
                kinds
                    .map(|ks| ks.contains(&entry.metadata.kind))
                    .unwrap_or(true)
            })
            .filter_map(|(name, entry)| {
                let score = score_match(name, entry, &query_lower, &query_norm);
                (score >= threshold).then(|| FuzzyMatch {
                    name: name.clone(),
                    score,
                    metadata: entry.metadata.clone(),
                })
            })
            .collect();

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.name.cmp(&b.name))
        });
        matches.truncate(limit);
        matches
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut symbols: Vec<(String, FuzzyEntry)> = self
            .symbols
            .iter()
            .map(|(name, entry)| (name.clone(), entry.clone()))
            .collect();
        symbols.sort_by(|a, b| a.0.cmp(&b.0));
        storage::save_json(path, &FuzzyDocument { symbols })
    }

    pub fn load(path: &Path) -> Result<Self> {
        match storage::load_json::<FuzzyDocument>(path)? {
            Some(doc) => Ok(Self {
                symbols: doc.symbols.into_iter().collect(),
            }),
            None => Ok(Self::new()),
        }
    }
}

fn score_match(name: &str, entry: &FuzzyEntry, query_lower: &str, query_norm: &str) -> f32 {
    let name_lower = name.to_lowercase();
    if name_lower == *query_lower {
        return 1.0;
    }

    let mut score = strsim::normalized_levenshtein(query_norm, &entry.normalized)
        .max(strsim::normalized_levenshtein(query_lower, &name_lower))
        as f32;

    if entry.normalized.contains(query_norm) || name_lower.contains(query_lower) {
        score += 0.2;
    }

    score.min(1.0)
}

/// Collapse camelCase / snake_case / PascalCase and acronym runs to
/// lowercase space-separated tokens: `XMLHttpRequest` -> `xml http request`.
pub fn normalize(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c == '.' || c == ' ' {
            if !out.ends_with(' ') {
                out.push(' ');
            }
            continue;
        }

        if i > 0 {
            let prev = chars[i - 1];
            let next_lower = chars
                .get(i + 1)
                .map(|n| n.is_lowercase())
                .unwrap_or(false);
            let boundary = (prev.is_lowercase() && c.is_uppercase())
                || (prev.is_numeric() != c.is_numeric() && !prev.is_whitespace())
                || (prev.is_uppercase() && c.is_uppercase() && next_lower);
            if boundary && !out.ends_with(' ') {
                out.push(' ');
            }
        }

        out.extend(c.to_lowercase());
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(path: &str) -> FuzzyMeta {
        FuzzyMeta {
            file_path: path.to_string(),
            kind: ChunkKind::Function,
            line: Some(1),
        }
    }

    #[test]
    fn normalization_rules() {
        assert_eq!(normalize("getUserById"), "get user by id");
        assert_eq!(normalize("snake_case_name"), "snake case name");
        assert_eq!(normalize("PascalCase"), "pascal case");
        assert_eq!(normalize("XMLHttpRequest"), "xml http request");
    }

    #[test]
    fn exact_case_insensitive_match_scores_one() {
        let mut index = FuzzyIndex::new();
        index.insert("getUserById", meta("src/users.ts"));

        let matches = index.search("getuserbyid", 10, 0.4, None);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "getUserById");
        assert!((matches[0].score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn typo_still_ranks_target_first() {
        let mut index = FuzzyIndex::new();
        index.insert("getUserById", meta("src/users.ts"));
        index.insert("deleteAccount", meta("src/users.ts"));

        let matches = index.search("geUsrById", 10, 0.4, None);
        assert!(!matches.is_empty());
        assert_eq!(matches[0].name, "getUserById");
        assert!(matches[0].score >= 0.5);
    }

    #[test]
    fn substring_boost_applies() {
        let mut index = FuzzyIndex::new();
        index.insert("parse_config_file", meta("src/config.rs"));

        let matches = index.search("config", 10, 0.3, None);
        assert_eq!(matches[0].name, "parse_config_file");
    }

    #[test]
    fn threshold_drops_weak_matches() {
        let mut index = FuzzyIndex::new();
        index.insert("totallyUnrelated", meta("src/x.ts"));

        let matches = index.search("getUserById", 10, 0.6, None);
        assert!(matches.is_empty());
    }

    #[test]
    fn kind_filter_restricts_results() {
        let mut index = FuzzyIndex::new();
        index.insert("Widget", FuzzyMeta {
            file_path: "src/w.rs".into(),
            kind: ChunkKind::Struct,
            line: Some(3),
        });
        index.insert("widget_new", meta("src/w.rs"));

        let structs = index.search("widget", 10, 0.3, Some(&[ChunkKind::Struct]));
        assert_eq!(structs.len(), 1);
        assert_eq!(structs[0].name, "Widget");
    }

    #[test]
    fn remove_file_drops_entries() {
        let mut index = FuzzyIndex::new();
        index.insert("keep", meta("src/keep.rs"));
        index.insert("gone", meta("src/gone.rs"));
        index.remove_file("src/gone.rs");

        assert_eq!(index.len(), 1);
        assert!(index.search("gone", 10, 0.1, None).is_empty() || {
            // `keep` may still weakly match; only `gone` must be absent.
            !index.search("gone", 10, 0.1, None).iter().any(|m| m.name == "gone")
        });
    }

    #[test]
    fn serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzzy-index.json");

        let mut index = FuzzyIndex::new();
        index.insert("getUserById", meta("src/users.ts"));
        index.insert("Widget", meta("src/w.rs"));
        index.save(&path).unwrap();

        let restored = FuzzyIndex::load(&path).unwrap();
        assert_eq!(restored.len(), 2);
        let matches = restored.search("getuserbyid", 10, 0.4, None);
        assert_eq!(matches[0].name, "getUserById");
    }
}
