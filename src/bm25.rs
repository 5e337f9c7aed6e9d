//! Lexical search: a BM25 inverted index over chunk tokens.
//!
//! One tokenisation rule applies to both indexing and queries: lowercase,
//! split on non-alphanumerics, split identifiers on camelCase and snake_case
//! boundaries, emit the raw identifier plus its parts, drop single-character
//! tokens. Scores handed to the ranker are normalised to [0, 1] by the
//! query's top score.

use crate::error::Result;
use crate::storage;
use crate::types::Chunk;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// Fraction of replaced documents that triggers a full rebuild instead of
/// further incremental updates.
const REBUILD_THRESHOLD: f32 = 0.2;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Posting {
    doc: u32,
    tf: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocEntry {
    id: String,
    len: u32,
    alive: bool,
}

/// BM25 index over chunk documents, keyed by chunk id.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    docs: Vec<DocEntry>,
    slots: HashMap<String, u32>,
    inv: HashMap<String, Vec<Posting>>,
    total_len: u64,
    alive: usize,
    replaced_since_rebuild: usize,
}

/// One lexical hit, scored but not yet normalised.
#[derive(Debug, Clone)]
pub struct Bm25Hit {
    pub id: String,
    pub score: f32,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.alive
    }

    pub fn is_empty(&self) -> bool {
        self.alive == 0
    }

    /// Add (or replace) a document.
    pub fn add(&mut self, id: &str, tokens: &[String]) {
        if self.slots.contains_key(id) {
            self.remove(id);
        }

        let doc = self.docs.len() as u32;
        let mut tf: BTreeMap<&str, u32> = BTreeMap::new();
        for token in tokens {
            *tf.entry(token.as_str()).or_default() += 1;
        }

        for (term, count) in tf {
            self.inv
                .entry(term.to_string())
                .or_default()
                .push(Posting { doc, tf: count });
        }

        self.docs.push(DocEntry {
            id: id.to_string(),
            len: tokens.len() as u32,
            alive: true,
        });
        self.slots.insert(id.to_string(), doc);
        self.total_len += tokens.len() as u64;
        self.alive += 1;

        self.maybe_rebuild();
    }

    /// Remove a document; its postings become tombstones until the next
    /// rebuild compacts them.
    pub fn remove(&mut self, id: &str) {
        let Some(slot) = self.slots.remove(id) else { return };
        let entry = &mut self.docs[slot as usize];
        if !entry.alive {
            return;
        }
        entry.alive = false;
        self.total_len -= entry.len as u64;
        self.alive -= 1;
        self.replaced_since_rebuild += 1;

        self.maybe_rebuild();
    }

    /// Top-k documents for a query, scored with BM25.
    pub fn search(&self, query: &str, k: usize) -> Vec<Bm25Hit> {
        if self.alive == 0 {
            return Vec::new();
        }

        let n = self.alive as f32;
        let avgdl = (self.total_len as f32 / n).max(1e-6);
        let mut scores: HashMap<u32, f32> = HashMap::new();

        for term in tokenize(query) {
            let Some(postings) = self.inv.get(&term) else { continue };

            let df = postings
                .iter()
                .filter(|p| self.docs[p.doc as usize].alive)
                .count() as f32;
            if df == 0.0 {
                continue;
            }
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();

            for posting in postings {
                let doc = &self.docs[posting.doc as usize];
                if !doc.alive {
                    continue;
                }
                let tf = posting.tf as f32;
                let norm = 1.0 - B + B * (doc.len as f32 / avgdl);
                let score = idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
                *scores.entry(posting.doc).or_default() += score;
            }
        }

        let mut hits: Vec<Bm25Hit> = scores
            .into_iter()
            .map(|(doc, score)| Bm25Hit {
                id: self.docs[doc as usize].id.clone(),
                score,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(k);
        hits
    }

    /// Search with scores scaled to [0, 1] by the top hit.
    pub fn search_normalized(&self, query: &str, k: usize) -> Vec<Bm25Hit> {
        let mut hits = self.search(query, k);
        let max = hits.first().map(|h| h.score).unwrap_or(0.0);
        if max > 0.0 {
            for hit in &mut hits {
                hit.score /= max;
            }
        }
        hits
    }

    /// Compact once more than [`REBUILD_THRESHOLD`] of documents have been
    /// replaced since the last rebuild.
    fn maybe_rebuild(&mut self) {
        if self.alive == 0
            || (self.replaced_since_rebuild as f32) <= self.alive as f32 * REBUILD_THRESHOLD
        {
            return;
        }
        tracing::debug!(
            replaced = self.replaced_since_rebuild,
            alive = self.alive,
            "rebuilding BM25 index"
        );
        *self = self.compacted();
    }

    /// A fresh index holding only live documents, with dense slots.
    fn compacted(&self) -> Self {
        let mut remap: HashMap<u32, u32> = HashMap::new();
        let mut docs = Vec::with_capacity(self.alive);
        let mut slots = HashMap::with_capacity(self.alive);

        for (old_slot, entry) in self.docs.iter().enumerate() {
            if !entry.alive {
                continue;
            }
            let new_slot = docs.len() as u32;
            remap.insert(old_slot as u32, new_slot);
            slots.insert(entry.id.clone(), new_slot);
            docs.push(entry.clone());
        }

        let mut inv: HashMap<String, Vec<Posting>> = HashMap::with_capacity(self.inv.len());
        for (term, postings) in &self.inv {
            let live: Vec<Posting> = postings
                .iter()
                .filter_map(|p| {
                    remap.get(&p.doc).map(|&doc| Posting { doc, tf: p.tf })
                })
                .collect();
            if !live.is_empty() {
                inv.insert(term.clone(), live);
            }
        }

        Self {
            docs,
            slots,
            inv,
            total_len: self.total_len,
            alive: self.alive,
            replaced_since_rebuild: 0,
        }
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::save_json(path, &self.compacted().to_document())
    }

    pub fn load(path: &Path) -> Result<Self> {
        match storage::load_json::<Bm25Document>(path)? {
            Some(doc) => Ok(Self::from_document(doc)),
            None => Ok(Self::new()),
        }
    }

    fn to_document(&self) -> Bm25Document {
        Bm25Document {
            docs: self.docs.clone(),
            postings: self
                .inv
                .iter()
                .map(|(term, postings)| (term.clone(), postings.clone()))
                .collect(),
            total_len: self.total_len,
        }
    }

    fn from_document(doc: Bm25Document) -> Self {
        let slots = doc
            .docs
            .iter()
            .enumerate()
            .filter(|(_, d)| d.alive)
            .map(|(slot, d)| (d.id.clone(), slot as u32))
            .collect();
        let alive = doc.docs.iter().filter(|d| d.alive).count();
        Self {
            slots,
            alive,
            inv: doc.postings.into_iter().collect(),
            docs: doc.docs,
            total_len: doc.total_len,
            replaced_since_rebuild: 0,
        }
    }
}

/// Durable JSON form: token postings, doc metadata, global stats.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bm25Document {
    docs: Vec<DocEntry>,
    postings: BTreeMap<String, Vec<Posting>>,
    total_len: u64,
}

// ----------------------------------------------------------------------------
// Tokenisation
// ----------------------------------------------------------------------------

/// The single tokenisation rule shared by indexing and queries.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_ascii_alphanumeric() && c != '_') {
        if word.is_empty() {
            continue;
        }
        let parts = split_identifier(word);
        if parts.len() > 1 {
            for part in &parts {
                push_token(&mut tokens, part);
            }
        }
        push_token(&mut tokens, word);
    }
    tokens
}

fn push_token(tokens: &mut Vec<String>, raw: &str) {
    let token = raw.trim_matches('_').to_ascii_lowercase();
    if token.len() >= 2 {
        tokens.push(token);
    }
}

/// Split an identifier on snake_case and camelCase boundaries.
fn split_identifier(s: &str) -> Vec<&str> {
    let bytes = s.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;

    for i in 1..bytes.len() {
        let prev = bytes[i - 1] as char;
        let curr = bytes[i] as char;
        let next_lower = bytes
            .get(i + 1)
            .map(|&b| (b as char).is_ascii_lowercase())
            .unwrap_or(false);

        let boundary = curr == '_'
            || (prev.is_ascii_lowercase() && curr.is_ascii_uppercase())
            || (prev.is_ascii_uppercase() && curr.is_ascii_uppercase() && next_lower);

        if boundary {
            if start < i {
                parts.push(&s[start..i]);
            }
            start = if curr == '_' { i + 1 } else { i };
        }
    }
    if start < s.len() {
        parts.push(&s[start..]);
    }
    parts.retain(|p| !p.is_empty());
    parts
}

/// Tokens indexed for a chunk: name tokens, code tokens, docstring tokens.
pub fn chunk_tokens(chunk: &Chunk) -> Vec<String> {
    let mut tokens = Vec::new();
    if let Some(name) = &chunk.name {
        tokens.extend(tokenize(name));
    }
    tokens.extend(tokenize(&chunk.code));
    if let Some(doc) = &chunk.docstring {
        tokens.extend(tokenize(doc));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_splits_identifiers() {
        let tokens = tokenize("getUserById");
        assert!(tokens.contains(&"get".to_string()));
        assert!(tokens.contains(&"user".to_string()));
        assert!(tokens.contains(&"by".to_string()));
        assert!(tokens.contains(&"id".to_string()));
        assert!(tokens.contains(&"getuserbyid".to_string()));

        let tokens = tokenize("retry_policy");
        assert!(tokens.contains(&"retry".to_string()));
        assert!(tokens.contains(&"policy".to_string()));
        assert!(tokens.contains(&"retry_policy".to_string()));
    }

    #[test]
    fn tokenizer_drops_short_and_symbols() {
        let tokens = tokenize("a { } ; x1");
        assert!(!tokens.iter().any(|t| t == "a"));
        assert!(tokens.contains(&"x1".to_string()));
    }

    #[test]
    fn acronym_runs_split() {
        let tokens = tokenize("XMLHttpRequest");
        assert!(tokens.contains(&"xml".to_string()));
        assert!(tokens.contains(&"http".to_string()));
        assert!(tokens.contains(&"request".to_string()));
    }

    #[test]
    fn search_ranks_matching_doc_first() {
        let mut index = Bm25Index::new();
        index.add("doc-a", &tokenize("fn add_numbers adds two integers"));
        index.add("doc-b", &tokenize("fn subtract_numbers subtracts integers"));

        let hits = index.search("add integers", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "doc-a");
    }

    #[test]
    fn normalized_scores_are_unit_range() {
        let mut index = Bm25Index::new();
        index.add("doc-a", &tokenize("retry policy with backoff"));
        index.add("doc-b", &tokenize("unrelated parser internals"));

        let hits = index.search_normalized("retry policy", 10);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        for hit in &hits {
            assert!(hit.score >= 0.0 && hit.score <= 1.0);
        }
    }

    #[test]
    fn remove_hides_document() {
        let mut index = Bm25Index::new();
        index.add("doc-a", &tokenize("alpha beta"));
        index.add("doc-b", &tokenize("alpha gamma"));
        index.remove("doc-a");

        assert_eq!(index.len(), 1);
        let hits = index.search("alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc-b");
    }

    #[test]
    fn replacement_is_in_place() {
        let mut index = Bm25Index::new();
        index.add("doc-a", &tokenize("old tokens"));
        index.add("doc-a", &tokenize("new shiny tokens"));

        assert_eq!(index.len(), 1);
        assert!(index.search("shiny", 10).iter().any(|h| h.id == "doc-a"));
        assert!(index.search("old", 10).is_empty());
    }

    #[test]
    fn heavy_churn_triggers_compaction() {
        let mut index = Bm25Index::new();
        for i in 0..10 {
            index.add(&format!("doc-{i}"), &tokenize("common term here"));
        }
        for i in 0..5 {
            index.add(&format!("doc-{i}"), &tokenize("replacement body text"));
        }

        assert_eq!(index.len(), 10);
        assert!(index.replaced_since_rebuild < 5, "compaction should have run");
        let hits = index.search("common", 20);
        assert_eq!(hits.len(), 5);
    }

    #[test]
    fn serialize_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bm25-index.json");

        let mut index = Bm25Index::new();
        index.add("doc-a", &tokenize("fn parse_config reads toml"));
        index.add("doc-b", &tokenize("fn write_state saves json"));
        index.save(&path).unwrap();

        let restored = Bm25Index::load(&path).unwrap();
        assert_eq!(restored.len(), index.len());

        let a = index.search("parse toml", 5);
        let b = restored.search("parse toml", 5);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].id, b[0].id);
        assert!((a[0].score - b[0].score).abs() < 1e-5);
    }
}
