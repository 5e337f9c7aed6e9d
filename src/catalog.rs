//! File-index catalogue and index state.
//!
//! The catalogue owns the "what exists" truth for files; the vector, BM25,
//! xref, and fuzzy indices hold only projections of it. Both records survive
//! process restart and are written via temp-file + rename; a corrupt file is
//! treated as missing and forces a full reindex.

use crate::error::Result;
use crate::storage;
use crate::types::CrawledFile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Per-file record updated each time a file is (re-)indexed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexedFile {
    pub relative_path: String,
    pub hash: String,
    pub mtime: u64,
    pub indexed_at: u64,
    pub chunk_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CatalogDocument {
    version: u32,
    project_root: String,
    files: BTreeMap<String, IndexedFile>,
}

const CATALOG_VERSION: u32 = 1;

/// The durable catalogue of indexed files.
#[derive(Debug, Default)]
pub struct FileCatalog {
    files: BTreeMap<String, IndexedFile>,
    loaded: bool,
}

impl FileCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let doc: Option<CatalogDocument> = storage::load_json(path)?;
        Ok(Self {
            files: doc.map(|d| d.files).unwrap_or_default(),
            loaded: true,
        })
    }

    pub fn save(&self, path: &Path, project_root: &Path) -> Result<()> {
        storage::save_json(
            path,
            &CatalogDocument {
                version: CATALOG_VERSION,
                project_root: project_root.to_string_lossy().to_string(),
                files: self.files.clone(),
            },
        )
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn size(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get_file(&self, relative_path: &str) -> Option<&IndexedFile> {
        self.files.get(relative_path)
    }

    pub fn update_file(&mut self, record: IndexedFile) {
        self.files.insert(record.relative_path.clone(), record);
    }

    pub fn remove_file(&mut self, relative_path: &str) -> Option<IndexedFile> {
        self.files.remove(relative_path)
    }

    pub fn relative_paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    /// Files whose content hash differs from the stored one, or that the
    /// catalogue has never seen.
    pub fn changed_files<'a>(&self, current: &'a [CrawledFile]) -> Vec<&'a CrawledFile> {
        current
            .iter()
            .filter(|file| {
                self.files
                    .get(&file.relative_path)
                    .map(|stored| stored.hash != file.hash)
                    .unwrap_or(true)
            })
            .collect()
    }

    /// Catalogue entries whose file no longer exists in the crawl.
    pub fn deleted_files(&self, current: &[CrawledFile]) -> Vec<String> {
        let live: std::collections::HashSet<&str> = current
            .iter()
            .map(|f| f.relative_path.as_str())
            .collect();
        self.files
            .keys()
            .filter(|path| !live.contains(path.as_str()))
            .cloned()
            .collect()
    }

    pub fn total_chunks(&self) -> usize {
        self.files.values().map(|f| f.chunk_count).sum()
    }
}

/// Snapshot of the last successful run, written atomically at its end.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexState {
    pub last_indexed_commit: Option<String>,
    pub last_indexed_at: u64,
    pub branch: Option<String>,
    pub total_files: usize,
    pub includes_uncommitted: bool,
}

impl IndexState {
    pub fn load(path: &Path) -> Result<Option<Self>> {
        storage::load_json(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        storage::save_json(path, self)
    }
}
