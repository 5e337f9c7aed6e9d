//! Disk-backed vector store.
//!
//! Chunk metadata stays resident; embeddings live in a fixed-stride binary
//! file (`embeddings.bin`) that only the search path streams. Idle memory is
//! therefore proportional to metadata, not to `dim * chunks`. A bincode
//! sidecar (`meta.bin`) written via temp-file + rename records the slot
//! layout, so the store is readable at every moment between upserts.

use crate::error::{QuarryError, Result};
use crate::storage;
use crate::types::{Chunk, ChunkKind, Language};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const META_FILE: &str = "meta.bin";
const EMBEDDINGS_FILE: &str = "embeddings.bin";
const META_VERSION: u32 = 1;

/// Conjunctive equality filter over metadata columns. Order-insensitive by
/// construction: every set field must match.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub kind: Option<ChunkKind>,
    pub language: Option<Language>,
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(kind) = self.kind {
            if chunk.kind != kind {
                return false;
            }
        }
        if let Some(language) = self.language {
            if chunk.language != language {
                return false;
            }
        }
        if let Some(prefix) = &self.path_prefix {
            if !chunk.relative_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.kind.is_none() && self.language.is_none() && self.path_prefix.is_none()
    }
}

/// A nearest-neighbour hit: chunk plus cosine distance (0 = identical).
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub distance: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct VectorStats {
    pub chunks: usize,
    pub dim: usize,
    pub disk_bytes: u64,
}

#[derive(Serialize, Deserialize)]
struct MetaDoc {
    version: u32,
    dim: usize,
    slots: Vec<Option<Chunk>>,
}

/// Single-writer, many-reader vector store rooted at one directory.
pub struct VectorStore {
    dir: PathBuf,
    dim: usize,
    slots: Vec<Option<Chunk>>,
    id_to_slot: HashMap<String, usize>,
    by_file: HashMap<String, Vec<usize>>,
    free: Vec<usize>,
}

impl VectorStore {
    /// Open (or create) the store. An existing store built with a different
    /// dimension is refused; callers resolve that with a forced rebuild.
    pub fn open(dir: &Path, dim: usize) -> Result<Self> {
        std::fs::create_dir_all(dir).map_err(|e| QuarryError::DataDir {
            path: dir.to_path_buf(),
            source: e,
        })?;

        let meta: Option<MetaDoc> = storage::load_bincode(&dir.join(META_FILE))?;
        let slots = match meta {
            Some(doc) => {
                if doc.dim != dim {
                    return Err(QuarryError::DimensionMismatch {
                        stored: doc.dim,
                        actual: dim,
                    });
                }
                doc.slots
            }
            None => Vec::new(),
        };

        let mut store = Self {
            dir: dir.to_path_buf(),
            dim,
            slots,
            id_to_slot: HashMap::new(),
            by_file: HashMap::new(),
            free: Vec::new(),
        };
        store.rebuild_maps();
        Ok(store)
    }

    /// Embedding dimension of an existing store on disk, if any.
    pub fn stored_dim(dir: &Path) -> Option<usize> {
        let meta: Option<MetaDoc> = storage::load_bincode(&dir.join(META_FILE)).ok()?;
        meta.map(|doc| doc.dim)
    }

    /// Remove the store directory entirely (forced reindex).
    pub fn wipe(dir: &Path) -> Result<()> {
        if dir.exists() {
            std::fs::remove_dir_all(dir)
                .map_err(|e| QuarryError::storage(dir, e))?;
        }
        Ok(())
    }

    fn rebuild_maps(&mut self) {
        self.id_to_slot.clear();
        self.by_file.clear();
        self.free.clear();
        for (slot, entry) in self.slots.iter().enumerate() {
            match entry {
                Some(chunk) => {
                    self.id_to_slot.insert(chunk.id.clone(), slot);
                    self.by_file
                        .entry(chunk.relative_path.clone())
                        .or_default()
                        .push(slot);
                }
                None => self.free.push(slot),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.id_to_slot.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id_to_slot.is_empty()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Insert or replace chunks with their embeddings. Each record lands in
    /// one slot write; the metadata sidecar is persisted once per batch.
    pub fn upsert(&mut self, records: Vec<(Chunk, Vec<f32>)>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.embeddings_path())
            .map_err(|e| QuarryError::storage(self.embeddings_path(), e))?;

        for (chunk, embedding) in records {
            if embedding.len() != self.dim {
                return Err(QuarryError::Embedding(format!(
                    "embedding for {} has dimension {}, store expects {}",
                    chunk.id,
                    embedding.len(),
                    self.dim
                )));
            }

            let slot = match self.id_to_slot.get(&chunk.id) {
                Some(&slot) => slot,
                None => {
                    let slot = self.free.pop().unwrap_or_else(|| {
                        self.slots.push(None);
                        self.slots.len() - 1
                    });
                    self.id_to_slot.insert(chunk.id.clone(), slot);
                    self.by_file
                        .entry(chunk.relative_path.clone())
                        .or_default()
                        .push(slot);
                    slot
                }
            };

            write_vector(&mut file, slot, self.dim, &embedding)?;
            self.slots[slot] = Some(chunk);
        }

        file.flush()
            .map_err(|e| QuarryError::storage(self.embeddings_path(), e))?;
        self.save_meta()
    }

    pub fn delete_by_ids(&mut self, ids: &[String]) -> Result<()> {
        let mut touched = false;
        for id in ids {
            if let Some(slot) = self.id_to_slot.remove(id) {
                if let Some(chunk) = self.slots[slot].take() {
                    if let Some(slots) = self.by_file.get_mut(&chunk.relative_path) {
                        slots.retain(|&s| s != slot);
                        if slots.is_empty() {
                            self.by_file.remove(&chunk.relative_path);
                        }
                    }
                }
                self.free.push(slot);
                touched = true;
            }
        }
        if touched {
            self.save_meta()?;
        }
        Ok(())
    }

    /// Remove every chunk of a file. Returns how many were dropped.
    pub fn delete_by_file(&mut self, relative_path: &str) -> Result<usize> {
        let Some(slots) = self.by_file.remove(relative_path) else {
            return Ok(0);
        };
        let removed = slots.len();
        for slot in slots {
            if let Some(chunk) = self.slots[slot].take() {
                self.id_to_slot.remove(&chunk.id);
            }
            self.free.push(slot);
        }
        self.save_meta()?;
        Ok(removed)
    }

    /// Brute-force cosine KNN over the on-disk vectors. Slots that fail the
    /// predicate are skipped without materialising their embedding.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorHit>> {
        self.search_bounded(query, k, filter, None)
    }

    /// [`Self::search`] with a soft deadline: once it passes, the scan stops
    /// and whatever was ranked so far is returned.
    pub fn search_bounded(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&SearchFilter>,
        deadline: Option<std::time::Instant>,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dim {
            return Err(QuarryError::InvalidQuery(format!(
                "query vector has dimension {}, store expects {}",
                query.len(),
                self.dim
            )));
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let file = File::open(self.embeddings_path())
            .map_err(|e| QuarryError::storage(self.embeddings_path(), e))?;
        let mut reader = BufReader::with_capacity(1 << 16, file);
        let stride = (self.dim * 4) as i64;

        let mut buf = vec![0u8; self.dim * 4];
        let mut hits: Vec<(f32, usize)> = Vec::new();

        for (slot, entry) in self.slots.iter().enumerate() {
            if let Some(deadline) = deadline {
                if slot % 1024 == 0 && std::time::Instant::now() > deadline {
                    tracing::warn!(scanned = slot, "search deadline passed, returning partial results");
                    break;
                }
            }
            let wanted = match entry {
                Some(chunk) => filter.map(|f| f.matches(chunk)).unwrap_or(true),
                None => false,
            };
            if !wanted {
                reader
                    .seek_relative(stride)
                    .map_err(|e| QuarryError::storage(self.embeddings_path(), e))?;
                continue;
            }

            if reader.read_exact(&mut buf).is_err() {
                // Vector tail missing after an interrupted write; the next
                // upsert of those files repairs it.
                tracing::warn!(slot, "embedding file shorter than slot table");
                break;
            }
            let distance = cosine_distance_bytes(query, &buf);
            hits.push((distance, slot));
        }

        hits.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);

        Ok(hits
            .into_iter()
            .filter_map(|(distance, slot)| {
                self.slots[slot].as_ref().map(|chunk| VectorHit {
                    chunk: chunk.clone(),
                    distance,
                })
            })
            .collect())
    }

    /// All chunks of a file, ordered by start line.
    pub fn get_by_file(&self, relative_path: &str) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .by_file
            .get(relative_path)
            .map(|slots| {
                slots
                    .iter()
                    .filter_map(|&slot| self.slots[slot].clone())
                    .collect()
            })
            .unwrap_or_default();
        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }

    pub fn get_by_id(&self, id: &str) -> Option<Chunk> {
        let slot = *self.id_to_slot.get(id)?;
        self.slots[slot].clone()
    }

    /// All live chunks, metadata only.
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.slots.iter().filter_map(|slot| slot.as_ref())
    }

    pub fn stats(&self) -> VectorStats {
        let disk_bytes = [self.embeddings_path(), self.dir.join(META_FILE)]
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();
        VectorStats {
            chunks: self.len(),
            dim: self.dim,
            disk_bytes,
        }
    }

    fn save_meta(&self) -> Result<()> {
        storage::save_bincode(
            &self.dir.join(META_FILE),
            &MetaDoc {
                version: META_VERSION,
                dim: self.dim,
                slots: self.slots.clone(),
            },
        )
    }

    fn embeddings_path(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILE)
    }
}

fn write_vector(file: &mut File, slot: usize, dim: usize, vector: &[f32]) -> Result<()> {
    let offset = (slot * dim * 4) as u64;
    file.seek(SeekFrom::Start(offset))
        .map_err(|e| QuarryError::Io(e))?;
    let mut bytes = Vec::with_capacity(dim * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    file.write_all(&bytes).map_err(QuarryError::Io)
}

/// Cosine distance between a query and a little-endian f32 byte row.
fn cosine_distance_bytes(query: &[f32], row: &[u8]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_q = 0.0f32;
    let mut norm_r = 0.0f32;

    for (q, chunk) in query.iter().zip(row.chunks_exact(4)) {
        let r = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        dot += q * r;
        norm_q += q * q;
        norm_r += r * r;
    }

    if norm_q == 0.0 || norm_r == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_q.sqrt() * norm_r.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn chunk(id: &str, path: &str, kind: ChunkKind, start: usize) -> Chunk {
        Chunk {
            id: id.to_string(),
            relative_path: path.to_string(),
            file_path: PathBuf::from("/p").join(path),
            language: Language::Rust,
            start_line: start,
            end_line: start + 2,
            kind,
            name: Some(id.to_string()),
            scope: Vec::new(),
            code: format!("fn {id}() {{}}"),
            docstring: None,
            content_hash: "0123456789abcdef".into(),
            metadata: BTreeMap::new(),
        }
    }

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot] = 1.0;
        v
    }

    #[test]
    fn upsert_search_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path(), 4).unwrap();

        store
            .upsert(vec![
                (chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0)),
                (chunk("b", "src/b.rs", ChunkKind::Function, 1), unit(4, 1)),
                (chunk("c", "src/c.rs", ChunkKind::Struct, 1), unit(4, 2)),
            ])
            .unwrap();

        let hits = store.search(&unit(4, 0), 2, None).unwrap();
        assert_eq!(hits[0].chunk.id, "a");
        assert!(hits[0].distance < 1e-6);
        assert_eq!(hits.len(), 2);
    }

    #[test]
    fn filter_is_conjunctive() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path(), 4).unwrap();
        store
            .upsert(vec![
                (chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0)),
                (chunk("c", "src/c.rs", ChunkKind::Struct, 1), unit(4, 0)),
            ])
            .unwrap();

        let filter = SearchFilter {
            kind: Some(ChunkKind::Struct),
            ..Default::default()
        };
        let hits = store.search(&unit(4, 0), 10, Some(&filter)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, "c");

        let filter = SearchFilter {
            kind: Some(ChunkKind::Struct),
            path_prefix: Some("src/a".into()),
            ..Default::default()
        };
        assert!(store.search(&unit(4, 0), 10, Some(&filter)).unwrap().is_empty());
    }

    #[test]
    fn delete_by_file_cascades_and_slots_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path(), 4).unwrap();
        store
            .upsert(vec![
                (chunk("a1", "src/a.rs", ChunkKind::Function, 1), unit(4, 0)),
                (chunk("a2", "src/a.rs", ChunkKind::Function, 10), unit(4, 1)),
                (chunk("b", "src/b.rs", ChunkKind::Function, 1), unit(4, 2)),
            ])
            .unwrap();

        let removed = store.delete_by_file("src/a.rs").unwrap();
        assert_eq!(removed, 2);
        assert!(store.get_by_file("src/a.rs").is_empty());
        assert_eq!(store.len(), 1);

        // New upserts reuse freed slots instead of growing the file.
        let slots_before = store.slots.len();
        store
            .upsert(vec![(chunk("d", "src/d.rs", ChunkKind::Function, 1), unit(4, 3))])
            .unwrap();
        assert_eq!(store.slots.len(), slots_before);
    }

    #[test]
    fn delete_by_ids_removes_only_those_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path(), 4).unwrap();
        store
            .upsert(vec![
                (chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0)),
                (chunk("b", "src/a.rs", ChunkKind::Function, 10), unit(4, 1)),
            ])
            .unwrap();

        store.delete_by_ids(&["a".to_string()]).unwrap();
        assert!(store.get_by_id("a").is_none());
        assert!(store.get_by_id("b").is_some());
        assert_eq!(store.get_by_file("src/a.rs").len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = VectorStore::open(dir.path(), 4).unwrap();
            store
                .upsert(vec![(chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0))])
                .unwrap();
        }

        let store = VectorStore::open(dir.path(), 4).unwrap();
        assert_eq!(store.len(), 1);
        let hits = store.search(&unit(4, 0), 1, None).unwrap();
        assert_eq!(hits[0].chunk.id, "a");
    }

    #[test]
    fn dimension_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        {
            let mut store = VectorStore::open(dir.path(), 4).unwrap();
            store
                .upsert(vec![(chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0))])
                .unwrap();
        }

        let err = VectorStore::open(dir.path(), 8).err().expect("mismatch refused");
        match err {
            QuarryError::DimensionMismatch { stored, actual } => {
                assert_eq!((stored, actual), (4, 8));
            }
            other => panic!("expected dimension mismatch, got {other}"),
        }

        VectorStore::wipe(dir.path()).unwrap();
        let store = VectorStore::open(dir.path(), 8).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn upsert_same_id_overwrites_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::open(dir.path(), 4).unwrap();
        store
            .upsert(vec![(chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 0))])
            .unwrap();
        store
            .upsert(vec![(chunk("a", "src/a.rs", ChunkKind::Function, 1), unit(4, 3))])
            .unwrap();

        assert_eq!(store.len(), 1);
        let hits = store.search(&unit(4, 3), 1, None).unwrap();
        assert_eq!(hits[0].chunk.id, "a");
        assert!(hits[0].distance < 1e-6);
    }
}
