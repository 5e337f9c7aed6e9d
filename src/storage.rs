//! Durable artifact persistence.
//!
//! Every JSON artifact is written via temp-file + rename so readers never
//! observe a torn write. A file that fails to parse is quarantined aside
//! (renamed to `<name>.corrupt`) and treated as missing; the next indexing
//! run rebuilds it.

use crate::error::{QuarryError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::Path;

/// Serialise `value` as pretty JSON and atomically replace `path`.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| QuarryError::storage(path, e))?;
    write_atomic(path, &data)
}

/// Load a JSON artifact. Missing files return `None`; corrupt files are
/// quarantined and also return `None`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(QuarryError::storage(path, e)),
    };

    match serde_json::from_slice(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            quarantine(path, &e.to_string());
            Ok(None)
        }
    }
}

/// Serialise `value` with bincode and atomically replace `path`. Used by the
/// vector store for its internal sidecar files.
pub fn save_bincode<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let data = bincode::serialize(value).map_err(|e| QuarryError::storage(path, e))?;
    write_atomic(path, &data)
}

/// Load a bincode artifact with the same missing/corrupt semantics as
/// [`load_json`].
pub fn load_bincode<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(QuarryError::storage(path, e)),
    };

    match bincode::deserialize(&data) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            quarantine(path, &e.to_string());
            Ok(None)
        }
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| QuarryError::storage(parent, e))?;
    }

    let tmp = temp_path(path);
    fs::write(&tmp, data).map_err(|e| QuarryError::storage(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| QuarryError::storage(path, e))?;
    Ok(())
}

fn temp_path(path: &Path) -> std::path::PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Move a corrupt artifact aside so the rebuild cannot loop on it.
fn quarantine(path: &Path, reason: &str) {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".corrupt");
    let target = path.with_file_name(name);
    tracing::warn!(
        path = %path.display(),
        reason,
        "corrupt artifact quarantined; treating as missing"
    );
    if let Err(e) = fs::rename(path, &target) {
        tracing::warn!(path = %path.display(), error = %e, "quarantine rename failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc { name: "x".into(), count: 3 };

        save_json(&path, &doc).unwrap();
        let loaded: Option<Doc> = load_json(&path).unwrap();
        assert_eq!(loaded, Some(doc));
    }

    #[test]
    fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Option<Doc> = load_json(&dir.path().join("nope.json")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{ not json").unwrap();

        let loaded: Option<Doc> = load_json(&path).unwrap();
        assert!(loaded.is_none());
        assert!(!path.exists());
        assert!(dir.path().join("doc.json.corrupt").exists());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        save_json(&path, &Doc { name: "y".into(), count: 1 }).unwrap();
        assert!(!dir.path().join("doc.json.tmp").exists());
    }
}
