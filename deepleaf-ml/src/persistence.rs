//! Durable file writes for run artifacts and the local tracking store.
//!
//! Every write goes to a `<name>.tmp` sibling first and is renamed into place,
//! so a reader never observes a half-written record.

use crate::error::MlError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Serialize `data` as pretty JSON and atomically replace `path` with it.
///
/// Parent directories are created when missing.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<(), MlError> {
    let json = serde_json::to_vec_pretty(data)?;
    atomic_write(path, &json)
}

/// Atomically replace `path` with `data`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), MlError> {
    ensure_parent(path)?;
    let tmp = tmp_sibling(path);
    std::fs::write(&tmp, data)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Load a JSON document, returning `Ok(None)` when the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, MlError> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}

/// Create the parent directory of `path` if it has one.
pub fn ensure_parent(path: &Path) -> Result<(), MlError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

// `history.json` -> `history.json.tmp`
fn tmp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
