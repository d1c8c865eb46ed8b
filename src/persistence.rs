//! Persistence layer for indexes, fold splits and reports.
//!
//! Supports both JSON (human-readable) and bincode (efficient binary) formats.

use crate::error::{Result, ScoringError};
use crate::index::EmbeddingIndex;
use crate::splitter::SplitManifest;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

/// File holding the cross-validation split.
pub const FOLDS_FILENAME: &str = "folds.json";

/// Save format for artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveFormat {
    /// JSON format (human-readable, larger).
    Json,
    /// Bincode format (binary, compact).
    Bincode,
}

impl SaveFormat {
    /// Determine format from file extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => SaveFormat::Json,
            Some("bin") | Some("bincode") => SaveFormat::Bincode,
            _ => SaveFormat::Json,
        }
    }
}

/// Index file for a fold, or the global index when `fold` is `None`.
pub fn index_path(dir: &Path, fold: Option<usize>) -> PathBuf {
    match fold {
        Some(f) => dir.join(format!("index_fold_{}.bin", f)),
        None => dir.join("index_global.bin"),
    }
}

/// Save any serializable value, choosing the format from the extension.
pub fn save<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    save_with_format(value, path, SaveFormat::from_path(path))
}

pub fn save_with_format<T: Serialize>(value: &T, path: &Path, format: SaveFormat) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| ScoringError::io(parent, e))?;
        }
    }

    let data = match format {
        SaveFormat::Json => serde_json::to_string_pretty(value)
            .map_err(|e| ScoringError::Serialization(e.to_string()))?
            .into_bytes(),
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            bincode::serde::encode_to_vec(value, config)
                .map_err(|e| ScoringError::Serialization(e.to_string()))?
        }
    };

    fs::write(path, &data).map_err(|e| ScoringError::io(path, e))?;
    Ok(())
}

/// Load a value saved with [`save`].
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T> {
    load_with_format(path, SaveFormat::from_path(path))
}

pub fn load_with_format<T: DeserializeOwned>(path: &Path, format: SaveFormat) -> Result<T> {
    let data = fs::read(path).map_err(|e| ScoringError::io(path, e))?;

    match format {
        SaveFormat::Json => serde_json::from_slice(&data)
            .map_err(|e| ScoringError::Serialization(format!("{}: {}", path.display(), e))),
        SaveFormat::Bincode => {
            let config = bincode::config::standard();
            let (value, _): (T, usize) = bincode::serde::decode_from_slice(&data, config)
                .map_err(|e| ScoringError::Serialization(format!("{}: {}", path.display(), e)))?;
            Ok(value)
        }
    }
}

/// Save an embedding index.
pub fn save_index(index: &EmbeddingIndex, path: &Path) -> Result<()> {
    save(index, path)
}

/// Load an embedding index; a missing file is [`ScoringError::IndexNotFound`].
pub fn load_index(path: &Path) -> Result<EmbeddingIndex> {
    if !path.is_file() {
        return Err(ScoringError::IndexNotFound(path.to_path_buf()));
    }
    load(path)
}

pub fn save_split(manifest: &SplitManifest, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(FOLDS_FILENAME);
    save_with_format(manifest, &path, SaveFormat::Json)?;
    Ok(path)
}

pub fn load_split(dir: &Path) -> Result<SplitManifest> {
    let path = dir.join(FOLDS_FILENAME);
    if !path.is_file() {
        return Err(ScoringError::IndexNotFound(path));
    }
    load_with_format(&path, SaveFormat::Json)
}
