//! Prompt artifact files.
//!
//! Prompt generation and judgment run as separate stages. Each prompt is
//! written to its own text file, and `manifest.json` next to them records
//! which policy (and fold) every file belongs to, so the scoring stage never
//! has to recover ids from file names. Directories without a manifest are
//! still readable; ids then come from the `prompt_[fold_<f>_]<id>.txt` name.

use crate::error::{Result, ScoringError};
use crate::policy::sanitize_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub const MANIFEST_FILENAME: &str = "manifest.json";

/// One generated prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptArtifact {
    /// File name inside the prompts directory.
    pub file: String,
    /// Policy id as recorded at generation time (sanitized when recovered
    /// from a file name).
    pub policy_id: String,
    pub fold: Option<usize>,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: String,
    pub policy_id: String,
    #[serde(default)]
    pub fold: Option<usize>,
}

/// Index of a prompts directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Deterministic artifact name for a policy.
pub fn artifact_file_name(policy_id: &str, fold: Option<usize>) -> String {
    match fold {
        Some(f) => format!("prompt_fold_{}_{}.txt", f, sanitize_id(policy_id)),
        None => format!("prompt_{}.txt", sanitize_id(policy_id)),
    }
}

/// Recover `(fold, sanitized id)` from an artifact file name.
pub fn parse_file_name(file: &str) -> Option<(Option<usize>, String)> {
    let stem = file.strip_prefix("prompt_")?.strip_suffix(".txt")?;
    if let Some(rest) = stem.strip_prefix("fold_") {
        if let Some((fold, id)) = rest.split_once('_') {
            if let Ok(f) = fold.parse::<usize>() {
                if !id.is_empty() {
                    return Some((Some(f), id.to_string()));
                }
            }
        }
    }
    if stem.is_empty() {
        None
    } else {
        Some((None, stem.to_string()))
    }
}

/// Writes prompt files and keeps the manifest in step with them.
pub struct PromptWriter {
    dir: PathBuf,
    entries: BTreeMap<String, ManifestEntry>,
}

impl PromptWriter {
    /// Start a fresh prompt set in `dir`.
    ///
    /// Prompt files and the manifest left by an earlier run are removed, so
    /// the directory only ever holds one stage's prompts.
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| ScoringError::io(dir, e))?;

        let mut removed = 0;
        for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if name == MANIFEST_FILENAME || parse_file_name(&name).is_some() {
                fs::remove_file(entry.path()).map_err(|e| ScoringError::io(entry.path(), e))?;
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, dir = %dir.display(), "Cleared previous prompt artifacts");
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            entries: BTreeMap::new(),
        })
    }

    pub fn write(&mut self, policy_id: &str, fold: Option<usize>, prompt: &str) -> Result<PathBuf> {
        let file = artifact_file_name(policy_id, fold);
        let path = self.dir.join(&file);
        fs::write(&path, prompt).map_err(|e| ScoringError::io(&path, e))?;
        self.entries.insert(
            file.clone(),
            ManifestEntry {
                file,
                policy_id: policy_id.to_string(),
                fold,
            },
        );
        Ok(path)
    }

    /// Persist the manifest; returns the number of entries.
    pub fn finish(self) -> Result<usize> {
        let manifest = PromptManifest {
            entries: self.entries.into_values().collect(),
        };
        let path = self.dir.join(MANIFEST_FILENAME);
        let json = serde_json::to_string_pretty(&manifest)?;
        fs::write(&path, json).map_err(|e| ScoringError::io(&path, e))?;
        Ok(manifest.entries.len())
    }
}

fn read_manifest(dir: &Path) -> Result<Option<PromptManifest>> {
    let path = dir.join(MANIFEST_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&path).map_err(|e| ScoringError::io(&path, e))?;
    let manifest = serde_json::from_str(&content)
        .map_err(|e| ScoringError::Serialization(format!("{}: {}", path.display(), e)))?;
    Ok(Some(manifest))
}

/// Load every prompt artifact in `dir`, sorted by file name.
pub fn load_artifacts(dir: &Path) -> Result<Vec<PromptArtifact>> {
    if !dir.is_dir() {
        return Err(ScoringError::InputValidation(format!(
            "Prompts directory not found: {}",
            dir.display()
        )));
    }

    let mut artifacts = match read_manifest(dir)? {
        Some(manifest) => from_manifest(dir, manifest)?,
        None => scan_directory(dir)?,
    };
    artifacts.sort_by(|a, b| a.file.cmp(&b.file));
    info!(count = artifacts.len(), dir = %dir.display(), "Loaded prompt artifacts");
    Ok(artifacts)
}

fn from_manifest(dir: &Path, manifest: PromptManifest) -> Result<Vec<PromptArtifact>> {
    let mut out = Vec::with_capacity(manifest.entries.len());
    for entry in manifest.entries {
        let path = dir.join(&entry.file);
        match fs::read_to_string(&path) {
            Ok(prompt) => out.push(PromptArtifact {
                file: entry.file,
                policy_id: entry.policy_id,
                fold: entry.fold,
                prompt,
            }),
            Err(e) => warn!(file = %entry.file, error = %e, "Manifest entry has no readable prompt"),
        }
    }
    Ok(out)
}

fn scan_directory(dir: &Path) -> Result<Vec<PromptArtifact>> {
    warn!(dir = %dir.display(), "No prompt manifest; recovering ids from file names");
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).max_depth(1).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let file = entry.file_name().to_string_lossy().to_string();
        let Some((fold, policy_id)) = parse_file_name(&file) else {
            continue;
        };
        let prompt =
            fs::read_to_string(entry.path()).map_err(|e| ScoringError::io(entry.path(), e))?;
        out.push(PromptArtifact {
            file,
            policy_id,
            fold,
            prompt,
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_names() {
        assert_eq!(artifact_file_name("policy/12", Some(3)), "prompt_fold_3_policy_12.txt");
        assert_eq!(artifact_file_name("a\\b", None), "prompt_a_b.txt");
        assert_eq!(
            parse_file_name("prompt_fold_3_policy_12.txt"),
            Some((Some(3), "policy_12".to_string()))
        );
        assert_eq!(
            parse_file_name("prompt_policy_12.txt"),
            Some((None, "policy_12".to_string()))
        );
        assert_eq!(parse_file_name("notes.txt"), None);
        assert_eq!(parse_file_name("prompt_.txt"), None);
    }

    #[test]
    fn test_manifest_keeps_original_ids() {
        let dir = TempDir::new().unwrap();
        let mut writer = PromptWriter::create(dir.path()).unwrap();
        writer.write("policy/7", Some(0), "prompt seven").unwrap();
        writer.write("policy/8", Some(1), "prompt eight").unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let artifacts = load_artifacts(dir.path()).unwrap();
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].policy_id, "policy/7");
        assert_eq!(artifacts[0].fold, Some(0));
        assert_eq!(artifacts[1].prompt, "prompt eight");
    }

    #[test]
    fn test_create_discards_previous_set() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.md"), "kept").unwrap();
        let mut first = PromptWriter::create(dir.path()).unwrap();
        first.write("a", Some(0), "A").unwrap();
        first.write("b", Some(2), "B").unwrap();
        first.finish().unwrap();

        let mut second = PromptWriter::create(dir.path()).unwrap();
        second.write("a", Some(1), "A2").unwrap();
        assert_eq!(second.finish().unwrap(), 1);

        let artifacts = load_artifacts(dir.path()).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].fold, Some(1));
        assert_eq!(artifacts[0].prompt, "A2");
        assert!(!dir.path().join("prompt_fold_2_b.txt").exists());
        assert!(dir.path().join("notes.md").exists());
    }

    #[test]
    fn test_scan_without_manifest() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("prompt_policy_1.txt"), "one").unwrap();
        fs::write(dir.path().join("readme.md"), "ignored").unwrap();

        let artifacts = load_artifacts(dir.path()).unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].policy_id, "policy_1");
        assert_eq!(artifacts[0].fold, None);
    }

    #[test]
    fn test_missing_directory() {
        assert!(load_artifacts(Path::new("/nonexistent/prompts")).is_err());
    }
}
