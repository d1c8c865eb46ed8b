//! Per-run context handed to every pipeline stage.

use crate::config::Config;
use crate::error::{Result, ScoringError};
use chrono::Local;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Configuration and output layout of one command invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub config: Config,
    pub output_dir: PathBuf,
    /// `YYYYmmdd_HHMMSS` at construction; names this run's log file.
    pub run_stamp: String,
}

impl RunContext {
    /// Context rooted at `config.pipeline.output_dir`.
    pub fn new(config: Config) -> Self {
        let output_dir = config.pipeline.output_dir.clone();
        Self::with_output_dir(config, output_dir)
    }

    pub fn with_output_dir(config: Config, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            output_dir: output_dir.into(),
            run_stamp: Local::now().format("%Y%m%d_%H%M%S").to_string(),
        }
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.output_dir.join("indexes")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.output_dir.join("prompts")
    }

    pub fn results_dir(&self) -> PathBuf {
        self.output_dir.join("results")
    }

    pub fn metrics_dir(&self) -> PathBuf {
        self.output_dir.join("metrics")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    /// Path of the log file for `stage` in this run.
    pub fn log_path(&self, stage: &str) -> PathBuf {
        self.logs_dir()
            .join(format!("{}_{}.log", stage, self.run_stamp))
    }

    /// Create (truncating) the log file for `stage`.
    pub fn log_file(&self, stage: &str) -> Result<File> {
        let dir = self.logs_dir();
        ensure_dir(&dir)?;
        let path = self.log_path(stage);
        File::create(&path).map_err(|e| ScoringError::io(&path, e))
    }
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|e| ScoringError::io(dir, e))
}
