//! Configuration for the bindingness scorer.
//!
//! Supports both environment variables and YAML config file.
//! Environment variables take precedence over config file values.

use crate::error::{Result, ScoringError};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Judge (chat completion) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL for the LLM API (e.g., "https://api.deepseek.com")
    pub api_base: String,

    /// API key for authentication
    pub api_key: String,

    /// Model name (e.g., "deepseek-chat")
    pub model: String,

    /// Maximum tokens for response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature, kept near zero for reproducible judgments
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_max_tokens() -> u32 {
    2000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            api_key: String::new(),
            model: "deepseek-chat".to_string(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Which embedding backend to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// OpenAI-compatible `/v1/embeddings` endpoint.
    Http,
    /// Local sentence-transformers model (needs the `local-embeddings` feature).
    Local,
}

impl EmbeddingBackend {
    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(Self::Http),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingBackend,
    pub api_base: String,
    pub api_key: String,
    /// Model identifier; must match between index build and query.
    pub model: String,
    /// Texts per embedding request.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: EmbeddingBackend::Http,
            api_base: String::new(),
            api_key: String::new(),
            model: "sentence-transformers/all-mpnet-base-v2".to_string(),
            batch_size: 100,
        }
    }
}

/// Cross-validation, retrieval and batch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Number of stratified folds.
    pub folds: usize,
    /// Shuffle seed for the split.
    pub seed: u64,
    /// Reference cases retrieved per policy.
    pub top_k: usize,
    /// Concurrent judge calls.
    pub max_workers: usize,
    /// Write a snapshot every N applied results.
    pub snapshot_every: usize,
    /// Fixed delay after each judge call, in milliseconds.
    pub request_delay_ms: u64,
    /// Root directory for indexes, prompts, results and logs.
    pub output_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            seed: 42,
            top_k: 2,
            max_workers: 5,
            snapshot_every: 100,
            request_delay_ms: 0,
            output_dir: PathBuf::from("output"),
        }
    }
}

/// Full application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Judge settings
    pub llm: LlmConfig,
    /// Embedding settings
    pub embedding: EmbeddingConfig,
    /// Pipeline settings
    pub pipeline: PipelineConfig,
}

/// Configuration file structure (YAML format).
#[derive(Debug, Deserialize)]
struct ConfigFile {
    llm: Option<LlmFileSection>,
    embedding: Option<EmbeddingFileSection>,
    pipeline: Option<PipelineFileSection>,
}

#[derive(Debug, Deserialize)]
struct LlmFileSection {
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingFileSection {
    provider: Option<EmbeddingBackend>,
    api_base: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    batch_size: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct PipelineFileSection {
    folds: Option<usize>,
    seed: Option<u64>,
    top_k: Option<usize>,
    max_workers: Option<usize>,
    snapshot_every: Option<usize>,
    request_delay_ms: Option<u64>,
    output_dir: Option<PathBuf>,
}

/// Parse an environment variable, ignoring unset or unparsable values.
fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl Config {
    /// Load configuration from environment variables and optional config file.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (LLM_*, EMBEDDING_*, PIPELINE_*)
    /// 2. Config file (`explicit` if given, else ~/.config/bindingness-scorer/config.yaml)
    /// 3. Default values
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::config_file_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Config::default(),
            },
        };

        config.apply_env();
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(api_base) = env::var("LLM_API_BASE") {
            self.llm.api_base = api_base;
        }
        if let Ok(api_key) = env::var("LLM_API_KEY") {
            self.llm.api_key = api_key;
        }
        if let Ok(model) = env::var("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(tokens) = env_parsed("LLM_MAX_TOKENS") {
            self.llm.max_tokens = tokens;
        }
        if let Some(temp) = env_parsed("LLM_TEMPERATURE") {
            self.llm.temperature = temp;
        }

        if let Some(backend) = env::var("EMBEDDING_PROVIDER")
            .ok()
            .and_then(|v| EmbeddingBackend::parse(&v))
        {
            self.embedding.provider = backend;
        }
        if let Ok(api_base) = env::var("EMBEDDING_API_BASE") {
            self.embedding.api_base = api_base;
        }
        if let Ok(api_key) = env::var("EMBEDDING_API_KEY") {
            self.embedding.api_key = api_key;
        }
        if let Ok(model) = env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Some(batch) = env_parsed("EMBEDDING_BATCH_SIZE") {
            self.embedding.batch_size = batch;
        }

        if let Some(folds) = env_parsed("PIPELINE_FOLDS") {
            self.pipeline.folds = folds;
        }
        if let Some(seed) = env_parsed("PIPELINE_SEED") {
            self.pipeline.seed = seed;
        }
        if let Some(top_k) = env_parsed("PIPELINE_TOP_K") {
            self.pipeline.top_k = top_k;
        }
        if let Some(workers) = env_parsed("PIPELINE_MAX_WORKERS") {
            self.pipeline.max_workers = workers;
        }
        if let Ok(dir) = env::var("PIPELINE_OUTPUT_DIR") {
            self.pipeline.output_dir = PathBuf::from(dir);
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ScoringError::io(path, e))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, filling gaps with defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file_config: ConfigFile = serde_yaml::from_str(content)
            .map_err(|e| ScoringError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut config = Config::default();

        if let Some(llm) = file_config.llm {
            if let Some(api_base) = llm.api_base {
                config.llm.api_base = api_base;
            }
            if let Some(api_key) = llm.api_key {
                config.llm.api_key = api_key;
            }
            if let Some(model) = llm.model {
                config.llm.model = model;
            }
            if let Some(max_tokens) = llm.max_tokens {
                config.llm.max_tokens = max_tokens;
            }
            if let Some(temperature) = llm.temperature {
                config.llm.temperature = temperature;
            }
            if let Some(timeout) = llm.timeout_secs {
                config.llm.timeout_secs = timeout;
            }
        }

        if let Some(emb) = file_config.embedding {
            if let Some(provider) = emb.provider {
                config.embedding.provider = provider;
            }
            if let Some(api_base) = emb.api_base {
                config.embedding.api_base = api_base;
            }
            if let Some(api_key) = emb.api_key {
                config.embedding.api_key = api_key;
            }
            if let Some(model) = emb.model {
                config.embedding.model = model;
            }
            if let Some(batch_size) = emb.batch_size {
                config.embedding.batch_size = batch_size;
            }
        }

        if let Some(p) = file_config.pipeline {
            if let Some(folds) = p.folds {
                config.pipeline.folds = folds;
            }
            if let Some(seed) = p.seed {
                config.pipeline.seed = seed;
            }
            if let Some(top_k) = p.top_k {
                config.pipeline.top_k = top_k;
            }
            if let Some(workers) = p.max_workers {
                config.pipeline.max_workers = workers;
            }
            if let Some(every) = p.snapshot_every {
                config.pipeline.snapshot_every = every;
            }
            if let Some(delay) = p.request_delay_ms {
                config.pipeline.request_delay_ms = delay;
            }
            if let Some(dir) = p.output_dir {
                config.pipeline.output_dir = dir;
            }
        }

        Ok(config)
    }

    /// Get the default config file path.
    pub fn config_file_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "bindingness-scorer")
            .map(|dirs| dirs.config_dir().join("config.yaml"))
    }

    /// Validate the settings needed to call the judge.
    pub fn validate_llm(&self) -> Result<()> {
        if self.llm.api_base.is_empty() {
            return Err(ScoringError::Config(
                "LLM API base URL is required. Set LLM_API_BASE environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.api_key.is_empty() {
            return Err(ScoringError::Config(
                "LLM API key is required. Set LLM_API_KEY environment variable or add to config file.".to_string()
            ));
        }

        if self.llm.model.is_empty() {
            return Err(ScoringError::Config(
                "LLM model is required. Set LLM_MODEL environment variable or add to config file."
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Validate embedding and pipeline settings.
    pub fn validate(&self) -> Result<()> {
        let p = &self.pipeline;
        if p.folds < 2 {
            return Err(ScoringError::Config(format!(
                "folds must be at least 2, got {}",
                p.folds
            )));
        }
        if p.top_k == 0 {
            return Err(ScoringError::Config("top_k must be positive".to_string()));
        }
        if p.max_workers == 0 {
            return Err(ScoringError::Config(
                "max_workers must be positive".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(ScoringError::Config(
                "embedding batch_size must be positive".to_string(),
            ));
        }
        if self.embedding.model.is_empty() {
            return Err(ScoringError::Config(
                "Embedding model is required. Set EMBEDDING_MODEL or add to config file."
                    .to_string(),
            ));
        }
        if self.embedding.provider == EmbeddingBackend::Http && self.embedding.api_base.is_empty()
        {
            return Err(ScoringError::Config(
                "Embedding API base URL is required for the http provider. Set EMBEDDING_API_BASE."
                    .to_string(),
            ));
        }
        Ok(())
    }

    /// Create a config from explicit judge values (useful for testing).
    pub fn with_llm(
        api_base: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm: LlmConfig {
                api_base: api_base.into(),
                api_key: api_key.into(),
                model: model.into(),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}
