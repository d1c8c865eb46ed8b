//! Text-embedding providers.
//!
//! A provider turns a batch of strings into one dense vector per string.
//! Vectors are returned as the model produced them; normalization is done by
//! [`crate::index::EmbeddingIndex`] so that indexed and query vectors always
//! go through the same path.

mod http;
#[cfg(feature = "local-embeddings")]
mod local;

pub use http::HttpEmbedder;
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::{Result, ScoringError};
use async_trait::async_trait;

/// Black-box embedding capability.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the underlying model. Indexes record it so queries can
    /// be checked against the model that built them.
    fn model_id(&self) -> &str;

    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ScoringError::Provider("Embedding provider returned no vector".into()))
    }
}

/// Build the provider selected in the configuration.
pub fn from_config(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingBackend::Http => Ok(Box::new(HttpEmbedder::new(config.clone())?)),
        #[cfg(feature = "local-embeddings")]
        EmbeddingBackend::Local => Ok(Box::new(LocalEmbedder::load(&config.model)?)),
        #[cfg(not(feature = "local-embeddings"))]
        EmbeddingBackend::Local => Err(ScoringError::Config(
            "The local embedding provider needs the `local-embeddings` feature".to_string(),
        )),
    }
}

/// Scale a vector to unit L2 norm in place. Zero vectors are left as-is.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Inner product of two equal-length vectors.
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
