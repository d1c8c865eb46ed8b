//! OpenAI-compatible embeddings client.

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Result, ScoringError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Embedding provider backed by a `/v1/embeddings` endpoint.
#[derive(Clone)]
pub struct HttpEmbedder {
    client: Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        if config.api_base.is_empty() {
            return Err(ScoringError::Config(
                "Embedding API base URL is required".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            config,
        })
    }

    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/embeddings", base)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedder {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(count = texts.len(), model = %self.config.model, "Requesting embeddings");

        let mut request = self.client.post(self.endpoint()).json(&EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        });
        if !self.config.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(ScoringError::Provider(format!(
                    "Embedding API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(ScoringError::Provider(format!(
                "Embedding request failed ({}): {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body)
            .map_err(|e| ScoringError::Provider(format!("Bad embedding response: {}", e)))?;
        order_embeddings(parsed.data, texts.len())
    }
}

/// Put vectors back in input order and check one came back per input.
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(ScoringError::Provider(format!(
            "Expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }
    data.sort_by_key(|d| d.index);
    Ok(data.into_iter().map(|d| d.embedding).collect())
}
