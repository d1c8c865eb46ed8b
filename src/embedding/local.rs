//! Local embedding model using candle + sentence-transformers.
//!
//! Only BERT-family checkpoints load here; candle ships no MPNet
//! implementation, so the local default is all-MiniLM-L6-v2.

use super::EmbeddingProvider;
use crate::error::{Result, ScoringError};
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use tokenizers::Tokenizer;
use tracing::info;

pub const DEFAULT_LOCAL_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

fn provider_err(context: &str, e: impl std::fmt::Display) -> ScoringError {
    ScoringError::Provider(format!("{}: {}", context, e))
}

/// Mean-pooled BERT sentence encoder running on the CPU.
pub struct LocalEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalEmbedder {
    /// Load a sentence-transformers model by name from the Hugging Face Hub.
    /// The HTTP default (an MPNet model) is swapped for the local default.
    pub fn load(model_id: &str) -> Result<Self> {
        let model_id = if model_id.contains("mpnet") {
            DEFAULT_LOCAL_MODEL
        } else {
            model_id
        };
        info!(model = model_id, "Loading local embedding model");

        let device = Device::Cpu;

        let api = Api::new().map_err(|e| provider_err("Failed to create HF Hub API", e))?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo
            .get("config.json")
            .map_err(|e| provider_err("Failed to get config.json", e))?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .map_err(|e| provider_err("Failed to get tokenizer.json", e))?;
        let weights_path = repo
            .get("model.safetensors")
            .map_err(|e| provider_err("Failed to get model weights", e))?;

        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| ScoringError::io(&config_path, e))?;
        let config: BertConfig = serde_json::from_str(&raw)
            .map_err(|e| provider_err("Failed to parse model config", e))?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| provider_err("Failed to load tokenizer", e))?;

        // SAFETY: the weights file is not modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| provider_err("Failed to load model weights", e))?
        };
        let model =
            BertModel::load(vb, &config).map_err(|e| provider_err("Failed to load BERT model", e))?;

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, texts: &[String]) -> candle_core::Result<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(candle_core::Error::wrap)?;

        let max_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(0);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        for encoding in &encodings {
            let mut ids = encoding.get_ids().to_vec();
            let mut mask = encoding.get_attention_mask().to_vec();
            ids.resize(max_len, 0);
            mask.resize(max_len, 0);
            input_ids.extend(ids);
            attention_mask.extend(mask);
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)?;
        let attention_mask = Tensor::from_vec(attention_mask, shape, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // Masked mean pooling over the sequence dimension.
        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        (summed / counts)?.to_vec2::<f32>()
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.encode(texts)
            .map_err(|e| provider_err("Local embedding failed", e))
    }
}
