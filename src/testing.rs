//! Deterministic stand-ins for the embedding and judge providers.

use crate::embedding::EmbeddingProvider;
use crate::error::{Result, ScoringError};
use crate::llm::JudgeProvider;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;

/// Bag-of-words embedder: each lowercase token adds 1.0 to a hashed bucket.
pub struct HashingEmbedder {
    dimension: usize,
    model_id: String,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self::with_model_id(dimension, "hashing-test-model")
    }

    pub fn with_model_id(dimension: usize, model_id: &str) -> Self {
        Self {
            dimension,
            model_id: model_id.to_string(),
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0; self.dimension];
        let mut any = false;
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = fnv1a(&token.to_lowercase()) as usize % self.dimension;
            v[bucket] += 1.0;
            any = true;
        }
        if !any {
            v[0] = 1.0;
        }
        v
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf29ce484222325, |h, b| {
        (h ^ b as u64).wrapping_mul(0x100000001b3)
    })
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }
}

/// Canned judge replies keyed by the target policy id found in the prompt.
#[derive(Default)]
pub struct ScriptedJudge {
    replies: HashMap<String, std::result::Result<String, String>>,
    aborts: HashMap<String, String>,
    fallback: Option<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedJudge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with `response` when judging `policy_id`.
    pub fn reply(mut self, policy_id: &str, response: impl Into<String>) -> Self {
        self.replies
            .insert(policy_id.to_string(), Ok(response.into()));
        self
    }

    /// Fail with a provider error when judging `policy_id`.
    pub fn fail(mut self, policy_id: &str, message: &str) -> Self {
        self.replies
            .insert(policy_id.to_string(), Err(message.to_string()));
        self
    }

    /// Fail with a run-level error when judging `policy_id`.
    pub fn abort(mut self, policy_id: &str, message: &str) -> Self {
        self.aborts.insert(policy_id.to_string(), message.to_string());
        self
    }

    /// Reply used for any policy without a scripted entry.
    pub fn otherwise(mut self, response: impl Into<String>) -> Self {
        self.fallback = Some(response.into());
        self
    }

    /// Every prompt received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

/// The target policy id of a rendered prompt.
pub fn target_id(prompt: &str) -> Option<&str> {
    let marker = "### Current Policy for Evaluation:\n\nPolicy ID: ";
    let start = prompt.find(marker)? + marker.len();
    let rest = &prompt[start..];
    rest.find("  \n").map(|end| &rest[..end])
}

#[async_trait]
impl JudgeProvider for ScriptedJudge {
    async fn generate(&self, _system: &str, prompt: &str) -> Result<String> {
        if let Ok(mut p) = self.prompts.lock() {
            p.push(prompt.to_string());
        }
        let id = target_id(prompt).unwrap_or_default();
        if let Some(msg) = self.aborts.get(id) {
            return Err(ScoringError::Config(msg.clone()));
        }
        match self.replies.get(id) {
            Some(Ok(text)) => Ok(text.clone()),
            Some(Err(msg)) => Err(ScoringError::Provider(msg.clone())),
            None => self
                .fallback
                .clone()
                .ok_or_else(|| ScoringError::Provider(format!("no scripted reply for '{}'", id))),
        }
    }
}

/// A contract-conforming judge response.
pub fn judge_response(score: i64, confidence: f64, cases: &[(&str, i64)]) -> String {
    let comparable: Vec<_> = cases
        .iter()
        .map(|(id, s)| {
            json!({
                "Policy_ID": id,
                "Case_Name": format!("Case {}", id),
                "Similarity": 0.8,
                "Score": s,
                "Reason": "Comparable wording."
            })
        })
        .collect();
    json!({
        "Score": score,
        "Confidence": confidence,
        "Explanation": {
            "Legal_Language": "Uses 'shall'.",
            "Source_of_Authority": "Statute.",
            "Enforcement_Mechanism": "Penalties apply.",
            "Obligations": "Operators must comply.",
            "Optionality_or_Incentives": "None."
        },
        "Inference_Chain": ["Step 1: binding terms.", "Step 2: final judgment."],
        "Comparable_Cases": comparable
    })
    .to_string()
}
