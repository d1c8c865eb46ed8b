//! LLM integration module.
//!
//! Provides an OpenAI-compatible client for the judge and the fixed
//! evaluation prompt it is given.

mod client;
mod prompts;

pub use client::{LlmClient, Message, Role};
pub use prompts::{PromptAssembler, Prompts};

use crate::error::Result;
use async_trait::async_trait;

/// Chat-style completion capability used by the judge.
#[async_trait]
pub trait JudgeProvider: Send + Sync {
    /// Send a system instruction and a user prompt, returning the full reply.
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}
