//! Bindingness Scorer - retrieval-augmented LLM scoring of climate-policy bindingness.
//!
//! Each policy is given a bindingness score of 1 (least binding) to 3 (most
//! binding) by an external language model. The model sees the policy next to
//! the most similar already-scored reference policies.
//!
//! # Overview
//!
//! 1. Policies are embedded (`Type + " " + Description`) and stored in an
//!    exact inner-product index over L2-normalized vectors
//! 2. For each target policy the top-k reference cases are retrieved
//! 3. A fixed template combines target and cases into a prompt
//! 4. The judge's JSON answer is validated, then joined back onto the dataset
//!
//! Accuracy is estimated with stratified k-fold cross-validation: every fold
//! gets its own index built only from its training policies, so a held-out
//! policy can never retrieve itself. Production runs use a single index over
//! the full reference set.
//!
//! # Quick Start
//!
//! ```no_run
//! use bindingness_scorer::{
//!     config::Config,
//!     context::RunContext,
//!     embedding,
//!     judge::JudgeClient,
//!     llm::LlmClient,
//!     pipeline,
//!     policy::Dataset,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load(None)?;
//!     config.validate()?;
//!     let ctx = RunContext::new(config.clone());
//!
//!     let dataset = Dataset::load_labeled(Path::new("labeled.csv"))?;
//!     let provider = embedding::from_config(&config.embedding)?;
//!
//!     pipeline::prepare_cross_validation(&ctx, &dataset, provider.as_ref()).await?;
//!     pipeline::build_prompts_cv(&ctx, &dataset, provider.as_ref()).await?;
//!
//!     let judge = JudgeClient::new(Arc::new(LlmClient::new(config.llm)?));
//!     let summary =
//!         pipeline::score_prompts(&ctx, &dataset, &ctx.prompts_dir(), "labeled", &judge).await?;
//!     println!("{} of {} scored", summary.succeeded, summary.attempted);
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **Dataset / Policy**: validated CSV input
//! - **DatasetSplitter**: label-stratified, seeded k-fold split
//! - **EmbeddingIndex / CaseRetriever**: exact cosine top-k retrieval
//! - **PromptAssembler**: deterministic prompt template
//! - **JudgeClient**: judge call plus the parse/repair chain for its output
//! - **ResultAggregator**: augmented dataset with periodic snapshots
//! - **MetricsEngine**: accuracy, per-class scores, confusion matrix, ROC-AUC

pub mod aggregator;
pub mod artifacts;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod index;
pub mod judge;
pub mod llm;
pub mod metrics;
pub mod persistence;
pub mod pipeline;
pub mod policy;
pub mod retriever;
pub mod splitter;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use aggregator::ResultAggregator;
pub use config::Config;
pub use context::RunContext;
pub use embedding::EmbeddingProvider;
pub use error::{Result, ScoringError};
pub use index::EmbeddingIndex;
pub use judge::{JudgeClient, JudgmentResult};
pub use llm::{JudgeProvider, LlmClient, PromptAssembler};
pub use metrics::{MetricsEngine, MetricsReport};
pub use pipeline::RunSummary;
pub use policy::{Dataset, Policy};
pub use retriever::{CaseRetriever, RetrievedCase};
pub use splitter::{DatasetSplitter, Fold};
