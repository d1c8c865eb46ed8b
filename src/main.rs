//! Bindingness Scorer CLI
//!
//! Cross-validation and production runs of the retrieval-augmented bindingness judge.

use anyhow::{Context, Result, bail};
use bindingness_scorer::{
    config::Config,
    context::RunContext,
    embedding::{self, EmbeddingProvider},
    judge::JudgeClient,
    llm::LlmClient,
    pipeline::{self, PrepareReport, PromptReport, RunSummary},
    policy::{Dataset, DatasetStats},
};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Bindingness Scorer - retrieval-augmented LLM scoring of climate policies
#[derive(Parser)]
#[command(name = "bindingness")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output directory (overrides the configured one)
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a labeled dataset into folds and build one index per fold
    Prepare {
        /// Labeled CSV (Policy_ID, Policy_Name, Type, Description, Score)
        dataset: PathBuf,
    },

    /// Write a prompt for every held-out policy of every fold
    Prompts {
        /// The labeled CSV used for `prepare`
        dataset: PathBuf,
    },

    /// Build the global index over a reference set
    ProductionPrepare {
        /// Labeled reference CSV
        reference: PathBuf,
    },

    /// Write prompts for unlabeled targets against the global index
    ProductionPrompts {
        /// Labeled reference CSV used for `production-prepare`
        reference: PathBuf,

        /// Unlabeled target CSV
        targets: PathBuf,
    },

    /// Judge prompts and write the augmented dataset
    Score {
        /// Dataset the prompts were generated for
        dataset: PathBuf,

        /// Prompts directory (defaults to <output>/prompts)
        #[arg(short, long)]
        prompts: Option<PathBuf>,

        /// Prefix for result files (defaults to the dataset name)
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Evaluate an augmented dataset against its ground truth
    Metrics {
        /// Augmented CSV (defaults to the latest final results)
        file: Option<PathBuf>,
    },

    /// Show dataset statistics
    Stats {
        /// Dataset CSV
        dataset: PathBuf,
    },

    /// Test judge connection
    Test,
}

impl Commands {
    fn stage(&self) -> &'static str {
        match self {
            Commands::Prepare { .. } => "prepare",
            Commands::Prompts { .. } => "prompts",
            Commands::ProductionPrepare { .. } => "production_prepare",
            Commands::ProductionPrompts { .. } => "production_prompts",
            Commands::Score { .. } => "score",
            Commands::Metrics { .. } => "metrics",
            Commands::Stats { .. } => "stats",
            Commands::Test => "test",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let ctx = match cli.output {
        Some(dir) => RunContext::with_output_dir(config, dir),
        None => RunContext::new(config),
    };
    init_logging(&ctx, cli.command.stage())?;

    match cli.command {
        Commands::Prepare { dataset } => cmd_prepare(&ctx, &dataset).await,
        Commands::Prompts { dataset } => cmd_prompts(&ctx, &dataset).await,
        Commands::ProductionPrepare { reference } => cmd_production_prepare(&ctx, &reference).await,
        Commands::ProductionPrompts { reference, targets } => {
            cmd_production_prompts(&ctx, &reference, &targets).await
        }
        Commands::Score {
            dataset,
            prompts,
            prefix,
        } => cmd_score(&ctx, &dataset, prompts, prefix).await,
        Commands::Metrics { file } => cmd_metrics(&ctx, file),
        Commands::Stats { dataset } => cmd_stats(&ctx, &dataset),
        Commands::Test => cmd_test(&ctx).await,
    }
}

/// Console and per-run log file. `RUST_LOG` overrides the default `info`.
fn init_logging(ctx: &RunContext, stage: &str) -> Result<()> {
    let file = ctx.log_file(stage).context("Failed to open log file")?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("Failed to install logger")?;

    info!(log = %ctx.log_path(stage).display(), "Logging initialized");
    Ok(())
}

fn validate_config(ctx: &RunContext) -> Result<()> {
    ctx.config.validate().context("Invalid configuration")
}

fn load_labeled(path: &Path) -> Result<Dataset> {
    Dataset::load_labeled(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn load_unlabeled(path: &Path) -> Result<Dataset> {
    Dataset::load_unlabeled(path).with_context(|| format!("Failed to load {}", path.display()))
}

fn print_prepare(report: &PrepareReport) {
    if let Some(split) = &report.split_path {
        println!("  Split:    {}", split.display());
    }
    for path in &report.index_paths {
        println!("  Index:    {}", path.display());
    }
}

fn print_prompts(report: &PromptReport) {
    println!("\nPrompts written: {}", report.written);
    if report.failed > 0 {
        println!("  Retrieval failures: {} (see log)", report.failed);
    }
    println!("  Directory: {}", report.dir.display());
}

async fn cmd_prepare(ctx: &RunContext, dataset_path: &Path) -> Result<()> {
    validate_config(ctx)?;
    let dataset = load_labeled(dataset_path)?;
    let provider =
        embedding::from_config(&ctx.config.embedding).context("Failed to create embedder")?;

    println!(
        "Preparing {} folds for {} ({} policies)",
        ctx.config.pipeline.folds,
        dataset.name,
        dataset.len()
    );
    println!("Using embedding model: {}", provider.model_id());

    let start = Instant::now();
    let report = pipeline::prepare_cross_validation(ctx, &dataset, provider.as_ref())
        .await
        .context("Failed to prepare folds")?;

    println!("\nFolds prepared in {:.2?}", start.elapsed());
    print_prepare(&report);
    Ok(())
}

async fn cmd_prompts(ctx: &RunContext, dataset_path: &Path) -> Result<()> {
    validate_config(ctx)?;
    let dataset = load_labeled(dataset_path)?;
    let provider =
        embedding::from_config(&ctx.config.embedding).context("Failed to create embedder")?;

    let report = pipeline::build_prompts_cv(ctx, &dataset, provider.as_ref())
        .await
        .context("Failed to build prompts (did you run `prepare`?)")?;
    print_prompts(&report);
    Ok(())
}

async fn cmd_production_prepare(ctx: &RunContext, reference_path: &Path) -> Result<()> {
    validate_config(ctx)?;
    let reference = load_labeled(reference_path)?;
    let provider =
        embedding::from_config(&ctx.config.embedding).context("Failed to create embedder")?;

    println!(
        "Indexing reference set {} ({} policies) with {}",
        reference.name,
        reference.len(),
        provider.model_id()
    );
    let report = pipeline::prepare_production(ctx, &reference, provider.as_ref())
        .await
        .context("Failed to build global index")?;
    print_prepare(&report);
    Ok(())
}

async fn cmd_production_prompts(
    ctx: &RunContext,
    reference_path: &Path,
    targets_path: &Path,
) -> Result<()> {
    validate_config(ctx)?;
    let reference = load_labeled(reference_path)?;
    let targets = load_unlabeled(targets_path)?;
    let provider =
        embedding::from_config(&ctx.config.embedding).context("Failed to create embedder")?;

    let overlap = targets
        .policies
        .iter()
        .filter(|p| reference.get(&p.policy_id).is_some())
        .count();
    if overlap > 0 {
        println!("Note: {} targets also appear in the reference set", overlap);
    }

    let report = pipeline::build_prompts_production(ctx, &targets, provider.as_ref())
        .await
        .context("Failed to build prompts (did you run `production-prepare`?)")?;
    print_prompts(&report);
    Ok(())
}

async fn cmd_score(
    ctx: &RunContext,
    dataset_path: &Path,
    prompts: Option<PathBuf>,
    prefix: Option<String>,
) -> Result<()> {
    ctx.config.validate_llm().context("Invalid judge configuration")?;

    let dataset = load_unlabeled(dataset_path)?;
    let prompts_dir = prompts.unwrap_or_else(|| ctx.prompts_dir());
    if !prompts_dir.is_dir() {
        bail!("Prompts directory not found: {}", prompts_dir.display());
    }
    let prefix = prefix.unwrap_or_else(|| dataset.name.clone());

    println!("Scoring prompts in {}", prompts_dir.display());
    println!("Using model: {}", ctx.config.llm.model);

    let client = LlmClient::new(ctx.config.llm.clone()).context("Failed to create judge client")?;
    let judge = JudgeClient::new(Arc::new(client));

    let start = Instant::now();
    let summary = pipeline::score_prompts(ctx, &dataset, &prompts_dir, &prefix, &judge)
        .await
        .context("Scoring run failed")?;

    print_summary(&summary);
    println!("  Time:        {:.2?}", start.elapsed());
    if let Some(e) = &summary.run_error {
        bail!("Scoring run failed: {}", e);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nScoring Complete:");
    println!("  Attempted:   {}", summary.attempted);
    println!("  Succeeded:   {}", summary.succeeded);
    println!("  Failed:      {}", summary.failed);
    println!("  Unmatched:   {}", summary.unmatched);
    if let Some(path) = &summary.results_path {
        println!("  Results:     {}", path.display());
    }
}

fn cmd_metrics(ctx: &RunContext, file: Option<PathBuf>) -> Result<()> {
    let path = match file {
        Some(path) => path,
        None => pipeline::latest_final_results(&ctx.results_dir())
            .context("No results file given and none found")?,
    };
    println!("Evaluating {}", path.display());

    let (report, out) = pipeline::evaluate_file(ctx, &path).context("Failed to compute metrics")?;
    report.print_summary();
    println!("Metrics saved to: {}", out.display());
    Ok(())
}

fn cmd_stats(ctx: &RunContext, dataset_path: &Path) -> Result<()> {
    let dataset = load_unlabeled(dataset_path)?;
    DatasetStats::compute(&dataset).print_summary();

    if dataset.is_labeled() {
        let cfg = &ctx.config.pipeline;
        let dists = pipeline::fold_distributions(ctx, &dataset)
            .context("Failed to split dataset")?;
        println!("Fold distributions (k = {}, seed = {}):", cfg.folds, cfg.seed);
        for (i, (train, test)) in dists.iter().enumerate() {
            println!("  Fold {}: train {:?}, test {:?}", i, train, test);
        }
    }
    Ok(())
}

async fn cmd_test(ctx: &RunContext) -> Result<()> {
    println!("Testing judge connection...\n");
    let llm = &ctx.config.llm;

    println!("Configuration:");
    println!("  API Base:  {}", llm.api_base);
    println!("  Model:     {}", llm.model);
    println!(
        "  API Key:   {}...",
        llm.api_key.chars().take(8).collect::<String>()
    );
    println!();

    if let Err(e) = ctx.config.validate_llm() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = LlmClient::new(llm.clone()).context("Failed to create judge client")?;

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => {
            println!("Connection successful!");
        }
        Err(e) => {
            println!("Connection failed: {}", e);
        }
    }

    Ok(())
}
