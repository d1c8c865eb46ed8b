//! Stage orchestration.
//!
//! Cross-validation: `prepare_cross_validation` splits the labeled set and
//! builds one index per fold from that fold's training policies,
//! `build_prompts_cv` renders a prompt for every held-out policy against its
//! own fold's index, and `score_prompts` judges the prompts and writes the
//! augmented dataset. Production runs the same stages with a single global
//! index over the reference set.

use crate::aggregator::ResultAggregator;
use crate::artifacts::{PromptWriter, load_artifacts};
use crate::context::{RunContext, ensure_dir};
use crate::embedding::EmbeddingProvider;
use crate::error::{Result, ScoringError};
use crate::index::EmbeddingIndex;
use crate::judge::{JudgeClient, run_bounded};
use crate::llm::PromptAssembler;
use crate::metrics::{MetricsEngine, MetricsReport, load_label_pairs};
use crate::persistence::{self, SaveFormat, index_path, load_index, load_split, save_index};
use crate::policy::{Dataset, Policy, score_distribution};
use crate::retriever::CaseRetriever;
use crate::splitter::{DatasetSplitter, Fold, SplitManifest};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use walkdir::WalkDir;

/// Output of an index-building stage.
#[derive(Debug, Clone)]
pub struct PrepareReport {
    pub split_path: Option<PathBuf>,
    pub index_paths: Vec<PathBuf>,
}

/// Output of a prompt-building stage.
#[derive(Debug, Clone, Default)]
pub struct PromptReport {
    pub written: usize,
    /// Policies whose retrieval failed.
    pub failed: usize,
    pub dir: PathBuf,
}

/// Counts of a scoring run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    /// Provider errors and schema violations.
    pub failed: usize,
    /// Judged but not joined back to a dataset row.
    pub unmatched: usize,
    pub results_path: Option<PathBuf>,
    /// First run-level error, if one cut the run short.
    pub run_error: Option<String>,
}

/// Split `dataset` and build a retrieval index per fold.
pub async fn prepare_cross_validation(
    ctx: &RunContext,
    dataset: &Dataset,
    provider: &dyn EmbeddingProvider,
) -> Result<PrepareReport> {
    let cfg = &ctx.config.pipeline;
    let splitter = DatasetSplitter::new(cfg.folds, cfg.seed);
    let folds = splitter.split(&dataset.policies)?;

    let dir = ctx.indexes_dir();
    ensure_dir(&dir)?;
    let manifest = SplitManifest::from_folds(&splitter, &dataset.policies, &folds);
    let split_path = persistence::save_split(&manifest, &dir)?;
    info!(path = %split_path.display(), k = splitter.k, seed = splitter.seed, "Saved fold split");

    let mut index_paths = Vec::with_capacity(folds.len());
    for fold in &folds {
        let train = fold.train_policies(&dataset.policies);
        info!(fold = fold.index, train = train.len(), "Building fold index");
        let index =
            EmbeddingIndex::build(&train, provider, ctx.config.embedding.batch_size).await?;
        let path = index_path(&dir, Some(fold.index));
        save_index(&index, &path)?;
        info!(fold = fold.index, entries = index.len(), path = %path.display(), "Saved fold index");
        index_paths.push(path);
    }

    Ok(PrepareReport {
        split_path: Some(split_path),
        index_paths,
    })
}

/// Render prompts for every held-out policy using the saved split and indexes.
pub async fn build_prompts_cv(
    ctx: &RunContext,
    dataset: &Dataset,
    provider: &dyn EmbeddingProvider,
) -> Result<PromptReport> {
    let dir = ctx.indexes_dir();
    let manifest = load_split(&dir)?;
    if manifest.k != ctx.config.pipeline.folds || manifest.seed != ctx.config.pipeline.seed {
        warn!(
            saved_k = manifest.k,
            saved_seed = manifest.seed,
            "Using saved split; it differs from the configured folds/seed"
        );
    }
    let folds = manifest.to_folds(&dataset.policies)?;

    let prompts_dir = ctx.prompts_dir();
    let mut writer = PromptWriter::create(&prompts_dir)?;
    let mut report = PromptReport {
        dir: prompts_dir,
        ..Default::default()
    };

    for fold in &folds {
        let index = load_index(&index_path(&dir, Some(fold.index)))?;
        ensure_no_leakage(&index, fold, &dataset.policies)?;
        let retriever = CaseRetriever::new(&index, provider)?;
        let targets = fold.test_policies(&dataset.policies);
        info!(fold = fold.index, targets = targets.len(), "Building fold prompts");
        write_prompts(&retriever, &targets, Some(fold.index), ctx, &mut writer, &mut report)
            .await?;
    }

    let entries = writer.finish()?;
    info!(written = report.written, failed = report.failed, manifest_entries = entries, "Prompts complete");
    Ok(report)
}

/// Build the global index over the whole reference set.
pub async fn prepare_production(
    ctx: &RunContext,
    reference: &Dataset,
    provider: &dyn EmbeddingProvider,
) -> Result<PrepareReport> {
    reference.labels()?;
    let dir = ctx.indexes_dir();
    ensure_dir(&dir)?;

    let index =
        EmbeddingIndex::build(&reference.policies, provider, ctx.config.embedding.batch_size)
            .await?;
    let path = index_path(&dir, None);
    save_index(&index, &path)?;
    info!(entries = index.len(), path = %path.display(), "Saved global index");

    Ok(PrepareReport {
        split_path: None,
        index_paths: vec![path],
    })
}

/// Render a prompt for every target against the global index.
pub async fn build_prompts_production(
    ctx: &RunContext,
    targets: &Dataset,
    provider: &dyn EmbeddingProvider,
) -> Result<PromptReport> {
    let index = load_index(&index_path(&ctx.indexes_dir(), None))?;
    let retriever = CaseRetriever::new(&index, provider)?;

    let prompts_dir = ctx.prompts_dir();
    let mut writer = PromptWriter::create(&prompts_dir)?;
    let mut report = PromptReport {
        dir: prompts_dir,
        ..Default::default()
    };
    write_prompts(&retriever, &targets.policies, None, ctx, &mut writer, &mut report).await?;

    let entries = writer.finish()?;
    info!(written = report.written, failed = report.failed, manifest_entries = entries, "Prompts complete");
    Ok(report)
}

/// An index built for `fold` must only hold that fold's training policies.
fn ensure_no_leakage(index: &EmbeddingIndex, fold: &Fold, policies: &[Policy]) -> Result<()> {
    let train: HashSet<&str> = fold
        .train
        .iter()
        .map(|&i| policies[i].policy_id.as_str())
        .collect();
    match index
        .entries()
        .iter()
        .find(|e| !train.contains(e.policy.policy_id.as_str()))
    {
        Some(entry) => Err(ScoringError::InputValidation(format!(
            "Index for fold {} contains '{}', which is not in the fold's training set; rerun prepare",
            fold.index, entry.policy.policy_id
        ))),
        None => Ok(()),
    }
}

async fn write_prompts(
    retriever: &CaseRetriever<'_>,
    targets: &[Policy],
    fold: Option<usize>,
    ctx: &RunContext,
    writer: &mut PromptWriter,
    report: &mut PromptReport,
) -> Result<()> {
    let assembler = PromptAssembler::new();
    let top_k = ctx.config.pipeline.top_k;

    for target in targets {
        let cases = match retriever.retrieve(target, top_k).await {
            Ok(cases) => cases,
            Err(e) if e.is_item_level() => {
                warn!(policy_id = %target.policy_id, ?fold, error = %e, "Retrieval failed; skipping policy");
                report.failed += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        let prompt = assembler.build(target, &cases);
        writer.write(&target.policy_id, fold, &prompt)?;
        report.written += 1;
    }
    Ok(())
}

enum Outcome {
    Applied,
    Failed,
    Unmatched,
}

/// Judge every prompt in `prompts_dir` and write the augmented `dataset`.
///
/// Per-item failures are logged and counted. A run-level error does not
/// stop the other workers; it is counted as a failure and reported in
/// `RunSummary::run_error` once the final snapshot is written.
pub async fn score_prompts(
    ctx: &RunContext,
    dataset: &Dataset,
    prompts_dir: &Path,
    prefix: &str,
    judge: &JudgeClient,
) -> Result<RunSummary> {
    let cfg = &ctx.config.pipeline;
    let artifacts = load_artifacts(prompts_dir)?;
    let attempted = artifacts.len();
    info!(attempted, workers = cfg.max_workers, "Scoring prompts");

    let aggregator = Arc::new(Mutex::new(ResultAggregator::new(
        dataset,
        &ctx.results_dir(),
        prefix,
        cfg.snapshot_every,
    )));
    let delay = Duration::from_millis(cfg.request_delay_ms);

    let outcomes = run_bounded(artifacts, cfg.max_workers, |artifact| {
        let judge = judge.clone();
        let aggregator = Arc::clone(&aggregator);
        async move {
            let judged = judge.judge(&artifact.prompt).await;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = match judged {
                Ok(result) => result,
                Err(e) if e.is_item_level() => {
                    warn!(policy_id = %artifact.policy_id, file = %artifact.file, error = %e, "Judgment failed");
                    return Ok(Outcome::Failed);
                }
                Err(e) => return Err(e),
            };

            let applied = aggregator.lock().await.apply(&artifact.policy_id, &result);
            match applied {
                Ok(_) => {
                    info!(policy_id = %artifact.policy_id, score = result.score, confidence = result.confidence, "Scored");
                    Ok(Outcome::Applied)
                }
                Err(ScoringError::JoinMismatch { policy_id }) => {
                    warn!(%policy_id, file = %artifact.file, "No dataset row for judged policy");
                    Ok(Outcome::Unmatched)
                }
                Err(e) => Err(e),
            }
        }
    })
    .await;

    let mut summary = RunSummary {
        attempted,
        ..Default::default()
    };
    for outcome in outcomes {
        match outcome {
            Ok(Outcome::Applied) => summary.succeeded += 1,
            Ok(Outcome::Failed) => summary.failed += 1,
            Ok(Outcome::Unmatched) => summary.unmatched += 1,
            Err(e) => {
                error!(error = %e, "Run-level error while scoring");
                summary.failed += 1;
                summary.run_error.get_or_insert_with(|| e.to_string());
            }
        }
    }

    let path = aggregator.lock().await.finalize()?;
    summary.results_path = Some(path);

    if let Some(run_error) = &summary.run_error {
        error!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            unmatched = summary.unmatched,
            error = %run_error,
            "Scoring finished with a run-level error"
        );
    } else {
        info!(
            attempted = summary.attempted,
            succeeded = summary.succeeded,
            failed = summary.failed,
            unmatched = summary.unmatched,
            "Scoring complete"
        );
    }
    Ok(summary)
}

/// Evaluate an augmented CSV and save the report under `metrics/`.
pub fn evaluate_file(ctx: &RunContext, path: &Path) -> Result<(MetricsReport, PathBuf)> {
    let (y_true, y_pred, skipped) = load_label_pairs(path)?;
    let mut report = MetricsEngine::evaluate(&y_true, &y_pred)?;
    report.skipped = skipped;

    let out = ctx
        .metrics_dir()
        .join(format!("metrics_results_{}.json", ctx.run_stamp));
    persistence::save_with_format(&report, &out, SaveFormat::Json)?;
    info!(accuracy = report.accuracy, path = %out.display(), "Saved metrics");
    Ok((report, out))
}

/// Most recent `*_with_predictions_final_*.csv` in `results_dir`.
///
/// Recency is read from the timestamp that ends the file name.
pub fn latest_final_results(results_dir: &Path) -> Result<PathBuf> {
    const MARKER: &str = "_with_predictions_final_";
    WalkDir::new(results_dir)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            let stamp = name.split_once(MARKER)?.1.strip_suffix(".csv")?.to_string();
            Some((stamp, e.into_path()))
        })
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, path)| path)
        .ok_or_else(|| {
            ScoringError::InputValidation(format!(
                "No final results found in {}",
                results_dir.display()
            ))
        })
}

/// Per-fold `(train, test)` score distributions for the configured split.
pub fn fold_distributions(
    ctx: &RunContext,
    dataset: &Dataset,
) -> Result<Vec<(BTreeMap<u8, usize>, BTreeMap<u8, usize>)>> {
    let cfg = &ctx.config.pipeline;
    let folds = DatasetSplitter::new(cfg.folds, cfg.seed).split(&dataset.policies)?;
    Ok(folds
        .iter()
        .map(|f| {
            (
                score_distribution(f.train.iter().map(|&i| &dataset.policies[i])),
                score_distribution(f.test.iter().map(|&i| &dataset.policies[i])),
            )
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::COL_PREDICTED_SCORE;
    use crate::artifacts::{ManifestEntry, MANIFEST_FILENAME, PromptManifest, artifact_file_name};
    use crate::config::Config;
    use crate::testing::{HashingEmbedder, ScriptedJudge, judge_response, target_id};
    use std::fs;
    use tempfile::TempDir;

    const TOPICS: [&str; 3] = [
        "voluntary guidance may encourage",
        "plan should target reductions",
        "operators shall comply penalties apply",
    ];

    fn labeled(n: usize) -> Dataset {
        let policies = (0..n)
            .map(|i| {
                let score = (i % 3) as u8 + 1;
                Policy::new(
                    format!("policy/{}", i),
                    format!("Policy {}", i),
                    "Statute",
                    format!("{} number {}", TOPICS[usize::from(score) - 1], i),
                )
                .with_score(score)
                .with_explanation(format!("Reference {}", i))
            })
            .collect();
        Dataset::from_policies("labeled", policies)
    }

    fn context(dir: &Path, folds: usize) -> RunContext {
        let mut config = Config::default();
        config.pipeline.folds = folds;
        config.pipeline.max_workers = 3;
        config.embedding.batch_size = 7;
        RunContext::with_output_dir(config, dir)
    }

    fn case_ids(prompt: &str) -> Vec<String> {
        prompt
            .split("\nCase ")
            .skip(1)
            .filter_map(|chunk| {
                let rest = chunk.split_once(":\nPolicy ID: ")?.1;
                rest.lines().next().map(str::to_string)
            })
            .collect()
    }

    #[tokio::test]
    async fn test_prepare_stratifies_and_isolates_folds() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 5);
        let dataset = labeled(30);
        let provider = HashingEmbedder::new(32);

        let report = prepare_cross_validation(&ctx, &dataset, &provider).await.unwrap();
        assert_eq!(report.index_paths.len(), 5);

        let manifest = load_split(&ctx.indexes_dir()).unwrap();
        let folds = manifest.to_folds(&dataset.policies).unwrap();
        for fold in &folds {
            let test = score_distribution(fold.test.iter().map(|&i| &dataset.policies[i]));
            assert_eq!(test, BTreeMap::from([(1, 2), (2, 2), (3, 2)]));

            let index = load_index(&index_path(&ctx.indexes_dir(), Some(fold.index))).unwrap();
            assert_eq!(index.len(), 24);
            for &i in &fold.test {
                assert!(!index.contains(&dataset.policies[i].policy_id));
            }
        }
    }

    #[tokio::test]
    async fn test_cv_prompts_only_cite_training_cases() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let dataset = labeled(12);
        let provider = HashingEmbedder::new(32);

        prepare_cross_validation(&ctx, &dataset, &provider).await.unwrap();
        let report = build_prompts_cv(&ctx, &dataset, &provider).await.unwrap();
        assert_eq!(report.written, 12);
        assert_eq!(report.failed, 0);
        assert!(ctx.prompts_dir().join(MANIFEST_FILENAME).exists());

        let folds = load_split(&ctx.indexes_dir())
            .unwrap()
            .to_folds(&dataset.policies)
            .unwrap();
        for fold in &folds {
            let train: HashSet<&str> = fold
                .train
                .iter()
                .map(|&i| dataset.policies[i].policy_id.as_str())
                .collect();
            for &i in &fold.test {
                let id = &dataset.policies[i].policy_id;
                let file = ctx.prompts_dir().join(artifact_file_name(id, Some(fold.index)));
                let prompt = fs::read_to_string(file).unwrap();
                assert_eq!(target_id(&prompt), Some(id.as_str()));

                let cited = case_ids(&prompt);
                assert_eq!(cited.len(), 2);
                assert!(cited.iter().all(|c| train.contains(c.as_str())));
            }
        }
    }

    #[tokio::test]
    async fn test_leaked_index_is_rejected() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let dataset = labeled(9);
        let provider = HashingEmbedder::new(16);

        prepare_cross_validation(&ctx, &dataset, &provider).await.unwrap();
        let everything = EmbeddingIndex::build(&dataset.policies, &provider, 10).await.unwrap();
        save_index(&everything, &index_path(&ctx.indexes_dir(), Some(0))).unwrap();

        let err = build_prompts_cv(&ctx, &dataset, &provider).await.unwrap_err();
        assert!(matches!(err, ScoringError::InputValidation(_)));
    }

    #[tokio::test]
    async fn test_prompts_require_prepared_index() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let provider = HashingEmbedder::new(16);
        let err = build_prompts_production(&ctx, &labeled(3), &provider)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn test_production_prompts_use_model_of_index() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let reference = labeled(6);
        prepare_production(&ctx, &reference, &HashingEmbedder::new(16))
            .await
            .unwrap();

        let other = HashingEmbedder::with_model_id(16, "another-model");
        let err = build_prompts_production(&ctx, &reference, &other)
            .await
            .unwrap_err();
        assert!(matches!(err, ScoringError::ModelMismatch { .. }));
    }

    #[tokio::test]
    async fn test_production_scoring_end_to_end() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let provider = HashingEmbedder::new(32);
        let reference = labeled(9);
        let targets = Dataset::from_reader(
            "targets",
            "Policy_ID,Policy_Name,Type,Description\n\
             t/1,First,Statute,operators shall comply\n\
             t/2,Second,Plan,plan should target\n\
             t/3,Third,Guidance,may encourage\n"
                .as_bytes(),
            false,
        )
        .unwrap();

        prepare_production(&ctx, &reference, &provider).await.unwrap();
        let report = build_prompts_production(&ctx, &targets, &provider)
            .await
            .unwrap();
        assert_eq!(report.written, 3);

        // An artifact whose id matches no target row.
        let prompts = ctx.prompts_dir();
        fs::write(
            prompts.join("prompt_ghost.txt"),
            "### Current Policy for Evaluation:\n\nPolicy ID: ghost  \n",
        )
        .unwrap();
        let manifest_path = prompts.join(MANIFEST_FILENAME);
        let mut manifest: PromptManifest =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest.entries.push(ManifestEntry {
            file: "prompt_ghost.txt".to_string(),
            policy_id: "ghost".to_string(),
            fold: None,
        });
        fs::write(&manifest_path, serde_json::to_string(&manifest).unwrap()).unwrap();

        let judge = ScriptedJudge::new()
            .reply("t/1", judge_response(3, 9.0, &[("policy/2", 3)]))
            .reply("t/2", "I cannot answer that.")
            .fail("t/3", "timeout")
            .reply("ghost", judge_response(1, 5.0, &[]));
        let judge = JudgeClient::new(Arc::new(judge));

        let summary = score_prompts(&ctx, &targets, &ctx.prompts_dir(), "targets", &judge)
            .await
            .unwrap();
        assert_eq!(summary.attempted, 4);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.unmatched, 1);

        let path = latest_final_results(&ctx.results_dir()).unwrap();
        assert_eq!(Some(&path), summary.results_path.as_ref());
        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        let col = headers.iter().position(|h| h == COL_PREDICTED_SCORE).unwrap();
        let predicted: Vec<String> = rdr
            .records()
            .map(|r| r.unwrap().get(col).unwrap().to_string())
            .collect();
        assert_eq!(predicted, vec!["3", "", ""]);
    }

    #[tokio::test]
    async fn test_cv_run_then_metrics() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let provider = HashingEmbedder::new(32);
        let dataset = labeled(9);

        prepare_cross_validation(&ctx, &dataset, &provider).await.unwrap();
        build_prompts_cv(&ctx, &dataset, &provider).await.unwrap();

        // Every policy is judged as score 2.
        let judge = JudgeClient::new(Arc::new(
            ScriptedJudge::new().otherwise(judge_response(2, 7.0, &[])),
        ));
        let summary = score_prompts(&ctx, &dataset, &ctx.prompts_dir(), "labeled", &judge)
            .await
            .unwrap();
        assert_eq!(summary.succeeded, 9);

        let results = latest_final_results(&ctx.results_dir()).unwrap();
        let (report, out) = evaluate_file(&ctx, &results).unwrap();
        assert_eq!(report.total, 9);
        assert!((report.accuracy - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.skipped, 0);
        assert!(out.starts_with(ctx.metrics_dir()));
        assert!(out.exists());
    }

    #[tokio::test]
    async fn test_reprepare_replaces_previous_prompt_set() {
        let dir = TempDir::new().unwrap();
        let provider = HashingEmbedder::new(32);
        let dataset = labeled(12);

        let three = context(dir.path(), 3);
        prepare_cross_validation(&three, &dataset, &provider).await.unwrap();
        build_prompts_cv(&three, &dataset, &provider).await.unwrap();

        let two = context(dir.path(), 2);
        prepare_cross_validation(&two, &dataset, &provider).await.unwrap();
        let report = build_prompts_cv(&two, &dataset, &provider).await.unwrap();
        assert_eq!(report.written, 12);

        let artifacts = load_artifacts(&two.prompts_dir()).unwrap();
        assert_eq!(artifacts.len(), 12);
        assert!(artifacts.iter().all(|a| matches!(a.fold, Some(0 | 1))));

        let judge = JudgeClient::new(Arc::new(
            ScriptedJudge::new().otherwise(judge_response(2, 7.0, &[])),
        ));
        let summary = score_prompts(&two, &dataset, &two.prompts_dir(), "labeled", &judge)
            .await
            .unwrap();
        assert_eq!(summary.attempted, 12);
        assert_eq!(summary.succeeded, 12);
    }

    #[tokio::test]
    async fn test_run_level_error_keeps_counts() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let provider = HashingEmbedder::new(32);
        let dataset = labeled(9);

        prepare_cross_validation(&ctx, &dataset, &provider).await.unwrap();
        build_prompts_cv(&ctx, &dataset, &provider).await.unwrap();

        let judge = JudgeClient::new(Arc::new(
            ScriptedJudge::new()
                .abort("policy/4", "invalid API key")
                .otherwise(judge_response(2, 7.0, &[])),
        ));
        let summary = score_prompts(&ctx, &dataset, &ctx.prompts_dir(), "labeled", &judge)
            .await
            .unwrap();
        assert_eq!(summary.attempted, 9);
        assert_eq!(summary.succeeded, 8);
        assert_eq!(summary.failed, 1);
        assert!(summary.run_error.as_deref().is_some_and(|e| e.contains("invalid API key")));
        assert!(summary.results_path.as_ref().is_some_and(|p| p.exists()));
    }

    #[test]
    fn test_latest_final_results_picks_newest() {
        let dir = TempDir::new().unwrap();
        for name in [
            "a_with_predictions_final_20250101_000000_000.csv",
            "a_with_predictions_final_20250301_000000_000.csv",
            "a_with_predictions_20250401_000000_000.csv",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }
        let latest = latest_final_results(dir.path()).unwrap();
        assert!(latest.ends_with("a_with_predictions_final_20250301_000000_000.csv"));

        let empty = TempDir::new().unwrap();
        assert!(latest_final_results(empty.path()).is_err());
    }

    #[test]
    fn test_fold_distributions() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path(), 3);
        let dists = fold_distributions(&ctx, &labeled(9)).unwrap();
        assert_eq!(dists.len(), 3);
        for (train, test) in dists {
            assert_eq!(test, BTreeMap::from([(1, 1), (2, 1), (3, 1)]));
            assert_eq!(train.values().sum::<usize>(), 6);
        }
    }
}
