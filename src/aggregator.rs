//! Merges judgments back into the dataset and writes snapshots.

use crate::error::{Result, ScoringError};
use crate::judge::{Dimension, JudgmentResult};
use crate::policy::{COL_EXPLANATION, Dataset, sanitize_id};
use chrono::Local;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const COL_PREDICTED_SCORE: &str = "Predicted_Score";
pub const COL_CONFIDENCE: &str = "Confidence";
pub const COL_INFERENCE_STEPS: &str = "Inference_Steps";

/// Columns appended to the input columns, in output order.
pub const PREDICTION_COLUMNS: [&str; 18] = [
    COL_PREDICTED_SCORE,
    COL_CONFIDENCE,
    COL_EXPLANATION,
    "Inference_Chain",
    "Comparable_Cases",
    "Comparable_Cases_Grouped",
    "Legal_Language",
    "Source_of_Authority",
    "Enforcement_Mechanism",
    "Obligations",
    "Optionality_or_Incentives",
    COL_INFERENCE_STEPS,
    "Similar_Case_1",
    "Similar_Case_1_Score",
    "Similar_Case_1_Similarity",
    "Similar_Case_2",
    "Similar_Case_2_Score",
    "Similar_Case_2_Similarity",
];

/// Timestamp used in artifact names; millisecond precision keeps
/// snapshots written within one second apart.
pub fn timestamp() -> String {
    Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// The augmented dataset under construction.
///
/// Input columns whose names collide with prediction columns are moved into
/// the prediction block, so values from an earlier run are kept until this
/// run overwrites them. `Explanation` is the exception: in a labeled set it
/// holds the reference rationale, so it is dropped and the prediction starts
/// empty.
pub struct ResultAggregator {
    input_headers: Vec<String>,
    input_rows: Vec<Vec<String>>,
    predictions: Vec<Vec<String>>,
    by_id: HashMap<String, usize>,
    by_sanitized_id: HashMap<String, usize>,
    results_dir: PathBuf,
    prefix: String,
    snapshot_every: usize,
    applied: usize,
}

impl ResultAggregator {
    pub fn new(dataset: &Dataset, results_dir: &Path, prefix: &str, snapshot_every: usize) -> Self {
        let prediction_pos: HashMap<&str, usize> = PREDICTION_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| (*c, i))
            .collect();

        let kept: Vec<usize> = (0..dataset.headers.len())
            .filter(|&i| !prediction_pos.contains_key(dataset.headers[i].as_str()))
            .collect();
        let carried: Vec<(usize, usize)> = dataset
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| h.as_str() != COL_EXPLANATION)
            .filter_map(|(i, h)| prediction_pos.get(h.as_str()).map(|&p| (i, p)))
            .collect();

        let input_headers = kept.iter().map(|&i| dataset.headers[i].clone()).collect();
        let mut input_rows = Vec::with_capacity(dataset.rows.len());
        let mut predictions = Vec::with_capacity(dataset.rows.len());
        for row in &dataset.rows {
            let cell = |i: usize| row.get(i).cloned().unwrap_or_default();
            input_rows.push(kept.iter().map(|&i| cell(i)).collect());
            let mut pred = vec![String::new(); PREDICTION_COLUMNS.len()];
            for &(i, p) in &carried {
                pred[p] = cell(i);
            }
            predictions.push(pred);
        }

        let mut by_id = HashMap::new();
        let mut by_sanitized_id = HashMap::new();
        for (row, policy) in dataset.policies.iter().enumerate() {
            by_id.insert(policy.policy_id.clone(), row);
            by_sanitized_id
                .entry(sanitize_id(&policy.policy_id))
                .or_insert(row);
        }

        Self {
            input_headers,
            input_rows,
            predictions,
            by_id,
            by_sanitized_id,
            results_dir: results_dir.to_path_buf(),
            prefix: prefix.to_string(),
            snapshot_every,
            applied: 0,
        }
    }

    /// Row for a policy id: exact match first, then by sanitized id.
    fn resolve(&self, policy_id: &str) -> Option<usize> {
        self.by_id
            .get(policy_id)
            .or_else(|| self.by_sanitized_id.get(&sanitize_id(policy_id)))
            .copied()
    }

    /// Write `result` into the row for `policy_id`.
    ///
    /// Every `snapshot_every` applied results a timestamped snapshot is
    /// written; its path is returned.
    pub fn apply(&mut self, policy_id: &str, result: &JudgmentResult) -> Result<Option<PathBuf>> {
        let row = self.resolve(policy_id).ok_or_else(|| ScoringError::JoinMismatch {
            policy_id: policy_id.to_string(),
        })?;
        self.predictions[row] = prediction_cells(result)?;
        self.applied += 1;

        if self.snapshot_every > 0 && self.applied % self.snapshot_every == 0 {
            let path = self.snapshot_path(false);
            self.write_csv(&path)?;
            info!(applied = self.applied, path = %path.display(), "Saved snapshot");
            return Ok(Some(path));
        }
        Ok(None)
    }

    /// Number of successfully applied results.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Write the final snapshot.
    pub fn finalize(&self) -> Result<PathBuf> {
        let path = self.snapshot_path(true);
        self.write_csv(&path)?;
        info!(applied = self.applied, path = %path.display(), "Saved final results");
        Ok(path)
    }

    fn snapshot_path(&self, is_final: bool) -> PathBuf {
        let name = if is_final {
            format!("{}_with_predictions_final_{}.csv", self.prefix, timestamp())
        } else {
            format!("{}_with_predictions_{}.csv", self.prefix, timestamp())
        };
        self.results_dir.join(name)
    }

    /// Output header row.
    pub fn headers(&self) -> Vec<String> {
        self.input_headers
            .iter()
            .cloned()
            .chain(PREDICTION_COLUMNS.iter().map(|c| c.to_string()))
            .collect()
    }

    /// Value of a prediction column for a policy, if the row exists.
    pub fn prediction(&self, policy_id: &str, column: &str) -> Option<&str> {
        let row = self.resolve(policy_id)?;
        let col = PREDICTION_COLUMNS.iter().position(|c| *c == column)?;
        Some(self.predictions[row][col].as_str())
    }

    /// Write the augmented dataset as CSV.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ScoringError::io(parent, e))?;
        }
        let io_err = |e: csv::Error| ScoringError::io(path, e.into());
        let mut wtr = csv::Writer::from_path(path).map_err(io_err)?;
        wtr.write_record(self.headers()).map_err(io_err)?;
        for (input, pred) in self.input_rows.iter().zip(&self.predictions) {
            wtr.write_record(input.iter().chain(pred.iter()))
                .map_err(io_err)?;
        }
        wtr.flush().map_err(|e| ScoringError::io(path, e))?;
        Ok(())
    }
}

fn prediction_cells(result: &JudgmentResult) -> Result<Vec<String>> {
    let cases = &result.comparable_cases;
    let case_cells = |i: usize| -> [String; 3] {
        match cases.get(i) {
            Some(c) => [
                c.case_name.clone(),
                c.score.map(|s| s.to_string()).unwrap_or_default(),
                c.similarity.map(|s| s.to_string()).unwrap_or_default(),
            ],
            None => Default::default(),
        }
    };

    let mut cells = vec![
        result.score.to_string(),
        result.confidence.to_string(),
        serde_json::to_string(&result.explanation)?,
        serde_json::to_string(&result.inference_chain)?,
        serde_json::to_string(cases)?,
        serde_json::to_string(&result.group_cases())?,
    ];
    cells.extend(
        Dimension::ALL
            .iter()
            .map(|d| result.explanation_for(*d).to_string()),
    );
    cells.push(result.inference_chain.join("\n"));
    cells.extend(case_cells(0));
    cells.extend(case_cells(1));
    debug_assert_eq!(cells.len(), PREDICTION_COLUMNS.len());
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::parse_judgment;
    use crate::testing::judge_response;
    use tempfile::TempDir;

    fn dataset() -> Dataset {
        let csv = "Policy_ID,Policy_Name,Type,Description,Region\n\
                   policy/1,One,Statute,shall comply,EU\n\
                   policy/2,Two,Plan,may consider,US\n";
        Dataset::from_reader("targets", csv.as_bytes(), false).unwrap()
    }

    fn result(score: i64) -> JudgmentResult {
        parse_judgment(&judge_response(score, 8.0, &[("r1", 3), ("r2", 1)])).unwrap()
    }

    #[test]
    fn test_apply_fills_columns() {
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&dataset(), dir.path(), "targets", 100);
        agg.apply("policy/1", &result(3)).unwrap();

        assert_eq!(agg.prediction("policy/1", COL_PREDICTED_SCORE), Some("3"));
        assert_eq!(agg.prediction("policy/1", COL_CONFIDENCE), Some("8"));
        assert_eq!(agg.prediction("policy/1", "Legal_Language"), Some("Uses 'shall'."));
        assert_eq!(
            agg.prediction("policy/1", COL_INFERENCE_STEPS),
            Some("Step 1: binding terms.\nStep 2: final judgment.")
        );
        assert_eq!(agg.prediction("policy/1", "Similar_Case_2"), Some("Case r2"));
        assert_eq!(agg.prediction("policy/1", "Similar_Case_2_Score"), Some("1"));
        assert_eq!(agg.prediction("policy/1", "Similar_Case_1_Similarity"), Some("0.8"));
        let grouped = agg.prediction("policy/1", "Comparable_Cases_Grouped").unwrap();
        assert!(grouped.contains("\"similar_cases\""));
        assert_eq!(agg.prediction("policy/2", COL_PREDICTED_SCORE), Some(""));
        assert_eq!(agg.applied(), 1);
    }

    #[test]
    fn test_sanitized_id_join() {
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&dataset(), dir.path(), "targets", 100);
        agg.apply("policy_2", &result(1)).unwrap();
        assert_eq!(agg.prediction("policy/2", COL_PREDICTED_SCORE), Some("1"));
    }

    #[test]
    fn test_unmatched_is_join_mismatch() {
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&dataset(), dir.path(), "targets", 100);
        let err = agg.apply("policy/99", &result(2)).unwrap_err();
        assert!(matches!(err, ScoringError::JoinMismatch { .. }));
        assert!(err.is_item_level());
        assert_eq!(agg.applied(), 0);
    }

    #[test]
    fn test_periodic_and_final_snapshots() {
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&dataset(), dir.path(), "targets", 2);
        assert!(agg.apply("policy/1", &result(3)).unwrap().is_none());
        let snapshot = agg.apply("policy/2", &result(1)).unwrap().unwrap();
        assert!(snapshot.exists());

        let final_path = agg.finalize().unwrap();
        let name = final_path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("targets_with_predictions_final_"));

        let mut rdr = csv::Reader::from_path(&final_path).unwrap();
        let headers: Vec<String> = rdr.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(&headers[..5], &["Policy_ID", "Policy_Name", "Type", "Description", "Region"]);
        assert_eq!(headers.len(), 5 + PREDICTION_COLUMNS.len());
        let rows: Vec<csv::StringRecord> = rdr.records().map(|r| r.unwrap()).collect();
        assert_eq!(&rows[1][5], "1");
        assert_eq!(&rows[0][4], "EU");
    }

    #[test]
    fn test_existing_prediction_columns_are_carried() {
        let csv = "Policy_ID,Policy_Name,Type,Description,Predicted_Score\n\
                   a,A,t,d,2\n\
                   b,B,t,d,\n";
        let ds = Dataset::from_reader("rerun", csv.as_bytes(), false).unwrap();
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&ds, dir.path(), "rerun", 100);
        assert_eq!(agg.headers().iter().filter(|h| *h == COL_PREDICTED_SCORE).count(), 1);
        assert_eq!(agg.prediction("a", COL_PREDICTED_SCORE), Some("2"));

        agg.apply("b", &result(3)).unwrap();
        assert_eq!(agg.prediction("b", COL_PREDICTED_SCORE), Some("3"));
        assert_eq!(agg.prediction("a", COL_PREDICTED_SCORE), Some("2"));
    }

    #[test]
    fn test_reference_explanation_not_carried() {
        let csv = "Policy_ID,Policy_Name,Type,Description,Score,Explanation\n\
                   a,A,t,d,3,Reference rationale\n\
                   b,B,t,d,1,Another rationale\n";
        let ds = Dataset::from_reader("labeled", csv.as_bytes(), true).unwrap();
        let dir = TempDir::new().unwrap();
        let mut agg = ResultAggregator::new(&ds, dir.path(), "labeled", 100);
        assert_eq!(agg.headers().iter().filter(|h| *h == COL_EXPLANATION).count(), 1);
        assert_eq!(agg.prediction("b", COL_EXPLANATION), Some(""));

        agg.apply("a", &result(3)).unwrap();
        let explanation = agg.prediction("a", COL_EXPLANATION).unwrap();
        assert!(explanation.contains("Uses 'shall'."));
        assert!(!explanation.contains("Reference rationale"));
        assert_eq!(agg.prediction("b", COL_EXPLANATION), Some(""));
    }
}
