//! Classification metrics for predicted vs. ground-truth scores.
//!
//! ROC-AUC here is one-vs-rest over one-hot encodings of the hard
//! predictions, so each per-class value reduces to `(1 + TPR - FPR) / 2`.
//! It measures agreement of labels, not a ranking over probabilities.

use crate::aggregator::COL_PREDICTED_SCORE;
use crate::error::{Result, ScoringError};
use crate::policy::{COL_SCORE, SCORE_CLASSES};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

const N: usize = SCORE_CLASSES.len();

/// Precision, recall and F1 for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: u8,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Ground-truth count.
    pub support: usize,
    /// One-vs-rest AUC; `None` when the class has no positive or no
    /// negative ground-truth rows.
    pub roc_auc: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub total: usize,
    pub accuracy: f64,
    pub per_class: Vec<ClassMetrics>,
    pub macro_avg: Averages,
    pub weighted_avg: Averages,
    /// Rows are true labels, columns predicted labels, both ordered 1, 2, 3.
    pub confusion_matrix: [[usize; N]; N],
    /// Mean of the defined per-class AUC values.
    pub roc_auc_macro: Option<f64>,
    /// Rows without a prediction that were left out.
    #[serde(default)]
    pub skipped: usize,
}

fn ratio(num: usize, den: usize) -> f64 {
    // zero_division = 0
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

fn averages<'a>(
    classes: impl IntoIterator<Item = &'a ClassMetrics>,
    weight: impl Fn(&ClassMetrics) -> f64,
) -> Averages {
    let (mut precision, mut recall, mut f1, mut total) = (0.0, 0.0, 0.0, 0.0);
    for c in classes {
        let w = weight(c);
        precision += c.precision * w;
        recall += c.recall * w;
        f1 += c.f1 * w;
        total += w;
    }
    if total == 0.0 {
        return Averages {
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
        };
    }
    Averages {
        precision: precision / total,
        recall: recall / total,
        f1: f1 / total,
    }
}

fn class_index(label: u8) -> Result<usize> {
    SCORE_CLASSES
        .iter()
        .position(|&c| c == label)
        .ok_or_else(|| ScoringError::InputValidation(format!("Label {} is not a score class", label)))
}

/// Stateless metrics computation.
pub struct MetricsEngine;

impl MetricsEngine {
    pub fn evaluate(y_true: &[u8], y_pred: &[u8]) -> Result<MetricsReport> {
        if y_true.len() != y_pred.len() {
            return Err(ScoringError::InputValidation(format!(
                "Label count mismatch: {} true vs {} predicted",
                y_true.len(),
                y_pred.len()
            )));
        }
        if y_true.is_empty() {
            return Err(ScoringError::InputValidation(
                "No labeled predictions to evaluate".to_string(),
            ));
        }

        let total = y_true.len();
        let mut cm = [[0usize; N]; N];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            cm[class_index(t)?][class_index(p)?] += 1;
        }

        let correct: usize = (0..N).map(|i| cm[i][i]).sum();
        let accuracy = ratio(correct, total);

        let per_class: Vec<ClassMetrics> = (0..N)
            .map(|i| {
                let tp = cm[i][i];
                let support: usize = cm[i].iter().sum();
                let predicted: usize = (0..N).map(|r| cm[r][i]).sum();
                let fp = predicted - tp;
                let negatives = total - support;

                let precision = ratio(tp, predicted);
                let recall = ratio(tp, support);
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                let roc_auc = (support > 0 && negatives > 0).then(|| {
                    let tpr = ratio(tp, support);
                    let fpr = ratio(fp, negatives);
                    (1.0 + tpr - fpr) / 2.0
                });

                ClassMetrics {
                    label: SCORE_CLASSES[i],
                    precision,
                    recall,
                    f1,
                    support,
                    roc_auc,
                }
            })
            .collect();

        // Averages cover only labels seen in truth or prediction.
        let observed: Vec<&ClassMetrics> = per_class
            .iter()
            .enumerate()
            .filter(|&(i, c)| c.support > 0 || (0..N).any(|r| cm[r][i] > 0))
            .map(|(_, c)| c)
            .collect();
        let macro_avg = averages(observed.iter().copied(), |_| 1.0);
        let weighted_avg = averages(observed.iter().copied(), |c| c.support as f64);

        let defined: Vec<f64> = per_class.iter().filter_map(|c| c.roc_auc).collect();
        let roc_auc_macro =
            (!defined.is_empty()).then(|| defined.iter().sum::<f64>() / defined.len() as f64);

        Ok(MetricsReport {
            total,
            accuracy,
            per_class,
            macro_avg,
            weighted_avg,
            confusion_matrix: cm,
            roc_auc_macro,
            skipped: 0,
        })
    }
}

/// Read `(Score, Predicted_Score)` pairs from an augmented CSV.
///
/// Rows with an empty prediction are skipped and counted.
pub fn load_label_pairs(path: &Path) -> Result<(Vec<u8>, Vec<u8>, usize)> {
    let mut rdr = csv::Reader::from_path(path).map_err(|e| ScoringError::io(path, e.into()))?;
    let headers = rdr.headers()?.clone();
    let position = |col: &str| headers.iter().position(|h| h.trim() == col);

    let missing: Vec<&str> = [COL_SCORE, COL_PREDICTED_SCORE]
        .into_iter()
        .filter(|&c| position(c).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(ScoringError::InputValidation(format!(
            "Missing required columns: {}",
            missing.join(", ")
        )));
    }
    let (idx_true, idx_pred) = (
        position(COL_SCORE).unwrap_or_default(),
        position(COL_PREDICTED_SCORE).unwrap_or_default(),
    );

    let parse = |raw: &str, row: usize, col: &str| -> Result<u8> {
        let trimmed = raw.trim();
        trimmed
            .parse::<u8>()
            .ok()
            .filter(|v| SCORE_CLASSES.contains(v))
            .or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.fract() == 0.0 && (1.0..=3.0).contains(f))
                    .map(|f| f as u8)
            })
            .ok_or_else(|| {
                ScoringError::InputValidation(format!("Row {}: invalid {} '{}'", row, col, raw))
            })
    };

    let (mut y_true, mut y_pred, mut skipped) = (Vec::new(), Vec::new(), 0);
    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = i + 2;
        let pred = record.get(idx_pred).unwrap_or("");
        if pred.trim().is_empty() {
            skipped += 1;
            continue;
        }
        y_true.push(parse(record.get(idx_true).unwrap_or(""), row, COL_SCORE)?);
        y_pred.push(parse(pred, row, COL_PREDICTED_SCORE)?);
    }

    if skipped > 0 {
        warn!(skipped, path = %path.display(), "Rows without a prediction left out of metrics");
    }
    info!(evaluated = y_true.len(), "Loaded label pairs");
    Ok((y_true, y_pred, skipped))
}

impl MetricsReport {
    pub fn print_summary(&self) {
        println!("\n========== Classification Report ==========");
        println!("Evaluated: {} (skipped {} without prediction)", self.total, self.skipped);
        println!("-------------------------------------------");
        println!("{:>8} {:>10} {:>10} {:>10} {:>8}", "", "precision", "recall", "f1-score", "support");
        for c in &self.per_class {
            println!(
                "{:>8} {:>10.4} {:>10.4} {:>10.4} {:>8}",
                format!("Score {}", c.label),
                c.precision,
                c.recall,
                c.f1,
                c.support
            );
        }
        println!(
            "{:>8} {:>10.4} {:>10.4} {:>10.4} {:>8}",
            "macro", self.macro_avg.precision, self.macro_avg.recall, self.macro_avg.f1, self.total
        );
        println!(
            "{:>8} {:>10.4} {:>10.4} {:>10.4} {:>8}",
            "weighted",
            self.weighted_avg.precision,
            self.weighted_avg.recall,
            self.weighted_avg.f1,
            self.total
        );
        println!("-------------------------------------------");
        println!("Accuracy: {:.4}", self.accuracy);
        match self.roc_auc_macro {
            Some(auc) => println!("ROC AUC (one-vs-rest, macro): {:.4}", auc),
            None => println!("ROC AUC: undefined"),
        }
        for c in &self.per_class {
            if let Some(auc) = c.roc_auc {
                println!("  Score {} AUC: {:.4}", c.label, auc);
            }
        }
        println!("-------------------------------------------");
        println!("Confusion matrix (rows = true, cols = predicted):");
        println!("{:>10} {:>6} {:>6} {:>6}", "", "1", "2", "3");
        for (i, row) in self.confusion_matrix.iter().enumerate() {
            println!(
                "{:>10} {:>6} {:>6} {:>6}",
                format!("Score {}", SCORE_CLASSES[i]),
                row[0],
                row[1],
                row[2]
            );
        }
        println!("===========================================\n");
    }
}
