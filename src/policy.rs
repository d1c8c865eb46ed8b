//! Policy records and tabular dataset loading.
//!
//! Datasets are CSV files with the columns `Policy_ID, Policy_Name, Type,
//! Description` and, for labeled data, `Score`. Any other columns are kept
//! verbatim so they can be written back next to the predictions.

use crate::error::{Result, ScoringError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::path::Path;
use tracing::{info, warn};

pub const COL_POLICY_ID: &str = "Policy_ID";
pub const COL_POLICY_NAME: &str = "Policy_Name";
pub const COL_TYPE: &str = "Type";
pub const COL_DESCRIPTION: &str = "Description";
pub const COL_SCORE: &str = "Score";
pub const COL_EXPLANATION: &str = "Explanation";

/// Columns every dataset must have.
pub const REQUIRED_COLUMNS: [&str; 4] = [COL_POLICY_ID, COL_POLICY_NAME, COL_TYPE, COL_DESCRIPTION];

/// Valid bindingness labels.
pub const SCORE_CLASSES: [u8; 3] = [1, 2, 3];

/// A single climate-policy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(rename = "Policy_ID")]
    pub policy_id: String,
    #[serde(rename = "Policy_Name")]
    pub policy_name: String,
    #[serde(rename = "Type")]
    pub policy_type: String,
    #[serde(rename = "Description")]
    pub description: String,
    /// Ground-truth bindingness (1-3); absent for production items.
    #[serde(rename = "Score", default)]
    pub score: Option<u8>,
    /// Rationale shown when this policy is retrieved as a reference case.
    #[serde(rename = "Explanation", default)]
    pub explanation: Option<String>,
}

impl Policy {
    pub fn new(
        policy_id: impl Into<String>,
        policy_name: impl Into<String>,
        policy_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            policy_id: policy_id.into(),
            policy_name: policy_name.into(),
            policy_type: policy_type.into(),
            description: description.into(),
            score: None,
            explanation: None,
        }
    }

    pub fn with_score(mut self, score: u8) -> Self {
        self.score = Some(score);
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.explanation = Some(explanation.into());
        self
    }

    /// Text that is embedded for both indexing and querying.
    ///
    /// The name is left out so retrieval keys on substance, not identity.
    pub fn embedding_text(&self) -> String {
        format!("{} {}", self.policy_type, self.description)
    }
}

/// Replace path separators so a policy id can be used in a file name.
pub fn sanitize_id(policy_id: &str) -> String {
    policy_id.replace(['/', '\\'], "_")
}

/// A loaded dataset: typed policies plus the raw rows they came from.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Dataset name (file stem).
    pub name: String,
    /// Header row of the source file.
    pub headers: Vec<String>,
    /// Raw cell values, aligned with `headers` and `policies`.
    pub rows: Vec<Vec<String>>,
    /// Typed records in file order.
    pub policies: Vec<Policy>,
}

impl Dataset {
    /// Build a dataset directly from policies (headers are the standard columns).
    pub fn from_policies(name: &str, policies: Vec<Policy>) -> Self {
        let headers: Vec<String> = [
            COL_POLICY_ID,
            COL_POLICY_NAME,
            COL_TYPE,
            COL_DESCRIPTION,
            COL_SCORE,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let rows = policies
            .iter()
            .map(|p| {
                vec![
                    p.policy_id.clone(),
                    p.policy_name.clone(),
                    p.policy_type.clone(),
                    p.description.clone(),
                    p.score.map(|s| s.to_string()).unwrap_or_default(),
                ]
            })
            .collect();

        Self {
            name: name.to_string(),
            headers,
            rows,
            policies,
        }
    }

    /// Number of policies in the dataset.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Check if dataset is empty.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// True when every policy carries a ground-truth score.
    pub fn is_labeled(&self) -> bool {
        !self.policies.is_empty() && self.policies.iter().all(|p| p.score.is_some())
    }

    /// Ground-truth labels; fails if any policy is unlabeled.
    pub fn labels(&self) -> Result<Vec<u8>> {
        self.policies
            .iter()
            .map(|p| {
                p.score.ok_or_else(|| {
                    ScoringError::InputValidation(format!(
                        "Policy '{}' has no Score",
                        p.policy_id
                    ))
                })
            })
            .collect()
    }

    /// Look up a policy by id.
    pub fn get(&self, policy_id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.policy_id == policy_id)
    }

    /// Load a labeled dataset (`Score` required on every row).
    pub fn load_labeled(path: &Path) -> Result<Self> {
        Self::load_csv(path, true)
    }

    /// Load an unlabeled (production) dataset. A `Score` column is optional.
    pub fn load_unlabeled(path: &Path) -> Result<Self> {
        Self::load_csv(path, false)
    }

    /// Load and validate a CSV dataset.
    pub fn load_csv(path: &Path, require_score: bool) -> Result<Self> {
        let file = File::open(path).map_err(|e| ScoringError::io(path, e))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("dataset")
            .to_string();

        info!(path = %path.display(), "Loading dataset");
        let dataset = Self::from_reader(&name, file, require_score)?;
        info!(
            name = %dataset.name,
            count = dataset.len(),
            "Dataset loaded"
        );
        Ok(dataset)
    }

    /// Parse a dataset from any CSV reader.
    pub fn from_reader<R: std::io::Read>(name: &str, reader: R, require_score: bool) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new().has_headers(true).from_reader(reader);

        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| ScoringError::InputValidation(format!("Cannot read header row: {}", e)))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let position = |col: &str| headers.iter().position(|h| h == col);

        let mut missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|&c| position(c).is_none())
            .collect();
        if require_score && position(COL_SCORE).is_none() {
            missing.push(COL_SCORE);
        }
        if !missing.is_empty() {
            return Err(ScoringError::InputValidation(format!(
                "Missing required columns: {}",
                missing.join(", ")
            )));
        }

        // Checked above.
        let idx_id = position(COL_POLICY_ID).unwrap_or_default();
        let idx_name = position(COL_POLICY_NAME).unwrap_or_default();
        let idx_type = position(COL_TYPE).unwrap_or_default();
        let idx_desc = position(COL_DESCRIPTION).unwrap_or_default();
        let idx_score = position(COL_SCORE);
        let idx_expl = position(COL_EXPLANATION);

        let mut rows = Vec::new();
        let mut policies = Vec::new();
        let mut seen = HashSet::new();

        for (line, record) in rdr.records().enumerate() {
            let record = record.map_err(|e| {
                ScoringError::InputValidation(format!("Malformed row {}: {}", line + 2, e))
            })?;
            let cells: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            let cell = |i: usize| cells.get(i).cloned().unwrap_or_default();

            let policy_id = cell(idx_id).trim().to_string();
            if policy_id.is_empty() {
                return Err(ScoringError::InputValidation(format!(
                    "Row {} has an empty Policy_ID",
                    line + 2
                )));
            }
            if !seen.insert(policy_id.clone()) {
                return Err(ScoringError::InputValidation(format!(
                    "Duplicate Policy_ID '{}'",
                    policy_id
                )));
            }

            let score = match idx_score {
                Some(i) => parse_score(&cell(i)).map_err(|raw| {
                    ScoringError::InputValidation(format!(
                        "Policy '{}' has invalid Score '{}'",
                        policy_id, raw
                    ))
                })?,
                None => None,
            };
            if require_score && score.is_none() {
                return Err(ScoringError::InputValidation(format!(
                    "Policy '{}' has no Score",
                    policy_id
                )));
            }

            let explanation = idx_expl
                .map(cell)
                .filter(|e| !e.trim().is_empty());

            policies.push(Policy {
                policy_id,
                policy_name: cell(idx_name),
                policy_type: cell(idx_type),
                description: cell(idx_desc),
                score,
                explanation,
            });
            rows.push(cells);
        }

        let dataset = Self {
            name: name.to_string(),
            headers,
            rows,
            policies,
        };
        dataset.warn_on_empty_text();
        Ok(dataset)
    }

    fn warn_on_empty_text(&self) {
        let empty_type: Vec<&str> = self
            .policies
            .iter()
            .filter(|p| p.policy_type.trim().is_empty())
            .map(|p| p.policy_id.as_str())
            .collect();
        let empty_description: Vec<&str> = self
            .policies
            .iter()
            .filter(|p| p.description.trim().is_empty())
            .map(|p| p.policy_id.as_str())
            .collect();

        for (column, ids) in [(COL_TYPE, empty_type), (COL_DESCRIPTION, empty_description)] {
            if !ids.is_empty() {
                warn!(
                    dataset = %self.name,
                    column,
                    count = ids.len(),
                    ids = ?ids,
                    "Empty values"
                );
            }
        }
    }
}

/// Parse a score cell. Empty cells are `None`; spreadsheet exports like "2.0" are accepted.
fn parse_score(raw: &str) -> std::result::Result<Option<u8>, String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let value = trimmed
        .parse::<u8>()
        .ok()
        .or_else(|| {
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|f| f.fract() == 0.0 && (0.0..=255.0).contains(f))
                .map(|f| f as u8)
        })
        .ok_or_else(|| trimmed.to_string())?;

    if SCORE_CLASSES.contains(&value) {
        Ok(Some(value))
    } else {
        Err(trimmed.to_string())
    }
}

/// Character-length statistics of the embedding text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LengthStats {
    pub mean: f64,
    pub std: f64,
    pub min: usize,
    pub max: usize,
}

/// Summary statistics of a dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub total: usize,
    pub score_distribution: BTreeMap<u8, usize>,
    /// Type counts, most frequent first.
    pub type_distribution: Vec<(String, usize)>,
    pub text_length: Option<LengthStats>,
}

impl DatasetStats {
    pub fn compute(dataset: &Dataset) -> Self {
        let score_distribution = score_distribution(dataset.policies.iter());

        let mut types: HashMap<&str, usize> = HashMap::new();
        for p in &dataset.policies {
            *types.entry(p.policy_type.as_str()).or_default() += 1;
        }
        let mut type_distribution: Vec<(String, usize)> = types
            .into_iter()
            .map(|(t, c)| (t.to_string(), c))
            .collect();
        type_distribution.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let lengths: Vec<usize> = dataset
            .policies
            .iter()
            .map(|p| p.embedding_text().chars().count())
            .collect();

        Self {
            total: dataset.len(),
            score_distribution,
            type_distribution,
            text_length: length_stats(&lengths),
        }
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Dataset Statistics ==========");
        println!("Total policies: {}", self.total);
        if !self.score_distribution.is_empty() {
            println!("----------------------------------------");
            println!("Score distribution:");
            for (score, count) in &self.score_distribution {
                println!(
                    "  Score {}: {} ({:.1}%)",
                    score,
                    count,
                    percent(*count, self.total)
                );
            }
        }
        println!("----------------------------------------");
        println!("Type distribution:");
        for (ty, count) in &self.type_distribution {
            println!("  {}: {}", ty, count);
        }
        if let Some(len) = &self.text_length {
            println!("----------------------------------------");
            println!(
                "Text length: mean {:.1}, std {:.1}, min {}, max {}",
                len.mean, len.std, len.min, len.max
            );
        }
        println!("========================================\n");
    }
}

/// Count labeled policies per score class.
pub fn score_distribution<'a>(policies: impl Iterator<Item = &'a Policy>) -> BTreeMap<u8, usize> {
    let mut dist = BTreeMap::new();
    for score in policies.filter_map(|p| p.score) {
        *dist.entry(score).or_default() += 1;
    }
    dist
}

pub(crate) fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

fn length_stats(lengths: &[usize]) -> Option<LengthStats> {
    let min = *lengths.iter().min()?;
    let max = *lengths.iter().max()?;
    let n = lengths.len() as f64;
    let mean = lengths.iter().sum::<usize>() as f64 / n;
    // Sample standard deviation.
    let std = if lengths.len() > 1 {
        let var = lengths
            .iter()
            .map(|&l| (l as f64 - mean).powi(2))
            .sum::<f64>()
            / (n - 1.0);
        var.sqrt()
    } else {
        0.0
    };
    Some(LengthStats {
        mean,
        std,
        min,
        max,
    })
}
