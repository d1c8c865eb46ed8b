//! Bindingness judgments from an external language model.

pub mod parse;

pub use parse::parse_judgment;

use crate::error::{Result, ScoringError};
use crate::llm::{JudgeProvider, Prompts};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error};

/// The five evaluation dimensions the explanation is organised by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    LegalLanguage,
    SourceOfAuthority,
    EnforcementMechanism,
    Obligations,
    OptionalityOrIncentives,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::LegalLanguage,
        Dimension::SourceOfAuthority,
        Dimension::EnforcementMechanism,
        Dimension::Obligations,
        Dimension::OptionalityOrIncentives,
    ];

    /// Key used in the judge output and as the output column name.
    pub fn key(self) -> &'static str {
        match self {
            Dimension::LegalLanguage => "Legal_Language",
            Dimension::SourceOfAuthority => "Source_of_Authority",
            Dimension::EnforcementMechanism => "Enforcement_Mechanism",
            Dimension::Obligations => "Obligations",
            Dimension::OptionalityOrIncentives => "Optionality_or_Incentives",
        }
    }
}

/// A reference case as cited by the judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparableCase {
    #[serde(rename = "Policy_ID")]
    pub policy_id: String,
    #[serde(rename = "Case_Name")]
    pub case_name: String,
    #[serde(rename = "Score")]
    pub score: Option<i64>,
    #[serde(rename = "Reason")]
    pub reason: String,
    #[serde(rename = "Similarity", default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
}

impl ComparableCase {
    pub(crate) fn from_object(map: &Map<String, Value>) -> Self {
        let text = |key: &str| match map.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        Self {
            policy_id: text("Policy_ID"),
            case_name: text("Case_Name"),
            score: map.get("Score").and_then(parse::loose_int),
            reason: text("Reason"),
            similarity: map.get("Similarity").and_then(parse::loose_float),
        }
    }
}

/// Comparable cases split by how their score relates to the judgment's.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseGroups {
    pub similar_cases: Vec<ComparableCase>,
    pub contrasting_cases: Vec<ComparableCase>,
}

/// A validated judge output for one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgmentResult {
    pub score: u8,
    pub confidence: f64,
    /// Dimension key to free-text explanation.
    pub explanation: BTreeMap<String, String>,
    pub inference_chain: Vec<String>,
    pub comparable_cases: Vec<ComparableCase>,
}

impl JudgmentResult {
    /// Explanation text for one dimension, empty when the judge omitted it.
    pub fn explanation_for(&self, dimension: Dimension) -> &str {
        self.explanation
            .get(dimension.key())
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Partition cases: a case scored at or above this judgment is "similar",
    /// below it "contrasting". A case without a score counts as 0.
    pub fn group_cases(&self) -> CaseGroups {
        let (similar_cases, contrasting_cases) = self
            .comparable_cases
            .iter()
            .cloned()
            .partition(|c| c.score.unwrap_or(0) >= i64::from(self.score));
        CaseGroups {
            similar_cases,
            contrasting_cases,
        }
    }
}

/// Sends prompts to the judge and validates what comes back.
#[derive(Clone)]
pub struct JudgeClient {
    provider: Arc<dyn JudgeProvider>,
}

impl JudgeClient {
    pub fn new(provider: Arc<dyn JudgeProvider>) -> Self {
        Self { provider }
    }

    /// Judge one prompt. A response that breaks the output contract is
    /// logged with its raw text and returned as a schema violation.
    pub async fn judge(&self, prompt: &str) -> Result<JudgmentResult> {
        let raw = self
            .provider
            .generate(Prompts::system_instruction(), prompt)
            .await?;
        debug!(chars = raw.len(), "Received judge response");

        parse_judgment(&raw).map_err(|violation| {
            error!(%violation, raw = %raw, "Judge response rejected");
            ScoringError::schema(violation, raw)
        })
    }
}

/// Drive `task` over `items` with at most `max_workers` in flight.
///
/// Outputs arrive in completion order.
pub async fn run_bounded<I, F, Fut, T>(items: I, max_workers: usize, task: F) -> Vec<T>
where
    I: IntoIterator,
    F: FnMut(I::Item) -> Fut,
    Fut: Future<Output = T>,
{
    stream::iter(items)
        .map(task)
        .buffer_unordered(max_workers.max(1))
        .collect()
        .await
}
