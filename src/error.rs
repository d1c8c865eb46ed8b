//! Error types for the bindingness scorer.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, ScoringError>;

/// Errors that can occur while preparing, scoring or evaluating policies.
#[derive(Error, Debug)]
pub enum ScoringError {
    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization of artifacts.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Embedding or judge service failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// The judge response failed structural validation.
    #[error("Judge output rejected ({violation})")]
    SchemaViolation {
        violation: SchemaViolation,
        /// The raw response text, kept for manual inspection.
        raw: String,
    },

    /// A judged policy could not be matched back to a dataset row.
    #[error("No dataset row matches policy id '{policy_id}'")]
    JoinMismatch { policy_id: String },

    /// A dataset file is missing required columns or holds malformed values.
    #[error("Invalid input: {0}")]
    InputValidation(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The index file does not exist.
    #[error("Index file not found at '{0}'")]
    IndexNotFound(PathBuf),

    /// Vector dimension does not match the index.
    #[error("Embedding dimension mismatch: index has {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding model differs from the one the index was built with.
    #[error("Embedding model mismatch: index built with '{index}', provider is '{provider}'")]
    ModelMismatch { index: String, provider: String },
}

impl ScoringError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a schema violation carrying the raw response.
    pub fn schema(violation: SchemaViolation, raw: impl Into<String>) -> Self {
        Self::SchemaViolation {
            violation,
            raw: raw.into(),
        }
    }

    /// True for errors that only affect the current item.
    pub fn is_item_level(&self) -> bool {
        matches!(
            self,
            Self::Provider(_) | Self::SchemaViolation { .. } | Self::JoinMismatch { .. }
        )
    }
}

/// The step of the judge output contract that a response failed.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaViolation {
    /// No `{ ... }` span in the response.
    NoJsonFound,
    /// The extracted span is not valid JSON.
    MalformedJson(String),
    /// Required top-level keys are absent.
    MissingField(Vec<&'static str>),
    /// `Score` is not coercible to 1, 2 or 3.
    InvalidScore(String),
    /// `Confidence` is not a number in [0, 10].
    InvalidConfidence(String),
    /// `Explanation` is neither an object nor a string holding one.
    InvalidExplanation(String),
    /// `Inference_Chain` is neither an array nor a string holding one.
    InvalidInferenceChain(String),
    /// `Comparable_Cases` could not be recovered as an array.
    InvalidComparableCases(String),
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoJsonFound => write!(f, "no JSON object found"),
            Self::MalformedJson(e) => write!(f, "malformed JSON: {}", e),
            Self::MissingField(fields) => write!(f, "missing fields: {}", fields.join(", ")),
            Self::InvalidScore(v) => write!(f, "invalid Score: {}", v),
            Self::InvalidConfidence(v) => write!(f, "invalid Confidence: {}", v),
            Self::InvalidExplanation(v) => write!(f, "invalid Explanation: {}", v),
            Self::InvalidInferenceChain(v) => write!(f, "invalid Inference_Chain: {}", v),
            Self::InvalidComparableCases(v) => write!(f, "invalid Comparable_Cases: {}", v),
        }
    }
}

impl From<reqwest::Error> for ScoringError {
    fn from(err: reqwest::Error) -> Self {
        ScoringError::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for ScoringError {
    fn from(err: serde_json::Error) -> Self {
        ScoringError::Serialization(err.to_string())
    }
}

impl From<csv::Error> for ScoringError {
    fn from(err: csv::Error) -> Self {
        ScoringError::InputValidation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_level_classification() {
        assert!(ScoringError::Provider("timeout".into()).is_item_level());
        assert!(ScoringError::schema(SchemaViolation::NoJsonFound, "text").is_item_level());
        assert!(!ScoringError::InputValidation("missing Score".into()).is_item_level());
    }

    #[test]
    fn test_violation_display() {
        let v = SchemaViolation::MissingField(vec!["Score", "Confidence"]);
        assert_eq!(v.to_string(), "missing fields: Score, Confidence");
    }
}
