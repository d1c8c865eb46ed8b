//! Exact inner-product vector index over policy embeddings.
//!
//! Every stored vector and every query vector is L2-normalized, so the inner
//! product computed here is the cosine similarity. The index owns the
//! policies it was built from; it can only ever return members of that pool.

use crate::embedding::{EmbeddingProvider, dot, l2_normalize};
use crate::error::{Result, ScoringError};
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A vector index entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub policy: Policy,
    /// Unit-norm embedding of `policy.embedding_text()`.
    pub embedding: Vec<f32>,
}

/// A single search hit: position in the index and its similarity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub position: usize,
    pub similarity: f32,
}

/// Exact nearest-neighbor index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    model_id: String,
    dimension: usize,
    entries: Vec<IndexEntry>,
}

impl EmbeddingIndex {
    /// Create an empty index for the given model.
    pub fn empty(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            dimension: 0,
            entries: Vec::new(),
        }
    }

    /// Embed `policies` in batches and index them.
    ///
    /// Any provider failure aborts the build; no partial index is returned.
    pub async fn build(
        policies: &[Policy],
        provider: &dyn EmbeddingProvider,
        batch_size: usize,
    ) -> Result<Self> {
        let mut index = Self::empty(provider.model_id());
        if policies.is_empty() {
            return Ok(index);
        }

        let batch_size = batch_size.max(1);
        let total_batches = policies.len().div_ceil(batch_size);
        let mut entries = Vec::with_capacity(policies.len());

        for (batch_no, batch) in policies.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(Policy::embedding_text).collect();
            let embeddings = provider.embed_batch(&texts).await?;
            if embeddings.len() != batch.len() {
                return Err(ScoringError::Provider(format!(
                    "Expected {} embeddings, got {}",
                    batch.len(),
                    embeddings.len()
                )));
            }

            for (policy, mut embedding) in batch.iter().zip(embeddings) {
                index.check_dimension(embedding.len())?;
                l2_normalize(&mut embedding);
                entries.push(IndexEntry {
                    policy: policy.clone(),
                    embedding,
                });
            }
            debug!(batch = batch_no + 1, total_batches, "Embedded batch");
        }

        index.entries = entries;
        info!(
            size = index.len(),
            dimension = index.dimension,
            model = %index.model_id,
            "Built embedding index"
        );
        Ok(index)
    }

    /// Fix the dimension on the first vector and reject any that differ.
    fn check_dimension(&mut self, actual: usize) -> Result<()> {
        if actual == 0 {
            return Err(ScoringError::Provider(
                "Embedding provider returned an empty vector".to_string(),
            ));
        }
        if self.dimension == 0 {
            self.dimension = actual;
        } else if self.dimension != actual {
            return Err(ScoringError::DimensionMismatch {
                expected: self.dimension,
                actual,
            });
        }
        Ok(())
    }

    /// Model identifier the index was built with.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Vector dimension (0 for an empty index).
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed policies.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get all entries.
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// The policy stored at `position`.
    pub fn policy(&self, position: usize) -> Option<&Policy> {
        self.entries.get(position).map(|e| &e.policy)
    }

    /// True if a policy with this id is part of the pool.
    pub fn contains(&self, policy_id: &str) -> bool {
        self.entries.iter().any(|e| e.policy.policy_id == policy_id)
    }

    /// Reject a provider whose model differs from the one used at build time.
    pub fn ensure_compatible(&self, provider: &dyn EmbeddingProvider) -> Result<()> {
        if provider.model_id() != self.model_id {
            return Err(ScoringError::ModelMismatch {
                index: self.model_id.clone(),
                provider: provider.model_id().to_string(),
            });
        }
        Ok(())
    }

    /// Encode `text` and return the top `k` hits by cosine similarity.
    pub async fn query(
        &self,
        text: &str,
        k: usize,
        provider: &dyn EmbeddingProvider,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_compatible(provider)?;
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut query = provider.embed(text).await?;
        l2_normalize(&mut query);
        self.search_vector(&query, k)
    }

    /// Exact top-k inner-product search for an already-normalized vector.
    ///
    /// Results are ordered by non-increasing similarity; equal similarities
    /// keep insertion order.
    pub fn search_vector(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(ScoringError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .enumerate()
            .map(|(position, entry)| SearchHit {
                position,
                similarity: dot(query, &entry.embedding),
            })
            .collect();

        // Stable sort, so ties stay in insertion order.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashingEmbedder;

    fn corpus() -> Vec<Policy> {
        vec![
            Policy::new("a", "Carbon Tax Act", "Statute", "emitters shall pay a carbon tax")
                .with_score(3),
            Policy::new("b", "Green Grants", "Program", "grants encourage voluntary solar adoption")
                .with_score(2),
            Policy::new("c", "Climate Vision", "Strategy", "the nation aims to reach net zero")
                .with_score(1),
        ]
    }

    #[tokio::test]
    async fn test_build_normalizes_vectors() {
        let provider = HashingEmbedder::new(32);
        let index = EmbeddingIndex::build(&corpus(), &provider, 2).await.unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimension(), 32);
        for entry in index.entries() {
            let norm: f32 = entry.embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[tokio::test]
    async fn test_query_finds_self_first() {
        let provider = HashingEmbedder::new(64);
        let policies = corpus();
        let index = EmbeddingIndex::build(&policies, &provider, 100).await.unwrap();

        let hits = index
            .query(&policies[1].embedding_text(), 3, &provider)
            .await
            .unwrap();
        assert_eq!(hits[0].position, 1);
        assert!((hits[0].similarity - 1.0).abs() < 1e-5);
        for pair in hits.windows(2) {
            assert!(pair[0].similarity >= pair[1].similarity);
        }
    }

    #[tokio::test]
    async fn test_empty_index_is_queryable() {
        let provider = HashingEmbedder::new(16);
        let index = EmbeddingIndex::build(&[], &provider, 10).await.unwrap();
        assert!(index.is_empty());
        let hits = index.query("anything", 2, &provider).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_model_mismatch_rejected() {
        let builder = HashingEmbedder::new(16);
        let index = EmbeddingIndex::build(&corpus(), &builder, 10).await.unwrap();
        let other = HashingEmbedder::with_model_id(16, "other-model");
        let err = index.query("carbon tax", 1, &other).await.unwrap_err();
        assert!(matches!(err, ScoringError::ModelMismatch { .. }));
    }

    #[test]
    fn test_contains_and_policy_lookup() {
        let provider = HashingEmbedder::new(16);
        let index = tokio_test::block_on(EmbeddingIndex::build(&corpus(), &provider, 10)).unwrap();
        assert!(index.contains("b"));
        assert!(!index.contains("z"));
        assert_eq!(index.policy(2).map(|p| p.policy_id.as_str()), Some("c"));
        assert!(index.policy(3).is_none());
        assert_eq!(index.model_id(), "hashing-test-model");
    }

    #[test]
    fn test_search_vector_dimension_and_ties() {
        let mut index = EmbeddingIndex::empty("m");
        index.dimension = 2;
        for id in ["x", "y", "z"] {
            index.entries.push(IndexEntry {
                policy: Policy::new(id, id, "t", "d"),
                embedding: vec![1.0, 0.0],
            });
        }
        let hits = index.search_vector(&[1.0, 0.0], 2).unwrap();
        let positions: Vec<usize> = hits.iter().map(|h| h.position).collect();
        assert_eq!(positions, vec![0, 1]);

        let err = index.search_vector(&[1.0, 0.0, 0.0], 2).unwrap_err();
        assert!(matches!(err, ScoringError::DimensionMismatch { expected: 2, actual: 3 }));
    }
}
