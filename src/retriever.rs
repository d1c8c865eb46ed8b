//! Reference-case retrieval for a target policy.

use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::index::EmbeddingIndex;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Number of reference cases placed in each prompt.
pub const DEFAULT_TOP_K: usize = 2;

/// A labeled reference policy with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedCase {
    pub policy: Policy,
    /// Cosine similarity to the query policy.
    pub similarity: f32,
}

/// Retrieves the most similar cases from an index's pool.
///
/// For a test-fold item the index must be the one built from that fold's
/// training partition; results come only from the index's own entries.
pub struct CaseRetriever<'a> {
    index: &'a EmbeddingIndex,
    provider: &'a dyn EmbeddingProvider,
}

impl<'a> CaseRetriever<'a> {
    /// Create a retriever, checking the provider matches the index's model.
    pub fn new(index: &'a EmbeddingIndex, provider: &'a dyn EmbeddingProvider) -> Result<Self> {
        index.ensure_compatible(provider)?;
        Ok(Self { index, provider })
    }

    /// Up to `k` cases in non-increasing similarity order.
    ///
    /// The query is `type + " " + description`; the policy name is not used.
    pub async fn retrieve(&self, query: &Policy, k: usize) -> Result<Vec<RetrievedCase>> {
        let hits = self
            .index
            .query(&query.embedding_text(), k, self.provider)
            .await?;

        let cases: Vec<RetrievedCase> = hits
            .into_iter()
            .filter_map(|hit| {
                self.index.policy(hit.position).map(|policy| RetrievedCase {
                    policy: policy.clone(),
                    similarity: hit.similarity,
                })
            })
            .collect();

        for (rank, case) in cases.iter().enumerate() {
            debug!(
                target_id = %query.policy_id,
                rank = rank + 1,
                case_id = %case.policy.policy_id,
                similarity = case.similarity,
                "Retrieved reference case"
            );
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::HashingEmbedder;

    fn pool() -> Vec<Policy> {
        vec![
            Policy::new("p1", "Emission Caps", "Statute", "power plants shall cap emissions")
                .with_score(3),
            Policy::new("p2", "Rebate Program", "Program", "rebates encourage heat pump purchases")
                .with_score(2),
            Policy::new("p3", "Climate Plan", "Plan", "the city may develop planning goals")
                .with_score(1),
            Policy::new("p4", "Reporting Rule", "Regulation", "facilities shall report emissions")
                .with_score(3),
        ]
    }

    #[tokio::test]
    async fn test_retrieve_returns_at_most_k_sorted() {
        let provider = HashingEmbedder::new(128);
        let index = EmbeddingIndex::build(&pool(), &provider, 2).await.unwrap();
        let retriever = CaseRetriever::new(&index, &provider).unwrap();

        let query = Policy::new("q", "Any Name", "Statute", "plants shall report and cap emissions");
        let cases = retriever.retrieve(&query, DEFAULT_TOP_K).await.unwrap();
        assert_eq!(cases.len(), 2);
        assert!(cases[0].similarity >= cases[1].similarity);
        for case in &cases {
            assert!(index.contains(&case.policy.policy_id));
        }
    }

    #[tokio::test]
    async fn test_fewer_cases_than_k_when_pool_is_small() {
        let provider = HashingEmbedder::new(64);
        let index = EmbeddingIndex::build(&pool()[..1], &provider, 10).await.unwrap();
        let retriever = CaseRetriever::new(&index, &provider).unwrap();
        let cases = retriever.retrieve(&pool()[2], 2).await.unwrap();
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].policy.policy_id, "p1");
    }

    #[tokio::test]
    async fn test_name_does_not_affect_query() {
        let provider = HashingEmbedder::new(64);
        let index = EmbeddingIndex::build(&pool(), &provider, 10).await.unwrap();
        let retriever = CaseRetriever::new(&index, &provider).unwrap();

        let a = Policy::new("q1", "Totally Different Title", "Plan", "encourage rebates");
        let b = Policy::new("q2", "Rebate Program", "Plan", "encourage rebates");
        let ra = retriever.retrieve(&a, 2).await.unwrap();
        let rb = retriever.retrieve(&b, 2).await.unwrap();
        assert_eq!(ra, rb);
    }
}
