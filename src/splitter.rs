//! Deterministic, label-stratified k-fold partitioning.
//!
//! Labels are sorted and dealt round-robin over the folds to decide how many
//! members of each class every test fold receives; the fold assignments of
//! each class are then shuffled with a seeded RNG and handed to that class's
//! members in dataset order. A class with fewer than `k` members cannot reach
//! every fold; its members land in the first folds of the deal.

use crate::error::{Result, ScoringError};
use crate::policy::{Policy, score_distribution};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// One train/test partition, as indices into the split dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Fold number (0-indexed).
    pub index: usize,
    /// Training indices, ascending.
    pub train: Vec<usize>,
    /// Held-out indices, ascending.
    pub test: Vec<usize>,
}

impl Fold {
    pub fn train_policies(&self, policies: &[Policy]) -> Vec<Policy> {
        self.train.iter().map(|&i| policies[i].clone()).collect()
    }

    pub fn test_policies(&self, policies: &[Policy]) -> Vec<Policy> {
        self.test.iter().map(|&i| policies[i].clone()).collect()
    }
}

/// Stratified k-fold splitter.
#[derive(Debug, Clone, Copy)]
pub struct DatasetSplitter {
    pub k: usize,
    pub seed: u64,
}

impl DatasetSplitter {
    pub fn new(k: usize, seed: u64) -> Self {
        Self { k, seed }
    }

    /// Split labeled policies into `k` stratified folds.
    pub fn split(&self, policies: &[Policy]) -> Result<Vec<Fold>> {
        let labels: Vec<u8> = policies
            .iter()
            .map(|p| {
                p.score.ok_or_else(|| {
                    ScoringError::InputValidation(format!(
                        "Cannot stratify: policy '{}' has no Score",
                        p.policy_id
                    ))
                })
            })
            .collect::<Result<_>>()?;

        let folds = stratified_folds(&labels, self.k, self.seed)?;
        log_fold_distributions(policies, &folds);
        Ok(folds)
    }
}

/// Stratified fold assignment over raw labels.
pub fn stratified_folds<L: Ord + Copy>(labels: &[L], k: usize, seed: u64) -> Result<Vec<Fold>> {
    let n = labels.len();
    if k < 2 {
        return Err(ScoringError::InputValidation(format!(
            "Number of folds must be at least 2, got {}",
            k
        )));
    }
    if k > n {
        return Err(ScoringError::InputValidation(format!(
            "Cannot create {} folds from {} policies",
            k, n
        )));
    }

    let mut counts: BTreeMap<L, usize> = BTreeMap::new();
    for &l in labels {
        *counts.entry(l).or_default() += 1;
    }
    let classes: Vec<L> = counts.keys().copied().collect();
    let class_counts: Vec<usize> = counts.values().copied().collect();

    if class_counts.iter().all(|&c| c < k) {
        return Err(ScoringError::InputValidation(format!(
            "Number of folds ({}) exceeds the size of every score class",
            k
        )));
    }
    let min_count = class_counts.iter().copied().min().unwrap_or(0);
    if min_count < k {
        warn!(
            least_populated = min_count,
            folds = k,
            "Least populated score class has fewer members than folds"
        );
    }

    // Sorted class ordinals, dealt round-robin: allocation[f][c] is how many
    // members of class c go to test fold f.
    let y_order: Vec<usize> = class_counts
        .iter()
        .enumerate()
        .flat_map(|(c, &count)| std::iter::repeat_n(c, count))
        .collect();
    let mut allocation = vec![vec![0usize; classes.len()]; k];
    for (pos, &c) in y_order.iter().enumerate() {
        allocation[pos % k][c] += 1;
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut test_fold = vec![0usize; n];

    for (c, class) in classes.iter().enumerate() {
        let mut folds_for_class: Vec<usize> = (0..k)
            .flat_map(|f| std::iter::repeat_n(f, allocation[f][c]))
            .collect();
        folds_for_class.shuffle(&mut rng);

        let members = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| *l == class)
            .map(|(i, _)| i);
        for (i, f) in members.zip(folds_for_class) {
            test_fold[i] = f;
        }
    }

    let folds = (0..k)
        .map(|f| {
            let (test, train): (Vec<usize>, Vec<usize>) = (0..n).partition(|&i| test_fold[i] == f);
            Fold {
                index: f,
                train,
                test,
            }
        })
        .collect();

    Ok(folds)
}

fn log_fold_distributions(policies: &[Policy], folds: &[Fold]) {
    let overall = score_distribution(policies.iter());
    info!(total = policies.len(), distribution = ?overall, "Overall score distribution");

    for fold in folds {
        let train = score_distribution(fold.train.iter().map(|&i| &policies[i]));
        let test = score_distribution(fold.test.iter().map(|&i| &policies[i]));
        info!(
            fold = fold.index,
            train_size = fold.train.len(),
            test_size = fold.test.len(),
            train_distribution = ?train,
            test_distribution = ?test,
            "Fold distribution"
        );
    }
}

/// The persisted form of a split: policy ids rather than positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitManifest {
    pub k: usize,
    pub seed: u64,
    pub folds: Vec<FoldIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldIds {
    pub index: usize,
    pub train_ids: Vec<String>,
    pub test_ids: Vec<String>,
}

impl SplitManifest {
    pub fn from_folds(splitter: &DatasetSplitter, policies: &[Policy], folds: &[Fold]) -> Self {
        let ids = |idx: &[usize]| -> Vec<String> {
            idx.iter().map(|&i| policies[i].policy_id.clone()).collect()
        };
        Self {
            k: splitter.k,
            seed: splitter.seed,
            folds: folds
                .iter()
                .map(|f| FoldIds {
                    index: f.index,
                    train_ids: ids(&f.train),
                    test_ids: ids(&f.test),
                })
                .collect(),
        }
    }

    /// Resolve the stored ids back to positions in `policies`.
    pub fn to_folds(&self, policies: &[Policy]) -> Result<Vec<Fold>> {
        let position: std::collections::HashMap<&str, usize> = policies
            .iter()
            .enumerate()
            .map(|(i, p)| (p.policy_id.as_str(), i))
            .collect();
        let resolve = |ids: &[String]| -> Result<Vec<usize>> {
            let mut out = ids
                .iter()
                .map(|id| {
                    position.get(id.as_str()).copied().ok_or_else(|| {
                        ScoringError::InputValidation(format!(
                            "Split references unknown policy '{}'; rerun prepare",
                            id
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            out.sort_unstable();
            Ok(out)
        };

        self.folds
            .iter()
            .map(|f| {
                Ok(Fold {
                    index: f.index,
                    train: resolve(&f.train_ids)?,
                    test: resolve(&f.test_ids)?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn balanced(per_class: usize) -> Vec<Policy> {
        let mut out = Vec::new();
        for i in 0..per_class * 3 {
            let score = (i % 3) as u8 + 1;
            out.push(
                Policy::new(format!("policy/{}", i), "n", "t", format!("d{}", i))
                    .with_score(score),
            );
        }
        out
    }

    #[test]
    fn test_folds_partition_dataset() {
        let labels = [1u8, 1, 1, 2, 2, 3, 3, 3, 3, 1, 2, 3, 2];
        let folds = stratified_folds(&labels, 3, 7).unwrap();
        assert_eq!(folds.len(), 3);

        let mut seen = HashSet::new();
        for fold in &folds {
            for &i in &fold.test {
                assert!(seen.insert(i), "index {} in two test sets", i);
            }
            assert_eq!(fold.train.len() + fold.test.len(), labels.len());
            for &i in &fold.train {
                assert!(!fold.test.contains(&i));
            }
        }
        assert_eq!(seen.len(), labels.len());

        // Fold numbers start at 0, matching the artifact file names.
        let indices: Vec<usize> = folds.iter().map(|f| f.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_deterministic_given_seed() {
        let labels: Vec<u8> = (0..40).map(|i| (i % 3) as u8 + 1).collect();
        let a = stratified_folds(&labels, 5, 42).unwrap();
        let b = stratified_folds(&labels, 5, 42).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_even_stratification_thirty_policies() {
        let policies = balanced(10);
        let folds = DatasetSplitter::new(5, 42).split(&policies).unwrap();
        for fold in &folds {
            assert_eq!(fold.test.len(), 6);
            let dist = score_distribution(fold.test.iter().map(|&i| &policies[i]));
            assert_eq!(dist.get(&1), Some(&2));
            assert_eq!(dist.get(&2), Some(&2));
            assert_eq!(dist.get(&3), Some(&2));
        }
    }

    #[test]
    fn test_small_class_is_tolerated() {
        // Score 3 has 2 members but k = 4: accepted with a warning.
        let labels = [1u8, 1, 1, 1, 2, 2, 2, 2, 3, 3];
        let folds = stratified_folds(&labels, 4, 1).unwrap();
        let total: usize = folds.iter().map(|f| f.test.len()).sum();
        assert_eq!(total, labels.len());
    }

    #[test]
    fn test_invalid_parameters() {
        let labels = [1u8, 2, 3];
        assert!(stratified_folds(&labels, 1, 0).is_err());
        assert!(stratified_folds(&labels, 4, 0).is_err());
        // Every class smaller than k.
        assert!(stratified_folds(&labels, 2, 0).is_err());
    }

    #[test]
    fn test_unlabeled_policy_rejected() {
        let mut policies = balanced(2);
        policies[0].score = None;
        assert!(DatasetSplitter::new(2, 0).split(&policies).is_err());
    }

    #[test]
    fn test_manifest_roundtrip_resolves_positions() {
        let policies = balanced(4);
        let splitter = DatasetSplitter::new(4, 3);
        let folds = splitter.split(&policies).unwrap();
        let manifest = SplitManifest::from_folds(&splitter, &policies, &folds);
        assert_eq!(manifest.to_folds(&policies).unwrap(), folds);

        let missing = &policies[1..];
        assert!(manifest.to_folds(missing).is_err());
    }
}
