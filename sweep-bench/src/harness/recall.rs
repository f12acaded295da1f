// Copyright 2025 ToonDB Authors
//
// Licensed under the Apache License, Version 2.0

//! Recall@k evaluation against a pre-computed truth set.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::dataset::TruthSet;

/// Recall@k evaluator.
///
/// When the truth set carries distances, neighbours tied in distance with the
/// k-th true neighbour also count as correct answers.
pub struct RecallEvaluator<'a> {
    truth: &'a TruthSet,
}

impl<'a> RecallEvaluator<'a> {
    pub fn new(truth: &'a TruthSet) -> Self {
        Self { truth }
    }

    /// Number of true neighbours accepted for query `q` at cut-off `k`.
    fn accepted_len(&self, q: usize, k: usize) -> usize {
        let k = k.min(self.truth.dim);
        match self.truth.distances(q) {
            Some(dists) if k > 0 => {
                let kth = dists[k - 1];
                let mut end = k;
                while end < dists.len() && dists[end] == kth {
                    end += 1;
                }
                end
            }
            _ => k,
        }
    }

    /// Compute recall@k for a single query.
    ///
    /// Recall@k = |top-k retrieved ∩ accepted truth| / k
    ///
    /// # Returns
    /// Recall value between 0.0 and 1.0, or None if the query is not covered
    /// by the truth set.
    pub fn recall_at_k(&self, q: usize, results: &[u32], k: usize) -> Option<f64> {
        if q >= self.truth.num_queries || k == 0 {
            return None;
        }
        let accepted: HashSet<u32> = self.truth.neighbors(q)[..self.accepted_len(q, k)]
            .iter()
            .copied()
            .collect();
        let retrieved: HashSet<u32> = results.iter().take(k).copied().collect();

        let hits = retrieved.intersection(&accepted).count();
        Some(hits as f64 / k as f64)
    }

    /// Compute recall@k over a row-major result matrix of `k` ids per query.
    pub fn average_recall_at_k(&self, results: &[u32], k: usize) -> RecallMetrics {
        let mut recalls = Vec::new();
        let mut missing = 0;

        if k > 0 {
            for (q, row) in results.chunks_exact(k).enumerate() {
                match self.recall_at_k(q, row, k) {
                    Some(recall) => recalls.push(recall),
                    None => missing += 1,
                }
            }
        }

        if recalls.is_empty() {
            return RecallMetrics {
                k,
                count: 0,
                missing,
                mean: 0.0,
                min: 0.0,
                max: 0.0,
                std_dev: 0.0,
            };
        }

        let count = recalls.len();
        let mean = recalls.iter().sum::<f64>() / count as f64;
        let min = recalls.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = recalls.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        let variance = recalls.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / count as f64;

        RecallMetrics {
            k,
            count,
            missing,
            mean,
            min,
            max,
            std_dev: variance.sqrt(),
        }
    }
}

/// Recall metrics summary. Values are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecallMetrics {
    pub k: usize,
    pub count: usize,
    pub missing: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn truth(ids: Vec<u32>, dists: Option<Vec<f32>>, num_queries: usize, dim: usize) -> TruthSet {
        TruthSet {
            ids,
            dists,
            num_queries,
            dim,
        }
    }

    #[test]
    fn test_recall_at_k() {
        let gt = truth(vec![1, 2, 3, 4, 5], None, 1, 5);
        let evaluator = RecallEvaluator::new(&gt);

        // Perfect recall, any order
        assert_eq!(evaluator.recall_at_k(0, &[5, 4, 3, 2, 1], 5), Some(1.0));

        // 60% recall (3 of 5)
        assert_eq!(evaluator.recall_at_k(0, &[1, 2, 3, 100, 101], 5), Some(0.6));

        // 0% recall
        assert_eq!(
            evaluator.recall_at_k(0, &[100, 101, 102, 103, 104], 5),
            Some(0.0)
        );
    }

    #[test]
    fn test_only_top_k_of_truth_counts_without_distances() {
        let gt = truth(vec![1, 2, 3, 4], None, 1, 4);
        let evaluator = RecallEvaluator::new(&gt);
        // 3 is the third true neighbour and is outside the top-2
        assert_eq!(evaluator.recall_at_k(0, &[1, 3], 2), Some(0.5));
    }

    #[test]
    fn test_ties_with_kth_neighbour_are_accepted() {
        // Neighbours 2, 3 and 4 are all at distance 0.5
        let gt = truth(vec![1, 2, 3, 4, 5], Some(vec![0.1, 0.5, 0.5, 0.5, 0.9]), 1, 5);
        let evaluator = RecallEvaluator::new(&gt);
        assert_eq!(evaluator.recall_at_k(0, &[1, 4], 2), Some(1.0));
        assert_eq!(evaluator.recall_at_k(0, &[1, 5], 2), Some(0.5));
    }

    #[test]
    fn test_average_over_batch() {
        let gt = truth(vec![1, 2, 10, 20], None, 2, 2);
        let evaluator = RecallEvaluator::new(&gt);
        let results = [2, 1, 10, 99];
        let metrics = evaluator.average_recall_at_k(&results, 2);
        assert_eq!(metrics.count, 2);
        assert_eq!(metrics.missing, 0);
        assert!((metrics.mean - 0.75).abs() < 1e-12);
        assert_eq!(metrics.min, 0.5);
        assert_eq!(metrics.max, 1.0);
    }

    #[test]
    fn test_queries_beyond_truth_are_missing() {
        let gt = truth(vec![1, 2], None, 1, 2);
        let evaluator = RecallEvaluator::new(&gt);
        let metrics = evaluator.average_recall_at_k(&[1, 2, 3, 4], 2);
        assert_eq!(metrics.count, 1);
        assert_eq!(metrics.missing, 1);
    }
}
