//! Isolation Forest Outlier Estimator
//!
//! Unsupervised estimator behind [`crate::model::AnomalyDetector`]. Trees are
//! grown on random subsamples with random axis-aligned splits; outlierness is
//! the mean path length squashed through `2^(-E(h)/c(n))`, which is monotone
//! and lands in [0,1] with higher meaning more anomalous.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default tree count, matching common library defaults.
pub const DEFAULT_TREES: usize = 100;

/// Per-tree subsample ceiling.
const MAX_SUBSAMPLE: usize = 256;

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IsoTree {
    nodes: Vec<Node>,
    root: usize,
}

impl IsoTree {
    fn grow(data: &Array2<f64>, rows: &[usize], rng: &mut StdRng) -> Self {
        let height_limit = (rows.len().max(2) as f64).log2().ceil() as usize;
        let mut nodes = Vec::new();
        let root = grow_node(data, rows, 0, height_limit, rng, &mut nodes);
        Self { nodes, root }
    }

    /// Path length for one sample: tree depth plus the unexplored-subtree
    /// adjustment at the terminating leaf.
    fn path_length(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let mut idx = self.root;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { size } => return depth + expected_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if sample[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
            }
        }
    }
}

fn grow_node(
    data: &Array2<f64>,
    rows: &[usize],
    depth: usize,
    height_limit: usize,
    rng: &mut StdRng,
    nodes: &mut Vec<Node>,
) -> usize {
    if rows.len() <= 1 || depth >= height_limit {
        nodes.push(Node::Leaf { size: rows.len() });
        return nodes.len() - 1;
    }

    // Only features that still vary within this partition are splittable.
    let n_features = data.ncols();
    let mut candidates = Vec::new();
    for f in 0..n_features {
        let (min, max) = column_range(data, rows, f);
        if max > min {
            candidates.push((f, min, max));
        }
    }
    if candidates.is_empty() {
        nodes.push(Node::Leaf { size: rows.len() });
        return nodes.len() - 1;
    }

    let (feature, min, max) = candidates[rng.gen_range(0..candidates.len())];
    let threshold = rng.gen_range(min..max);

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
        .iter()
        .copied()
        .partition(|&r| data[(r, feature)] < threshold);

    let left = grow_node(data, &left_rows, depth + 1, height_limit, rng, nodes);
    let right = grow_node(data, &right_rows, depth + 1, height_limit, rng, nodes);
    nodes.push(Node::Split {
        feature,
        threshold,
        left,
        right,
    });
    nodes.len() - 1
}

fn column_range(data: &Array2<f64>, rows: &[usize], feature: usize) -> (f64, f64) {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &r in rows {
        let v = data[(r, feature)];
        min = min.min(v);
        max = max.max(v);
    }
    (min, max)
}

/// `c(n)`: expected path length of an unsuccessful BST search over n points.
fn expected_path_length(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let n = n as f64;
    2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
}

/// Fitted isolation forest with its anomaly decision threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsoTree>,
    sample_size: usize,
    score_threshold: f64,
}

impl IsolationForest {
    /// Fit a forest over the row-major feature matrix.
    ///
    /// `contamination` is the expected anomaly fraction in the training data;
    /// the decision threshold is fixed at fit time as the matching quantile of
    /// the training scores. Construction is fully determined by `seed`.
    pub fn fit(data: &Array2<f64>, n_trees: usize, contamination: f64, seed: u64) -> Self {
        let n_rows = data.nrows();
        let sample_size = n_rows.min(MAX_SUBSAMPLE);
        let mut rng = StdRng::seed_from_u64(seed);

        let trees: Vec<IsoTree> = (0..n_trees.max(1))
            .map(|_| {
                let rows = rand::seq::index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsoTree::grow(data, &rows, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size,
            score_threshold: f64::INFINITY,
        };
        forest.score_threshold = forest.fit_threshold(data, contamination);
        forest
    }

    fn fit_threshold(&self, data: &Array2<f64>, contamination: f64) -> f64 {
        let contamination = contamination.clamp(0.0, 0.5);
        let n_rows = data.nrows();
        if contamination == 0.0 || n_rows == 0 {
            // Nothing in training counts as anomalous; only stranger-than-seen
            // samples can cross the threshold.
            return 1.0 + f64::EPSILON;
        }

        let mut scores: Vec<f64> = (0..n_rows).map(|r| self.score(data.row(r))).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));

        let k = ((contamination * n_rows as f64).ceil() as usize).clamp(1, n_rows);
        scores[k - 1]
    }

    /// Outlier score in [0,1] for one sample, higher meaning more anomalous.
    pub fn score(&self, sample: ArrayView1<'_, f64>) -> f64 {
        let denom = expected_path_length(self.sample_size);
        if denom == 0.0 || self.trees.is_empty() {
            // Degenerate fit, e.g. a single training point. Stay neutral.
            return 0.5;
        }
        let mean_path: f64 = self
            .trees
            .iter()
            .map(|t| t.path_length(sample))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / denom)
    }

    /// Decision rule fixed at fit time.
    pub fn is_anomalous(&self, score: f64) -> bool {
        score >= self.score_threshold
    }

    /// The contamination-quantile threshold chosen during `fit`.
    pub fn threshold(&self) -> f64 {
        self.score_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn clustered_data_with_outlier() -> Array2<f64> {
        // Spread of distinct points inside the unit square plus one far
        // point on the last row.
        let mut rows: Vec<f64> = Vec::new();
        for i in 0..64usize {
            rows.push(((i * 37) % 97) as f64 / 97.0);
            rows.push(((i * 53) % 89) as f64 / 89.0);
        }
        rows.push(50.0);
        rows.push(50.0);
        Array2::from_shape_vec((65, 2), rows).unwrap()
    }

    #[test]
    fn test_outlier_scores_higher_than_inliers() {
        let data = clustered_data_with_outlier();
        let forest = IsolationForest::fit(&data, DEFAULT_TREES, 0.1, 42);

        let inlier = forest.score(data.row(0));
        let outlier = forest.score(data.row(64));

        assert!(outlier > inlier, "outlier {outlier} <= inlier {inlier}");
        assert!((0.0..=1.0).contains(&outlier));
        assert!((0.0..=1.0).contains(&inlier));
    }

    #[test]
    fn test_fit_is_seeded_and_reproducible() {
        let data = clustered_data_with_outlier();
        let a = IsolationForest::fit(&data, 25, 0.1, 7);
        let b = IsolationForest::fit(&data, 25, 0.1, 7);

        for r in 0..data.nrows() {
            assert_eq!(a.score(data.row(r)), b.score(data.row(r)));
        }
        assert_eq!(a.threshold(), b.threshold());
    }

    #[test]
    fn test_threshold_flags_contamination_fraction() {
        let data = clustered_data_with_outlier();
        let forest = IsolationForest::fit(&data, DEFAULT_TREES, 0.05, 42);

        let flagged = (0..data.nrows())
            .filter(|&r| forest.is_anomalous(forest.score(data.row(r))))
            .count();
        // ceil(0.05 * 65) = 4, ties may add a few more but not the bulk.
        assert!(flagged >= 1);
        assert!(flagged < data.nrows() / 2);
        assert!(forest.is_anomalous(forest.score(data.row(64))));
    }

    #[test]
    fn test_degenerate_single_point_is_neutral() {
        let data = Array2::from_shape_vec((1, 2), vec![1.0, 2.0]).unwrap();
        let forest = IsolationForest::fit(&data, 10, 0.1, 42);
        assert_eq!(forest.score(data.row(0)), 0.5);
    }

    #[test]
    fn test_zero_contamination_flags_nothing_in_training() {
        let data = clustered_data_with_outlier();
        let forest = IsolationForest::fit(&data, 50, 0.0, 42);
        let flagged = (0..data.nrows())
            .filter(|&r| forest.is_anomalous(forest.score(data.row(r))))
            .count();
        assert_eq!(flagged, 0);
    }
}
