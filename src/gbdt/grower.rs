//! Depth-wise tree growth over binned features.
//!
//! Every node builds a gradient histogram per feature from its rows, scans the
//! cut points with missing values sent either way, and splits on the best
//! valid candidate. Nodes stop splitting at `max_depth` or when no candidate
//! improves the loss.

use super::binning::{BinnedMatrix, MISSING_BIN};
use super::split::{GradStats, SplitRules};
use super::tree::{Node, Tree};

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    default_left: bool,
    gain: f64,
}

pub struct TreeGrower<'a> {
    data: &'a BinnedMatrix,
    rules: SplitRules,
    max_depth: usize,
    learning_rate: f64,
}

impl<'a> TreeGrower<'a> {
    pub fn new(data: &'a BinnedMatrix, rules: SplitRules, max_depth: usize, learning_rate: f64) -> Self {
        Self {
            data,
            rules,
            max_depth,
            learning_rate,
        }
    }

    /// Grow one tree fitting the given per-row gradients over `rows`.
    pub fn grow(&self, gradients: &[f64], hessians: &[f64], rows: Vec<usize>) -> Tree {
        let mut nodes = vec![Node::Leaf { value: 0.0 }];
        let mut pending = vec![(0usize, rows, 0usize)];

        while let Some((id, rows, depth)) = pending.pop() {
            let mut totals = GradStats::default();
            for &row in &rows {
                totals += GradStats::new(gradients[row], hessians[row]);
            }

            let candidate = if depth < self.max_depth {
                self.best_split(&rows, gradients, hessians, totals)
            } else {
                None
            };

            match candidate {
                Some(split) => {
                    let (left_rows, right_rows) = self.partition(&rows, &split);
                    let left = nodes.len();
                    let right = left + 1;
                    nodes.push(Node::Leaf { value: 0.0 });
                    nodes.push(Node::Leaf { value: 0.0 });
                    nodes[id] = Node::Split {
                        feature: split.feature,
                        threshold: self.data.mapper(split.feature).threshold(split.bin),
                        default_left: split.default_left,
                        left,
                        right,
                    };
                    pending.push((right, right_rows, depth + 1));
                    pending.push((left, left_rows, depth + 1));
                }
                None => {
                    nodes[id] = Node::Leaf {
                        value: self.rules.leaf_weight(totals) * self.learning_rate,
                    };
                }
            }
        }

        Tree::new(nodes)
    }

    fn best_split(
        &self,
        rows: &[usize],
        gradients: &[f64],
        hessians: &[f64],
        totals: GradStats,
    ) -> Option<SplitCandidate> {
        let mut best: Option<SplitCandidate> = None;

        for feature in 0..self.data.n_features() {
            let n_bins = self.data.mapper(feature).n_bins();
            if n_bins < 2 {
                continue;
            }

            let bins = self.data.feature_bins(feature);
            let mut histogram = vec![GradStats::default(); n_bins];
            let mut missing = GradStats::default();
            for &row in rows {
                let stats = GradStats::new(gradients[row], hessians[row]);
                match bins[row] {
                    MISSING_BIN => missing += stats,
                    bin => histogram[usize::from(bin)] += stats,
                }
            }

            let directions: &[bool] = if missing.count > 0 { &[true, false] } else { &[false] };
            let mut left_present = GradStats::default();
            // The last bin can never be a left side with a non-empty right.
            for (bin, stats) in histogram.iter().enumerate().take(n_bins - 1) {
                left_present += *stats;
                for &default_left in directions {
                    let mut left = left_present;
                    if default_left {
                        left += missing;
                    }
                    let right = totals - left;
                    if !self.rules.is_valid_split(left, right) {
                        continue;
                    }

                    let gain = self.rules.gain(left, right, totals);
                    if self.rules.is_improvement(gain) && best.map_or(true, |b| gain > b.gain) {
                        best = Some(SplitCandidate {
                            feature,
                            bin,
                            default_left,
                            gain,
                        });
                    }
                }
            }
        }

        best
    }

    fn partition(&self, rows: &[usize], split: &SplitCandidate) -> (Vec<usize>, Vec<usize>) {
        let bins = self.data.feature_bins(split.feature);
        rows.iter().partition(|&&row| match bins[row] {
            MISSING_BIN => split.default_left,
            bin => usize::from(bin) <= split.bin,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::DenseMatrix;

    fn rules(min_child_weight: f64) -> SplitRules {
        SplitRules {
            reg_lambda: 0.0,
            reg_alpha: 0.0,
            min_split_gain: 0.0,
            min_child_weight,
        }
    }

    /// Gradients for predicting `targets` from a zero prediction.
    fn squared_error_gradients(targets: &[f64]) -> (Vec<f64>, Vec<f64>) {
        (targets.iter().map(|t| -t).collect(), vec![1.0; targets.len()])
    }

    #[test]
    fn step_function_is_fit_exactly() {
        let dense = DenseMatrix::from_rows(1, vec![1.0, 2.0, 3.0, 4.0]);
        let binned = BinnedMatrix::from_dense(&dense, 16);
        let (grad, hess) = squared_error_gradients(&[5.0, 5.0, 9.0, 9.0]);

        let tree = TreeGrower::new(&binned, rules(1.0), 3, 1.0).grow(&grad, &hess, (0..4).collect());

        let predictions: Vec<f64> = dense.rows().map(|row| tree.predict_row(row)).collect();
        assert_eq!(predictions, vec![5.0, 5.0, 9.0, 9.0]);
        assert_eq!(tree.n_leaves(), 2);
    }

    #[test]
    fn depth_limit_is_respected() {
        let dense = DenseMatrix::from_rows(1, (0..16).map(f64::from).collect());
        let binned = BinnedMatrix::from_dense(&dense, 32);
        let targets: Vec<f64> = (0..16).map(|i| f64::from(i * i)).collect();
        let (grad, hess) = squared_error_gradients(&targets);

        let tree = TreeGrower::new(&binned, rules(1.0), 2, 1.0).grow(&grad, &hess, (0..16).collect());
        assert!(tree.n_leaves() <= 4);
    }

    #[test]
    fn min_child_weight_blocks_small_children() {
        let dense = DenseMatrix::from_rows(1, vec![1.0, 2.0, 3.0, 4.0]);
        let binned = BinnedMatrix::from_dense(&dense, 16);
        let (grad, hess) = squared_error_gradients(&[0.0, 0.0, 0.0, 100.0]);

        // Isolating the outlier would leave a child of weight 1.
        let tree = TreeGrower::new(&binned, rules(2.0), 3, 1.0).grow(&grad, &hess, (0..4).collect());
        assert!(dense.rows().all(|row| tree.predict_row(row) != 100.0));
    }

    #[test]
    fn learns_direction_for_missing_values() {
        let dense = DenseMatrix::from_rows(1, vec![1.0, 2.0, f64::NAN, 10.0, 11.0, f64::NAN]);
        let binned = BinnedMatrix::from_dense(&dense, 16);
        let (grad, hess) = squared_error_gradients(&[0.0, 0.0, 0.0, 8.0, 8.0, 8.0]);

        let tree = TreeGrower::new(&binned, rules(0.0), 1, 1.0).grow(&grad, &hess, (0..6).collect());

        // low pair on one side, high pair on the other
        assert_eq!(tree.n_leaves(), 2);
        assert_eq!(tree.predict_row(&[1.5]), tree.predict_row(&[2.0]));
        assert!(tree.predict_row(&[10.5]) > tree.predict_row(&[1.0]));
    }

    #[test]
    fn no_split_without_gain() {
        let dense = DenseMatrix::from_rows(1, vec![1.0, 2.0, 3.0]);
        let binned = BinnedMatrix::from_dense(&dense, 16);
        let (grad, hess) = squared_error_gradients(&[4.0, 4.0, 4.0]);

        let tree = TreeGrower::new(&binned, rules(0.0), 3, 0.5).grow(&grad, &hess, (0..3).collect());
        assert_eq!(tree.nodes(), &[Node::Leaf { value: 2.0 }]);
    }

    #[test]
    fn only_sampled_rows_shape_the_tree() {
        let dense = DenseMatrix::from_rows(1, vec![1.0, 2.0, 3.0, 4.0]);
        let binned = BinnedMatrix::from_dense(&dense, 16);
        let (grad, hess) = squared_error_gradients(&[6.0, 6.0, 50.0, 50.0]);

        let tree = TreeGrower::new(&binned, rules(0.0), 3, 1.0).grow(&grad, &hess, vec![0, 1]);
        assert_eq!(tree.nodes(), &[Node::Leaf { value: 6.0 }]);
    }
}
