//! Regression trees produced by the grower.

use serde::{Deserialize, Serialize};

use crate::features::DenseMatrix;

/// A tree node. Children are indices into the owning tree's node list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Split {
        feature: usize,
        /// Rows with `value <= threshold` go left.
        threshold: f64,
        /// Direction for missing values.
        default_left: bool,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// An immutable regression tree; node 0 is the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub(crate) fn new(nodes: Vec<Node>) -> Self {
        debug_assert!(!nodes.is_empty());
        Self { nodes }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }

    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes[index] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    default_left,
                    left,
                    right,
                } => {
                    let value = row[feature];
                    let go_left = if value.is_nan() {
                        default_left
                    } else {
                        value <= threshold
                    };
                    index = if go_left { left } else { right };
                }
            }
        }
    }

    /// Add this tree's output for every row of `matrix` to `predictions`.
    pub fn add_predictions(&self, matrix: &DenseMatrix, predictions: &mut [f64]) {
        for (prediction, row) in predictions.iter_mut().zip(matrix.rows()) {
            *prediction += self.predict_row(row);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// x0 <= 2.5 ? (x1 <= 0.5 ? 1 : 2) : 3, missing x0 goes right.
    fn sample_tree() -> Tree {
        Tree::new(vec![
            Node::Split {
                feature: 0,
                threshold: 2.5,
                default_left: false,
                left: 1,
                right: 2,
            },
            Node::Split {
                feature: 1,
                threshold: 0.5,
                default_left: true,
                left: 3,
                right: 4,
            },
            Node::Leaf { value: 3.0 },
            Node::Leaf { value: 1.0 },
            Node::Leaf { value: 2.0 },
        ])
    }

    #[test]
    fn routes_rows_by_threshold() {
        let tree = sample_tree();
        assert_eq!(tree.predict_row(&[1.0, 0.0]), 1.0);
        assert_eq!(tree.predict_row(&[2.5, 1.0]), 2.0);
        assert_eq!(tree.predict_row(&[7.0, 0.0]), 3.0);
        assert_eq!(tree.n_leaves(), 3);
    }

    #[test]
    fn missing_values_follow_default_direction() {
        let tree = sample_tree();
        assert_eq!(tree.predict_row(&[f64::NAN, 0.0]), 3.0);
        assert_eq!(tree.predict_row(&[1.0, f64::NAN]), 1.0);
    }

    #[test]
    fn accumulates_into_predictions() {
        let matrix = DenseMatrix::from_rows(2, vec![1.0, 0.0, 9.0, 9.0]);
        let mut predictions = vec![10.0, 20.0];
        sample_tree().add_predictions(&matrix, &mut predictions);
        assert_eq!(predictions, vec![11.0, 23.0]);
    }
}
