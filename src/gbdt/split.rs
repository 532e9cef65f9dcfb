//! Split gain and leaf weight computation.

use std::ops::{AddAssign, Sub};

use super::BoosterParams;

/// Gain below this is treated as rounding noise, not an improvement.
const MIN_GAIN: f64 = 1e-6;

/// Gradient statistics summed over a set of rows.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GradStats {
    pub grad: f64,
    pub hess: f64,
    pub count: u32,
}

impl GradStats {
    pub fn new(grad: f64, hess: f64) -> Self {
        Self {
            grad,
            hess,
            count: 1,
        }
    }
}

impl AddAssign for GradStats {
    fn add_assign(&mut self, other: Self) {
        self.grad += other.grad;
        self.hess += other.hess;
        self.count += other.count;
    }
}

impl Sub for GradStats {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        Self {
            grad: self.grad - other.grad,
            hess: self.hess - other.hess,
            count: self.count - other.count,
        }
    }
}

/// Regularisation and constraints applied while growing trees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SplitRules {
    pub reg_lambda: f64,
    pub reg_alpha: f64,
    pub min_split_gain: f64,
    pub min_child_weight: f64,
}

impl From<&BoosterParams> for SplitRules {
    fn from(params: &BoosterParams) -> Self {
        Self {
            reg_lambda: params.reg_lambda,
            reg_alpha: params.reg_alpha,
            min_split_gain: params.min_split_gain,
            min_child_weight: params.min_child_weight,
        }
    }
}

impl SplitRules {
    /// Gradient sum after L1 soft thresholding.
    #[inline]
    fn threshold_l1(&self, grad: f64) -> f64 {
        if grad > self.reg_alpha {
            grad - self.reg_alpha
        } else if grad < -self.reg_alpha {
            grad + self.reg_alpha
        } else {
            0.0
        }
    }

    /// Structure score of a node: `T(G)² / (H + λ)`.
    #[inline]
    pub fn score(&self, stats: GradStats) -> f64 {
        let denom = stats.hess + self.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        let grad = self.threshold_l1(stats.grad);
        grad * grad / denom
    }

    /// Loss reduction of splitting `parent` into `left` and `right`.
    ///
    /// ```text
    /// gain = ½ · [score(L) + score(R) − score(P)] − γ
    /// ```
    #[inline]
    pub fn gain(&self, left: GradStats, right: GradStats, parent: GradStats) -> f64 {
        0.5 * (self.score(left) + self.score(right) - self.score(parent)) - self.min_split_gain
    }

    /// Both children non-empty and heavy enough.
    #[inline]
    pub fn is_valid_split(&self, left: GradStats, right: GradStats) -> bool {
        left.count > 0
            && right.count > 0
            && left.hess >= self.min_child_weight
            && right.hess >= self.min_child_weight
    }

    #[inline]
    pub fn is_improvement(&self, gain: f64) -> bool {
        gain > MIN_GAIN
    }

    /// Optimal leaf weight: `−T(G) / (H + λ)`.
    #[inline]
    pub fn leaf_weight(&self, stats: GradStats) -> f64 {
        let denom = stats.hess + self.reg_lambda;
        if denom <= 0.0 {
            return 0.0;
        }
        -self.threshold_l1(stats.grad) / denom
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn rules(reg_lambda: f64, reg_alpha: f64) -> SplitRules {
        SplitRules {
            reg_lambda,
            reg_alpha,
            min_split_gain: 0.0,
            min_child_weight: 1.0,
        }
    }

    fn stats(grad: f64, hess: f64, count: u32) -> GradStats {
        GradStats { grad, hess, count }
    }

    #[test]
    fn symmetric_split_gain() {
        let rules = rules(1.0, 0.0);
        // 0.5 * (100/6 + 100/6 - 0/11)
        let gain = rules.gain(stats(10.0, 5.0, 5), stats(-10.0, 5.0, 5), stats(0.0, 10.0, 10));
        assert_abs_diff_eq!(gain, 100.0 / 6.0, epsilon = 1e-9);
    }

    #[test]
    fn gamma_is_subtracted() {
        let mut rules = rules(1.0, 0.0);
        rules.min_split_gain = 2.0;
        let gain = rules.gain(stats(10.0, 5.0, 5), stats(-10.0, 5.0, 5), stats(0.0, 10.0, 10));
        assert_abs_diff_eq!(gain, 100.0 / 6.0 - 2.0, epsilon = 1e-9);
    }

    #[test]
    fn leaf_weight_without_l1_is_newton_step() {
        assert_abs_diff_eq!(rules(1.0, 0.0).leaf_weight(stats(-10.0, 5.0, 5)), 10.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn l1_shrinks_small_gradients_to_zero() {
        let rules = rules(1.0, 2.0);
        assert_eq!(rules.leaf_weight(stats(-1.0, 5.0, 5)), 0.0);
        assert_abs_diff_eq!(rules.leaf_weight(stats(-10.0, 5.0, 5)), 8.0 / 6.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rules.leaf_weight(stats(10.0, 5.0, 5)), -8.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn split_validity_checks_weight_and_emptiness() {
        let mut rules = rules(1.0, 0.0);
        rules.min_child_weight = 5.0;

        assert!(rules.is_valid_split(stats(0.0, 5.0, 5), stats(0.0, 5.0, 5)));
        assert!(!rules.is_valid_split(stats(0.0, 4.0, 4), stats(0.0, 5.0, 5)));

        rules.min_child_weight = 0.0;
        assert!(!rules.is_valid_split(stats(0.0, 0.0, 0), stats(0.0, 5.0, 5)));
    }

    #[test]
    fn stats_accumulate_and_subtract() {
        let mut total = GradStats::default();
        total += GradStats::new(1.5, 1.0);
        total += GradStats::new(-0.5, 1.0);
        let rest = total - GradStats::new(1.5, 1.0);

        assert_eq!(total, stats(1.0, 2.0, 2));
        assert_eq!(rest, stats(-0.5, 1.0, 1));
    }
}
