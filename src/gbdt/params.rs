//! Booster hyperparameters.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Loss minimised by the booster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Squared error regression.
    #[default]
    #[serde(rename = "reg:linear", alias = "reg:squarederror")]
    SquaredError,
}

impl Objective {
    pub fn as_str(&self) -> &'static str {
        match self {
            Objective::SquaredError => "reg:linear",
        }
    }

    /// First and second derivative of the loss at `prediction`.
    #[inline]
    pub fn gradient(&self, prediction: f64, label: f64) -> (f64, f64) {
        match self {
            Objective::SquaredError => (prediction - label, 1.0),
        }
    }
}

/// Parameters for boosted-tree training.
///
/// Defaults are the tuned values the duration model is trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoosterParams {
    pub max_depth: usize,
    /// Minimum hessian sum in each child of a split.
    pub min_child_weight: f64,
    pub objective: Objective,
    /// L1 regularisation on leaf weights.
    pub reg_alpha: f64,
    /// L2 regularisation on leaf weights.
    pub reg_lambda: f64,
    pub seed: u64,
    /// Shrinkage applied to every leaf weight.
    pub learning_rate: f64,
    /// Minimum loss reduction for a split (gamma).
    pub min_split_gain: f64,
    /// Fraction of training rows sampled for each tree.
    pub subsample: f64,
    /// Maximum histogram bins per feature.
    pub max_bin: usize,
    pub num_boost_round: usize,
    /// Rounds without validation improvement before stopping. 0 disables.
    pub early_stopping_rounds: usize,
}

impl Default for BoosterParams {
    fn default() -> Self {
        Self {
            max_depth: 5,
            min_child_weight: 19.345653147972058,
            objective: Objective::SquaredError,
            reg_alpha: 0.031009193638004067,
            reg_lambda: 0.013053945835415701,
            seed: 111,
            learning_rate: 0.3,
            min_split_gain: 0.0,
            subsample: 1.0,
            max_bin: 256,
            num_boost_round: 500,
            early_stopping_rounds: 50,
        }
    }
}

impl BoosterParams {
    /// The tuned hyperparameters, keyed as they appear on tracking runs.
    pub fn tracked_params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("max_depth", self.max_depth.to_string()),
            ("min_child", self.min_child_weight.to_string()),
            ("objective", self.objective.as_str().to_string()),
            ("reg_alpha", self.reg_alpha.to_string()),
            ("reg_lambda", self.reg_lambda.to_string()),
            ("seed", self.seed.to_string()),
        ]
    }

    pub fn validate(&self) -> PipelineResult<()> {
        let invalid = |message: String| Err(PipelineError::Training(message));

        if self.num_boost_round == 0 {
            return invalid("num_boost_round must be at least 1".to_string());
        }
        if !(2..=usize::from(u16::MAX)).contains(&self.max_bin) {
            return invalid(format!("max_bin must be in [2, {}], got {}", u16::MAX, self.max_bin));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return invalid(format!("learning_rate must be positive, got {}", self.learning_rate));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return invalid(format!("subsample must be in (0, 1], got {}", self.subsample));
        }
        for (name, value) in [
            ("min_child_weight", self.min_child_weight),
            ("reg_alpha", self.reg_alpha),
            ("reg_lambda", self.reg_lambda),
            ("min_split_gain", self.min_split_gain),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return invalid(format!("{name} must be non-negative, got {value}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_params_use_tuned_values() {
        let params = BoosterParams::default().tracked_params();
        let lookup = |key: &str| params.iter().find(|(k, _)| *k == key).map(|(_, v)| v.as_str());

        assert_eq!(params.len(), 6);
        assert_eq!(lookup("max_depth"), Some("5"));
        assert_eq!(lookup("min_child"), Some("19.345653147972058"));
        assert_eq!(lookup("objective"), Some("reg:linear"));
        assert_eq!(lookup("reg_alpha"), Some("0.031009193638004067"));
        assert_eq!(lookup("reg_lambda"), Some("0.013053945835415701"));
        assert_eq!(lookup("seed"), Some("111"));
    }

    #[test]
    fn defaults_are_valid() {
        BoosterParams::default().validate().unwrap();
    }

    #[test]
    fn rejects_bad_sampling_and_bins() {
        let bad = [
            BoosterParams { subsample: 0.0, ..Default::default() },
            BoosterParams { subsample: 1.5, ..Default::default() },
            BoosterParams { max_bin: 1, ..Default::default() },
            BoosterParams { learning_rate: 0.0, ..Default::default() },
            BoosterParams { reg_lambda: -1.0, ..Default::default() },
            BoosterParams { num_boost_round: 0, ..Default::default() },
        ];
        for params in bad {
            assert!(matches!(params.validate(), Err(PipelineError::Training(_))), "{params:?}");
        }
    }

    #[test]
    fn objective_accepts_either_name() {
        let linear: Objective = serde_json::from_str("\"reg:linear\"").unwrap();
        let squared: Objective = serde_json::from_str("\"reg:squarederror\"").unwrap();
        assert_eq!(linear, squared);
        assert_eq!(Objective::SquaredError.gradient(3.0, 5.0), (-2.0, 1.0));
    }
}
