//! Native gradient-boosted decision trees for regression.
//!
//! Histogram-based, depth-wise growth with the regularised gain of XGBoost's
//! `hist` method: L1/L2 penalties on leaf weights, a minimum child weight, a
//! minimum split gain, learned default directions for missing values and
//! patience-based early stopping on a validation split.

mod binning;
mod booster;
mod early_stopping;
mod grower;
mod params;
mod split;
mod tree;

pub use booster::{BoostedTreeModel, GbdtRegressor};
pub use early_stopping::EarlyStopping;
pub use params::{BoosterParams, Objective};
