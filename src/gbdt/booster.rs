//! Boosting loop and the fitted ensemble.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::binning::BinnedMatrix;
use super::early_stopping::EarlyStopping;
use super::grower::TreeGrower;
use super::split::SplitRules;
use super::tree::Tree;
use super::BoosterParams;
use crate::dataset::{Datasets, FeatureMatrix, LabelVector};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{DenseMatrix, FeatureEncoder};
use crate::metrics::rmse;
use crate::model::{Model, ModelArtifact, Regressor};

const MODEL_FILE_NAME: &str = "model.json";

/// Native gradient-boosted tree regressor.
#[derive(Debug, Clone, Default)]
pub struct GbdtRegressor {
    params: BoosterParams,
}

impl GbdtRegressor {
    pub fn new(params: BoosterParams) -> Self {
        Self { params }
    }
}

impl Regressor for GbdtRegressor {
    type Model = BoostedTreeModel;

    fn name(&self) -> &'static str {
        "gbdt"
    }

    fn tracked_params(&self) -> Vec<(&'static str, String)> {
        self.params.tracked_params()
    }

    fn fit(&self, datasets: &Datasets) -> PipelineResult<BoostedTreeModel> {
        let params = &self.params;
        params.validate()?;

        let encoder = FeatureEncoder::fit(&datasets.train_features)?;
        let train = encoder.transform(&datasets.train_features)?;
        let validation = encoder.transform(&datasets.validation_features)?;
        let train_labels = checked_labels(&train, &datasets.train_labels, "train")?;
        let validation_labels =
            checked_labels(&validation, &datasets.validation_labels, "validation")?;

        let binned = BinnedMatrix::from_dense(&train, params.max_bin);
        let grower = TreeGrower::new(
            &binned,
            SplitRules::from(params),
            params.max_depth,
            params.learning_rate,
        );

        let base_score = train_labels.iter().sum::<f64>() / train_labels.len() as f64;
        let mut train_predictions = vec![base_score; train.n_rows()];
        let mut validation_predictions = vec![base_score; validation.n_rows()];
        let mut gradients = vec![0.0; train.n_rows()];
        let mut hessians = vec![0.0; train.n_rows()];

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut early_stopping = EarlyStopping::new(params.early_stopping_rounds);
        let mut trees = Vec::new();

        info!(
            "Boosting up to {} rounds on {} rows, early stopping after {} rounds",
            params.num_boost_round,
            train.n_rows(),
            params.early_stopping_rounds
        );

        for round in 0..params.num_boost_round {
            for (row, (gradient, hessian)) in gradients.iter_mut().zip(hessians.iter_mut()).enumerate() {
                (*gradient, *hessian) = params
                    .objective
                    .gradient(train_predictions[row], train_labels[row]);
            }

            let rows = sample_rows(train.n_rows(), params.subsample, &mut rng);
            let tree = grower.grow(&gradients, &hessians, rows);
            tree.add_predictions(&train, &mut train_predictions);
            tree.add_predictions(&validation, &mut validation_predictions);
            trees.push(tree);

            let score = rmse(&validation_predictions, validation_labels);
            if !score.is_finite() || train_predictions.iter().any(|p| !p.is_finite()) {
                return Err(PipelineError::training(format!(
                    "predictions diverged at round {round}"
                )));
            }
            debug!("[{round}] validation-rmse:{score:.5}");

            if early_stopping.should_stop(score) && params.early_stopping_rounds > 0 {
                info!(
                    "Stopping at round {round}; best round {} with validation-rmse {:.5}",
                    early_stopping.best_round(),
                    early_stopping.best_value().unwrap_or(score)
                );
                break;
            }
        }

        let (best_iteration, best_score) = if params.early_stopping_rounds > 0 {
            let best = early_stopping.best_round();
            trees.truncate(best + 1);
            (best, early_stopping.best_value().unwrap_or(f64::NAN))
        } else {
            let last = trees.len() - 1;
            (last, rmse(&validation_predictions, validation_labels))
        };

        info!(
            "Trained {} trees, best iteration {} with validation-rmse {:.5}",
            trees.len(),
            best_iteration,
            best_score
        );

        Ok(BoostedTreeModel {
            encoder,
            base_score,
            trees,
            best_iteration,
            best_score,
        })
    }
}

fn checked_labels<'a>(
    matrix: &DenseMatrix,
    labels: &'a LabelVector,
    split: &str,
) -> PipelineResult<&'a [f64]> {
    if matrix.n_rows() == 0 {
        return Err(PipelineError::training(format!("{split} matrix has no rows")));
    }
    if matrix.n_rows() != labels.len() {
        return Err(PipelineError::training(format!(
            "{split} matrix has {} rows but {} labels",
            matrix.n_rows(),
            labels.len()
        )));
    }
    if let Some(position) = labels.values().iter().position(|label| !label.is_finite()) {
        return Err(PipelineError::training(format!(
            "{split} label at row {position} is not finite"
        )));
    }
    Ok(labels.values())
}

/// Rows used for one tree; all of them unless subsampling.
fn sample_rows(n_rows: usize, subsample: f64, rng: &mut StdRng) -> Vec<usize> {
    if subsample >= 1.0 {
        return (0..n_rows).collect();
    }
    let amount = ((n_rows as f64 * subsample).round() as usize).clamp(1, n_rows);
    let mut rows = index::sample(rng, n_rows, amount).into_vec();
    rows.sort_unstable();
    rows
}

/// Fitted boosted-tree ensemble with its feature encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedTreeModel {
    encoder: FeatureEncoder,
    base_score: f64,
    trees: Vec<Tree>,
    best_iteration: usize,
    best_score: f64,
}

impl BoostedTreeModel {
    pub fn from_json_bytes(bytes: &[u8]) -> PipelineResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Validation RMSE at the best iteration.
    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    fn predict_dense(&self, matrix: &DenseMatrix) -> Vec<f64> {
        let mut predictions = vec![self.base_score; matrix.n_rows()];
        for tree in &self.trees {
            tree.add_predictions(matrix, &mut predictions);
        }
        predictions
    }
}

impl Model for BoostedTreeModel {
    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<LabelVector> {
        let matrix = self.encoder.transform(features)?;
        Ok(self.predict_dense(&matrix).into())
    }

    fn to_artifact(&self) -> PipelineResult<ModelArtifact> {
        Ok(ModelArtifact {
            file_name: MODEL_FILE_NAME.to_string(),
            bytes: serde_json::to_vec(self)?,
        })
    }

    fn best_iteration(&self) -> Option<usize> {
        Some(self.best_iteration)
    }
}
