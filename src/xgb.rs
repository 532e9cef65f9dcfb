//! Regressor backed by the native XGBoost library.

use std::fmt;

use tracing::{debug, info};
use xgboost::parameters::learning::{LearningTaskParametersBuilder, Objective};
use xgboost::parameters::tree::{TreeBoosterParametersBuilder, TreeMethod};
use xgboost::parameters::{BoosterParameters, BoosterParametersBuilder, BoosterType};
use xgboost::{Booster, DMatrix, XGBError};

use crate::dataset::{Datasets, FeatureMatrix, LabelVector};
use crate::error::{PipelineError, PipelineResult};
use crate::features::{DenseMatrix, FeatureEncoder};
use crate::gbdt::{BoosterParams, EarlyStopping};
use crate::metrics::rmse;
use crate::model::{Model, ModelArtifact, Regressor};

const MODEL_FILE_NAME: &str = "model.xgb";

fn xgb_error(err: XGBError) -> PipelineError {
    PipelineError::training(format!("xgboost: {err}"))
}

#[derive(Debug, Clone, Default)]
pub struct XgbRegressor {
    params: BoosterParams,
}

impl XgbRegressor {
    pub fn new(params: BoosterParams) -> Self {
        Self { params }
    }

    fn booster_parameters(&self) -> PipelineResult<BoosterParameters> {
        let params = &self.params;
        let tree_params = TreeBoosterParametersBuilder::default()
            .eta(params.learning_rate as f32)
            .max_depth(params.max_depth as u32)
            .min_child_weight(params.min_child_weight as f32)
            .alpha(params.reg_alpha as f32)
            .lambda(params.reg_lambda as f32)
            .gamma(params.min_split_gain as f32)
            .subsample(params.subsample as f32)
            .tree_method(TreeMethod::Hist)
            .max_bin(params.max_bin as u32)
            .build()
            .map_err(PipelineError::training)?;

        let learning_params = LearningTaskParametersBuilder::default()
            .objective(Objective::RegLinear)
            .seed(params.seed)
            .build()
            .map_err(PipelineError::training)?;

        BoosterParametersBuilder::default()
            .booster_type(BoosterType::Tree(tree_params))
            .learning_params(learning_params)
            .verbose(false)
            .threads(Some(1))
            .build()
            .map_err(PipelineError::training)
    }
}

impl Regressor for XgbRegressor {
    type Model = XgbModel;

    fn name(&self) -> &'static str {
        "xgboost"
    }

    fn tracked_params(&self) -> Vec<(&'static str, String)> {
        self.params.tracked_params()
    }

    fn fit(&self, datasets: &Datasets) -> PipelineResult<XgbModel> {
        self.params.validate()?;
        let booster_params = self.booster_parameters()?;

        let encoder = FeatureEncoder::fit(&datasets.train_features)?;
        let train = to_dmatrix(&encoder.transform(&datasets.train_features)?, &datasets.train_labels)?;
        let validation = to_dmatrix(
            &encoder.transform(&datasets.validation_features)?,
            &datasets.validation_labels,
        )?;
        let validation_labels = datasets.validation_labels.values();

        info!(
            "Boosting up to {} rounds, early stopping after {} rounds",
            self.params.num_boost_round, self.params.early_stopping_rounds
        );

        // Monitoring pass: one round at a time, scored on the validation split.
        let mut booster = new_booster(&booster_params, &train, &validation)?;
        let mut early_stop = EarlyStopping::new(self.params.early_stopping_rounds);
        let mut last_score = f64::NAN;
        for round in 0..self.params.num_boost_round {
            booster.update(&train, round as i32).map_err(xgb_error)?;
            last_score = rmse(&predict_f64(&booster, &validation)?, validation_labels);
            if !last_score.is_finite() {
                return Err(PipelineError::training(format!(
                    "validation rmse diverged at round {round}"
                )));
            }
            debug!("[{round}] validation-rmse:{last_score:.5}");
            if early_stop.should_stop(last_score) && self.params.early_stopping_rounds > 0 {
                info!("Stopping at round {round}");
                break;
            }
        }

        let (best_iteration, best_score) = if self.params.early_stopping_rounds > 0 {
            (early_stop.best_round(), early_stop.best_value().unwrap_or(last_score))
        } else {
            (self.params.num_boost_round - 1, last_score)
        };

        // Refit with the same cached matrices so the kept rounds match the monitored ones.
        let mut booster = new_booster(&booster_params, &train, &validation)?;
        for round in 0..=best_iteration {
            booster.update(&train, round as i32).map_err(xgb_error)?;
        }
        info!("Best iteration {best_iteration} with validation-rmse {best_score:.5}");

        Ok(XgbModel {
            encoder,
            booster,
            best_iteration: Some(best_iteration),
            best_score: Some(best_score),
        })
    }
}

/// Fitted XGBoost booster with its feature encoding.
pub struct XgbModel {
    encoder: FeatureEncoder,
    booster: Booster,
    best_iteration: Option<usize>,
    best_score: Option<f64>,
}

impl fmt::Debug for XgbModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XgbModel")
            .field("best_iteration", &self.best_iteration)
            .field("best_score", &self.best_score)
            .finish_non_exhaustive()
    }
}

impl XgbModel {
    /// Rebuild a model from a stored `model.xgb` artifact.
    ///
    /// The artifact holds only the booster, so the encoder fitted on the
    /// original train split has to be supplied.
    pub fn from_artifact_bytes(bytes: &[u8], encoder: FeatureEncoder) -> PipelineResult<Self> {
        Ok(Self {
            encoder,
            booster: Booster::load_buffer(bytes).map_err(xgb_error)?,
            best_iteration: None,
            best_score: None,
        })
    }

    /// Validation RMSE at the best monitored round.
    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }
}

impl Model for XgbModel {
    fn predict(&self, features: &FeatureMatrix) -> PipelineResult<LabelVector> {
        let matrix = self.encoder.transform(features)?;
        if matrix.n_rows() == 0 {
            return Ok(LabelVector::new(Vec::new()));
        }
        let dmatrix = DMatrix::from_dense(&to_f32(matrix.values()), matrix.n_rows()).map_err(xgb_error)?;
        Ok(predict_f64(&self.booster, &dmatrix)?.into())
    }

    fn to_artifact(&self) -> PipelineResult<ModelArtifact> {
        let path = std::env::temp_dir().join(format!("{}-{MODEL_FILE_NAME}", uuid::Uuid::new_v4().simple()));
        self.booster.save(&path).map_err(xgb_error)?;
        let bytes = std::fs::read(&path);
        std::fs::remove_file(&path)?;
        Ok(ModelArtifact {
            file_name: MODEL_FILE_NAME.to_string(),
            bytes: bytes?,
        })
    }

    fn best_iteration(&self) -> Option<usize> {
        self.best_iteration
    }
}

fn new_booster(params: &BoosterParameters, train: &DMatrix, validation: &DMatrix) -> PipelineResult<Booster> {
    Booster::new_with_cached_dmats(params, &[train, validation]).map_err(xgb_error)
}

fn to_f32(values: &[f64]) -> Vec<f32> {
    values.iter().map(|&v| v as f32).collect()
}

fn to_dmatrix(matrix: &DenseMatrix, labels: &LabelVector) -> PipelineResult<DMatrix> {
    if matrix.n_rows() == 0 {
        return Err(PipelineError::training("matrix has no rows"));
    }
    if matrix.n_rows() != labels.len() {
        return Err(PipelineError::training(format!(
            "{} feature rows but {} labels",
            matrix.n_rows(),
            labels.len()
        )));
    }
    let mut dmatrix = DMatrix::from_dense(&to_f32(matrix.values()), matrix.n_rows()).map_err(xgb_error)?;
    dmatrix.set_labels(&to_f32(labels.values())).map_err(xgb_error)?;
    Ok(dmatrix)
}

fn predict_f64(booster: &Booster, dmatrix: &DMatrix) -> PipelineResult<Vec<f64>> {
    let predictions = booster.predict(dmatrix).map_err(xgb_error)?;
    Ok(predictions.into_iter().map(f64::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::build_datasets;
    use approx::assert_abs_diff_eq;
    use polars::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    /// Trips where duration = 2 * trip_distance.
    fn linear_trips(rows: usize, seed: u64) -> DataFrame {
        let mut rng = StdRng::seed_from_u64(seed);
        let distances: Vec<f64> = (0..rows)
            .map(|_| f64::from(rng.gen_range(2..=40)) * 0.5)
            .collect();
        let durations: Vec<f64> = distances.iter().map(|d| 2.0 * d).collect();
        let fares: Vec<f64> = (0..rows).map(|_| rng.gen_range(3.0..60.0)).collect();
        let pickups: Vec<String> = (0..rows).map(|_| rng.gen_range(1..265).to_string()).collect();

        df!(
            "trip_distance" => distances,
            "extra" => vec![0.5; rows],
            "fare_amount" => fares,
            "PULocationID" => pickups,
            "DOLocationID" => vec!["2"; rows],
            "duration" => durations
        )
        .unwrap()
    }

    #[test]
    fn learns_linear_duration() {
        let datasets = build_datasets(&linear_trips(300, 1), &linear_trips(80, 2)).unwrap();

        let regressor = XgbRegressor::new(BoosterParams {
            min_child_weight: 1.0,
            num_boost_round: 100,
            early_stopping_rounds: 10,
            ..BoosterParams::default()
        });
        let model = regressor.fit(&datasets).unwrap();
        let predictions = model.predict(&datasets.validation_features).unwrap();

        assert!(rmse(predictions.values(), datasets.validation_labels.values()) < 0.5);
        assert!(!model.to_artifact().unwrap().bytes.is_empty());
    }

    #[test]
    fn refit_stops_at_best_monitored_round() {
        // Train labels are noise, so validation error stops improving early.
        let mut train = linear_trips(400, 3);
        let mut rng = StdRng::seed_from_u64(9);
        let noise: Vec<f64> = (0..400).map(|_| rng.gen_range(1.0..60.0)).collect();
        train.with_column(Series::new("duration", noise)).unwrap();
        let datasets = build_datasets(&train, &linear_trips(200, 4)).unwrap();

        let params = BoosterParams {
            num_boost_round: 500,
            early_stopping_rounds: 5,
            ..BoosterParams::default()
        };
        let model = XgbRegressor::new(params).fit(&datasets).unwrap();

        let best_iteration = model.best_iteration().unwrap();
        assert!(best_iteration < 500);

        let predictions = model.predict(&datasets.validation_features).unwrap();
        let refit_score = rmse(predictions.values(), datasets.validation_labels.values());
        assert_abs_diff_eq!(refit_score, model.best_score().unwrap(), epsilon = 1e-6);
    }

    #[test]
    fn artifact_reloads_with_the_train_encoder() {
        let datasets = build_datasets(&linear_trips(200, 5), &linear_trips(50, 6)).unwrap();
        let model = XgbRegressor::new(BoosterParams {
            min_child_weight: 1.0,
            num_boost_round: 30,
            early_stopping_rounds: 5,
            ..BoosterParams::default()
        })
        .fit(&datasets)
        .unwrap();

        let artifact = model.to_artifact().unwrap();
        assert_eq!(artifact.file_name, "model.xgb");
        let encoder = FeatureEncoder::fit(&datasets.train_features).unwrap();
        let restored = XgbModel::from_artifact_bytes(&artifact.bytes, encoder).unwrap();

        assert_eq!(
            restored.predict(&datasets.validation_features).unwrap(),
            model.predict(&datasets.validation_features).unwrap()
        );
        assert_eq!(restored.best_iteration(), None);
    }
}
