//! Trainer stage: fits a regressor inside a tracked run.

use tracing::info;

use crate::config::{dataset_name, PipelineConfig};
use crate::dataset::Datasets;
use crate::error::PipelineResult;
use crate::evaluator::estimate_quality;
use crate::model::{Model, Regressor};
use crate::tracking::{ActiveRun, TrackingStore};

/// Labels attached to the tracking run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    pub experiment_name: String,
    pub workspace_tag: String,
    pub artifact_path: String,
    pub train_data_name: String,
    pub validation_data_name: String,
}

impl RunSettings {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            experiment_name: config.tracking.experiment_name.clone(),
            workspace_tag: config.tracking.workspace_tag.clone(),
            artifact_path: config.tracking.artifact_path.clone(),
            train_data_name: dataset_name(&config.train_path),
            validation_data_name: dataset_name(&config.validation_path),
        }
    }
}

/// A fitted model plus the run that recorded it.
#[derive(Debug)]
pub struct TrainingOutcome<M> {
    pub model: M,
    pub run_id: String,
    pub validation_rmse: f64,
}

/// Fit `regressor` and record the run in `store`.
///
/// The run receives the hyperparameters, provenance params, the `workspace` and
/// `booster` tags, one `rmse` metric and the serialized model. Any error
/// propagates and the run is closed as `FAILED`, so a failed fit leaves no
/// metric or artifact behind.
pub fn train_model<R: Regressor>(
    regressor: &R,
    store: &dyn TrackingStore,
    settings: &RunSettings,
    datasets: &Datasets,
) -> PipelineResult<TrainingOutcome<R::Model>> {
    let run = ActiveRun::start(store, &settings.experiment_name)?;

    for (key, value) in regressor.tracked_params() {
        run.log_param(key, value)?;
    }
    run.log_param("train_data_name", &settings.train_data_name)?;
    run.log_param("validation_data_name", &settings.validation_data_name)?;
    run.set_tag("workspace", &settings.workspace_tag)?;
    run.set_tag("booster", regressor.name())?;

    info!(
        "Fitting {} on {} rows, validating on {} rows",
        regressor.name(),
        datasets.train_labels.len(),
        datasets.validation_labels.len()
    );
    let model = regressor.fit(datasets)?;

    let validation_rmse = estimate_quality(
        &model,
        &datasets.validation_features,
        &datasets.validation_labels,
    )?;
    run.log_metric("rmse", validation_rmse)?;

    let artifact = model.to_artifact()?;
    run.log_artifact(&settings.artifact_path, &artifact.file_name, &artifact.bytes)?;

    let run_id = run.finish()?;
    info!("Run {run_id} finished with validation rmse {validation_rmse:.4}");

    Ok(TrainingOutcome {
        model,
        run_id,
        validation_rmse,
    })
}
