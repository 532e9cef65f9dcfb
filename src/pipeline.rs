//! The four stages composed into one sequential run.

use anyhow::Context;
use tracing::{info, warn};

use crate::config::{Backend, PipelineConfig, DEFAULT_CONFIG_FILE};
use crate::dataset::build_datasets;
use crate::download::ensure_trip_file;
use crate::error::PipelineResult;
use crate::evaluator::estimate_quality;
use crate::gbdt::GbdtRegressor;
use crate::loader::load_trip_data;
use crate::model::{Model, Regressor};
use crate::retry::retry;
use crate::trainer::{train_model, RunSettings};
use crate::tracking::{SqliteTrackingStore, TrackingStore};
#[cfg(feature = "xgboost")]
use crate::xgb::XgbRegressor;

/// Evaluator and trainer RMSE may differ by this much before a warning.
const RMSE_TOLERANCE: f64 = 1e-9;

/// Summary of one completed pipeline execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineReport {
    pub run_id: String,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub best_iteration: Option<usize>,
    /// RMSE logged on the tracking run.
    pub training_rmse: f64,
    /// RMSE from the independent evaluation pass.
    pub evaluation_rmse: f64,
}

/// Load, build datasets, train and evaluate, in that order.
///
/// Only dataset building is retried (`config.dataset_attempts` times). Every
/// other stage runs once and its error aborts the run.
pub fn run_pipeline<R: Regressor>(
    config: &PipelineConfig,
    store: &dyn TrackingStore,
    regressor: &R,
) -> PipelineResult<PipelineReport> {
    if config.download_missing {
        ensure_trip_file(&config.train_path, &config.download_base_url)?;
        ensure_trip_file(&config.validation_path, &config.download_base_url)?;
    }

    let train = load_trip_data(&config.train_path)?;
    let validation = load_trip_data(&config.validation_path)?;

    let datasets = retry(config.dataset_attempts, "build_datasets", |_| {
        build_datasets(&train, &validation)
    })?;

    let settings = RunSettings::from_config(config);
    let outcome = train_model(regressor, store, &settings, &datasets)?;

    let evaluation_rmse = estimate_quality(
        &outcome.model,
        &datasets.validation_features,
        &datasets.validation_labels,
    )?;
    if (evaluation_rmse - outcome.validation_rmse).abs() > RMSE_TOLERANCE {
        warn!(
            "Evaluator rmse {evaluation_rmse} differs from logged rmse {}",
            outcome.validation_rmse
        );
    }

    Ok(PipelineReport {
        run_id: outcome.run_id,
        train_rows: datasets.train_labels.len(),
        validation_rows: datasets.validation_labels.len(),
        best_iteration: outcome.model.best_iteration(),
        training_rmse: outcome.validation_rmse,
        evaluation_rmse,
    })
}

/// Parameterless entry point used by the binary.
pub fn nyc_duration_flow() -> anyhow::Result<()> {
    let config = PipelineConfig::load_or_default(DEFAULT_CONFIG_FILE)?;
    let store = SqliteTrackingStore::open(&config.tracking)
        .with_context(|| format!("opening tracking store {}", config.tracking.tracking_uri))?;

    let report = match config.backend {
        #[cfg(feature = "xgboost")]
        Backend::Xgboost => run_pipeline(&config, &store, &XgbRegressor::new(config.booster.clone())),
        #[cfg(not(feature = "xgboost"))]
        Backend::Xgboost => anyhow::bail!("backend `xgboost` needs the `xgboost` cargo feature"),
        Backend::Gbdt => run_pipeline(&config, &store, &GbdtRegressor::new(config.booster.clone())),
    }
    .context("duration pipeline failed")?;

    info!(
        "Run {} complete: {} train rows, {} validation rows, rmse {:.4}",
        report.run_id, report.train_rows, report.validation_rows, report.evaluation_rmse
    );
    if let Some(best) = report.best_iteration {
        info!("Best boosting round: {best}");
    }
    Ok(())
}
