//! Taxi trip-duration training pipeline.
//!
//! Loads monthly trip files, builds feature matrices, fits a boosted-tree
//! regressor with early stopping and records the run in a tracking store.

pub mod config;
pub mod dataset;
pub mod download;
pub mod error;
pub mod evaluator;
pub mod features;
pub mod gbdt;
pub mod loader;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod retry;
pub mod trainer;
pub mod tracking;
#[cfg(feature = "xgboost")]
pub mod xgb;

pub use config::{Backend, PipelineConfig, TrackingConfig};
pub use dataset::{build_datasets, Datasets, FeatureMatrix, LabelVector};
pub use error::{ConfigError, PipelineError, PipelineResult};
pub use evaluator::estimate_quality;
pub use loader::load_trip_data;
pub use model::{Model, ModelArtifact, Regressor};
pub use pipeline::{nyc_duration_flow, run_pipeline, PipelineReport};
pub use trainer::{train_model, RunSettings, TrainingOutcome};
