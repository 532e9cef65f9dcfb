use std::path::PathBuf;

use thiserror::Error;

use crate::tracking::TrackingError;

/// Errors raised by the duration pipeline stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Timestamp or zone columns are absent or unparsable while loading.
    #[error("data format error in {source_name}: {message}")]
    DataFormat {
        source_name: String,
        message: String,
    },
    /// A feature or label column is absent while building datasets.
    #[error("missing column `{column}` in {table} table")]
    MissingColumn { column: String, table: &'static str },
    /// Numerical or configuration failure while fitting.
    #[error("training failed: {0}")]
    Training(String),
    /// A fitted model could not score a feature matrix.
    #[error("prediction failed: {0}")]
    Prediction(String),
    #[error("model serialization error: {0}")]
    Model(#[from] serde_json::Error),
    #[error("tracking store error: {0}")]
    Tracking(#[from] TrackingError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("dataframe error: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("download failed: {0}")]
    Download(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub(crate) fn data_format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        PipelineError::DataFormat {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub(crate) fn training(message: impl Into<String>) -> Self {
        PipelineError::Training(message.into())
    }
}

/// Errors returned while reading a pipeline configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
