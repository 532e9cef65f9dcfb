//! Pipeline configuration.
//!
//! Every field has a default matching the fixed constants the pipeline has
//! always used, so an empty or missing config file reproduces the standard run.
//! A TOML file only needs to name the keys it overrides.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::gbdt::BoosterParams;

/// Config file looked up in the working directory by the binary.
pub const DEFAULT_CONFIG_FILE: &str = "trip_duration.toml";

/// Public mirror serving the monthly trip-data files.
pub const DEFAULT_DOWNLOAD_BASE_URL: &str = "https://d37ci6vzurychx.cloudfront.net/trip-data";

/// Learner used to fit the duration model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The XGBoost library, available with the `xgboost` feature.
    Xgboost,
    /// The built-in histogram booster.
    Gbdt,
}

impl Default for Backend {
    fn default() -> Self {
        if cfg!(feature = "xgboost") {
            Backend::Xgboost
        } else {
            Backend::Gbdt
        }
    }
}

/// Where the tracking store lives and how runs are labelled.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Connection string, `sqlite:///relative.db` or `sqlite:////absolute.db`.
    pub tracking_uri: String,
    pub experiment_name: String,
    /// Directory for artifact files. Defaults to `mlruns` next to the database.
    pub artifact_root: Option<PathBuf>,
    /// Sub-path under the run's artifact directory for the model.
    pub artifact_path: String,
    /// Value of the `workspace` tag.
    pub workspace_tag: String,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            tracking_uri: "sqlite:///mlflow.db".to_string(),
            experiment_name: "nyc-data-experiment".to_string(),
            artifact_root: None,
            artifact_path: "model".to_string(),
            workspace_tag: "prefect".to_string(),
        }
    }
}

/// Full configuration for one pipeline execution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub train_path: PathBuf,
    pub validation_path: PathBuf,
    /// Fetch trip files that are missing on disk before loading.
    pub download_missing: bool,
    /// URL prefix the missing files are fetched from.
    pub download_base_url: String,
    /// Attempts for the dataset-building step before its error propagates.
    pub dataset_attempts: u32,
    pub backend: Backend,
    pub tracking: TrackingConfig,
    pub booster: BoosterParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            train_path: PathBuf::from("green_tripdata_2021-01.parquet"),
            validation_path: PathBuf::from("green_tripdata_2021-02.parquet"),
            download_missing: false,
            download_base_url: DEFAULT_DOWNLOAD_BASE_URL.to_string(),
            dataset_attempts: 3,
            backend: Backend::default(),
            tracking: TrackingConfig::default(),
            booster: BoosterParams::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document, filling unspecified keys with defaults.
    pub fn from_toml_str(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read and parse a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents, path)
    }

    /// Read `path` when it exists, otherwise fall back to the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            tracing::info!("Loading pipeline config from {}", path.display());
            Self::from_toml_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// File name component of a dataset path, used as the provenance param.
pub(crate) fn dataset_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_standard_run() {
        let config = PipelineConfig::default();
        assert_eq!(config.train_path, PathBuf::from("green_tripdata_2021-01.parquet"));
        assert_eq!(config.validation_path, PathBuf::from("green_tripdata_2021-02.parquet"));
        assert_eq!(config.dataset_attempts, 3);
        assert_eq!(config.tracking.tracking_uri, "sqlite:///mlflow.db");
        assert_eq!(config.tracking.experiment_name, "nyc-data-experiment");
        assert_eq!(config.booster.max_depth, 5);
        assert_eq!(config.booster.num_boost_round, 500);
        assert_eq!(config.booster.early_stopping_rounds, 50);
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let toml = r#"
            train_path = "jan.csv"
            download_missing = true

            [tracking]
            experiment_name = "local-experiment"

            [booster]
            max_depth = 3
        "#;
        let config = PipelineConfig::from_toml_str(toml, Path::new("inline.toml")).unwrap();

        assert_eq!(config.train_path, PathBuf::from("jan.csv"));
        assert_eq!(config.validation_path, PathBuf::from("green_tripdata_2021-02.parquet"));
        assert!(config.download_missing);
        assert_eq!(config.download_base_url, DEFAULT_DOWNLOAD_BASE_URL);
        assert_eq!(config.tracking.experiment_name, "local-experiment");
        assert_eq!(config.tracking.tracking_uri, "sqlite:///mlflow.db");
        assert_eq!(config.booster.max_depth, 3);
        assert_eq!(config.booster.seed, 111);
    }

    #[test]
    fn backend_is_selected_by_name() {
        let config = PipelineConfig::from_toml_str("backend = \"gbdt\"", Path::new("inline.toml")).unwrap();
        assert_eq!(config.backend, Backend::Gbdt);

        let config = PipelineConfig::from_toml_str("backend = \"xgboost\"", Path::new("inline.toml")).unwrap();
        assert_eq!(config.backend, Backend::Xgboost);

        assert!(PipelineConfig::from_toml_str("backend = \"lightgbm\"", Path::new("inline.toml")).is_err());
    }

    #[cfg(feature = "xgboost")]
    #[test]
    fn xgboost_is_the_default_backend() {
        assert_eq!(PipelineConfig::default().backend, Backend::Xgboost);
    }

    #[test]
    fn invalid_toml_reports_path() {
        let err = PipelineConfig::from_toml_str("dataset_attempts = \"three\"", Path::new("bad.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref path, .. } if path == Path::new("bad.toml")));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn dataset_name_strips_directories() {
        assert_eq!(
            dataset_name(Path::new("data/green_tripdata_2021-01.parquet")),
            "green_tripdata_2021-01.parquet"
        );
    }
}
