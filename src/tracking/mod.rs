//! Experiment tracking.
//!
//! A run records parameters, tags, metrics and artifacts for one training
//! execution. [`ActiveRun`] scopes a run so it is closed exactly once: as
//! `FINISHED` through [`ActiveRun::finish`], or as `FAILED` when dropped on an
//! error path.

mod memory;
mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

pub use memory::InMemoryTrackingStore;
pub use sqlite::SqliteTrackingStore;

#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("could not write artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unsupported tracking URI `{0}`, expected sqlite:///<path>")]
    UnsupportedUri(String),
    #[error("unknown run {0}")]
    UnknownRun(String),
    #[error("run {run_id} is {status}, not RUNNING")]
    RunNotActive { run_id: String, status: RunStatus },
    #[error("{kind} `{key}` is already set to `{existing}` on run {run_id}")]
    Overwrite {
        run_id: String,
        kind: &'static str,
        key: String,
        existing: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "RUNNING" => Some(RunStatus::Running),
            "FINISHED" => Some(RunStatus::Finished),
            "FAILED" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricRecord {
    pub key: String,
    pub value: f64,
    pub step: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactRecord {
    /// `<artifact_path>/<file_name>` relative to the run's artifact directory.
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
}

/// Everything stored for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_name: String,
    pub status: RunStatus,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub params: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub metrics: Vec<MetricRecord>,
    pub artifacts: Vec<ArtifactRecord>,
}

/// Backend receiving run data.
///
/// Params and tags are write-once: logging the same value again is accepted,
/// a different value is an [`TrackingError::Overwrite`]. Writes to a run that
/// is no longer `RUNNING` fail with [`TrackingError::RunNotActive`].
pub trait TrackingStore {
    /// Start a run in `experiment_name`, creating the experiment if needed.
    fn create_run(&self, experiment_name: &str) -> Result<String, TrackingError>;

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError>;

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError>;

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<(), TrackingError>;

    fn log_artifact(
        &self,
        run_id: &str,
        artifact_path: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), TrackingError>;

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), TrackingError>;

    fn get_run(&self, run_id: &str) -> Result<RunRecord, TrackingError>;
}

/// A run that is closed when it goes out of scope.
pub struct ActiveRun<'a> {
    store: &'a dyn TrackingStore,
    run_id: String,
    closed: bool,
}

impl<'a> ActiveRun<'a> {
    pub fn start(store: &'a dyn TrackingStore, experiment_name: &str) -> Result<Self, TrackingError> {
        let run_id = store.create_run(experiment_name)?;
        tracing::info!("Started run {run_id} in experiment {experiment_name}");
        Ok(Self {
            store,
            run_id,
            closed: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn log_param(&self, key: &str, value: impl fmt::Display) -> Result<(), TrackingError> {
        self.store.log_param(&self.run_id, key, &value.to_string())
    }

    pub fn set_tag(&self, key: &str, value: &str) -> Result<(), TrackingError> {
        self.store.set_tag(&self.run_id, key, value)
    }

    pub fn log_metric(&self, key: &str, value: f64) -> Result<(), TrackingError> {
        self.store.log_metric(&self.run_id, key, value, 0)
    }

    pub fn log_artifact(&self, artifact_path: &str, file_name: &str, bytes: &[u8]) -> Result<(), TrackingError> {
        self.store.log_artifact(&self.run_id, artifact_path, file_name, bytes)
    }

    /// Close the run as `FINISHED` and return its id.
    pub fn finish(mut self) -> Result<String, TrackingError> {
        self.store.end_run(&self.run_id, RunStatus::Finished)?;
        self.closed = true;
        Ok(std::mem::take(&mut self.run_id))
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match self.store.end_run(&self.run_id, RunStatus::Failed) {
            Ok(()) => warn!("Run {} closed as FAILED", self.run_id),
            Err(err) => warn!("Could not mark run {} as FAILED: {err}", self.run_id),
        }
    }
}

/// Reject writes to runs that have already been closed.
pub(crate) fn ensure_running(run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
    if status == RunStatus::Running {
        Ok(())
    } else {
        Err(TrackingError::RunNotActive {
            run_id: run_id.to_string(),
            status,
        })
    }
}
