use std::cell::RefCell;
use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use super::{
    ensure_running, ArtifactRecord, MetricRecord, RunRecord, RunStatus, TrackingError, TrackingStore,
};

/// Tracking store that keeps everything in process memory.
///
/// Used by tests and dry runs where nothing should touch the filesystem.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    runs: RefCell<Vec<RunRecord>>,
    artifacts: RefCell<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every run in creation order.
    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.borrow().clone()
    }

    /// Bytes stored for `<artifact_path>/<file_name>` on a run.
    pub fn artifact_bytes(&self, run_id: &str, path: &str) -> Option<Vec<u8>> {
        self.artifacts
            .borrow()
            .get(&(run_id.to_string(), path.to_string()))
            .cloned()
    }

    fn with_active_run<T>(
        &self,
        run_id: &str,
        f: impl FnOnce(&mut RunRecord) -> Result<T, TrackingError>,
    ) -> Result<T, TrackingError> {
        let mut runs = self.runs.borrow_mut();
        let run = runs
            .iter_mut()
            .find(|run| run.run_id == run_id)
            .ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))?;
        ensure_running(run_id, run.status)?;
        f(run)
    }
}

fn write_once(
    map: &mut BTreeMap<String, String>,
    run_id: &str,
    kind: &'static str,
    key: &str,
    value: &str,
) -> Result<(), TrackingError> {
    match map.get(key) {
        Some(existing) if existing == value => Ok(()),
        Some(existing) => Err(TrackingError::Overwrite {
            run_id: run_id.to_string(),
            kind,
            key: key.to_string(),
            existing: existing.clone(),
        }),
        None => {
            map.insert(key.to_string(), value.to_string());
            Ok(())
        }
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn create_run(&self, experiment_name: &str) -> Result<String, TrackingError> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        self.runs.borrow_mut().push(RunRecord {
            run_id: run_id.clone(),
            experiment_name: experiment_name.to_string(),
            status: RunStatus::Running,
            start_time: chrono::Utc::now().timestamp_millis(),
            end_time: None,
            params: BTreeMap::new(),
            tags: BTreeMap::new(),
            metrics: Vec::new(),
            artifacts: Vec::new(),
        });
        Ok(run_id)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        self.with_active_run(run_id, |run| write_once(&mut run.params, run_id, "param", key, value))
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        self.with_active_run(run_id, |run| write_once(&mut run.tags, run_id, "tag", key, value))
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<(), TrackingError> {
        self.with_active_run(run_id, |run| {
            run.metrics.push(MetricRecord {
                key: key.to_string(),
                value,
                step,
            });
            Ok(())
        })
    }

    fn log_artifact(
        &self,
        run_id: &str,
        artifact_path: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), TrackingError> {
        let path = format!("{}/{}", artifact_path.trim_end_matches('/'), file_name);
        self.with_active_run(run_id, |run| {
            run.artifacts.retain(|artifact| artifact.path != path);
            run.artifacts.push(ArtifactRecord {
                path: path.clone(),
                size_bytes: bytes.len() as u64,
                sha256: hex::encode(Sha256::digest(bytes)),
            });
            Ok(())
        })?;
        self.artifacts
            .borrow_mut()
            .insert((run_id.to_string(), path), bytes.to_vec());
        Ok(())
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        self.with_active_run(run_id, |run| {
            run.status = status;
            run.end_time = Some(chrono::Utc::now().timestamp_millis());
            Ok(())
        })
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord, TrackingError> {
        self.runs
            .borrow()
            .iter()
            .find(|run| run.run_id == run_id)
            .cloned()
            .ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stores_artifact_bytes() {
        let store = InMemoryTrackingStore::new();
        let run_id = store.create_run("exp").unwrap();
        store.log_artifact(&run_id, "model/", "model.json", b"abc").unwrap();

        assert_eq!(store.artifact_bytes(&run_id, "model/model.json"), Some(b"abc".to_vec()));
        let run = store.get_run(&run_id).unwrap();
        assert_eq!(run.artifacts[0].size_bytes, 3);
    }

    #[test]
    fn tags_reject_different_values() {
        let store = InMemoryTrackingStore::new();
        let run_id = store.create_run("exp").unwrap();
        store.set_tag(&run_id, "workspace", "prefect").unwrap();
        store.set_tag(&run_id, "workspace", "prefect").unwrap();

        assert!(matches!(
            store.set_tag(&run_id, "workspace", "local"),
            Err(TrackingError::Overwrite { kind: "tag", .. })
        ));
    }

    #[test]
    fn ended_run_cannot_be_ended_again() {
        let store = InMemoryTrackingStore::new();
        let run_id = store.create_run("exp").unwrap();
        store.end_run(&run_id, RunStatus::Finished).unwrap();

        assert!(store.end_run(&run_id, RunStatus::Failed).is_err());
        assert_eq!(store.get_run(&run_id).unwrap().status, RunStatus::Finished);
    }

    #[test]
    fn unknown_run_is_reported() {
        let store = InMemoryTrackingStore::new();
        assert!(matches!(
            store.log_metric("nope", "rmse", 1.0, 0),
            Err(TrackingError::UnknownRun(_))
        ));
    }
}
