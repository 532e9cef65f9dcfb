// SQLite-backed tracking store
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{
    ensure_running, ArtifactRecord, MetricRecord, RunRecord, RunStatus, TrackingError, TrackingStore,
};
use crate::config::TrackingConfig;

const SQLITE_SCHEME: &str = "sqlite:///";

/// Run metadata lives in SQLite. Artifact files are written under
/// `<artifact_root>/<experiment_id>/<run_id>/artifacts/`.
pub struct SqliteTrackingStore {
    conn: Mutex<Connection>,
    artifact_root: PathBuf,
}

impl SqliteTrackingStore {
    /// Open (or create) the store named by `config.tracking_uri`.
    pub fn open(config: &TrackingConfig) -> Result<Self, TrackingError> {
        let db_path = database_path(&config.tracking_uri)?;
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| TrackingError::Artifact {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let artifact_root = config.artifact_root.clone().unwrap_or_else(|| {
            db_path
                .parent()
                .unwrap_or_else(|| Path::new(""))
                .join("mlruns")
        });

        tracing::info!("Opening tracking store at {}", db_path.display());
        let conn = Connection::open(&db_path)?;
        Self::with_connection(conn, artifact_root)
    }

    /// Store whose metadata is discarded on drop. Artifacts still go to disk.
    pub fn open_in_memory(artifact_root: impl Into<PathBuf>) -> Result<Self, TrackingError> {
        Self::with_connection(Connection::open_in_memory()?, artifact_root.into())
    }

    fn with_connection(conn: Connection, artifact_root: PathBuf) -> Result<Self, TrackingError> {
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            artifact_root,
        })
    }

    /// Directory holding a run's artifacts.
    pub fn artifact_location(&self, run_id: &str) -> Result<PathBuf, TrackingError> {
        let conn = self.lock();
        let experiment_id: i64 = conn
            .query_row(
                "SELECT experiment_id FROM runs WHERE run_id = ?1",
                [run_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))?;
        Ok(self.run_artifact_dir(experiment_id, run_id))
    }

    fn run_artifact_dir(&self, experiment_id: i64, run_id: &str) -> PathBuf {
        self.artifact_root
            .join(experiment_id.to_string())
            .join(run_id)
            .join("artifacts")
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Status and experiment of a run, or `UnknownRun`.
    fn run_state(conn: &Connection, run_id: &str) -> Result<(i64, RunStatus), TrackingError> {
        let row: Option<(i64, String)> = conn
            .query_row(
                "SELECT experiment_id, status FROM runs WHERE run_id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (experiment_id, status) = row.ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))?;
        let status = RunStatus::parse(&status).unwrap_or(RunStatus::Failed);
        Ok((experiment_id, status))
    }

    fn write_once(
        &self,
        table: &'static str,
        kind: &'static str,
        run_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), TrackingError> {
        let conn = self.lock();
        let (_, status) = Self::run_state(&conn, run_id)?;
        ensure_running(run_id, status)?;

        let existing: Option<String> = conn
            .query_row(
                &format!("SELECT value FROM {table} WHERE run_id = ?1 AND key = ?2"),
                params![run_id, key],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(existing) if existing == value => Ok(()),
            Some(existing) => Err(TrackingError::Overwrite {
                run_id: run_id.to_string(),
                kind,
                key: key.to_string(),
                existing,
            }),
            None => {
                conn.execute(
                    &format!("INSERT INTO {table} (run_id, key, value) VALUES (?1, ?2, ?3)"),
                    params![run_id, key, value],
                )?;
                Ok(())
            }
        }
    }
}

impl TrackingStore for SqliteTrackingStore {
    fn create_run(&self, experiment_name: &str) -> Result<String, TrackingError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR IGNORE INTO experiments (name, created_at) VALUES (?1, ?2)",
            params![experiment_name, now_millis()],
        )?;
        let experiment_id: i64 = conn.query_row(
            "SELECT experiment_id FROM experiments WHERE name = ?1",
            [experiment_name],
            |row| row.get(0),
        )?;

        let run_id = uuid::Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO runs (run_id, experiment_id, status, start_time) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, experiment_id, RunStatus::Running.as_str(), now_millis()],
        )?;
        Ok(run_id)
    }

    fn log_param(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        self.write_once("params", "param", run_id, key, value)
    }

    fn set_tag(&self, run_id: &str, key: &str, value: &str) -> Result<(), TrackingError> {
        self.write_once("tags", "tag", run_id, key, value)
    }

    fn log_metric(&self, run_id: &str, key: &str, value: f64, step: i64) -> Result<(), TrackingError> {
        let conn = self.lock();
        let (_, status) = Self::run_state(&conn, run_id)?;
        ensure_running(run_id, status)?;
        conn.execute(
            "INSERT INTO metrics (run_id, key, value, step, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, key, value, step, now_millis()],
        )?;
        Ok(())
    }

    fn log_artifact(
        &self,
        run_id: &str,
        artifact_path: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<(), TrackingError> {
        let conn = self.lock();
        let (experiment_id, status) = Self::run_state(&conn, run_id)?;
        ensure_running(run_id, status)?;

        let dir = self.run_artifact_dir(experiment_id, run_id).join(artifact_path);
        let file_path = dir.join(file_name);
        std::fs::create_dir_all(&dir)
            .and_then(|_| std::fs::write(&file_path, bytes))
            .map_err(|source| TrackingError::Artifact {
                path: file_path.clone(),
                source,
            })?;

        let relative = format!("{}/{}", artifact_path.trim_end_matches('/'), file_name);
        let digest = hex::encode(Sha256::digest(bytes));
        conn.execute(
            "INSERT OR REPLACE INTO artifacts (run_id, path, size_bytes, sha256) VALUES (?1, ?2, ?3, ?4)",
            params![run_id, relative, bytes.len() as i64, digest],
        )?;
        tracing::debug!("Stored artifact {} ({} bytes)", file_path.display(), bytes.len());
        Ok(())
    }

    fn end_run(&self, run_id: &str, status: RunStatus) -> Result<(), TrackingError> {
        let conn = self.lock();
        let (_, current) = Self::run_state(&conn, run_id)?;
        ensure_running(run_id, current)?;
        conn.execute(
            "UPDATE runs SET status = ?1, end_time = ?2 WHERE run_id = ?3",
            params![status.as_str(), now_millis(), run_id],
        )?;
        Ok(())
    }

    fn get_run(&self, run_id: &str) -> Result<RunRecord, TrackingError> {
        let conn = self.lock();
        let row: Option<(String, String, i64, Option<i64>)> = conn
            .query_row(
                "SELECT e.name, r.status, r.start_time, r.end_time
                 FROM runs r JOIN experiments e ON e.experiment_id = r.experiment_id
                 WHERE r.run_id = ?1",
                [run_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let (experiment_name, status, start_time, end_time) =
            row.ok_or_else(|| TrackingError::UnknownRun(run_id.to_string()))?;

        let params = key_values(&conn, "params", run_id)?;
        let tags = key_values(&conn, "tags", run_id)?;

        let mut stmt =
            conn.prepare("SELECT key, value, step FROM metrics WHERE run_id = ?1 ORDER BY id")?;
        let metrics = stmt
            .query_map([run_id], |row| {
                Ok(MetricRecord {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    step: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt =
            conn.prepare("SELECT path, size_bytes, sha256 FROM artifacts WHERE run_id = ?1 ORDER BY path")?;
        let artifacts = stmt
            .query_map([run_id], |row| {
                let size: i64 = row.get(1)?;
                Ok(ArtifactRecord {
                    path: row.get(0)?,
                    size_bytes: size.max(0) as u64,
                    sha256: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RunRecord {
            run_id: run_id.to_string(),
            experiment_name,
            status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
            start_time,
            end_time,
            params,
            tags,
            metrics,
            artifacts,
        })
    }
}

/// Filesystem path named by a `sqlite:///` URI. Four slashes give an
/// absolute path, three a path relative to the working directory.
fn database_path(uri: &str) -> Result<PathBuf, TrackingError> {
    match uri.strip_prefix(SQLITE_SCHEME) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(TrackingError::UnsupportedUri(uri.to_string())),
    }
}

fn key_values(
    conn: &Connection,
    table: &'static str,
    run_id: &str,
) -> Result<BTreeMap<String, String>, TrackingError> {
    let mut stmt = conn.prepare(&format!("SELECT key, value FROM {table} WHERE run_id = ?1"))?;
    let pairs = stmt
        .query_map([run_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<BTreeMap<String, String>, _>>()?;
    Ok(pairs)
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn run_migrations(conn: &Connection) -> Result<(), TrackingError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    if current_version < 1 {
        migration_v1(conn)?;
        conn.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [1])?;
    }
    Ok(())
}

fn migration_v1(conn: &Connection) -> Result<(), TrackingError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS experiments (
            experiment_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS runs (
            run_id TEXT PRIMARY KEY,
            experiment_id INTEGER NOT NULL,
            status TEXT NOT NULL,
            start_time INTEGER NOT NULL,
            end_time INTEGER,
            FOREIGN KEY (experiment_id) REFERENCES experiments(experiment_id)
        );
        CREATE INDEX IF NOT EXISTS idx_runs_experiment_id ON runs(experiment_id);
        CREATE TABLE IF NOT EXISTS params (
            run_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (run_id, key),
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS tags (
            run_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (run_id, key),
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS metrics (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            key TEXT NOT NULL,
            value REAL NOT NULL,
            step INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );
        CREATE TABLE IF NOT EXISTS artifacts (
            run_id TEXT NOT NULL,
            path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            sha256 TEXT NOT NULL,
            PRIMARY KEY (run_id, path),
            FOREIGN KEY (run_id) REFERENCES runs(run_id) ON DELETE CASCADE
        );",
    )?;
    Ok(())
}
