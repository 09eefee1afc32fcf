//! File-backed experiment tracker.
//!
//! Keeps the whole [`TrackingStore`] in memory and rewrites the JSON store
//! atomically whenever a run ends, so a later process sees every finished run.

use super::store::{ArtifactRecord, MetricRecord, ParamRecord, RunRecord, TrackingStore};
use super::{BEST_VAL_ACCURACY, ExperimentTracker, RunStatus};
use crate::error::MlError;
use crate::persistence;
use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct LocalState {
    store: TrackingStore,
    active_run: Option<String>,
}

/// Tracker writing to a local JSON store.
#[derive(Debug)]
pub struct LocalTracker {
    path: Option<PathBuf>,
    state: Mutex<LocalState>,
}

impl LocalTracker {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: &Path) -> Result<Self, MlError> {
        let store = persistence::load_json::<TrackingStore>(path)?.unwrap_or_default();
        debug!(
            path = %path.display(),
            runs = store.runs.len(),
            "Opened local tracking store"
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(LocalState {
                store,
                active_run: None,
            }),
        })
    }

    /// A tracker that never touches the filesystem.
    pub fn in_memory() -> Self {
        Self::from_store(TrackingStore::new())
    }

    pub fn from_store(store: TrackingStore) -> Self {
        Self {
            path: None,
            state: Mutex::new(LocalState {
                store,
                active_run: None,
            }),
        }
    }

    /// Copy of the current store contents.
    pub async fn snapshot(&self) -> TrackingStore {
        self.state.lock().await.store.clone()
    }

    pub async fn active_run(&self) -> Option<String> {
        self.state.lock().await.active_run.clone()
    }

    fn active(state: &LocalState) -> Result<String, MlError> {
        state
            .active_run
            .clone()
            .ok_or_else(|| MlError::tracking("no active run"))
    }

    fn flush(&self, store: &TrackingStore) -> Result<(), MlError> {
        if let Some(path) = &self.path {
            persistence::atomic_write_json(path, store)?;
        }
        Ok(())
    }

    fn artifact_root(&self) -> Option<PathBuf> {
        self.path
            .as_ref()
            .map(|p| p.parent().unwrap_or(Path::new(".")).join("artifacts"))
    }
}

#[async_trait]
impl ExperimentTracker for LocalTracker {
    async fn start_run(&self, experiment: &str) -> Result<String, MlError> {
        let mut state = self.state.lock().await;
        if let Some(run_id) = &state.active_run {
            return Err(MlError::tracking(format!("run {run_id} is still active")));
        }
        let experiment_id = state.store.get_or_create_experiment(experiment);
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        state.store.runs.push(RunRecord {
            run_id: run_id.clone(),
            experiment_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        });
        state.active_run = Some(run_id.clone());
        info!(run_id = %run_id, experiment, "Started local tracking run");
        Ok(run_id)
    }

    async fn end_run(&self, status: RunStatus) -> Result<(), MlError> {
        let mut state = self.state.lock().await;
        let run_id = Self::active(&state)?;
        if let Some(run) = state.store.run_mut(&run_id) {
            run.status = status;
            run.ended_at = Some(Utc::now());
        }
        state.active_run = None;
        self.flush(&state.store)?;
        info!(run_id = %run_id, status = status.as_str(), "Ended local tracking run");
        Ok(())
    }

    async fn log_metric(&self, key: &str, value: f64, step: Option<u64>) -> Result<(), MlError> {
        if !value.is_finite() {
            return Err(MlError::invalid_input(format!(
                "metric '{key}' is not finite: {value}"
            )));
        }
        let mut state = self.state.lock().await;
        let run_id = Self::active(&state)?;
        state.store.metrics.push(MetricRecord {
            run_id,
            key: key.to_string(),
            value,
            step,
            logged_at: Utc::now(),
        });
        Ok(())
    }

    async fn log_param(&self, key: &str, value: &str) -> Result<(), MlError> {
        let mut state = self.state.lock().await;
        let run_id = Self::active(&state)?;
        state.store.params.push(ParamRecord {
            run_id,
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn log_artifact(&self, local_path: &Path, artifact_path: &str) -> Result<(), MlError> {
        let run_id = Self::active(&*self.state.lock().await)?;
        let size_bytes = tokio::fs::metadata(local_path).await?.len();

        let stored_at = match self.artifact_root() {
            Some(root) => {
                let file_name = local_path
                    .file_name()
                    .ok_or_else(|| MlError::invalid_input("artifact path has no file name"))?;
                let dest = root.join(&run_id).join(artifact_path).join(file_name);
                if let Some(parent) = dest.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::copy(local_path, &dest).await?;
                dest
            }
            None => local_path.to_path_buf(),
        };
        debug!(run_id = %run_id, stored_at = %stored_at.display(), size_bytes, "Stored artifact");

        self.state.lock().await.store.artifacts.push(ArtifactRecord {
            run_id,
            artifact_path: artifact_path.to_string(),
            stored_at,
            size_bytes,
        });
        Ok(())
    }

    async fn get_historical_best(&self, experiment: &str) -> Result<f64, MlError> {
        let state = self.state.lock().await;
        let best = state
            .store
            .ranked_finished_runs(experiment, BEST_VAL_ACCURACY)
            .first()
            .map(|(_, value)| *value)
            .unwrap_or(0.0);
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn finished_run(tracker: &LocalTracker, experiment: &str, best: f64) {
        tracker.start_run(experiment).await.unwrap();
        tracker
            .log_metric(BEST_VAL_ACCURACY, best, None)
            .await
            .unwrap();
        tracker.end_run(RunStatus::Finished).await.unwrap();
    }

    #[tokio::test]
    async fn test_historical_best_missing_experiment_is_zero() {
        let tracker = LocalTracker::in_memory();
        assert_eq!(tracker.get_historical_best("plants").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_historical_best_without_metric_is_zero() {
        let tracker = LocalTracker::in_memory();
        tracker.start_run("plants").await.unwrap();
        tracker.log_metric("val_accuracy", 0.9, Some(0)).await.unwrap();
        tracker.end_run(RunStatus::Finished).await.unwrap();
        assert_eq!(tracker.get_historical_best("plants").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_historical_best_is_max_over_finished_runs() {
        let tracker = LocalTracker::in_memory();
        finished_run(&tracker, "plants", 0.72).await;
        finished_run(&tracker, "plants", 0.81).await;
        finished_run(&tracker, "plants", 0.64).await;
        finished_run(&tracker, "other", 0.99).await;

        assert_eq!(tracker.get_historical_best("plants").await.unwrap(), 0.81);
    }

    #[tokio::test]
    async fn test_active_and_failed_runs_are_ignored() {
        let tracker = LocalTracker::in_memory();
        finished_run(&tracker, "plants", 0.5).await;

        tracker.start_run("plants").await.unwrap();
        tracker.log_metric(BEST_VAL_ACCURACY, 0.9, None).await.unwrap();
        assert_eq!(tracker.get_historical_best("plants").await.unwrap(), 0.5);
        tracker.end_run(RunStatus::Failed).await.unwrap();
        assert_eq!(tracker.get_historical_best("plants").await.unwrap(), 0.5);
    }

    #[tokio::test]
    async fn test_logging_without_active_run_fails() {
        let tracker = LocalTracker::in_memory();
        let err = tracker.log_metric("loss", 1.0, Some(0)).await.unwrap_err();
        assert!(matches!(err, MlError::Tracking(_)));
        assert!(tracker.end_run(RunStatus::Finished).await.is_err());
    }

    #[tokio::test]
    async fn test_second_start_while_active_fails() {
        let tracker = LocalTracker::in_memory();
        tracker.start_run("plants").await.unwrap();
        assert!(tracker.start_run("plants").await.is_err());
    }

    #[tokio::test]
    async fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracking.json");

        {
            let tracker = LocalTracker::open(&path).unwrap();
            finished_run(&tracker, "plants", 0.77).await;
        }

        let reopened = LocalTracker::open(&path).unwrap();
        assert_eq!(reopened.get_historical_best("plants").await.unwrap(), 0.77);
        assert_eq!(reopened.snapshot().await.runs.len(), 1);
    }

    #[tokio::test]
    async fn test_log_artifact_copies_file() {
        let dir = TempDir::new().unwrap();
        let tracker = LocalTracker::open(&dir.path().join("tracking.json")).unwrap();
        let model = dir.path().join("model_20250101_000000.keras");
        std::fs::write(&model, b"weights").unwrap();

        let run_id = tracker.start_run("plants").await.unwrap();
        tracker.log_artifact(&model, "model").await.unwrap();

        let store = tracker.snapshot().await;
        let artifact = &store.artifacts[0];
        assert_eq!(artifact.run_id, run_id);
        assert_eq!(artifact.size_bytes, 7);
        assert!(artifact.stored_at.exists());
        assert!(artifact.stored_at.ends_with("model/model_20250101_000000.keras"));
    }

    #[tokio::test]
    async fn test_log_artifact_missing_file_records_nothing() {
        let dir = TempDir::new().unwrap();
        let tracker = LocalTracker::open(&dir.path().join("tracking.json")).unwrap();
        tracker.start_run("plants").await.unwrap();

        let err = tracker
            .log_artifact(&dir.path().join("missing.keras"), "model")
            .await
            .unwrap_err();
        assert!(matches!(err, MlError::Io(_)));
        assert!(tracker.snapshot().await.artifacts.is_empty());
        // The lock was released; the run can still be closed.
        tracker.end_run(RunStatus::Failed).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_finite_metrics_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tracking.json");

        {
            let tracker = LocalTracker::open(&path).unwrap();
            tracker.start_run("plants").await.unwrap();
            for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                let err = tracker.log_metric("val_f1_score", value, None).await.unwrap_err();
                assert!(matches!(err, MlError::InvalidInput(_)));
            }
            tracker.log_metric("val_f1_score", 0.0, None).await.unwrap();
            tracker.end_run(RunStatus::Finished).await.unwrap();
        }

        let reopened = LocalTracker::open(&path).unwrap();
        let store = reopened.snapshot().await;
        assert_eq!(store.metrics.len(), 1);
        assert_eq!(store.metrics[0].value, 0.0);
    }
}
