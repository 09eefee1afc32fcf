//! Experiment tracking: run lifecycle, metric and param emission, historical best.

pub mod local;
pub mod mlflow;
pub mod store;

pub use local::LocalTracker;
pub use mlflow::MlflowClient;
pub use store::TrackingStore;

use crate::config::{TrackingBackend, TrackingConfig};
use crate::error::MlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Metric that every run logs as its running best validation accuracy.
pub const BEST_VAL_ACCURACY: &str = "best_val_accuracy";
pub const BEST_VAL_F1: &str = "best_val_f1_score";
pub const FINAL_VAL_ACCURACY: &str = "final_val_accuracy";
pub const FINAL_VAL_F1: &str = "final_val_f1_score";

/// Lifecycle status of a tracked run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
        }
    }
}

/// Client side of an experiment tracking service.
///
/// A tracker holds at most one active run; `log_*` calls without an active
/// run fail with [`MlError::Tracking`].
#[async_trait]
pub trait ExperimentTracker: Send + Sync {
    /// Start a run in `experiment`, creating the experiment when needed.
    /// Returns the new run id.
    async fn start_run(&self, experiment: &str) -> Result<String, MlError>;

    /// Close the active run with `status`.
    async fn end_run(&self, status: RunStatus) -> Result<(), MlError>;

    /// `step` is `None` for running summaries such as the best-so-far values.
    async fn log_metric(&self, key: &str, value: f64, step: Option<u64>) -> Result<(), MlError>;

    async fn log_param(&self, key: &str, value: &str) -> Result<(), MlError>;

    /// Attach a local file to the active run under `artifact_path`.
    async fn log_artifact(&self, local_path: &Path, artifact_path: &str) -> Result<(), MlError>;

    /// Highest `best_val_accuracy` across the finished runs of `experiment`.
    ///
    /// Returns `0.0` when the experiment does not exist or no finished run
    /// logged the metric.
    async fn get_historical_best(&self, experiment: &str) -> Result<f64, MlError>;
}

/// Build the tracker selected by `config`.
pub fn build_tracker(config: &TrackingConfig) -> Result<Arc<dyn ExperimentTracker>, MlError> {
    match config.backend {
        TrackingBackend::Local => Ok(Arc::new(LocalTracker::open(&config.local_store)?)),
        TrackingBackend::Mlflow => {
            let mut client = MlflowClient::new(&config.tracking_uri)?;
            if let Some((username, password)) = config.credentials() {
                client = client.with_basic_auth(username, password);
            }
            Ok(Arc::new(client))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_status_wire_names() {
        assert_eq!(RunStatus::Finished.as_str(), "FINISHED");
        assert_eq!(
            serde_json::to_string(&RunStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[tokio::test]
    async fn test_build_local_tracker() {
        let dir = TempDir::new().unwrap();
        let config = TrackingConfig {
            local_store: dir.path().join("tracking.json"),
            ..TrackingConfig::default()
        };
        let tracker = build_tracker(&config).unwrap();
        assert_eq!(tracker.get_historical_best("anything").await.unwrap(), 0.0);
    }

    #[test]
    fn test_build_mlflow_tracker_rejects_bad_uri() {
        let config = TrackingConfig {
            backend: TrackingBackend::Mlflow,
            tracking_uri: "not a url".into(),
            ..TrackingConfig::default()
        };
        assert!(build_tracker(&config).is_err());
    }
}
