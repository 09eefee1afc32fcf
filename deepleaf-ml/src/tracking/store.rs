//! In-memory tracking records shared by the local tracker.

use super::RunStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A named experiment grouping runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    pub experiment_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// One execution of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// A single metric observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub run_id: String,
    pub key: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<u64>,
    pub logged_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamRecord {
    pub run_id: String,
    pub key: String,
    pub value: String,
}

/// A file attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub run_id: String,
    pub artifact_path: String,
    pub stored_at: PathBuf,
    pub size_bytes: u64,
}

/// All tracking data, serialized as one JSON document by the local tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingStore {
    #[serde(default)]
    pub experiments: Vec<ExperimentRecord>,
    #[serde(default)]
    pub runs: Vec<RunRecord>,
    #[serde(default)]
    pub metrics: Vec<MetricRecord>,
    #[serde(default)]
    pub params: Vec<ParamRecord>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
}

impl TrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn experiment_by_name(&self, name: &str) -> Option<&ExperimentRecord> {
        self.experiments.iter().find(|e| e.name == name)
    }

    /// Return the id of `name`, creating the experiment if it does not exist.
    pub fn get_or_create_experiment(&mut self, name: &str) -> String {
        if let Some(existing) = self.experiment_by_name(name) {
            return existing.experiment_id.clone();
        }
        let experiment_id = self.experiments.len().to_string();
        self.experiments.push(ExperimentRecord {
            experiment_id: experiment_id.clone(),
            name: name.to_string(),
            created_at: Utc::now(),
        });
        experiment_id
    }

    pub fn run(&self, run_id: &str) -> Option<&RunRecord> {
        self.runs.iter().find(|r| r.run_id == run_id)
    }

    pub fn run_mut(&mut self, run_id: &str) -> Option<&mut RunRecord> {
        self.runs.iter_mut().find(|r| r.run_id == run_id)
    }

    pub fn runs_for_experiment(&self, experiment_id: &str) -> Vec<&RunRecord> {
        self.runs
            .iter()
            .filter(|r| r.experiment_id == experiment_id)
            .collect()
    }

    /// Latest value logged for `key` in `run_id`, by insertion order.
    pub fn latest_metric(&self, run_id: &str, key: &str) -> Option<f64> {
        self.metrics
            .iter()
            .rev()
            .find(|m| m.run_id == run_id && m.key == key)
            .map(|m| m.value)
    }

    /// Stepped values of `key` for `run_id`, ordered by step.
    pub fn metric_series(&self, run_id: &str, key: &str) -> Vec<(u64, f64)> {
        let mut series: Vec<(u64, f64)> = self
            .metrics
            .iter()
            .filter(|m| m.run_id == run_id && m.key == key)
            .filter_map(|m| m.step.map(|step| (step, m.value)))
            .collect();
        series.sort_by_key(|(step, _)| *step);
        series
    }

    /// Finished runs of `experiment` ordered by their latest `key` value,
    /// descending; the first entry is the best run. Runs that never logged
    /// `key` are skipped.
    pub fn ranked_finished_runs(&self, experiment: &str, key: &str) -> Vec<(&RunRecord, f64)> {
        let Some(exp) = self.experiment_by_name(experiment) else {
            return Vec::new();
        };
        let mut ranked: Vec<(&RunRecord, f64)> = self
            .runs_for_experiment(&exp.experiment_id)
            .into_iter()
            .filter(|r| r.status == RunStatus::Finished)
            .filter_map(|r| self.latest_metric(&r.run_id, key).map(|v| (r, v)))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }

    pub fn params_for_run(&self, run_id: &str) -> Vec<&ParamRecord> {
        self.params.iter().filter(|p| p.run_id == run_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &mut TrackingStore, id: &str, experiment: &str, status: RunStatus) {
        let experiment_id = store.get_or_create_experiment(experiment);
        store.runs.push(RunRecord {
            run_id: id.to_string(),
            experiment_id,
            status,
            started_at: Utc::now(),
            ended_at: None,
        });
    }

    fn metric(store: &mut TrackingStore, run_id: &str, key: &str, value: f64, step: Option<u64>) {
        store.metrics.push(MetricRecord {
            run_id: run_id.to_string(),
            key: key.to_string(),
            value,
            step,
            logged_at: Utc::now(),
        });
    }

    #[test]
    fn test_get_or_create_experiment_is_idempotent() {
        let mut store = TrackingStore::new();
        let a = store.get_or_create_experiment("plants");
        let b = store.get_or_create_experiment("plants");
        let c = store.get_or_create_experiment("other");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(store.experiments.len(), 2);
    }

    #[test]
    fn test_latest_metric_wins() {
        let mut store = TrackingStore::new();
        metric(&mut store, "r1", "best_val_accuracy", 0.6, None);
        metric(&mut store, "r1", "best_val_accuracy", 0.7, None);
        assert_eq!(store.latest_metric("r1", "best_val_accuracy"), Some(0.7));
        assert_eq!(store.latest_metric("r1", "missing"), None);
    }

    #[test]
    fn test_metric_series_ordered_by_step() {
        let mut store = TrackingStore::new();
        metric(&mut store, "r1", "val_loss", 0.2, Some(2));
        metric(&mut store, "r1", "val_loss", 0.4, Some(0));
        metric(&mut store, "r1", "val_loss", 0.3, Some(1));
        let steps: Vec<u64> = store
            .metric_series("r1", "val_loss")
            .iter()
            .map(|(s, _)| *s)
            .collect();
        assert_eq!(steps, vec![0, 1, 2]);
    }

    #[test]
    fn test_ranked_finished_runs_descending_and_skips_active() {
        let mut store = TrackingStore::new();
        run(&mut store, "a", "plants", RunStatus::Finished);
        run(&mut store, "b", "plants", RunStatus::Finished);
        run(&mut store, "c", "plants", RunStatus::Running);
        run(&mut store, "d", "plants", RunStatus::Finished);
        metric(&mut store, "a", "best_val_accuracy", 0.71, None);
        metric(&mut store, "b", "best_val_accuracy", 0.83, None);
        metric(&mut store, "c", "best_val_accuracy", 0.99, None);

        let ranked = store.ranked_finished_runs("plants", "best_val_accuracy");
        let ids: Vec<&str> = ranked.iter().map(|(r, _)| r.run_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(ranked[0].1, 0.83);
    }

    #[test]
    fn test_ranked_finished_runs_unknown_experiment() {
        let store = TrackingStore::new();
        assert!(store.ranked_finished_runs("nope", "best_val_accuracy").is_empty());
    }
}
