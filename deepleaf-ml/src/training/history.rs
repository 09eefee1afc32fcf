//! Phase histories and the merged, persisted training history.

use super::metrics::{MetricName, MetricSnapshot};
use super::runner::Phase;
use crate::error::MlError;
use crate::persistence;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered snapshots of a single phase, one per epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseHistory {
    phase: Phase,
    snapshots: Vec<MetricSnapshot>,
}

impl PhaseHistory {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            snapshots: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn push(&mut self, snapshot: MetricSnapshot) {
        self.snapshots.push(snapshot);
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn snapshots(&self) -> &[MetricSnapshot] {
        &self.snapshots
    }

    pub fn last(&self) -> Option<&MetricSnapshot> {
        self.snapshots.last()
    }

    pub fn values(&self, name: MetricName) -> impl Iterator<Item = f64> + '_ {
        self.snapshots.iter().map(move |s| s.value(name))
    }
}

/// The run's merged metric timeline, keyed by metric name.
///
/// Every series has one entry per epoch across both phases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub train_accuracy: Vec<f64>,
    pub train_f1_score: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub val_f1_score: Vec<f64>,
}

impl TrainingHistory {
    pub fn series(&self, name: MetricName) -> &[f64] {
        match name {
            MetricName::TrainLoss => &self.train_loss,
            MetricName::TrainAccuracy => &self.train_accuracy,
            MetricName::TrainF1 => &self.train_f1_score,
            MetricName::ValLoss => &self.val_loss,
            MetricName::ValAccuracy => &self.val_accuracy,
            MetricName::ValF1 => &self.val_f1_score,
        }
    }

    fn series_mut(&mut self, name: MetricName) -> &mut Vec<f64> {
        match name {
            MetricName::TrainLoss => &mut self.train_loss,
            MetricName::TrainAccuracy => &mut self.train_accuracy,
            MetricName::TrainF1 => &mut self.train_f1_score,
            MetricName::ValLoss => &mut self.val_loss,
            MetricName::ValAccuracy => &mut self.val_accuracy,
            MetricName::ValF1 => &mut self.val_f1_score,
        }
    }

    /// Number of epochs recorded.
    pub fn epochs(&self) -> usize {
        self.val_accuracy.len()
    }

    pub fn final_value(&self, name: MetricName) -> Option<f64> {
        self.series(name).last().copied()
    }

    /// First epoch holding the maximum of `name`, with its value.
    pub fn best(&self, name: MetricName) -> Option<(usize, f64)> {
        self.series(name)
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (epoch, value)| match best {
                Some((_, top)) if value <= top => best,
                _ => Some((epoch, value)),
            })
    }

    /// Check that every series has the same length.
    pub fn validate(&self) -> Result<(), MlError> {
        let expected = self.epochs();
        for name in MetricName::ALL {
            let len = self.series(name).len();
            if len != expected {
                return Err(MlError::history(format!(
                    "series '{}' has {len} entries, expected {expected}",
                    name.tracking_key()
                )));
            }
        }
        Ok(())
    }

    /// Load a history artifact and validate it.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let history: Self = persistence::load_json(path)?
            .ok_or_else(|| MlError::not_found(format!("history {}", path.display())))?;
        history.validate()?;
        Ok(history)
    }
}

/// Merges phase histories and writes the run's history artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistoryAggregator;

impl HistoryAggregator {
    /// Concatenate phase 1 then phase 2, epoch order preserved within each.
    pub fn merge(head: PhaseHistory, fine_tune: PhaseHistory) -> Result<TrainingHistory, MlError> {
        for phase in [&head, &fine_tune] {
            if phase.is_empty() {
                return Err(MlError::history(format!(
                    "{} phase recorded no epochs",
                    phase.phase()
                )));
            }
        }
        if head.phase() == fine_tune.phase() {
            return Err(MlError::history(format!(
                "cannot merge two {} phases",
                head.phase()
            )));
        }

        let mut merged = TrainingHistory::default();
        for name in MetricName::ALL {
            let series = merged.series_mut(name);
            series.extend(head.values(name));
            series.extend(fine_tune.values(name));
        }
        Ok(merged)
    }

    /// Write `history` as one JSON document, atomically.
    pub fn write(history: &TrainingHistory, path: &Path) -> Result<(), MlError> {
        history.validate()?;
        persistence::atomic_write_json(path, history)
    }
}
