//! Per-epoch metric snapshots.

use crate::model::EpochLogs;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// The six scalar metrics recorded every epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricName {
    TrainLoss,
    TrainAccuracy,
    TrainF1,
    ValLoss,
    ValAccuracy,
    ValF1,
}

impl MetricName {
    /// Emission order; downstream consumers rely on it.
    pub const ALL: [MetricName; 6] = [
        MetricName::TrainLoss,
        MetricName::TrainAccuracy,
        MetricName::TrainF1,
        MetricName::ValLoss,
        MetricName::ValAccuracy,
        MetricName::ValF1,
    ];

    /// Name used for tracker emission and in the history artifact.
    pub fn tracking_key(&self) -> &'static str {
        match self {
            Self::TrainLoss => "train_loss",
            Self::TrainAccuracy => "train_accuracy",
            Self::TrainF1 => "train_f1_score",
            Self::ValLoss => "val_loss",
            Self::ValAccuracy => "val_accuracy",
            Self::ValF1 => "val_f1_score",
        }
    }

    /// Key the training framework reports in its epoch logs.
    pub fn log_key(&self) -> &'static str {
        match self {
            Self::TrainLoss => "loss",
            Self::TrainAccuracy => "accuracy",
            Self::TrainF1 => "f1_score",
            Self::ValLoss => "val_loss",
            Self::ValAccuracy => "val_accuracy",
            Self::ValF1 => "val_f1_score",
        }
    }

    /// The logged value, or `None` when it is absent or not finite.
    pub fn read(&self, logs: &EpochLogs) -> Option<f64> {
        logs.get(self.log_key()).filter(|value| value.is_finite())
    }
}

/// One epoch's recorded metrics.
///
/// Built once from the framework's [`EpochLogs`]. A key that is absent, or
/// whose value is not finite, is recorded as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Zero-based epoch index across the whole run.
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub train_f1: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub val_f1: f64,
}

impl MetricSnapshot {
    pub fn from_logs(epoch: usize, logs: &EpochLogs) -> Self {
        let mut defaulted = Vec::new();
        let mut read = |name: MetricName| {
            name.read(logs).unwrap_or_else(|| {
                defaulted.push(name.log_key());
                0.0
            })
        };

        let snapshot = Self {
            epoch,
            train_loss: read(MetricName::TrainLoss),
            train_accuracy: read(MetricName::TrainAccuracy),
            train_f1: read(MetricName::TrainF1),
            val_loss: read(MetricName::ValLoss),
            val_accuracy: read(MetricName::ValAccuracy),
            val_f1: read(MetricName::ValF1),
        };

        if !defaulted.is_empty() {
            warn!(
                epoch,
                keys = ?defaulted,
                "Epoch logs missing metrics; recorded as 0.0"
            );
        }
        snapshot
    }

    pub fn value(&self, name: MetricName) -> f64 {
        match name {
            MetricName::TrainLoss => self.train_loss,
            MetricName::TrainAccuracy => self.train_accuracy,
            MetricName::TrainF1 => self.train_f1,
            MetricName::ValLoss => self.val_loss,
            MetricName::ValAccuracy => self.val_accuracy,
            MetricName::ValF1 => self.val_f1,
        }
    }

    /// All six values in emission order.
    pub fn values(&self) -> [(MetricName, f64); 6] {
        MetricName::ALL.map(|name| (name, self.value(name)))
    }
}
