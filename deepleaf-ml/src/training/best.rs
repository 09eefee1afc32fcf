//! Best-so-far validation tracking within a single run.

use crate::error::MlError;
use crate::tracking::{BEST_VAL_ACCURACY, BEST_VAL_F1, ExperimentTracker};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Best validation accuracy and the F1 score observed alongside it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BestRecord {
    pub best_val_accuracy: f64,
    pub best_val_f1: f64,
}

/// Tracks the in-run best across both phases.
///
/// Created once per run. `best_val_accuracy` never decreases; the F1 value
/// only moves together with an accuracy improvement.
#[derive(Debug, Clone, Default)]
pub struct BestTracker {
    record: BestRecord,
    best_epoch: Option<usize>,
}

impl BestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self) -> BestRecord {
        self.record
    }

    /// Epoch at which the current best was reached.
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Apply one epoch's validation metrics. Returns `true` when the best
    /// improved; ties do not count.
    pub fn observe(&mut self, epoch: usize, val_accuracy: f64, val_f1: f64) -> bool {
        if val_accuracy > self.record.best_val_accuracy {
            self.record = BestRecord {
                best_val_accuracy: val_accuracy,
                best_val_f1: val_f1,
            };
            self.best_epoch = Some(epoch);
            true
        } else {
            false
        }
    }

    /// [`observe`](Self::observe), emitting the new best values to `tracker`
    /// when they improve.
    pub async fn update(
        &mut self,
        tracker: &dyn ExperimentTracker,
        epoch: usize,
        val_accuracy: f64,
        val_f1: f64,
    ) -> Result<bool, MlError> {
        if !self.observe(epoch, val_accuracy, val_f1) {
            return Ok(false);
        }
        tracker
            .log_metric(BEST_VAL_ACCURACY, self.record.best_val_accuracy, None)
            .await?;
        tracker
            .log_metric(BEST_VAL_F1, self.record.best_val_f1, None)
            .await?;
        info!(
            epoch,
            best_val_accuracy = self.record.best_val_accuracy,
            "Updated best validation accuracy"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::{LocalTracker, RunStatus};

    #[test]
    fn test_starts_at_zero() {
        let tracker = BestTracker::new();
        assert_eq!(tracker.record(), BestRecord::default());
        assert_eq!(tracker.best_epoch(), None);
    }

    #[test]
    fn test_tie_does_not_update() {
        let mut tracker = BestTracker::new();
        assert!(tracker.observe(0, 0.7, 0.6));
        assert!(!tracker.observe(1, 0.7, 0.9));
        assert_eq!(tracker.record().best_val_f1, 0.6);
        assert_eq!(tracker.best_epoch(), Some(0));
    }

    #[test]
    fn test_zero_accuracy_never_updates() {
        let mut tracker = BestTracker::new();
        assert!(!tracker.observe(0, 0.0, 0.4));
        assert_eq!(tracker.record(), BestRecord::default());
    }

    #[test]
    fn test_f1_moves_only_with_accuracy() {
        let mut tracker = BestTracker::new();
        tracker.observe(0, 0.6, 0.5);
        tracker.observe(1, 0.55, 0.9);
        assert_eq!(tracker.record().best_val_f1, 0.5);
        tracker.observe(2, 0.65, 0.0);
        assert_eq!(
            tracker.record(),
            BestRecord {
                best_val_accuracy: 0.65,
                best_val_f1: 0.0
            }
        );
    }

    #[tokio::test]
    async fn test_update_emits_only_on_improvement() {
        let store = LocalTracker::in_memory();
        store.start_run("plants").await.unwrap();
        let mut tracker = BestTracker::new();

        assert!(tracker.update(&store, 0, 0.5, 0.4).await.unwrap());
        assert!(!tracker.update(&store, 1, 0.5, 0.45).await.unwrap());
        assert!(tracker.update(&store, 2, 0.6, 0.5).await.unwrap());
        store.end_run(RunStatus::Finished).await.unwrap();

        let snapshot = store.snapshot().await;
        let emitted: Vec<(&str, f64)> = snapshot
            .metrics
            .iter()
            .map(|m| (m.key.as_str(), m.value))
            .collect();
        assert_eq!(
            emitted,
            vec![
                (BEST_VAL_ACCURACY, 0.5),
                (BEST_VAL_F1, 0.4),
                (BEST_VAL_ACCURACY, 0.6),
                (BEST_VAL_F1, 0.5),
            ]
        );
        assert!(snapshot.metrics.iter().all(|m| m.step.is_none()));
    }
}
