//! Epoch observer wiring a phase's fit loop to the tracker and best tracker.

use super::best::BestTracker;
use super::history::PhaseHistory;
use super::metrics::{MetricName, MetricSnapshot};
use super::runner::Phase;
use crate::error::MlError;
use crate::model::{EpochLogs, EpochObserver};
use crate::tracking::{ExperimentTracker, FINAL_VAL_ACCURACY, FINAL_VAL_F1};
use async_trait::async_trait;
use tracing::{debug, info, warn};

/// Records one phase: snapshot, emit, update best, append.
pub struct PhaseObserver<'a> {
    tracker: &'a dyn ExperimentTracker,
    best: &'a mut BestTracker,
    first_epoch: usize,
    history: PhaseHistory,
    train_ended: bool,
}

impl<'a> PhaseObserver<'a> {
    /// `first_epoch` offsets the framework's per-fit epoch counter so that
    /// epoch indices keep increasing across phases.
    pub fn new(
        tracker: &'a dyn ExperimentTracker,
        best: &'a mut BestTracker,
        phase: Phase,
        first_epoch: usize,
    ) -> Self {
        Self {
            tracker,
            best,
            first_epoch,
            history: PhaseHistory::new(phase),
            train_ended: false,
        }
    }

    pub fn train_ended(&self) -> bool {
        self.train_ended
    }

    pub fn into_history(self) -> PhaseHistory {
        self.history
    }
}

#[async_trait]
impl<'a> EpochObserver for PhaseObserver<'a> {
    async fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> Result<(), MlError> {
        if epoch != self.history.len() {
            return Err(MlError::training(format!(
                "epoch {epoch} reported out of order; expected {}",
                self.history.len()
            )));
        }
        let global_epoch = self.first_epoch + epoch;
        let snapshot = MetricSnapshot::from_logs(global_epoch, logs);
        debug!(
            phase = %self.history.phase(),
            epoch = global_epoch,
            val_accuracy = snapshot.val_accuracy,
            val_loss = snapshot.val_loss,
            "Epoch complete"
        );

        for (name, value) in snapshot.values() {
            self.tracker
                .log_metric(name.tracking_key(), value, Some(global_epoch as u64))
                .await?;
        }
        self.best
            .update(
                self.tracker,
                global_epoch,
                snapshot.val_accuracy,
                snapshot.val_f1,
            )
            .await?;

        self.history.push(snapshot);
        Ok(())
    }

    async fn on_train_end(&mut self, logs: &EpochLogs) -> Result<(), MlError> {
        let phase = self.history.phase();
        let read = |name: MetricName| {
            name.read(logs).unwrap_or_else(|| {
                warn!(%phase, key = name.log_key(), "Final metric missing; recorded as 0.0");
                0.0
            })
        };
        let final_accuracy = read(MetricName::ValAccuracy);
        let final_f1 = read(MetricName::ValF1);
        info!(
            %phase,
            final_val_accuracy = final_accuracy,
            "Phase training ended"
        );
        self.tracker
            .log_metric(FINAL_VAL_ACCURACY, final_accuracy, None)
            .await?;
        self.tracker.log_metric(FINAL_VAL_F1, final_f1, None).await?;
        self.train_ended = true;
        Ok(())
    }
}
