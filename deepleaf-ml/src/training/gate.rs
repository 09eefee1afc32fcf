//! Best-model gate: persist only when a run beats every finished run.

use crate::error::MlError;
use crate::tracking::ExperimentTracker;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateDecision {
    /// Overwrite the canonical model.
    Persist,
    /// Leave the canonical model untouched.
    Discard,
}

impl GateDecision {
    /// Strictly greater wins; a tie discards. A NaN accuracy never persists.
    pub fn decide(final_val_accuracy: f64, historical_best: f64) -> Self {
        if final_val_accuracy > historical_best {
            Self::Persist
        } else {
            Self::Discard
        }
    }

    pub fn is_persist(&self) -> bool {
        matches!(self, Self::Persist)
    }
}

/// The inputs and result of a gate evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GateOutcome {
    pub final_val_accuracy: f64,
    pub historical_best: f64,
    pub decision: GateDecision,
}

/// Compares a run's final validation accuracy against the experiment's
/// historical best. Evaluating consumes the gate, so it queries the tracker
/// once.
pub struct BestModelGate<'a> {
    tracker: &'a dyn ExperimentTracker,
    experiment: &'a str,
}

impl<'a> BestModelGate<'a> {
    pub fn new(tracker: &'a dyn ExperimentTracker, experiment: &'a str) -> Self {
        Self {
            tracker,
            experiment,
        }
    }

    pub async fn evaluate(self, final_val_accuracy: f64) -> Result<GateOutcome, MlError> {
        let historical_best = self.tracker.get_historical_best(self.experiment).await?;
        let decision = GateDecision::decide(final_val_accuracy, historical_best);
        info!(
            experiment = self.experiment,
            final_val_accuracy,
            historical_best,
            decision = ?decision,
            "Best-model gate evaluated"
        );
        Ok(GateOutcome {
            final_val_accuracy,
            historical_best,
            decision,
        })
    }
}
