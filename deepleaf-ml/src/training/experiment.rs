//! Epoch budget allocation and the static parameters logged per run.

use crate::config::TrainingConfig;
use crate::error::MlError;
use serde::{Deserialize, Serialize};

/// How the total epoch budget is split between the two phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseAllocation {
    pub head_epochs: usize,
    pub fine_tune_epochs: usize,
}

impl PhaseAllocation {
    /// 70% to the head-only phase and 30% to fine-tuning, each truncated.
    ///
    /// Budgets that leave either phase without an epoch are rejected.
    pub fn from_total(total_epochs: usize) -> Result<Self, MlError> {
        let share = |percent: usize| {
            total_epochs
                .checked_mul(percent)
                .map(|scaled| scaled / 100)
                .ok_or_else(|| MlError::config(format!("epoch budget {total_epochs} is too large")))
        };
        let allocation = Self {
            head_epochs: share(70)?,
            fine_tune_epochs: share(30)?,
        };
        if allocation.head_epochs == 0 || allocation.fine_tune_epochs == 0 {
            return Err(MlError::config(format!(
                "an epoch budget of {total_epochs} leaves a phase empty \
                 ({} head-only, {} fine-tune); use at least 4",
                allocation.head_epochs, allocation.fine_tune_epochs
            )));
        }
        Ok(allocation)
    }

    /// Epochs actually run; may be below the budget after truncation.
    pub fn total(&self) -> usize {
        self.head_epochs + self.fine_tune_epochs
    }
}

/// Static run parameters, in the order they are logged.
pub fn run_params(
    config: &TrainingConfig,
    allocation: &PhaseAllocation,
) -> Vec<(&'static str, String)> {
    let [height, width, channels] = config.input_shape;
    vec![
        ("model", config.architecture.clone()),
        ("epochs", config.total_epochs.to_string()),
        ("batch_size", config.batch_size.to_string()),
        ("num_classes", config.num_classes.to_string()),
        ("input_shape", format!("({height}, {width}, {channels})")),
        ("phase1_epochs", allocation.head_epochs.to_string()),
        ("phase2_epochs", allocation.fine_tune_epochs.to_string()),
        ("head_learning_rate", config.head_learning_rate.to_string()),
        (
            "fine_tune_learning_rate",
            config.fine_tune_learning_rate.to_string(),
        ),
        ("fine_tune_layers", config.fine_tune_layers.to_string()),
    ]
}
