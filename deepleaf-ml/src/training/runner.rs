//! Phase runner: fits one training phase and records its history.

use super::best::BestTracker;
use super::callbacks::PhaseObserver;
use super::history::PhaseHistory;
use crate::error::MlError;
use crate::model::{CompileOptions, TrainableModel, Trainability};
use crate::tracking::ExperimentTracker;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

/// The two training phases of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Classification head only; extractor frozen.
    HeadOnly,
    /// Trailing extractor layers unfrozen.
    FineTune,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HeadOnly => write!(f, "head-only"),
            Self::FineTune => write!(f, "fine-tune"),
        }
    }
}

/// Everything needed to configure and run one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhasePlan {
    pub phase: Phase,
    /// Run-wide index of this phase's first epoch.
    pub first_epoch: usize,
    pub epochs: usize,
    pub trainability: Trainability,
    pub compile: CompileOptions,
}

/// Runs a single phase against an already-configured model.
pub struct PhaseRunner<'a> {
    tracker: &'a dyn ExperimentTracker,
    best: &'a mut BestTracker,
}

impl<'a> PhaseRunner<'a> {
    pub fn new(tracker: &'a dyn ExperimentTracker, best: &'a mut BestTracker) -> Self {
        Self { tracker, best }
    }

    /// Fit `plan.epochs` epochs and return one snapshot per epoch.
    ///
    /// Fit and tracker failures propagate unchanged; there is no retry.
    pub async fn run<M: TrainableModel>(
        &mut self,
        plan: &PhasePlan,
        model: &mut M,
        train: &M::Dataset,
        validation: &M::Dataset,
    ) -> Result<PhaseHistory, MlError> {
        info!(
            phase = %plan.phase,
            epochs = plan.epochs,
            first_epoch = plan.first_epoch,
            "Starting training phase"
        );

        let mut observer =
            PhaseObserver::new(self.tracker, &mut *self.best, plan.phase, plan.first_epoch);
        let summary = match model.fit(train, validation, plan.epochs, &mut observer).await {
            Ok(summary) => summary,
            Err(e) => {
                error!(phase = %plan.phase, error = %e, "Training phase failed");
                return Err(e);
            }
        };
        let train_ended = observer.train_ended();
        let history = observer.into_history();

        if history.len() != plan.epochs || summary.epochs_completed != plan.epochs {
            return Err(MlError::training(format!(
                "{} phase expected {} epochs, fit reported {} and observed {}",
                plan.phase,
                plan.epochs,
                summary.epochs_completed,
                history.len()
            )));
        }
        if !train_ended {
            return Err(MlError::training(format!(
                "{} phase finished without a train-end notification",
                plan.phase
            )));
        }

        info!(phase = %plan.phase, epochs = history.len(), "Training phase complete");
        Ok(history)
    }
}
