//! Two-phase training orchestrator.
//!
//! Sequences one tracked run:
//! `Init -> Phase1Running -> Phase1Done -> Phase2Running -> Phase2Done ->
//! Gated -> Persisted | Discarded -> Terminal`.
//!
//! The tracking run is closed exactly once on every exit path, after any
//! persistence attempt. A failed step leaves the state where it failed.

use super::artifacts::{ArtifactLayout, RunArtifacts, RunStamp};
use super::best::{BestRecord, BestTracker};
use super::experiment::{PhaseAllocation, run_params};
use super::gate::{BestModelGate, GateOutcome};
use super::history::{HistoryAggregator, PhaseHistory, TrainingHistory};
use super::metrics::MetricName;
use super::runner::{Phase, PhasePlan, PhaseRunner};
use crate::config::{DeepleafConfig, TrainingConfig};
use crate::error::MlError;
use crate::model::{CompileOptions, OptimizerConfig, TrainableModel, Trainability};
use crate::persistence;
use crate::tracking::{ExperimentTracker, RunStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Init,
    Phase1Running,
    Phase1Done,
    Phase2Running,
    Phase2Done,
    Gated,
    Persisted,
    Discarded,
    Terminal,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Phase1Running => "phase1_running",
            Self::Phase1Done => "phase1_done",
            Self::Phase2Running => "phase2_running",
            Self::Phase2Done => "phase2_done",
            Self::Gated => "gated",
            Self::Persisted => "persisted",
            Self::Discarded => "discarded",
            Self::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: String,
    pub allocation: PhaseAllocation,
    pub history: TrainingHistory,
    pub best: BestRecord,
    /// Run-wide epoch index of the in-run best.
    pub best_epoch: Option<usize>,
    pub gate: GateOutcome,
    pub artifacts: RunArtifacts,
}

/// Drives one two-phase training run against a tracker.
pub struct TrainingOrchestrator {
    training: TrainingConfig,
    experiment: String,
    layout: ArtifactLayout,
    tracker: Arc<dyn ExperimentTracker>,
    state: RunState,
    stamp: Option<RunStamp>,
}

impl TrainingOrchestrator {
    pub fn new(config: &DeepleafConfig, tracker: Arc<dyn ExperimentTracker>) -> Self {
        Self {
            training: config.training.clone(),
            experiment: config.tracking.experiment_name.clone(),
            layout: ArtifactLayout::new(config.paths.clone()),
            tracker,
            state: RunState::Init,
            stamp: None,
        }
    }

    /// Fix the artifact timestamp instead of taking the wall clock at
    /// persistence time.
    pub fn with_stamp(mut self, stamp: RunStamp) -> Self {
        self.stamp = Some(stamp);
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Phase 1 trains the head on a frozen extractor; phase 2 unfreezes the
    /// trailing layers and continues on the same weights.
    pub fn phase_plans(&self, allocation: &PhaseAllocation) -> [PhasePlan; 2] {
        [
            PhasePlan {
                phase: Phase::HeadOnly,
                first_epoch: 0,
                epochs: allocation.head_epochs,
                trainability: Trainability::FrozenExtractor,
                compile: CompileOptions::classification(OptimizerConfig::Adam {
                    learning_rate: self.training.head_learning_rate,
                    amsgrad: false,
                }),
            },
            PhasePlan {
                phase: Phase::FineTune,
                first_epoch: allocation.head_epochs,
                epochs: allocation.fine_tune_epochs,
                trainability: Trainability::FineTune {
                    trainable_layers: self.training.fine_tune_layers,
                },
                compile: CompileOptions::classification(OptimizerConfig::Adam {
                    learning_rate: self.training.fine_tune_learning_rate,
                    amsgrad: self.training.fine_tune_amsgrad,
                }),
            },
        ]
    }

    /// Run both phases, gate, persist, and close the tracking run.
    ///
    /// The epoch budget and the model architecture are validated before a
    /// tracking run is started.
    pub async fn run<M: TrainableModel>(
        &mut self,
        model: &mut M,
        train: &M::Dataset,
        validation: &M::Dataset,
    ) -> Result<TrainingReport, MlError> {
        if self.state != RunState::Init {
            return Err(MlError::invalid_input(format!(
                "orchestrator already used (state: {})",
                self.state
            )));
        }
        let allocation = PhaseAllocation::from_total(self.training.total_epochs)?;
        if !model
            .architecture()
            .eq_ignore_ascii_case(&self.training.architecture)
        {
            return Err(MlError::config(format!(
                "configured architecture '{}' does not match the model ('{}')",
                self.training.architecture,
                model.architecture()
            )));
        }

        let run_id = self.tracker.start_run(&self.experiment).await?;
        info!(
            run_id = %run_id,
            experiment = %self.experiment,
            head_epochs = allocation.head_epochs,
            fine_tune_epochs = allocation.fine_tune_epochs,
            "Tracking run started"
        );

        let result = self
            .execute(&run_id, allocation, model, train, validation)
            .await;
        let status = match &result {
            Ok(_) => RunStatus::Finished,
            Err(e) => {
                error!(run_id = %run_id, state = %self.state, error = %e, "Training run failed");
                RunStatus::Failed
            }
        };
        let ended = self.tracker.end_run(status).await;

        match (result, ended) {
            (Ok(report), Ok(())) => {
                self.transition(RunState::Terminal);
                Ok(report)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(end_err)) => {
                warn!(run_id = %run_id, error = %end_err, "Failed to close tracking run");
                Err(e)
            }
        }
    }

    async fn execute<M: TrainableModel>(
        &mut self,
        run_id: &str,
        allocation: PhaseAllocation,
        model: &mut M,
        train: &M::Dataset,
        validation: &M::Dataset,
    ) -> Result<TrainingReport, MlError> {
        for (key, value) in run_params(&self.training, &allocation) {
            self.tracker.log_param(key, &value).await?;
        }

        let mut best = BestTracker::new();
        let [head_plan, fine_tune_plan] = self.phase_plans(&allocation);

        self.transition(RunState::Phase1Running);
        let head = self
            .run_phase(&head_plan, &mut best, model, train, validation)
            .await?;
        self.transition(RunState::Phase1Done);

        self.transition(RunState::Phase2Running);
        let fine_tune = self
            .run_phase(&fine_tune_plan, &mut best, model, train, validation)
            .await?;
        self.transition(RunState::Phase2Done);

        let history = HistoryAggregator::merge(head, fine_tune)?;
        let final_val_accuracy = history
            .final_value(MetricName::ValAccuracy)
            .ok_or_else(|| MlError::history("merged history has no validation accuracy"))?;
        let gate = BestModelGate::new(self.tracker.as_ref(), &self.experiment)
            .evaluate(final_val_accuracy)
            .await?;
        self.transition(RunState::Gated);

        let artifacts = self.persist(run_id, model, &history, &gate).await?;
        info!(
            run_id,
            best_val_accuracy = best.record().best_val_accuracy,
            final_val_accuracy,
            "Training run complete"
        );

        Ok(TrainingReport {
            run_id: run_id.to_string(),
            allocation,
            history,
            best: best.record(),
            best_epoch: best.best_epoch(),
            gate,
            artifacts,
        })
    }

    async fn run_phase<M: TrainableModel>(
        &self,
        plan: &PhasePlan,
        best: &mut BestTracker,
        model: &mut M,
        train: &M::Dataset,
        validation: &M::Dataset,
    ) -> Result<PhaseHistory, MlError> {
        model.set_trainability(plan.trainability)?;
        model.compile(&plan.compile)?;
        PhaseRunner::new(self.tracker.as_ref(), best)
            .run(plan, model, train, validation)
            .await
    }

    /// History, then the timestamped snapshot and its artifact upload. The
    /// canonical model is written last so that a failed run never replaces it.
    async fn persist<M: TrainableModel>(
        &mut self,
        run_id: &str,
        model: &M,
        history: &TrainingHistory,
        gate: &GateOutcome,
    ) -> Result<RunArtifacts, MlError> {
        let stamp = self
            .stamp
            .clone()
            .unwrap_or_else(|| RunStamp::for_run(run_id));

        let history_path = self.layout.history_path(&stamp);
        HistoryAggregator::write(history, &history_path)?;
        info!(path = %history_path.display(), "Training history written");

        let snapshot_model = self.layout.snapshot_model_path(&stamp);
        persistence::ensure_parent(&snapshot_model)?;
        model.save(&snapshot_model, self.layout.format())?;
        self.tracker.log_artifact(&snapshot_model, "model").await?;

        let canonical_model = if gate.decision.is_persist() {
            let path = self.layout.canonical_model_path();
            persistence::ensure_parent(&path)?;
            model.save(&path, self.layout.format())?;
            info!(
                path = %path.display(),
                final_val_accuracy = gate.final_val_accuracy,
                historical_best = gate.historical_best,
                "New best model saved"
            );
            Some(path)
        } else {
            info!(
                final_val_accuracy = gate.final_val_accuracy,
                historical_best = gate.historical_best,
                "Model did not beat the historical best; canonical model kept"
            );
            None
        };

        self.transition(if canonical_model.is_some() {
            RunState::Persisted
        } else {
            RunState::Discarded
        });

        Ok(RunArtifacts {
            canonical_model,
            snapshot_model,
            history: history_path,
        })
    }

    fn transition(&mut self, to: RunState) {
        info!(from = %self.state, to = %to, "Run state transition");
        self.state = to;
    }
}
