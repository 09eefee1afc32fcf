//! Training core: phase runs, best tracking, history merging, gating and orchestration.

pub mod artifacts;
pub mod best;
pub mod callbacks;
pub mod experiment;
pub mod gate;
pub mod history;
pub mod metrics;
pub mod orchestrator;
pub mod runner;

pub use artifacts::{ArtifactLayout, RunArtifacts, RunStamp};
pub use best::{BestRecord, BestTracker};
pub use callbacks::PhaseObserver;
pub use experiment::PhaseAllocation;
pub use gate::{BestModelGate, GateDecision, GateOutcome};
pub use history::{HistoryAggregator, PhaseHistory, TrainingHistory};
pub use metrics::{MetricName, MetricSnapshot};
pub use orchestrator::{RunState, TrainingOrchestrator, TrainingReport};
pub use runner::{Phase, PhasePlan, PhaseRunner};
