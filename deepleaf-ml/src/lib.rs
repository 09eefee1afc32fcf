//! # deepleaf-ml: two-phase image classifier training
//!
//! Trains a transfer-learning classifier in two phases (head only on a frozen
//! extractor, then fine-tuning of the trailing extractor layers), tracks every
//! epoch with an experiment tracker, and overwrites the canonical model only
//! when the run beats the best validation accuracy of all finished runs.
//!
//! The model itself is supplied by the caller through [`model::TrainableModel`].

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Collaborators
pub mod model;
pub mod tracking;

// Training core
pub mod training;

// Re-exports
pub use config::{DeepleafConfig, load_config};
pub use error::MlError;
pub use model::{EpochLogs, EpochObserver, TrainableModel};
pub use tracking::{ExperimentTracker, RunStatus, build_tracker};
pub use training::{TrainingOrchestrator, TrainingReport};
