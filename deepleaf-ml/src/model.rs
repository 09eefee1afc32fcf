//! The contract a trainable classifier must honour.
//!
//! Architecture construction and dataset decoding live outside this crate; the
//! orchestrator only toggles layer trainability, compiles, fits, and saves.

use crate::error::MlError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Which layers receive weight updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trainability {
    /// Feature extractor frozen; only the classification head trains.
    FrozenExtractor,
    /// The last `trainable_layers` extractor layers are unfrozen.
    FineTune { trainable_layers: usize },
}

/// Optimizer settings handed to `compile`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { learning_rate: f64, amsgrad: bool },
}

impl OptimizerConfig {
    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam { learning_rate, .. } => *learning_rate,
        }
    }
}

/// Everything `compile` needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompileOptions {
    pub optimizer: OptimizerConfig,
    pub loss: String,
    pub metrics: Vec<String>,
}

impl CompileOptions {
    /// Categorical cross-entropy with accuracy and F1 reporting.
    pub fn classification(optimizer: OptimizerConfig) -> Self {
        Self {
            optimizer,
            loss: "categorical_crossentropy".to_string(),
            metrics: vec!["accuracy".to_string(), "f1_score".to_string()],
        }
    }
}

/// On-disk model format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFormat {
    Keras,
}

impl ModelFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Keras => "keras",
        }
    }
}

/// Metrics reported by the framework at an epoch boundary.
///
/// Keys follow the framework's naming (`loss`, `accuracy`, `f1_score`,
/// `val_loss`, `val_accuracy`, `val_f1_score`) and any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochLogs(HashMap<String, f64>);

impl EpochLogs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: f64) -> Self {
        self.0.insert(key.into(), value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, f64)> for EpochLogs {
    fn from_iter<I: IntoIterator<Item = (K, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Observer handed to [`TrainableModel::fit`].
///
/// Implementations must call `on_epoch_end` once per completed epoch, in
/// order, and `on_train_end` once after the last epoch. Errors returned by the
/// observer must abort the fit and be returned from it.
#[async_trait]
pub trait EpochObserver: Send {
    /// `epoch` is zero-based within the current `fit` call.
    async fn on_epoch_end(&mut self, epoch: usize, logs: &EpochLogs) -> Result<(), MlError>;

    async fn on_train_end(&mut self, logs: &EpochLogs) -> Result<(), MlError>;
}

/// What `fit` reports back once it returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FitSummary {
    pub epochs_completed: usize,
}

/// A classifier that can be compiled, fitted and saved.
#[async_trait]
pub trait TrainableModel: Send {
    /// Opaque finite sequence of (input, label) pairs.
    type Dataset: Send + Sync;

    /// Architecture name, e.g. `VGG16`.
    fn architecture(&self) -> &str;

    /// Change which layers train. Takes effect at the next `compile`.
    fn set_trainability(&mut self, trainability: Trainability) -> Result<(), MlError>;

    fn compile(&mut self, options: &CompileOptions) -> Result<(), MlError>;

    async fn fit(
        &mut self,
        train: &Self::Dataset,
        validation: &Self::Dataset,
        epochs: usize,
        observer: &mut dyn EpochObserver,
    ) -> Result<FitSummary, MlError>;

    fn save(&self, path: &Path, format: ModelFormat) -> Result<(), MlError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_logs_missing_key() {
        let logs = EpochLogs::new().with("val_accuracy", 0.7);
        assert_eq!(logs.get("val_accuracy"), Some(0.7));
        assert_eq!(logs.get("val_f1_score"), None);
    }

    #[test]
    fn test_epoch_logs_from_iter() {
        let logs: EpochLogs = [("loss", 1.2), ("accuracy", 0.4)].into_iter().collect();
        assert_eq!(logs.get("loss"), Some(1.2));
        assert!(!logs.is_empty());
    }

    #[test]
    fn test_compile_options_classification() {
        let options = CompileOptions::classification(OptimizerConfig::Adam {
            learning_rate: 1e-4,
            amsgrad: false,
        });
        assert_eq!(options.loss, "categorical_crossentropy");
        assert_eq!(options.metrics, vec!["accuracy", "f1_score"]);
        assert_eq!(options.optimizer.learning_rate(), 1e-4);
    }
}
