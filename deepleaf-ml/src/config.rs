//! Configuration for training runs, experiment tracking and artifact paths.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace config file -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level DeepLeaf configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeepleafConfig {
    /// Training budget and optimizer settings.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Experiment tracking backend.
    #[serde(default)]
    pub tracking: TrackingConfig,
    /// Where models and histories are written.
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Training run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Architecture name logged with each run; the model being trained
    /// must report the same name.
    #[serde(default = "default_architecture")]
    pub architecture: String,
    /// Total epoch budget, split 70/30 across the two phases.
    #[serde(default = "default_total_epochs")]
    pub total_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// Input shape as (height, width, channels).
    #[serde(default = "default_input_shape")]
    pub input_shape: [usize; 3],
    /// Learning rate while only the classification head trains.
    #[serde(default = "default_learning_rate")]
    pub head_learning_rate: f64,
    /// Learning rate while the trailing extractor layers are fine-tuned.
    #[serde(default = "default_learning_rate")]
    pub fine_tune_learning_rate: f64,
    #[serde(default = "default_true")]
    pub fine_tune_amsgrad: bool,
    /// Number of trailing extractor layers unfrozen for fine-tuning.
    #[serde(default = "default_fine_tune_layers")]
    pub fine_tune_layers: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: default_architecture(),
            total_epochs: default_total_epochs(),
            batch_size: default_batch_size(),
            num_classes: default_num_classes(),
            input_shape: default_input_shape(),
            head_learning_rate: default_learning_rate(),
            fine_tune_learning_rate: default_learning_rate(),
            fine_tune_amsgrad: true,
            fine_tune_layers: default_fine_tune_layers(),
        }
    }
}

fn default_architecture() -> String {
    "VGG16".to_string()
}

fn default_total_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_num_classes() -> usize {
    38
}

fn default_input_shape() -> [usize; 3] {
    [224, 224, 3]
}

fn default_learning_rate() -> f64 {
    1e-4
}

fn default_fine_tune_layers() -> usize {
    4
}

fn default_true() -> bool {
    true
}

/// Which experiment tracking backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingBackend {
    /// JSON-file store in the workspace.
    #[default]
    Local,
    /// MLflow tracking server over its REST API.
    Mlflow,
}

/// Experiment tracking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(default)]
    pub backend: TrackingBackend,
    #[serde(default = "default_experiment_name")]
    pub experiment_name: String,
    /// Base URL of the MLflow tracking server.
    #[serde(default = "default_tracking_uri")]
    pub tracking_uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Store file used by the local backend.
    #[serde(default = "default_local_store")]
    pub local_store: PathBuf,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackingBackend::default(),
            experiment_name: default_experiment_name(),
            tracking_uri: default_tracking_uri(),
            username: None,
            password: None,
            local_store: default_local_store(),
        }
    }
}

impl TrackingConfig {
    /// Basic-auth credentials, falling back to the conventional environment
    /// variables when none are configured.
    pub fn credentials(&self) -> Option<(String, String)> {
        let username = self.username.clone().or_else(|| {
            std::env::var("MLFLOW_TRACKING_USERNAME")
                .or_else(|_| std::env::var("DAGSHUB_USERNAME"))
                .ok()
        })?;
        let password = self.password.clone().or_else(|| {
            std::env::var("MLFLOW_TRACKING_PASSWORD")
                .or_else(|_| std::env::var("DAGSHUB_KEY"))
                .ok()
        })?;
        Some((username, password))
    }
}

fn default_experiment_name() -> String {
    "Plant_Classification_Experiment".to_string()
}

fn default_tracking_uri() -> String {
    "http://mlflow:5000".to_string()
}

fn default_local_store() -> PathBuf {
    PathBuf::from(".deepleaf/tracking.json")
}

/// Artifact locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_model_dir")]
    pub model_dir: PathBuf,
    /// File name of the canonical model inside `model_dir`.
    #[serde(default = "default_canonical_model")]
    pub canonical_model: String,
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            model_dir: default_model_dir(),
            canonical_model: default_canonical_model(),
            logs_dir: default_logs_dir(),
        }
    }
}

impl PathsConfig {
    pub fn canonical_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.canonical_model)
    }
}

fn default_model_dir() -> PathBuf {
    PathBuf::from("./models")
}

fn default_canonical_model() -> String {
    "production_model.keras".to_string()
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("./logs")
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (passed as argument)
/// 2. Environment variables (prefixed with `DEEPLEAF_`)
/// 3. Workspace-local config (`.deepleaf/config.toml`)
/// 4. User config (`~/.config/deepleaf/config.toml`)
/// 5. Built-in defaults
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&DeepleafConfig>,
) -> Result<DeepleafConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(DeepleafConfig::default()));

    if let Some(user_config) = user_config_path()
        && user_config.exists()
    {
        figment = figment.merge(Toml::file(&user_config));
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // DEEPLEAF_TRAINING__TOTAL_EPOCHS, DEEPLEAF_TRACKING__BACKEND, ...
    figment = figment.merge(Env::prefixed("DEEPLEAF_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// `~/.config/deepleaf/config.toml` (platform equivalent).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "deepleaf", "deepleaf")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `<workspace>/.deepleaf/config.toml`.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".deepleaf").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = DeepleafConfig::default();
        assert_eq!(config.training.total_epochs, 10);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.num_classes, 38);
        assert_eq!(config.training.input_shape, [224, 224, 3]);
        assert_eq!(config.training.fine_tune_layers, 4);
        assert_eq!(config.tracking.backend, TrackingBackend::Local);
        assert_eq!(
            config.paths.canonical_model_path(),
            PathBuf::from("./models/production_model.keras")
        );
    }

    #[test]
    fn test_workspace_config_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        let path = workspace_config_path(dir.path());
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            "[training]\ntotal_epochs = 20\n\n[tracking]\nbackend = \"mlflow\"\n",
        )
        .unwrap();

        let config = load_config(Some(dir.path()), None).unwrap();
        assert_eq!(config.training.total_epochs, 20);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.tracking.backend, TrackingBackend::Mlflow);
    }

    #[test]
    fn test_explicit_overrides_win() {
        let dir = TempDir::new().unwrap();
        let mut overrides = DeepleafConfig::default();
        overrides.tracking.experiment_name = "override".into();

        let config = load_config(Some(dir.path()), Some(&overrides)).unwrap();
        assert_eq!(config.tracking.experiment_name, "override");
    }

    #[test]
    fn test_configured_credentials_take_precedence() {
        let tracking = TrackingConfig {
            username: Some("alice".into()),
            password: Some("secret".into()),
            ..TrackingConfig::default()
        };
        assert_eq!(
            tracking.credentials(),
            Some(("alice".to_string(), "secret".to_string()))
        );
    }
}
