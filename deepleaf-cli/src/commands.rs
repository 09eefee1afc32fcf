//! Subcommand handlers.

use crate::{Commands, ConfigAction};
use anyhow::Context;
use deepleaf_ml::config::{DeepleafConfig, load_config, workspace_config_path};
use deepleaf_ml::tracking::ExperimentTracker;
use deepleaf_ml::training::{MetricName, TrainingHistory};
use std::path::Path;

pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Best { experiment } => handle_best(experiment, workspace).await,
        Commands::History { path } => handle_history(&workspace.join(path)),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Load the layered configuration, resolving the local tracking store
/// against the workspace.
fn workspace_config(workspace: &Path) -> anyhow::Result<DeepleafConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
    if config.tracking.local_store.is_relative() {
        config.tracking.local_store = workspace.join(&config.tracking.local_store);
    }
    Ok(config)
}

async fn handle_best(experiment: Option<String>, workspace: &Path) -> anyhow::Result<()> {
    let config = workspace_config(workspace)?;
    let experiment = experiment.unwrap_or_else(|| config.tracking.experiment_name.clone());
    let tracker = deepleaf_ml::build_tracker(&config.tracking)
        .context("Failed to connect to the experiment tracker")?;

    let best = tracker
        .get_historical_best(&experiment)
        .await
        .with_context(|| format!("Failed to query the historical best of '{experiment}'"))?;
    if best > 0.0 {
        println!("{experiment}: best validation accuracy {best:.4}");
    } else {
        println!("{experiment}: no finished runs have recorded a best validation accuracy");
    }
    Ok(())
}

fn handle_history(path: &Path) -> anyhow::Result<()> {
    let history = TrainingHistory::load(path)
        .with_context(|| format!("Failed to read history {}", path.display()))?;
    println!("{}", summarize_history(&history));
    Ok(())
}

fn summarize_history(history: &TrainingHistory) -> String {
    let mut lines = vec![format!("Epochs: {}", history.epochs())];
    if let Some(value) = history.final_value(MetricName::ValAccuracy) {
        lines.push(format!("Final val_accuracy: {value:.4}"));
    }
    if let Some((epoch, value)) = history.best(MetricName::ValAccuracy) {
        lines.push(format!("Best val_accuracy: {value:.4} (epoch {epoch})"));
    }
    if let Some(value) = history.final_value(MetricName::ValLoss) {
        lines.push(format!("Final val_loss: {value:.4}"));
    }
    lines.join("\n")
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let toml_str = toml::to_string_pretty(&DeepleafConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = workspace_config(workspace)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepleaf_ml::tracking::{BEST_VAL_ACCURACY, LocalTracker, RunStatus};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_config_init_writes_loadable_defaults() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, workspace).await.unwrap();

        let config_path = workspace.join(".deepleaf").join("config.toml");
        let content = std::fs::read_to_string(&config_path).unwrap();
        let parsed: DeepleafConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed.training.total_epochs, 10);
        assert_eq!(
            parsed.tracking.experiment_name,
            "Plant_Classification_Experiment"
        );
    }

    #[tokio::test]
    async fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();
        let config_path = workspace_config_path(workspace);

        handle_config(ConfigAction::Init, workspace).unwrap();
        std::fs::write(&config_path, "[training]\ntotal_epochs = 20\n").unwrap();
        handle_config(ConfigAction::Init, workspace).unwrap();

        let content = std::fs::read_to_string(&config_path).unwrap();
        assert_eq!(content, "[training]\ntotal_epochs = 20\n");
    }

    #[tokio::test]
    async fn test_config_show_defaults() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[test]
    fn test_local_store_resolved_against_workspace() {
        let dir = TempDir::new().unwrap();
        let config = workspace_config(dir.path()).unwrap();
        assert!(config.tracking.local_store.starts_with(dir.path()));
    }

    #[tokio::test]
    async fn test_best_reads_local_store() {
        let dir = TempDir::new().unwrap();
        let store = workspace_config(dir.path()).unwrap().tracking.local_store;
        let tracker = LocalTracker::open(&store).unwrap();
        tracker.start_run("plants").await.unwrap();
        tracker.log_metric(BEST_VAL_ACCURACY, 0.81, None).await.unwrap();
        tracker.end_run(RunStatus::Finished).await.unwrap();

        let command = Commands::Best {
            experiment: Some("plants".into()),
        };
        assert!(handle_command(command, dir.path()).await.is_ok());
    }

    #[test]
    fn test_summarize_history() {
        let history = TrainingHistory {
            val_accuracy: vec![0.5, 0.8, 0.78],
            val_loss: vec![0.9, 0.5, 0.52],
            ..TrainingHistory::default()
        };
        assert_eq!(
            summarize_history(&history),
            "Epochs: 3\n\
             Final val_accuracy: 0.7800\n\
             Best val_accuracy: 0.8000 (epoch 1)\n\
             Final val_loss: 0.5200"
        );
    }

    #[tokio::test]
    async fn test_history_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let command = Commands::History {
            path: "logs/history_missing.json".into(),
        };
        assert!(handle_command(command, dir.path()).await.is_err());
    }
}
