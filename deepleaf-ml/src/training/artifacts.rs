//! Model and history artifact locations for a run.

use crate::config::PathsConfig;
use crate::model::ModelFormat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";
const RUN_ID_CHARS: usize = 8;

/// Local-time stamp shared by every timestamped artifact of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStamp(String);

impl RunStamp {
    pub fn now() -> Self {
        Self(chrono::Local::now().format(STAMP_FORMAT).to_string())
    }

    /// Millisecond stamp suffixed with the head of the run id, so runs that
    /// finish in the same instant still get distinct files.
    pub fn for_run(run_id: &str) -> Self {
        let tag: String = run_id
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .take(RUN_ID_CHARS)
            .collect();
        let now = Self::now();
        if tag.is_empty() {
            now
        } else {
            Self(format!("{now}_{tag}"))
        }
    }

    pub fn new(stamp: impl Into<String>) -> Self {
        Self(stamp.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves artifact paths from the configured directories.
#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    paths: PathsConfig,
    format: ModelFormat,
}

impl ArtifactLayout {
    pub fn new(paths: PathsConfig) -> Self {
        Self {
            paths,
            format: ModelFormat::Keras,
        }
    }

    pub fn format(&self) -> ModelFormat {
        self.format
    }

    /// Overwritten only when a run passes the gate.
    pub fn canonical_model_path(&self) -> PathBuf {
        self.paths.canonical_model_path()
    }

    pub fn snapshot_model_path(&self, stamp: &RunStamp) -> PathBuf {
        self.paths
            .model_dir
            .join(format!("model_{stamp}.{}", self.format.extension()))
    }

    pub fn history_path(&self, stamp: &RunStamp) -> PathBuf {
        self.paths.logs_dir.join(format!("history_{stamp}.json"))
    }
}

/// Files written by a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifacts {
    /// Set only when the gate persisted the model.
    pub canonical_model: Option<PathBuf>,
    pub snapshot_model: PathBuf,
    pub history: PathBuf,
}
