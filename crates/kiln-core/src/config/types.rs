//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Main configuration for Kiln
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project name
    pub name: Option<String>,

    /// Execution settings
    pub run: RunConfig,

    /// Declared tasks, keyed by task id
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskConfig>,
}

impl Config {
    /// Project a task belongs to, falling back to the build name
    pub fn project_of(&self, task: &str) -> String {
        self.tasks
            .get(task)
            .and_then(|t| t.project.clone())
            .or_else(|| self.name.clone())
            .unwrap_or_else(|| "root".to_string())
    }
}

/// Execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum concurrent task actions within one batch
    pub concurrency: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { concurrency: 4 }
    }
}

/// A declared task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Shell command to execute; a task without one is a pure grouping task
    pub command: Option<String>,

    /// Human-readable description
    pub description: Option<String>,

    /// Project the task belongs to
    pub project: Option<String>,

    /// Tasks that must complete first; pulled into the run
    pub depends_on: Vec<String>,

    /// Tasks made to depend on this one; pulled into the run
    pub reverse_depends_on: Vec<String>,

    /// Tasks that run before this one when both are selected
    pub run_before: Vec<String>,

    /// Tasks this one runs after when both are selected
    pub run_after: Vec<String>,

    /// Up-to-date detection for incremental tasks
    pub incremental: Option<IncrementalConfig>,
}

/// Input/output globs checksummed by an incremental task
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IncrementalConfig {
    /// Input file globs, relative to the build root
    pub inputs: Vec<String>,

    /// Output file globs, relative to the build root
    pub outputs: Vec<String>,
}
