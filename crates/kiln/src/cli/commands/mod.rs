//! CLI commands

mod plan;
mod run;
mod tasks;

pub use plan::PlanCommand;
pub use run::RunCommand;
pub use tasks::TasksCommand;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use tracing::debug;

use kiln_core::config::load_config_from_dir;
use kiln_core::Config;
use kiln_tasks::{
    ChecksumStore, IncrementalInputs, ShellAction, TaskId, TaskRegistry, TaskReporter, TaskSpec,
};

/// A loaded build file and the directory it governs
#[derive(Debug)]
pub(crate) struct BuildFile {
    pub config: Config,
    pub path: PathBuf,
    pub root: PathBuf,
}

impl BuildFile {
    /// Find and load the build file for the current directory
    pub fn load() -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        Self::load_from(&cwd)
    }

    /// Find and load the build file for `dir`
    pub fn load_from(dir: &Path) -> anyhow::Result<Self> {
        let (config, path) = load_config_from_dir(dir)?;
        let root = path
            .parent()
            .map(Path::to_path_buf)
            .context("build file has no parent directory")?;
        Ok(Self { config, path, root })
    }

    /// Build the task registry from the declared tasks.
    ///
    /// Tasks with a command get a shell action, made incremental when the
    /// task declares inputs/outputs and a checksum store is supplied. Command
    /// output goes to `reporter` when given. Tasks without a command only
    /// group other tasks.
    pub fn registry(
        &self,
        store: Option<Arc<ChecksumStore>>,
        reporter: Option<Arc<dyn TaskReporter>>,
    ) -> anyhow::Result<TaskRegistry> {
        let mut registry = TaskRegistry::new();

        for (name, task) in &self.config.tasks {
            let id = TaskId::new(name.as_str());
            let project = self.config.project_of(name);
            let mut spec = TaskSpec::new(id.clone()).with_project(project.clone());

            if let Some(description) = &task.description {
                spec = spec.with_description(description.clone());
            }
            spec.depends_on = to_ids(&task.depends_on);
            spec.reverse_depends_on = to_ids(&task.reverse_depends_on);
            spec.run_before = to_ids(&task.run_before);
            spec.run_after = to_ids(&task.run_after);

            if let Some(command) = &task.command {
                let mut action = ShellAction::new(id, project, command.clone());
                if let (Some(incremental), Some(store)) = (&task.incremental, &store) {
                    action = action.incremental(
                        IncrementalInputs {
                            inputs: incremental.inputs.clone(),
                            outputs: incremental.outputs.clone(),
                        },
                        store.clone(),
                    );
                }
                if let Some(reporter) = &reporter {
                    action = action.with_reporter(reporter.clone());
                }
                spec = spec.with_action(action);
            }

            registry.register(spec)?;
        }

        debug!(tasks = registry.len(), "task registry built");
        Ok(registry)
    }
}

fn to_ids(names: &[String]) -> Vec<TaskId> {
    names.iter().map(|n| TaskId::new(n.as_str())).collect()
}
