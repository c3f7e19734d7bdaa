//! Configuration validation

use tracing::debug;

use crate::error::{ConfigError, Result};

use super::types::{Config, TaskConfig};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    debug!("validating configuration");
    validate_run(config)?;
    validate_tasks(config)?;
    debug!("configuration validation passed");
    Ok(())
}

fn validate_run(config: &Config) -> Result<()> {
    if config.run.concurrency == 0 {
        return Err(ConfigError::InvalidValue {
            field: "run.concurrency".to_string(),
            message: "must be at least 1".to_string(),
        }
        .into());
    }
    Ok(())
}

fn validate_tasks(config: &Config) -> Result<()> {
    for (name, task) in &config.tasks {
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "tasks".to_string(),
                message: "task name cannot be empty".to_string(),
            }
            .into());
        }

        if task.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: format!("tasks.{}.command", name),
                message: "command cannot be empty".to_string(),
            }
            .into());
        }

        for (relation, targets) in relations(task) {
            if let Some(target) = targets.iter().find(|t| !config.tasks.contains_key(*t)) {
                return Err(ConfigError::UnknownRelationTarget {
                    task: name.clone(),
                    relation,
                    target: target.clone(),
                }
                .into());
            }
        }
    }

    Ok(())
}

fn relations(task: &TaskConfig) -> [(&'static str, &Vec<String>); 4] {
    [
        ("depends_on", &task.depends_on),
        ("reverse_depends_on", &task.reverse_depends_on),
        ("run_before", &task.run_before),
        ("run_after", &task.run_after),
    ]
}
