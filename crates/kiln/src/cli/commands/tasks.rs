//! Tasks command - list declared tasks and their relations

use clap::Args;
use console::style;

use kiln_tasks::{RelationKind, TaskRegistry};

use super::BuildFile;
use crate::cli::output;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// List declared tasks
#[derive(Debug, Args)]
pub struct TasksCommand {
    /// Also show declared relations
    #[arg(long)]
    pub relations: bool,
}

impl TasksCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let build = BuildFile::load()?;
        let registry = build.registry(None, None)?;
        registry.validate_relations()?;

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&to_json(&registry))?);
            return Ok(exit_codes::SUCCESS);
        }

        if registry.is_empty() {
            output::info(&format!("No tasks declared in {}", build.path.display()));
            return Ok(exit_codes::SUCCESS);
        }

        for (id, task) in registry.tasks() {
            println!(
                "{} {}",
                style(id).bold(),
                style(format!("[{}]", task.project)).dim()
            );
            if let Some(description) = &task.description {
                println!("  {}", description);
            }
            if self.relations || cli.verbose {
                for kind in RelationKind::ALL {
                    let targets: Vec<String> = registry
                        .relations()
                        .targets(kind, id)
                        .map(|t| t.to_string())
                        .collect();
                    if !targets.is_empty() {
                        println!("{}", output::key_value(&kind.to_string(), &targets.join(", ")));
                    }
                }
            }
        }

        if !cli.quiet {
            println!();
            output::success(&format!("{} tasks", registry.len()));
        }
        Ok(exit_codes::SUCCESS)
    }
}

fn to_json(registry: &TaskRegistry) -> serde_json::Value {
    let tasks: Vec<serde_json::Value> = registry
        .tasks()
        .map(|(id, task)| {
            let mut relations = serde_json::Map::new();
            for kind in RelationKind::ALL {
                let targets: Vec<String> = registry
                    .relations()
                    .targets(kind, id)
                    .map(|t| t.to_string())
                    .collect();
                relations.insert(kind.to_string(), serde_json::json!(targets));
            }
            serde_json::json!({
                "id": id.to_string(),
                "project": task.project,
                "description": task.description,
                "relations": relations,
            })
        })
        .collect();
    serde_json::json!({ "tasks": tasks })
}
