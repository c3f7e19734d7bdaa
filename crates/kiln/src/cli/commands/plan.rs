//! Plan command - show the batches a run would execute

use clap::Args;
use console::style;

use kiln_tasks::TaskGraphBuilder;

use super::BuildFile;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Show the execution plan without running anything
#[derive(Debug, Args)]
pub struct PlanCommand {
    /// Tasks to plan
    #[arg(required = true)]
    pub tasks: Vec<String>,
}

impl PlanCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let build = BuildFile::load()?;
        let registry = build.registry(None, None)?;
        let plan = TaskGraphBuilder::new(&registry).build(self.tasks.as_slice())?;
        let batches = plan.batches()?;

        match cli.format {
            OutputFormat::Json => {
                let json: Vec<serde_json::Value> = batches
                    .iter()
                    .enumerate()
                    .map(|(i, batch)| {
                        serde_json::json!({
                            "batch": i,
                            "tasks": batch.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&json)?);
            }
            OutputFormat::Text => {
                if !cli.quiet {
                    println!(
                        "{} {} task{} in {} batch{}",
                        style("→").blue(),
                        plan.len(),
                        if plan.len() == 1 { "" } else { "s" },
                        batches.len(),
                        if batches.len() == 1 { "" } else { "es" },
                    );
                    println!();
                }
                print!("{}", plan.execution_plan());
            }
        }

        Ok(exit_codes::SUCCESS)
    }
}
