//! Run command - execute tasks and everything they pull in

use std::sync::Arc;

use clap::Args;
use console::style;
use tracing::warn;

use kiln_core::RunContext;
use kiln_tasks::{
    ChecksumStore, ExecutorOptions, GraphExecutor, RunReport, TaskEvent, TaskGraphBuilder,
    TaskReporter, TaskReporterRegistry,
};

use super::BuildFile;
use crate::cli::{Cli, OutputFormat};
use crate::exit_codes;

/// Run tasks
#[derive(Debug, Args)]
pub struct RunCommand {
    /// Tasks to run (e.g., compile test)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Maximum concurrent tasks
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Only run tasks of this project; tasks pulled in from other projects
    /// keep their place in the order but do nothing
    #[arg(long)]
    pub project: Option<String>,

    /// Resolve and walk the graph without executing commands
    #[arg(long)]
    pub dry_run: bool,

    /// Ignore recorded checksums and run incremental tasks in full
    #[arg(long)]
    pub no_incremental: bool,
}

impl RunCommand {
    pub fn execute(&self, cli: &Cli) -> anyhow::Result<i32> {
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(self.execute_async(cli))
    }

    async fn execute_async(&self, cli: &Cli) -> anyhow::Result<i32> {
        let build = BuildFile::load()?;
        let ctx = Arc::new(RunContext::new(build.root.clone()).with_dry_run(self.dry_run));

        let store = Arc::new(ChecksumStore::open(ChecksumStore::default_path(&build.root))?);
        store.check_build_file(&build.path, &ctx)?;
        if self.no_incremental {
            ctx.incremental().set_build_file_out_of_date();
        }

        let reporter = reporter_for(cli);
        let mut registry = build.registry(Some(store.clone()), Some(reporter.clone()))?;
        if let Some(project) = self.project.clone() {
            registry = registry.with_filter(move |_, task| task.project == project);
        }

        let plan = TaskGraphBuilder::new(&registry).build(self.tasks.as_slice())?;

        if !cli.quiet && cli.format == OutputFormat::Text {
            println!(
                "{} {} task{} ({} requested)",
                style("→").blue(),
                plan.len(),
                if plan.len() == 1 { "" } else { "s" },
                plan.requested.len(),
            );
            if cli.verbose || self.dry_run {
                println!();
                println!("{}", plan.execution_plan());
            }
            if self.dry_run {
                println!("{}", style("[DRY RUN - commands will not be executed]").yellow().bold());
            }
            println!();
        }

        let concurrency = self.concurrency.unwrap_or(build.config.run.concurrency);
        let executor = GraphExecutor::new(ExecutorOptions { concurrency }, reporter);
        let report = executor.run(plan, &registry, ctx).await?;

        if !self.dry_run {
            if let Err(e) = store.save() {
                warn!(error = %e, "failed to save checksums");
            }
        }

        if cli.format == OutputFormat::Json {
            println!("{}", serde_json::to_string_pretty(&summary(&report))?);
        }

        if let Some(failure) = report.failure() {
            if !cli.quiet && cli.format == OutputFormat::Text {
                println!();
                println!(
                    "  {} {} failed: {}",
                    style("✗").red().bold(),
                    failure.id,
                    failure.result.message.as_deref().unwrap_or("task failed")
                );
                if !report.not_run.is_empty() {
                    let withheld: Vec<String> =
                        report.not_run.iter().map(|id| id.to_string()).collect();
                    println!("    {} not run: {}", style("○").yellow(), withheld.join(", "));
                }
            }
            return Ok(exit_codes::TASK_FAILED);
        }

        Ok(exit_codes::SUCCESS)
    }
}

/// Task events always reach the log; text mode also gets the live console view
fn reporter_for(cli: &Cli) -> Arc<dyn TaskReporter> {
    let mut reporters = TaskReporterRegistry::new();
    if !cli.quiet && cli.format == OutputFormat::Text {
        reporters.register(ConsoleReporter::new(cli.verbose));
    }
    Arc::new(reporters)
}

fn summary(report: &RunReport) -> serde_json::Value {
    serde_json::json!({
        "success": report.success(),
        "trace": report.trace.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "not_run": report.not_run.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "batches": report.batches,
        "duration_ms": report.duration.as_millis(),
        "tasks": report.outcomes.iter().map(|o| {
            serde_json::json!({
                "id": o.id.to_string(),
                "success": o.result.success,
                "message": o.result.message,
                "skipped": o.skipped,
                "duration_ms": o.duration.as_millis(),
            })
        }).collect::<Vec<_>>(),
    })
}

/// Console reporter with live output
struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TaskReporter for ConsoleReporter {
    fn report(&self, event: &TaskEvent) {
        match event {
            TaskEvent::BatchStarted { batch, tasks } => {
                if self.verbose {
                    println!(
                        "  {} Batch {} ({} tasks)",
                        style("─").dim(),
                        batch,
                        tasks.len()
                    );
                }
            }
            TaskEvent::Started { id } => {
                if self.verbose {
                    println!("  {} {}", style("▸").dim(), style(id).bold());
                }
            }
            TaskEvent::Output {
                id,
                line,
                is_stderr,
            } => {
                if self.verbose {
                    if *is_stderr {
                        println!("    {} {}", style(format!("[{}]", id)).red().dim(), line);
                    } else {
                        println!("    {} {}", style(format!("[{}]", id)).dim(), line);
                    }
                }
            }
            TaskEvent::Completed {
                id,
                duration,
                message,
            } => match message {
                Some(message) => println!(
                    "  {} {} {} {}",
                    style("✓").green(),
                    style(id).green(),
                    style(format!("({})", message)).cyan(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                ),
                None => println!(
                    "  {} {} {}",
                    style("✓").green(),
                    style(id).green(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim()
                ),
            },
            TaskEvent::Failed {
                id,
                duration,
                error,
            } => {
                println!(
                    "  {} {} {} {}",
                    style("✗").red(),
                    style(id).red(),
                    style(format!("{:.1}s", duration.as_secs_f64())).dim(),
                    style(error).red().dim()
                );
            }
            TaskEvent::Skipped { id, reason } => {
                println!(
                    "  {} {} {}",
                    style("○").yellow(),
                    style(id).yellow(),
                    style(format!("({})", reason)).dim()
                );
            }
            TaskEvent::AllCompleted {
                total,
                succeeded,
                failed,
                skipped,
                duration,
            } => {
                println!();
                println!(
                    "  {} {}/{} succeeded, {} failed, {} skipped ({:.1}s)",
                    if *failed == 0 {
                        style("✓").green().bold()
                    } else {
                        style("✗").red().bold()
                    },
                    succeeded,
                    total,
                    failed,
                    skipped,
                    duration.as_secs_f64()
                );
            }
        }
    }
}
