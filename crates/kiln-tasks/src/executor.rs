//! Graph executor - batch-stepped async execution using tokio

use std::sync::Arc;
use std::time::{Duration, Instant};

use kiln_core::RunContext;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::builder::TaskPlan;
use crate::registry::TaskRegistry;
use crate::reporter::{TaskEvent, TaskReporter};
use crate::task::{TaskId, TaskResult};

/// Result of a single task in a run
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    /// Task that was dispatched
    pub id: TaskId,
    /// What the action reported
    pub result: TaskResult,
    /// How long the action took
    pub duration: Duration,
    /// Whether the action was replaced by a no-op
    pub skipped: bool,
}

/// Everything a run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// Task ids in the order they were removed from the graph
    pub trace: Vec<TaskId>,
    /// Per-task outcomes, in trace order
    pub outcomes: Vec<TaskOutcome>,
    /// Tasks withheld because an earlier batch failed
    pub not_run: Vec<TaskId>,
    /// Number of batches executed
    pub batches: usize,
    /// Wall-clock duration of the run
    pub duration: Duration,
}

impl RunReport {
    /// Whether every dispatched task succeeded
    pub fn success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.success)
    }

    /// The first failed task in trace order
    pub fn failure(&self) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|o| !o.result.success)
    }

    /// Number of tasks that succeeded, including no-ops
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.success).count()
    }

    /// Number of tasks replaced by no-ops
    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.skipped).count()
    }
}

/// Options for the graph executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    /// Maximum actions running at once within a batch
    pub concurrency: usize,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            concurrency: num_cpus(),
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Graph executor - drains a [`TaskPlan`] batch by batch
pub struct GraphExecutor {
    options: ExecutorOptions,
    reporter: Arc<dyn TaskReporter>,
}

impl GraphExecutor {
    /// Create a new executor
    pub fn new(options: ExecutorOptions, reporter: Arc<dyn TaskReporter>) -> Self {
        Self { options, reporter }
    }

    /// Execute every task in the plan.
    ///
    /// All free nodes of the graph form a batch. Every member of the batch
    /// is dispatched, and the whole batch is awaited before its nodes are
    /// removed and the next batch is computed. A failure lets the current
    /// batch drain and withholds every later batch.
    #[instrument(skip_all, fields(tasks = plan.len(), concurrency = self.options.concurrency))]
    pub async fn run(
        &self,
        plan: TaskPlan,
        registry: &TaskRegistry,
        ctx: Arc<RunContext>,
    ) -> Result<RunReport, ExecutorError> {
        let start = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let TaskPlan {
            mut graph,
            requested,
        } = plan;
        let mut report = RunReport::default();

        ctx.incremental().begin_run();

        while !graph.is_empty() {
            let batch = graph.free_nodes();
            if batch.is_empty() {
                let remaining: Vec<String> = graph.nodes().map(|id| id.to_string()).collect();
                warn!(remaining = remaining.len(), "no free tasks left in a non-empty graph");
                return Err(ExecutorError::Stalled { remaining });
            }

            self.reporter.report(&TaskEvent::BatchStarted {
                batch: report.batches,
                tasks: batch.clone(),
            });
            debug!(batch = report.batches, size = batch.len(), "dispatching batch");

            let tasks = batch
                .iter()
                .map(|id| {
                    registry
                        .get(id)
                        .map(|task| (id, task))
                        .ok_or_else(|| ExecutorError::UnknownTask(id.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;

            let mut handles = Vec::with_capacity(tasks.len());
            for (id, task) in tasks {
                if !requested.contains(id) && !registry.accepts(id) {
                    handles.push((id.clone(), Dispatch::Skipped));
                    continue;
                }

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| ExecutorError::PoolClosed)?;
                self.reporter.report(&TaskEvent::Started { id: id.clone() });

                let action = task.action.clone();
                let ctx = ctx.clone();
                let dispatched = Instant::now();
                let handle = tokio::task::spawn_blocking(move || {
                    let result = action.run(&ctx);
                    drop(permit);
                    result
                });
                handles.push((id.clone(), Dispatch::Running(handle, dispatched)));
            }

            // Collect results from this batch
            let mut failed = false;
            for (id, dispatch) in handles {
                let outcome = match dispatch {
                    Dispatch::Skipped => {
                        self.reporter.report(&TaskEvent::Skipped {
                            id: id.clone(),
                            reason: "excluded by filter".to_string(),
                        });
                        TaskOutcome {
                            id: id.clone(),
                            result: TaskResult::success(),
                            duration: Duration::ZERO,
                            skipped: true,
                        }
                    }
                    Dispatch::Running(handle, dispatched) => {
                        let result = match handle.await {
                            Ok(result) => result,
                            Err(e) => TaskResult::failure(format!("Task panicked: {}", e)),
                        };
                        let duration = dispatched.elapsed();
                        self.report_result(&id, &result, duration);
                        TaskOutcome {
                            id: id.clone(),
                            result,
                            duration,
                            skipped: false,
                        }
                    }
                };

                failed |= !outcome.result.success;
                graph.remove_node(&id);
                report.trace.push(id);
                report.outcomes.push(outcome);
            }
            report.batches += 1;

            if failed {
                report.not_run = graph.nodes().cloned().collect();
                info!(withheld = report.not_run.len(), "batch failed, stopping");
                break;
            }
        }

        report.duration = start.elapsed();
        self.reporter.report(&TaskEvent::AllCompleted {
            total: report.outcomes.len(),
            succeeded: report.succeeded(),
            failed: report.outcomes.len() - report.succeeded(),
            skipped: report.skipped(),
            duration: report.duration,
        });

        Ok(report)
    }

    fn report_result(&self, id: &TaskId, result: &TaskResult, duration: Duration) {
        if result.success {
            self.reporter.report(&TaskEvent::Completed {
                id: id.clone(),
                duration,
                message: result.message.clone(),
            });
        } else {
            self.reporter.report(&TaskEvent::Failed {
                id: id.clone(),
                duration,
                error: result
                    .message
                    .clone()
                    .unwrap_or_else(|| "task failed".to_string()),
            });
        }
    }
}

enum Dispatch {
    Skipped,
    Running(tokio::task::JoinHandle<TaskResult>, Instant),
}

/// Errors that abort a run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// The graph still has nodes but none of them is free
    #[error("Internal scheduling error: no runnable task among {}", .remaining.join(", "))]
    Stalled { remaining: Vec<String> },

    /// The plan names a task the registry does not know
    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    /// The worker pool was shut down
    #[error("Worker pool closed")]
    PoolClosed,
}
