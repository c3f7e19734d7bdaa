//! Kiln Tasks - Task graph construction and execution engine
//!
//! This crate resolves requested tasks and their declared relations into a
//! dependency graph, and drains that graph in batches of independent tasks,
//! running each batch in parallel.

pub mod builder;
pub mod checksum;
pub mod executor;
pub mod graph;
pub mod registry;
pub mod reporter;
pub mod shell;
pub mod task;

pub use builder::{BuildError, TaskGraphBuilder, TaskPlan};
pub use checksum::{Checksum, ChecksumError, ChecksumStore, TaskChecksums};
pub use executor::{ExecutorError, ExecutorOptions, GraphExecutor, RunReport, TaskOutcome};
pub use graph::{CycleError, DynamicGraph};
pub use registry::{RegisteredTask, RegistryError, RelationKind, Relations, TaskRegistry};
pub use reporter::{TaskEvent, TaskReporter, TaskReporterRegistry};
pub use shell::{IncrementalInputs, ShellAction};
pub use task::{TaskAction, TaskId, TaskResult, TaskSpec};
