//! Task types and definitions

use std::fmt;
use std::sync::Arc;

use kiln_core::RunContext;
use serde::{Deserialize, Serialize};

/// Unique identifier for a task within one run
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new task ID
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The task name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Outcome reported by a task action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Whether the task succeeded
    pub success: bool,
    /// Optional detail, required for failures
    pub message: Option<String>,
}

impl TaskResult {
    /// A successful result
    pub fn success() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    /// A successful result for an incremental task that had nothing to do
    pub fn up_to_date() -> Self {
        Self {
            success: true,
            message: Some("up to date".to_string()),
        }
    }

    /// A failed result
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

impl Default for TaskResult {
    fn default() -> Self {
        Self::success()
    }
}

/// The body of a task.
///
/// Actions run on a blocking worker thread and may block on I/O or
/// subprocesses. Actions in the same batch may run concurrently.
pub trait TaskAction: Send + Sync {
    /// Run the task
    fn run(&self, ctx: &RunContext) -> TaskResult;
}

impl<F> TaskAction for F
where
    F: Fn(&RunContext) -> TaskResult + Send + Sync,
{
    fn run(&self, ctx: &RunContext) -> TaskResult {
        self(ctx)
    }
}

/// Registration record for a task: its action plus declared relations
#[derive(Clone)]
pub struct TaskSpec {
    /// Task identifier
    pub id: TaskId,
    /// Project the task belongs to
    pub project: String,
    /// Human-readable description
    pub description: Option<String>,
    /// Tasks that must complete first
    pub depends_on: Vec<TaskId>,
    /// Tasks made to depend on this one
    pub reverse_depends_on: Vec<TaskId>,
    /// Tasks that run before this one when both are selected
    pub run_before: Vec<TaskId>,
    /// Tasks this one runs after when both are selected
    pub run_after: Vec<TaskId>,
    /// The task body
    pub action: Arc<dyn TaskAction>,
}

impl TaskSpec {
    /// Create a spec whose action always succeeds
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            project: String::new(),
            description: None,
            depends_on: Vec::new(),
            reverse_depends_on: Vec::new(),
            run_before: Vec::new(),
            run_after: Vec::new(),
            action: Arc::new(|_: &RunContext| TaskResult::success()),
        }
    }

    /// Set the project
    pub fn with_project(mut self, project: impl Into<String>) -> Self {
        self.project = project.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the action
    pub fn with_action(mut self, action: impl TaskAction + 'static) -> Self {
        self.action = Arc::new(action);
        self
    }

    /// Add a hard prerequisite
    pub fn depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Add a task that must run after this one whenever this one runs
    pub fn reverse_depends_on(mut self, dep: impl Into<TaskId>) -> Self {
        self.reverse_depends_on.push(dep.into());
        self
    }

    /// Add a soft "runs before this one" ordering
    pub fn run_before(mut self, other: impl Into<TaskId>) -> Self {
        self.run_before.push(other.into());
        self
    }

    /// Add a soft "this one runs after" ordering
    pub fn run_after(mut self, other: impl Into<TaskId>) -> Self {
        self.run_after.push(other.into());
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("id", &self.id)
            .field("project", &self.project)
            .field("depends_on", &self.depends_on)
            .field("reverse_depends_on", &self.reverse_depends_on)
            .field("run_before", &self.run_before)
            .field("run_after", &self.run_after)
            .finish_non_exhaustive()
    }
}
