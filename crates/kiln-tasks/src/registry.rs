//! Task registry and relation mappings

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::task::{TaskAction, TaskId, TaskSpec};

/// The four kinds of declared relations between tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// `A` requires `B` to complete first and pulls it in
    DependsOn,
    /// `B` must run after `A` and is pulled in when `A` is selected
    ReverseDependsOn,
    /// `B` runs before `A` when both are selected
    RunBefore,
    /// `A` runs after `B` when both are selected
    RunAfter,
}

impl RelationKind {
    /// All relation kinds
    pub const ALL: [RelationKind; 4] = [
        RelationKind::DependsOn,
        RelationKind::ReverseDependsOn,
        RelationKind::RunBefore,
        RelationKind::RunAfter,
    ];

    /// Whether the relation pulls its targets into the selected set
    pub fn causes_inclusion(self) -> bool {
        matches!(self, Self::DependsOn | Self::ReverseDependsOn)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DependsOn => "dependsOn",
            Self::ReverseDependsOn => "reverseDependsOn",
            Self::RunBefore => "runBefore",
            Self::RunAfter => "runAfter",
        };
        f.write_str(name)
    }
}

type RelationMap = BTreeMap<TaskId, BTreeSet<TaskId>>;

/// Declared relations, one multi-valued mapping per kind
#[derive(Debug, Clone, Default)]
pub struct Relations {
    depends_on: RelationMap,
    reverse_depends_on: RelationMap,
    run_before: RelationMap,
    run_after: RelationMap,
}

impl Relations {
    /// Create empty relations
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `kind[from] ⊇ {to}`
    pub fn add(&mut self, kind: RelationKind, from: impl Into<TaskId>, to: impl Into<TaskId>) {
        self.map_mut(kind)
            .entry(from.into())
            .or_default()
            .insert(to.into());
    }

    /// `A` requires `B` first
    pub fn add_depends_on(&mut self, a: impl Into<TaskId>, b: impl Into<TaskId>) {
        self.add(RelationKind::DependsOn, a, b);
    }

    /// Selecting `A` pulls in `B`, which then runs after `A`
    pub fn add_reverse_depends_on(&mut self, a: impl Into<TaskId>, b: impl Into<TaskId>) {
        self.add(RelationKind::ReverseDependsOn, a, b);
    }

    /// `B` runs before `A` when both are selected
    pub fn add_run_before(&mut self, a: impl Into<TaskId>, b: impl Into<TaskId>) {
        self.add(RelationKind::RunBefore, a, b);
    }

    /// `A` runs after `B` when both are selected
    pub fn add_run_after(&mut self, a: impl Into<TaskId>, b: impl Into<TaskId>) {
        self.add(RelationKind::RunAfter, a, b);
    }

    /// Targets of `kind` declared by `task`
    pub fn targets(&self, kind: RelationKind, task: &TaskId) -> impl Iterator<Item = &TaskId> {
        self.map(kind).get(task).into_iter().flatten()
    }

    /// Every `(kind, from, to)` triple, in stable order
    pub fn iter(&self) -> impl Iterator<Item = (RelationKind, &TaskId, &TaskId)> {
        RelationKind::ALL.into_iter().flat_map(move |kind| {
            self.map(kind)
                .iter()
                .flat_map(move |(from, tos)| tos.iter().map(move |to| (kind, from, to)))
        })
    }

    /// Whether no relations are declared
    pub fn is_empty(&self) -> bool {
        RelationKind::ALL.iter().all(|kind| self.map(*kind).is_empty())
    }

    fn map(&self, kind: RelationKind) -> &RelationMap {
        match kind {
            RelationKind::DependsOn => &self.depends_on,
            RelationKind::ReverseDependsOn => &self.reverse_depends_on,
            RelationKind::RunBefore => &self.run_before,
            RelationKind::RunAfter => &self.run_after,
        }
    }

    fn map_mut(&mut self, kind: RelationKind) -> &mut RelationMap {
        match kind {
            RelationKind::DependsOn => &mut self.depends_on,
            RelationKind::ReverseDependsOn => &mut self.reverse_depends_on,
            RelationKind::RunBefore => &mut self.run_before,
            RelationKind::RunAfter => &mut self.run_after,
        }
    }
}

/// A task known to the registry
#[derive(Clone)]
pub struct RegisteredTask {
    /// Project the task belongs to
    pub project: String,
    /// Human-readable description
    pub description: Option<String>,
    /// The task body
    pub action: Arc<dyn TaskAction>,
}

impl fmt::Debug for RegisteredTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTask")
            .field("project", &self.project)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

type TaskFilter = Arc<dyn Fn(&TaskId, &RegisteredTask) -> bool + Send + Sync>;

/// All tasks available to a run, with their declared relations
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, RegisteredTask>,
    relations: Relations,
    filter: Option<TaskFilter>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task and its declared relations
    pub fn register(&mut self, spec: TaskSpec) -> Result<(), RegistryError> {
        if self.tasks.contains_key(&spec.id) {
            return Err(RegistryError::DuplicateTask(spec.id.to_string()));
        }
        debug!(task = %spec.id, project = %spec.project, "registering task");

        for dep in spec.depends_on {
            self.relations.add_depends_on(spec.id.clone(), dep);
        }
        for dep in spec.reverse_depends_on {
            self.relations.add_reverse_depends_on(spec.id.clone(), dep);
        }
        for other in spec.run_before {
            self.relations.add_run_before(spec.id.clone(), other);
        }
        for other in spec.run_after {
            self.relations.add_run_after(spec.id.clone(), other);
        }

        self.tasks.insert(
            spec.id,
            RegisteredTask {
                project: spec.project,
                description: spec.description,
                action: spec.action,
            },
        );
        Ok(())
    }

    /// Register several tasks
    pub fn register_all(
        &mut self,
        specs: impl IntoIterator<Item = TaskSpec>,
    ) -> Result<(), RegistryError> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(())
    }

    /// Set the inclusion predicate.
    ///
    /// A task pulled in transitively for which the predicate answers `false`
    /// stays in the plan for ordering purposes but does not run its action.
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&TaskId, &RegisteredTask) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Whether a transitively pulled task should run its action
    pub fn accepts(&self, id: &TaskId) -> bool {
        match (&self.filter, self.tasks.get(id)) {
            (Some(filter), Some(task)) => filter(id, task),
            _ => true,
        }
    }

    /// Look up a task
    pub fn get(&self, id: &TaskId) -> Option<&RegisteredTask> {
        self.tasks.get(id)
    }

    /// Whether the task is registered
    pub fn contains(&self, id: &TaskId) -> bool {
        self.tasks.contains_key(id)
    }

    /// All registered tasks, in stable order
    pub fn tasks(&self) -> impl Iterator<Item = (&TaskId, &RegisteredTask)> {
        self.tasks.iter()
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no tasks are registered
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Declared relations
    pub fn relations(&self) -> &Relations {
        &self.relations
    }

    /// Declared relations, for direct population
    pub fn relations_mut(&mut self) -> &mut Relations {
        &mut self.relations
    }

    /// Check every relation names registered tasks on both ends
    pub fn validate_relations(&self) -> Result<(), RegistryError> {
        for (kind, from, to) in self.relations.iter() {
            for id in [from, to] {
                if !self.contains(id) {
                    return Err(RegistryError::UnknownRelationTarget {
                        task: from.to_string(),
                        relation: kind,
                        target: id.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.tasks)
            .field("relations", &self.relations)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Errors while registering tasks or validating relations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Two tasks share an id
    #[error("Task '{0}' is registered twice")]
    DuplicateTask(String),

    /// A relation refers to a task that was never registered
    #[error("Task '{task}' declares {relation} on unknown task '{target}'")]
    UnknownRelationTarget {
        task: String,
        relation: RelationKind,
        target: String,
    },
}
