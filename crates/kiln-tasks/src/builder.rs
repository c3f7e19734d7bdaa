//! Task graph construction from requested tasks and declared relations

use std::collections::BTreeSet;

use tracing::{debug, info, instrument};

use crate::graph::{CycleError, DynamicGraph};
use crate::registry::{RegistryError, RelationKind, TaskRegistry};
use crate::task::TaskId;

/// A validated, not yet executed, task graph
#[derive(Debug, Clone)]
pub struct TaskPlan {
    /// The graph of selected tasks
    pub graph: DynamicGraph<TaskId>,
    /// Tasks that were explicitly requested
    pub requested: BTreeSet<TaskId>,
}

impl TaskPlan {
    /// Number of selected tasks
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether nothing was selected
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Whether the task was pulled in by a relation rather than requested
    pub fn is_transitive(&self, id: &TaskId) -> bool {
        self.graph.contains(id) && !self.requested.contains(id)
    }

    /// The batches the executor will run, without running them
    pub fn batches(&self) -> Result<Vec<Vec<TaskId>>, CycleError> {
        self.graph.drain_batches()
    }

    /// Tasks in the order a sequential dry run would complete them
    pub fn dry_run_order(&self) -> Result<Vec<TaskId>, CycleError> {
        Ok(self.batches()?.into_iter().flatten().collect())
    }

    /// Get a human-readable summary of the execution plan
    pub fn execution_plan(&self) -> String {
        let batches = match self.batches() {
            Ok(batches) => batches,
            Err(e) => return format!("{}\n", e),
        };

        let mut plan = String::new();
        for (i, batch) in batches.iter().enumerate() {
            plan.push_str(&format!("Batch {} ({} tasks):\n", i, batch.len()));
            for id in batch {
                let deps: Vec<String> = self
                    .graph
                    .prerequisites(id)
                    .map(|d| d.iter().map(|t| t.to_string()).collect())
                    .unwrap_or_default();
                let marker = if self.requested.contains(id) { "" } else { " (pulled in)" };
                if deps.is_empty() {
                    plan.push_str(&format!("  {}{}\n", id, marker));
                } else {
                    plan.push_str(&format!(
                        "  {}{} (after: {})\n",
                        id,
                        marker,
                        deps.join(", ")
                    ));
                }
            }
        }
        plan
    }
}

/// Builds a [`TaskPlan`] from a registry
pub struct TaskGraphBuilder<'a> {
    registry: &'a TaskRegistry,
}

impl<'a> TaskGraphBuilder<'a> {
    /// Create a builder over the registry's tasks and relations
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self { registry }
    }

    /// Build the graph for the requested tasks.
    ///
    /// Hard relations (`dependsOn`, `reverseDependsOn`) decide which tasks
    /// are selected; soft relations (`runBefore`, `runAfter`) only order tasks
    /// that are selected anyway.
    #[instrument(skip_all, fields(requested = requested.len()))]
    pub fn build<S: AsRef<str>>(&self, requested: &[S]) -> Result<TaskPlan, BuildError> {
        self.registry.validate_relations()?;

        let requested: Vec<TaskId> = requested.iter().map(|s| TaskId::new(s.as_ref())).collect();
        if let Some(unknown) = requested.iter().find(|id| !self.registry.contains(id)) {
            return Err(BuildError::UnknownTask(unknown.to_string()));
        }

        let selected = self.select(&requested);
        debug!(selected = selected.len(), "task selection complete");

        let relations = self.registry.relations();
        let mut graph = DynamicGraph::new();
        for id in &selected {
            graph.add_node(id.clone());
        }

        for a in &selected {
            for b in relations.targets(RelationKind::DependsOn, a) {
                graph.add_edge(a.clone(), b.clone())?;
            }
            for b in relations.targets(RelationKind::ReverseDependsOn, a) {
                graph.add_edge(b.clone(), a.clone())?;
            }
            for kind in [RelationKind::RunBefore, RelationKind::RunAfter] {
                for b in relations.targets(kind, a).filter(|b| selected.contains(*b)) {
                    graph.add_edge(a.clone(), b.clone())?;
                }
            }
        }

        graph.validate()?;

        info!(
            task_count = graph.len(),
            requested = requested.len(),
            "task graph built"
        );

        Ok(TaskPlan {
            graph,
            requested: requested.into_iter().collect(),
        })
    }

    /// Requested tasks plus everything pulled in by hard relations
    fn select(&self, requested: &[TaskId]) -> BTreeSet<TaskId> {
        let relations = self.registry.relations();
        let mut selected: BTreeSet<TaskId> = requested.iter().cloned().collect();
        let mut pending: Vec<TaskId> = requested.to_vec();

        while let Some(task) = pending.pop() {
            for kind in RelationKind::ALL.into_iter().filter(|k| k.causes_inclusion()) {
                for target in relations.targets(kind, &task) {
                    if selected.insert(target.clone()) {
                        debug!(task = %task, pulled = %target, relation = %kind, "task pulled in");
                        pending.push(target.clone());
                    }
                }
            }
        }

        selected
    }
}

/// Errors during graph construction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    /// A requested task is not registered
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// Invalid relation declarations
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The relations form a cycle
    #[error(transparent)]
    Cycle(#[from] CycleError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Relations;
    use crate::task::TaskSpec;

    /// Registry with every task mentioned by the relations
    fn registry(relations: Relations) -> TaskRegistry {
        let mut registry = TaskRegistry::new();
        let names: BTreeSet<TaskId> = relations
            .iter()
            .flat_map(|(_, from, to)| [from.clone(), to.clone()])
            .collect();
        for name in names {
            registry.register(TaskSpec::new(name)).unwrap();
        }
        *registry.relations_mut() = relations;
        registry
    }

    fn order(registry: &TaskRegistry, requested: &[&str]) -> Vec<String> {
        TaskGraphBuilder::new(registry)
            .build(requested)
            .unwrap()
            .dry_run_order()
            .unwrap()
            .into_iter()
            .map(|id| id.to_string())
            .collect()
    }

    fn compile_relations() -> Relations {
        let mut r = Relations::new();
        r.add_depends_on("assemble", "compile");
        r.add_reverse_depends_on("clean", "copyVersion");
        r.add_reverse_depends_on("compile", "postCompile");
        r
    }

    #[test]
    fn test_reverse_depends_on_selection() {
        let reg = registry(compile_relations());
        assert_eq!(order(&reg, &["compile"]), vec!["compile", "postCompile"]);
        assert_eq!(order(&reg, &["postCompile"]), vec!["postCompile"]);
        assert_eq!(
            order(&reg, &["compile", "postCompile"]),
            vec!["compile", "postCompile"]
        );
        assert_eq!(order(&reg, &["clean"]), vec!["clean", "copyVersion"]);
    }

    #[test]
    fn test_multiple_requested_tasks() {
        let reg = registry(compile_relations());
        assert_eq!(
            order(&reg, &["clean", "compile"]),
            vec!["clean", "compile", "copyVersion", "postCompile"]
        );
        assert_eq!(
            order(&reg, &["assemble"]),
            vec!["compile", "assemble", "postCompile"]
        );
        assert_eq!(
            order(&reg, &["clean", "assemble"]),
            vec!["clean", "compile", "assemble", "copyVersion", "postCompile"]
        );
    }

    #[test]
    fn test_reverse_dependency_chain() {
        let mut r = Relations::new();
        r.add_depends_on("assemble", "compile");
        r.add_reverse_depends_on("compile", "copyVersionForWrapper");
        r.add_reverse_depends_on("copyVersionForWrapper", "assemble");
        let reg = registry(r);

        assert_eq!(
            order(&reg, &["assemble"]),
            vec!["compile", "copyVersionForWrapper", "assemble"]
        );
    }

    #[test]
    fn test_depends_on_and_reverse_depends_on() {
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_reverse_depends_on("compile", "example");
        let reg = registry(r);

        assert_eq!(order(&reg, &["compile"]), vec!["clean", "compile", "example"]);
    }

    #[test]
    fn test_multiple_dependencies() {
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_depends_on("compile", "example");
        let reg = registry(r);

        assert_eq!(order(&reg, &["compile"]), vec!["clean", "example", "compile"]);
    }

    #[test]
    fn test_soft_relations_do_not_pull_in_tasks() {
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_run_before("compile", "example");
        r.add_run_after("compile", "example");
        let reg = registry(r);

        assert_eq!(order(&reg, &["compile"]), vec!["clean", "compile"]);
    }

    #[test]
    fn test_run_before_orders_selected_tasks() {
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_run_before("compile", "example");
        let reg = registry(r);

        assert_eq!(
            order(&reg, &["compile", "example"]),
            vec!["clean", "example", "compile"]
        );
    }

    #[test]
    fn test_run_after_orders_selected_tasks() {
        // "compile runs after example": example must come first. An older
        // expectation of [clean, compile, example] contradicts the relation.
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_run_after("compile", "example");
        let reg = registry(r);

        assert_eq!(
            order(&reg, &["compile", "example"]),
            vec!["clean", "example", "compile"]
        );
    }

    #[test]
    fn test_unknown_requested_task() {
        let reg = registry(compile_relations());
        let err = TaskGraphBuilder::new(&reg).build(&["deploy"]).unwrap_err();
        assert_eq!(err, BuildError::UnknownTask("deploy".to_string()));
    }

    #[test]
    fn test_unknown_relation_target() {
        let mut reg = TaskRegistry::new();
        reg.register(TaskSpec::new("compile").depends_on("clean"))
            .unwrap();

        let err = TaskGraphBuilder::new(&reg).build(&["compile"]).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Registry(RegistryError::UnknownRelationTarget { .. })
        ));
    }

    #[test]
    fn test_cycle_detected() {
        let mut r = Relations::new();
        r.add_depends_on("a", "b");
        r.add_depends_on("b", "a");
        let reg = registry(r);

        let err = TaskGraphBuilder::new(&reg).build(&["a"]).unwrap_err();
        match err {
            BuildError::Cycle(cycle) => {
                assert_eq!(cycle.cycle.first(), cycle.cycle.last());
                assert!(cycle.cycle.contains(&"a".to_string()));
                assert!(cycle.cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_soft_relation_cycle_detected() {
        let mut r = Relations::new();
        r.add_depends_on("compile", "clean");
        r.add_run_after("clean", "compile");
        let reg = registry(r);

        let err = TaskGraphBuilder::new(&reg).build(&["compile"]).unwrap_err();
        assert!(matches!(err, BuildError::Cycle(_)));
    }

    #[test]
    fn test_deterministic_order() {
        let mut r = Relations::new();
        r.add_depends_on("package", "test");
        r.add_depends_on("package", "docs");
        r.add_depends_on("test", "compile");
        r.add_depends_on("docs", "compile");
        r.add_reverse_depends_on("compile", "lint");
        let reg = registry(r);

        let first = order(&reg, &["package"]);
        for _ in 0..10 {
            assert_eq!(order(&reg, &["package"]), first);
        }
        assert_eq!(first, vec!["compile", "docs", "lint", "test", "package"]);
    }

    #[test]
    fn test_plan_metadata() {
        let reg = registry(compile_relations());
        let plan = TaskGraphBuilder::new(&reg).build(&["compile"]).unwrap();

        assert_eq!(plan.len(), 2);
        assert!(!plan.is_transitive(&TaskId::from("compile")));
        assert!(plan.is_transitive(&TaskId::from("postCompile")));
        assert!(!plan.is_transitive(&TaskId::from("clean")));

        let text = plan.execution_plan();
        assert!(text.contains("Batch 0 (1 tasks)"));
        assert!(text.contains("postCompile (pulled in) (after: compile)"));
    }
}
