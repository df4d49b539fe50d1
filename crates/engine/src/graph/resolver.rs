//! Dependency graph validation and topological layering

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;

use crate::workflow::WorkflowDefinition;

/// Definition-time graph errors
///
/// These are reported at submission; a definition that fails resolution is
/// never stored and no instance is created from it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The dependency relation contains a cycle (a self-dependency is a cycle of one)
    #[error("cyclic dependency between tasks: {}", task_ids.join(" -> "))]
    CyclicDependency { task_ids: Vec<String> },

    /// A task depends on an id that is not part of the definition
    #[error("task '{task_id}' depends on unknown task '{missing_id}'")]
    UnknownDependency { task_id: String, missing_id: String },

    /// Two tasks share an id
    #[error("duplicate task id '{task_id}'")]
    DuplicateTaskId { task_id: String },
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Validated dependency graph of a workflow definition
///
/// Layers are advisory: they prove that a valid order exists. The scheduler
/// decides readiness from live task states, not from layer indices.
#[derive(Debug, Clone, Serialize)]
pub struct TaskGraph {
    order: Vec<String>,
    dependencies: HashMap<String, BTreeSet<String>>,
    dependents: HashMap<String, BTreeSet<String>>,
    layer_index: HashMap<String, usize>,
    layers: Vec<Vec<String>>,
}

/// Validate `definition` and compute its topological layers
///
/// Layer 0 holds the tasks without dependencies; layer *k* holds the tasks
/// whose dependencies all sit in layers below *k*. Within a layer tasks keep
/// their declaration order, so the result is deterministic.
///
/// # Errors
///
/// - [`GraphError::DuplicateTaskId`] if two tasks share an id
/// - [`GraphError::UnknownDependency`] if `depends_on` names a missing task
/// - [`GraphError::CyclicDependency`] if the graph is not acyclic
pub fn resolve(definition: &WorkflowDefinition) -> Result<TaskGraph, GraphError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in &definition.tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(GraphError::DuplicateTaskId {
                task_id: task.id.clone(),
            });
        }
    }

    for task in &definition.tasks {
        if task.depends_on.contains(&task.id) {
            return Err(GraphError::CyclicDependency {
                task_ids: vec![task.id.clone()],
            });
        }
        if let Some(missing) = task.depends_on.iter().find(|d| !seen.contains(d.as_str())) {
            return Err(GraphError::UnknownDependency {
                task_id: task.id.clone(),
                missing_id: missing.clone(),
            });
        }
    }

    let order: Vec<String> = definition.tasks.iter().map(|t| t.id.clone()).collect();
    let dependencies: HashMap<String, BTreeSet<String>> = definition
        .tasks
        .iter()
        .map(|t| (t.id.clone(), t.depends_on.clone()))
        .collect();

    let mut marks: HashMap<&str, Mark> = HashMap::new();
    let mut layer_index: HashMap<String, usize> = HashMap::new();
    for id in &order {
        let mut path = Vec::new();
        visit(id, &dependencies, &mut marks, &mut path, &mut layer_index)?;
    }

    let mut dependents: HashMap<String, BTreeSet<String>> =
        order.iter().map(|id| (id.clone(), BTreeSet::new())).collect();
    for (task_id, deps) in &dependencies {
        for dep in deps {
            if let Some(set) = dependents.get_mut(dep) {
                set.insert(task_id.clone());
            }
        }
    }

    let depth = layer_index.values().copied().max().map_or(0, |max| max + 1);
    let mut layers: Vec<Vec<String>> = vec![Vec::new(); depth];
    for id in &order {
        layers[layer_index[id]].push(id.clone());
    }

    Ok(TaskGraph {
        order,
        dependencies,
        dependents,
        layer_index,
        layers,
    })
}

/// Depth-first visit computing layer indices; a node met again while still
/// `Visiting` closes a cycle.
fn visit<'a>(
    id: &'a str,
    dependencies: &'a HashMap<String, BTreeSet<String>>,
    marks: &mut HashMap<&'a str, Mark>,
    path: &mut Vec<&'a str>,
    layer_index: &mut HashMap<String, usize>,
) -> Result<usize, GraphError> {
    match marks.get(id) {
        Some(Mark::Done) => return Ok(layer_index[id]),
        Some(Mark::Visiting) => {
            let start = path.iter().position(|p| *p == id).unwrap_or(0);
            let mut task_ids: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            task_ids.push(id.to_string());
            return Err(GraphError::CyclicDependency { task_ids });
        }
        None => {}
    }

    marks.insert(id, Mark::Visiting);
    path.push(id);

    let mut layer = 0;
    if let Some(deps) = dependencies.get(id) {
        for dep in deps {
            let dep_layer = visit(dep, dependencies, marks, path, layer_index)?;
            layer = layer.max(dep_layer + 1);
        }
    }

    path.pop();
    marks.insert(id, Mark::Done);
    layer_index.insert(id.to_string(), layer);
    Ok(layer)
}

impl TaskGraph {
    /// Task ids in declaration order
    pub fn task_ids(&self) -> &[String] {
        &self.order
    }

    /// Topological layers
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    /// Layer index of a task
    pub fn layer_of(&self, task_id: &str) -> Option<usize> {
        self.layer_index.get(task_id).copied()
    }

    /// Direct dependencies of a task
    pub fn dependencies(&self, task_id: &str) -> impl Iterator<Item = &str> {
        self.dependencies
            .get(task_id)
            .into_iter()
            .flat_map(|deps| deps.iter().map(String::as_str))
    }

    /// Every task that depends on `task_id`, directly or transitively
    ///
    /// Returned in breadth-first order starting from the direct dependents.
    pub fn transitive_dependents(&self, task_id: &str) -> Vec<String> {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        let mut result = Vec::new();

        queue.push_back(task_id);
        while let Some(current) = queue.pop_front() {
            if let Some(children) = self.dependents.get(current) {
                for child in children {
                    if visited.insert(child.as_str()) {
                        result.push(child.clone());
                        queue.push_back(child.as_str());
                    }
                }
            }
        }

        result
    }

    /// Number of tasks
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::TaskDefinition;

    fn task(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition::new(id, "noop").depends_on(deps.iter().copied())
    }

    fn definition(tasks: Vec<TaskDefinition>) -> WorkflowDefinition {
        tasks
            .into_iter()
            .fold(WorkflowDefinition::new("test", 1), |d, t| d.with_task(t))
    }

    fn assert_layers_respect_dependencies(def: &WorkflowDefinition, graph: &TaskGraph) {
        for t in &def.tasks {
            let own = graph.layer_of(&t.id).unwrap();
            for dep in &t.depends_on {
                assert!(
                    own > graph.layer_of(dep).unwrap(),
                    "task {} (layer {}) must sit above {}",
                    t.id,
                    own,
                    dep
                );
            }
        }
    }

    #[test]
    fn test_linear_chain() {
        let def = definition(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])]);
        let graph = resolve(&def).expect("should resolve");

        assert_eq!(
            graph.layers(),
            &[vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn test_diamond_layers() {
        let def = definition(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["a"]),
            task("d", &["b", "c"]),
        ]);
        let graph = resolve(&def).unwrap();

        assert_eq!(graph.layers().len(), 3);
        assert_eq!(graph.layers()[1], vec!["b", "c"]);
        assert_eq!(graph.layer_of("d"), Some(2));
        assert_layers_respect_dependencies(&def, &graph);
    }

    #[test]
    fn test_declaration_order_does_not_matter() {
        let def = definition(vec![
            task("report", &["merge"]),
            task("merge", &["left", "right"]),
            task("right", &[]),
            task("left", &[]),
            task("audit", &["left"]),
        ]);
        let graph = resolve(&def).unwrap();

        assert_eq!(graph.layers()[0], vec!["right", "left"]);
        assert_eq!(graph.layers()[1], vec!["merge", "audit"]);
        assert_eq!(graph.layers()[2], vec!["report"]);
        assert_layers_respect_dependencies(&def, &graph);
    }

    #[test]
    fn test_wide_graph_layering_property() {
        // Each task i depends on every j < i with j % 3 == i % 3.
        let tasks: Vec<TaskDefinition> = (0..30)
            .map(|i| {
                let deps: Vec<String> = (0..i)
                    .filter(|j| j % 3 == i % 3)
                    .map(|j| format!("t{}", j))
                    .collect();
                TaskDefinition::new(format!("t{}", i), "noop").depends_on(deps)
            })
            .rev()
            .collect();
        let def = definition(tasks);
        let graph = resolve(&def).unwrap();

        assert_eq!(graph.len(), 30);
        assert_eq!(graph.layers()[0].len(), 3);
        assert_layers_respect_dependencies(&def, &graph);
    }

    #[test]
    fn test_cycle_detected() {
        let def = definition(vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])]);

        match resolve(&def) {
            Err(GraphError::CyclicDependency { task_ids }) => {
                assert_eq!(task_ids.first(), task_ids.last());
                assert!(task_ids.contains(&"a".to_string()));
                assert!(task_ids.contains(&"b".to_string()));
                assert!(task_ids.contains(&"c".to_string()));
            }
            other => panic!("expected CyclicDependency, got {:?}", other),
        }
    }

    #[test]
    fn test_cycle_behind_valid_prefix() {
        let def = definition(vec![
            task("root", &[]),
            task("x", &["root", "y"]),
            task("y", &["x"]),
        ]);

        assert!(matches!(
            resolve(&def),
            Err(GraphError::CyclicDependency { .. })
        ));
    }

    #[test]
    fn test_self_dependency() {
        let def = definition(vec![task("a", &["a"])]);

        assert_eq!(
            resolve(&def).unwrap_err(),
            GraphError::CyclicDependency {
                task_ids: vec!["a".to_string()]
            }
        );
    }

    #[test]
    fn test_unknown_dependency() {
        let def = definition(vec![task("a", &[]), task("b", &["ghost"])]);

        assert_eq!(
            resolve(&def).unwrap_err(),
            GraphError::UnknownDependency {
                task_id: "b".to_string(),
                missing_id: "ghost".to_string()
            }
        );
    }

    #[test]
    fn test_duplicate_task_id() {
        let def = definition(vec![task("a", &[]), task("a", &[])]);

        assert_eq!(
            resolve(&def).unwrap_err(),
            GraphError::DuplicateTaskId {
                task_id: "a".to_string()
            }
        );
    }

    #[test]
    fn test_empty_definition() {
        let graph = resolve(&WorkflowDefinition::new("empty", 1)).unwrap();
        assert!(graph.is_empty());
        assert!(graph.layers().is_empty());
    }

    #[test]
    fn test_transitive_dependents() {
        let def = definition(vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("d", &[]),
            task("e", &["c", "d"]),
        ]);
        let graph = resolve(&def).unwrap();

        assert_eq!(graph.transitive_dependents("a"), vec!["b", "c", "e"]);
        assert_eq!(graph.transitive_dependents("d"), vec!["e"]);
        assert!(graph.transitive_dependents("e").is_empty());
        assert_eq!(graph.dependencies("e").collect::<Vec<_>>(), vec!["c", "d"]);
    }

    #[test]
    fn test_error_messages() {
        let err = GraphError::CyclicDependency {
            task_ids: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "cyclic dependency between tasks: a -> b -> a");
    }
}
