// src/dag/registry.rs

//! The task registry: name → stage steps + declared dependencies.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::engine::TaskName;
use crate::errors::{AssetdagError, Cycle, Result};
use crate::stage::Stage;
use crate::types::CompositionMode;

/// Registration options for a task.
#[derive(Debug, Clone, Default)]
pub struct TaskOptions {
    /// Tasks that must settle successfully before this one starts.
    pub depends_on: Vec<TaskName>,
    /// How this task's own steps are composed.
    pub mode: CompositionMode,
}

impl TaskOptions {
    pub fn after<I, S>(deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        Self {
            depends_on: deps.into_iter().map(Into::into).collect(),
            mode: CompositionMode::Sequential,
        }
    }

    pub fn with_mode(mut self, mode: CompositionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// A registered task. Immutable once registered.
pub struct Task {
    name: TaskName,
    steps: Vec<Arc<dyn Stage>>,
    deps: Vec<TaskName>,
    mode: CompositionMode,
    /// Registration order, used for deterministic tie-breaking.
    index: usize,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("deps", &self.deps)
            .field("mode", &self.mode)
            .field("steps", &self.steps.len())
            .finish()
    }
}

impl Task {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Arc<dyn Stage>] {
        &self.steps
    }

    /// Direct dependencies (`depends_on`).
    pub fn dependencies(&self) -> &[TaskName] {
        &self.deps
    }

    pub fn mode(&self) -> CompositionMode {
        self.mode
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

/// An unregistered task, as read from config.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub name: TaskName,
    pub steps: Vec<Arc<dyn Stage>>,
    pub options: TaskOptions,
}

impl TaskDefinition {
    pub fn new(name: impl Into<TaskName>, steps: Vec<Arc<dyn Stage>>, options: TaskOptions) -> Self {
        Self {
            name: name.into(),
            steps,
            options,
        }
    }
}

/// Process-wide mapping from task name to task.
///
/// Built once at startup and shared read-only (`Arc<TaskRegistry>`)
/// afterwards.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: Vec<Arc<Task>>,
    by_name: HashMap<TaskName, usize>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task.
    ///
    /// Dependencies must already be registered (leaf-first order), which
    /// makes it impossible to build a cycle through this method.
    pub fn register(
        &mut self,
        name: impl Into<TaskName>,
        steps: Vec<Arc<dyn Stage>>,
        options: TaskOptions,
    ) -> Result<()> {
        let name = name.into();

        if self.by_name.contains_key(&name) {
            return Err(AssetdagError::DuplicateTask(name));
        }

        for dep in &options.depends_on {
            if !self.by_name.contains_key(dep) {
                return Err(AssetdagError::UnknownDependency {
                    task: name,
                    dependency: dep.clone(),
                });
            }
        }

        let mut deps = Vec::with_capacity(options.depends_on.len());
        for dep in options.depends_on {
            if !deps.contains(&dep) {
                deps.push(dep);
            }
        }

        let index = self.tasks.len();
        debug!(task = %name, index, ?deps, "registered task");

        self.by_name.insert(name.clone(), index);
        self.tasks.push(Arc::new(Task {
            name,
            steps,
            deps,
            mode: options.mode,
            index,
        }));

        Ok(())
    }

    /// Register a whole set of definitions in any order.
    ///
    /// Rejects duplicates, dependencies that are not defined anywhere and
    /// cycles, then registers leaf-first while keeping declaration order
    /// wherever the dependencies allow it.
    pub fn from_definitions(defs: Vec<TaskDefinition>) -> Result<Self> {
        let mut seen = HashSet::new();
        for def in &defs {
            if !seen.insert(def.name.as_str()) {
                return Err(AssetdagError::DuplicateTask(def.name.clone()));
            }
        }

        for def in &defs {
            for dep in &def.options.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(AssetdagError::UnknownDependency {
                        task: def.name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        {
            let order: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
            let deps: HashMap<&str, Vec<&str>> = defs
                .iter()
                .map(|d| {
                    (
                        d.name.as_str(),
                        d.options.depends_on.iter().map(|s| s.as_str()).collect(),
                    )
                })
                .collect();
            if let Some(cycle) = find_cycle(&order, |n| deps.get(n).cloned().unwrap_or_default()) {
                return Err(AssetdagError::CyclicDependency(cycle));
            }
        }

        let mut registry = Self::new();
        let mut pending: VecDeque<TaskDefinition> = defs.into();

        while !pending.is_empty() {
            let pos = pending
                .iter()
                .position(|d| d.options.depends_on.iter().all(|dep| registry.contains(dep)));
            match pos.and_then(|p| pending.remove(p)) {
                Some(def) => registry.register(def.name, def.steps, def.options)?,
                None => {
                    // Unreachable after the cycle check above.
                    let stuck: Vec<TaskName> = pending.iter().map(|d| d.name.clone()).collect();
                    return Err(AssetdagError::CyclicDependency(Cycle(stuck)));
                }
            }
        }

        Ok(registry)
    }

    pub fn lookup(&self, name: &str) -> Result<&Arc<Task>> {
        self.get(name)
            .ok_or_else(|| AssetdagError::UnknownTask(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Task>> {
        self.by_name.get(name).map(|&i| &self.tasks[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Tasks in registration order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<Task>> {
        self.tasks.iter()
    }

    /// Task names in registration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.iter().map(|t| t.name())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Find one cycle in a dependency graph, returned as a closed path starting
/// at its earliest node in `order` (`a -> b -> a` means a depends on b,
/// which depends on a).
pub(crate) fn find_cycle<'a, F>(order: &[&'a str], deps_of: F) -> Option<Cycle>
where
    F: Fn(&'a str) -> Vec<&'a str>,
{
    // Edge direction: task -> dependency.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for &name in order {
        graph.add_node(name);
    }
    for &name in order {
        for dep in deps_of(name) {
            graph.add_edge(name, dep, ());
        }
    }

    if toposort(&graph, None).is_ok() {
        return None;
    }

    let position = |n: &str| order.iter().position(|o| *o == n).unwrap_or(usize::MAX);

    let components = tarjan_scc(&graph);
    let component = components
        .into_iter()
        .filter(|c| c.len() > 1 || graph.contains_edge(c[0], c[0]))
        .min_by_key(|c| c.iter().map(|n| position(*n)).min().unwrap_or(usize::MAX))?;

    let members: HashSet<&str> = component.iter().copied().collect();
    let start = *component.iter().min_by_key(|n| position(**n))?;

    // Shortest path from `start` back to itself inside the component.
    let mut parent: HashMap<&str, &str> = HashMap::new();
    let mut queue: VecDeque<&str> = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        for dep in deps_of(current) {
            if !members.contains(dep) {
                continue;
            }
            if dep == start {
                let mut path = vec![start.to_string()];
                let mut node = current;
                let mut back = vec![node];
                while node != start {
                    node = parent[node];
                    back.push(node);
                }
                back.pop();
                path.extend(back.into_iter().rev().map(str::to_string));
                path.push(start.to_string());
                return Some(Cycle(path));
            }
            if dep != start && !parent.contains_key(dep) {
                parent.insert(dep, current);
                queue.push_back(dep);
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition::new(name, Vec::new(), TaskOptions::after(deps.iter().copied()))
    }

    #[test]
    fn register_rejects_duplicates() {
        let mut reg = TaskRegistry::new();
        reg.register("style", vec![], TaskOptions::default()).unwrap();
        let err = reg.register("style", vec![], TaskOptions::default()).unwrap_err();
        assert!(matches!(err, AssetdagError::DuplicateTask(ref n) if n == "style"));
    }

    #[test]
    fn register_requires_leaf_first_order() {
        let mut reg = TaskRegistry::new();
        let err = reg
            .register("views", vec![], TaskOptions::after(["copy"]))
            .unwrap_err();
        match err {
            AssetdagError::UnknownDependency { task, dependency } => {
                assert_eq!(task, "views");
                assert_eq!(dependency, "copy");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(reg.is_empty());
    }

    #[test]
    fn lookup_unknown_task_fails() {
        let reg = TaskRegistry::new();
        assert!(matches!(
            reg.lookup("nope"),
            Err(AssetdagError::UnknownTask(ref n)) if n == "nope"
        ));
    }

    #[test]
    fn from_definitions_registers_leaf_first_keeping_declaration_order() {
        let reg = TaskRegistry::from_definitions(vec![
            def("views", &["copy"]),
            def("style", &[]),
            def("copy", &["clean"]),
            def("clean", &[]),
        ])
        .unwrap();

        let names: Vec<&str> = reg.names().collect();
        assert_eq!(names, vec!["style", "clean", "copy", "views"]);
    }

    #[test]
    fn from_definitions_names_the_cycle() {
        let err = TaskRegistry::from_definitions(vec![
            def("a", &["b"]),
            def("b", &["c"]),
            def("c", &["a"]),
            def("d", &[]),
        ])
        .unwrap_err();

        match err {
            AssetdagError::CyclicDependency(cycle) => {
                assert_eq!(cycle.to_string(), "a -> b -> c -> a");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let err = TaskRegistry::from_definitions(vec![def("a", &["a"])]).unwrap_err();
        match err {
            AssetdagError::CyclicDependency(cycle) => assert_eq!(cycle.tasks(), ["a", "a"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn from_definitions_rejects_undefined_dependency() {
        let err = TaskRegistry::from_definitions(vec![def("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, AssetdagError::UnknownDependency { .. }));
    }
}
