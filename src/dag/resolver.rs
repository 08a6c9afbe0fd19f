// src/dag/resolver.rs

//! Goal → execution plan.
//!
//! The resolver is pure: the same registry and goal always produce the same
//! plan. Ties between tasks with no ordering constraint are broken by
//! registration order.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::dag::registry::{TaskRegistry, find_cycle};
use crate::engine::TaskName;
use crate::errors::{AssetdagError, Result};

/// What a plan should accomplish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goal {
    /// Run all named tasks; only declared dependencies order them.
    Parallel(Vec<TaskName>),
    /// Run the named tasks one after the other. Each item, together with the
    /// part of its dependency closure not planned by an earlier item, starts
    /// only after everything planned for the previous item has settled.
    Series(Vec<TaskName>),
}

impl Goal {
    pub fn parallel<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        Goal::Parallel(dedup(names.into_iter().map(Into::into)))
    }

    pub fn series<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        Goal::Series(dedup(names.into_iter().map(Into::into)))
    }

    /// Every registered task, unordered beyond dependencies.
    pub fn all(registry: &TaskRegistry) -> Self {
        Goal::parallel(registry.names())
    }

    pub fn tasks(&self) -> &[TaskName] {
        match self {
            Goal::Parallel(t) | Goal::Series(t) => t,
        }
    }

    pub fn contains(&self, task: &str) -> bool {
        self.tasks().iter().any(|t| t == task)
    }

    /// Combine two goals into one covering both.
    ///
    /// Two parallel goals union; anything involving a series keeps the
    /// series semantics with `other` appended.
    pub fn merge(self, other: Goal) -> Goal {
        match (self, other) {
            (Goal::Parallel(a), Goal::Parallel(b)) => Goal::Parallel(dedup(a.into_iter().chain(b))),
            (a, b) => Goal::Series(dedup(
                a.tasks().iter().cloned().chain(b.tasks().iter().cloned()),
            )),
        }
    }
}

fn dedup(names: impl Iterator<Item = TaskName>) -> Vec<TaskName> {
    let mut seen = HashSet::new();
    names.filter(|n| seen.insert(n.clone())).collect()
}

/// One task inside a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub name: TaskName,
    /// In-plan prerequisites: declared dependencies plus series barriers.
    pub prerequisites: Vec<TaskName>,
    /// Length of the longest prerequisite chain leading to this task.
    pub level: usize,
}

/// A dependency-respecting ordering of tasks for one goal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExecutionPlan {
    tasks: Vec<PlannedTask>,
}

impl ExecutionPlan {
    /// Planned tasks in topological order.
    pub fn tasks(&self) -> &[PlannedTask] {
        &self.tasks
    }

    pub fn order(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn task_names(&self) -> BTreeSet<TaskName> {
        self.tasks.iter().map(|t| t.name.clone()).collect()
    }

    /// Planned tasks that list `name` as a direct prerequisite.
    pub fn dependents_of(&self, name: &str) -> Vec<&str> {
        self.tasks
            .iter()
            .filter(|t| t.prerequisites.iter().any(|p| p == name))
            .map(|t| t.name.as_str())
            .collect()
    }

    /// Whether this plan shares at least one task with `tasks`.
    pub fn intersects(&self, tasks: &BTreeSet<TaskName>) -> bool {
        self.tasks.iter().any(|t| tasks.contains(&t.name))
    }

    /// Tasks grouped by level; every task in a level only depends on tasks
    /// in earlier levels.
    pub fn levels(&self) -> Vec<Vec<&str>> {
        let mut levels: Vec<Vec<&str>> = Vec::new();
        for task in &self.tasks {
            if levels.len() <= task.level {
                levels.resize_with(task.level + 1, Vec::new);
            }
            levels[task.level].push(task.name.as_str());
        }
        levels
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Computes execution plans against a registry.
#[derive(Debug, Clone, Copy)]
pub struct Resolver<'a> {
    registry: &'a TaskRegistry,
}

impl<'a> Resolver<'a> {
    pub fn new(registry: &'a TaskRegistry) -> Self {
        Self { registry }
    }

    /// Topologically sort the transitive dependency closure of `goal`.
    pub fn plan(&self, goal: &Goal) -> Result<ExecutionPlan> {
        let groups: Vec<Vec<&str>> = match goal {
            Goal::Parallel(names) => vec![names.iter().map(|s| s.as_str()).collect()],
            Goal::Series(names) => names.iter().map(|s| vec![s.as_str()]).collect(),
        };

        let mut prerequisites: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut previous_group: Vec<&str> = Vec::new();

        for group in groups {
            let added = self.closure(&group, &prerequisites)?;

            for &name in &added {
                let task = self.registry.lookup(name)?;
                let mut prereqs: Vec<&str> =
                    task.dependencies().iter().map(|s| s.as_str()).collect();
                for &barrier in &previous_group {
                    if !prereqs.contains(&barrier) {
                        prereqs.push(barrier);
                    }
                }
                prerequisites.insert(name, prereqs);
            }

            if !added.is_empty() {
                previous_group = added;
            }
        }

        self.sort(&prerequisites)
    }

    /// Names in the dependency closure of `roots` that are not planned yet,
    /// in registration order.
    fn closure(
        &self,
        roots: &[&str],
        planned: &HashMap<&str, Vec<&str>>,
    ) -> Result<Vec<&'a str>> {
        let mut found: HashSet<&'a str> = HashSet::new();
        let mut stack: Vec<&'a str> = Vec::new();

        for &root in roots {
            stack.push(self.registry.lookup(root)?.name());
        }

        while let Some(name) = stack.pop() {
            if planned.contains_key(name) || !found.insert(name) {
                continue;
            }
            let task = self.registry.lookup(name)?;
            for dep in task.dependencies() {
                stack.push(self.registry.lookup(dep)?.name());
            }
        }

        let mut added: Vec<&'a str> = found.into_iter().collect();
        added.sort_by_key(|n| self.index_of(n));
        Ok(added)
    }

    /// Kahn's algorithm; among ready tasks the earliest registered goes first.
    fn sort(&self, prerequisites: &HashMap<&str, Vec<&str>>) -> Result<ExecutionPlan> {
        let mut remaining: HashMap<&str, usize> = prerequisites
            .iter()
            .map(|(name, prereqs)| (*name, prereqs.len()))
            .collect();

        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for (name, prereqs) in prerequisites {
            for prereq in prereqs {
                dependents.entry(*prereq).or_default().push(*name);
            }
        }

        let mut ready: BTreeSet<(usize, &str)> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| (self.index_of(name), *name))
            .collect();

        let mut levels: HashMap<&str, usize> = HashMap::new();
        let mut tasks = Vec::with_capacity(prerequisites.len());

        while let Some((_, name)) = ready.pop_first() {
            let prereqs = &prerequisites[name];
            let level = prereqs
                .iter()
                .filter_map(|p| levels.get(p))
                .map(|l| l + 1)
                .max()
                .unwrap_or(0);
            levels.insert(name, level);

            tasks.push(PlannedTask {
                name: name.to_string(),
                prerequisites: prereqs.iter().map(|s| s.to_string()).collect(),
                level,
            });

            for dependent in dependents.get(name).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((self.index_of(dependent), *dependent));
                    }
                }
            }
        }

        if tasks.len() < prerequisites.len() {
            let mut order: Vec<&str> = prerequisites.keys().copied().collect();
            order.sort_by_key(|n| self.index_of(n));
            let cycle = find_cycle(&order, |n| prerequisites.get(n).cloned().unwrap_or_default());
            let cycle = cycle.unwrap_or_else(|| {
                crate::errors::Cycle(
                    order
                        .iter()
                        .filter(|n| !levels.contains_key(*n))
                        .map(|n| n.to_string())
                        .collect(),
                )
            });
            return Err(AssetdagError::CyclicDependency(cycle));
        }

        Ok(ExecutionPlan { tasks })
    }

    fn index_of(&self, name: &str) -> usize {
        self.registry
            .get(name)
            .map(|t| t.index())
            .unwrap_or(usize::MAX)
    }
}
