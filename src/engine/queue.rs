// src/engine/queue.rs

use std::collections::{BTreeSet, VecDeque};

use tracing::debug;

use crate::dag::{ExecutionPlan, Resolver};
use crate::engine::{TaskName, Trigger};
use crate::errors::Result;

/// A trigger waiting for its tasks to become free, with its plan.
#[derive(Debug, Clone)]
pub struct QueuedRun {
    pub trigger: Trigger,
    pub plan: ExecutionPlan,
}

/// Queue of triggers whose plans overlap a run that is still in flight.
///
/// Semantics:
/// - Queued entries never share a task. A new entry that overlaps queued
///   ones is merged with all of them (at the position of the earliest) and
///   re-planned, so a burst of changes to a busy task yields exactly one
///   follow-up run.
/// - Entries are released in FIFO order, each only once its task set is
///   disjoint from the busy set and from every earlier entry that is still
///   waiting.
#[derive(Debug, Default)]
pub struct TriggerQueue {
    runs: VecDeque<QueuedRun>,
}

impl TriggerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if there are no queued triggers.
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedRun> {
        self.runs.iter()
    }

    /// Queue `run`, merging it with every queued entry it overlaps.
    pub fn push(&mut self, run: QueuedRun, resolver: &Resolver<'_>) -> Result<()> {
        let mut current = run;
        let mut position: Option<usize> = None;

        loop {
            let tasks = current.plan.task_names();
            let Some(idx) = self.runs.iter().position(|q| q.plan.intersects(&tasks)) else {
                break;
            };
            let Some(existing) = self.runs.remove(idx) else {
                break;
            };

            debug!(
                queued = ?existing.plan.order(),
                incoming = ?current.plan.order(),
                "merging trigger into queued run"
            );

            let trigger = existing.trigger.merge(
                current.trigger,
                &existing.plan.task_names(),
                &tasks,
            );
            let plan = resolver.plan(&trigger.goal)?;
            current = QueuedRun { trigger, plan };

            // Removing at `idx` never shifts an earlier insertion point.
            position = Some(position.map_or(idx, |p| p.min(idx)));
        }

        match position {
            Some(p) => self.runs.insert(p, current),
            None => self.runs.push_back(current),
        }
        Ok(())
    }

    /// Remove and return every entry that can start now.
    pub fn take_startable(&mut self, busy: &BTreeSet<TaskName>) -> Vec<QueuedRun> {
        let mut blocked = busy.clone();
        let mut startable = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.runs.len());

        for run in self.runs.drain(..) {
            let tasks = run.plan.task_names();
            let free = !run.plan.intersects(&blocked);
            blocked.extend(tasks);
            if free {
                startable.push(run);
            } else {
                waiting.push_back(run);
            }
        }

        self.runs = waiting;
        startable
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};

    use super::*;
    use crate::dag::{Goal, TaskOptions, TaskRegistry};
    use crate::engine::TriggerCause;

    fn registry() -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        for name in ["style", "scripts", "views"] {
            reg.register(name, Vec::new(), TaskOptions::default()).unwrap();
        }
        reg
    }

    fn queued(reg: &TaskRegistry, batch_id: u64, goal: &[&str]) -> QueuedRun {
        let goal = Goal::parallel(goal.iter().copied());
        let plan = Resolver::new(reg).plan(&goal).unwrap();
        QueuedRun {
            trigger: Trigger {
                goal,
                cause: TriggerCause::Watch { batch_id },
                scopes: BTreeMap::new(),
                inputs: HashMap::new(),
            },
            plan,
        }
    }

    fn busy(names: &[&str]) -> BTreeSet<TaskName> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn overlapping_triggers_collapse_into_one_entry() {
        let reg = registry();
        let resolver = Resolver::new(&reg);
        let mut queue = TriggerQueue::new();

        queue.push(queued(&reg, 1, &["style"]), &resolver).unwrap();
        queue.push(queued(&reg, 2, &["style"]), &resolver).unwrap();
        queue.push(queued(&reg, 3, &["style", "views"]), &resolver).unwrap();

        assert_eq!(queue.len(), 1);
        let entry = queue.iter().next().unwrap();
        assert_eq!(entry.plan.order(), vec!["style", "views"]);
        assert_eq!(entry.trigger.cause, TriggerCause::Watch { batch_id: 3 });
    }

    #[test]
    fn disjoint_triggers_stay_separate_and_bridge_merges_them() {
        let reg = registry();
        let resolver = Resolver::new(&reg);
        let mut queue = TriggerQueue::new();

        queue.push(queued(&reg, 1, &["style"]), &resolver).unwrap();
        queue.push(queued(&reg, 2, &["views"]), &resolver).unwrap();
        assert_eq!(queue.len(), 2);

        queue.push(queued(&reg, 3, &["style", "views"]), &resolver).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn only_entries_free_of_busy_tasks_are_released() {
        let reg = registry();
        let resolver = Resolver::new(&reg);
        let mut queue = TriggerQueue::new();
        queue.push(queued(&reg, 1, &["style"]), &resolver).unwrap();
        queue.push(queued(&reg, 2, &["scripts"]), &resolver).unwrap();

        let started = queue.take_startable(&busy(&["style"]));
        assert_eq!(started.len(), 1);
        assert_eq!(started[0].plan.order(), vec!["scripts"]);
        assert_eq!(queue.len(), 1);

        let started = queue.take_startable(&busy(&[]));
        assert_eq!(started[0].plan.order(), vec!["style"]);
        assert!(queue.is_empty());
    }
}
