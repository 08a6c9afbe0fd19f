// src/engine/trigger.rs

//! Triggers: what a run should accomplish and why.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;

use crate::dag::Goal;
use crate::engine::{TaskName, TriggerCause};
use crate::types::ArtifactClass;

/// Goal tasks and changed paths attributed to one artifact class.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopedTasks {
    pub tasks: BTreeSet<TaskName>,
    pub paths: BTreeSet<PathBuf>,
}

/// A request to run a goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trigger {
    pub goal: Goal,
    pub cause: TriggerCause,
    /// Which goal tasks regenerate which artifact class. Empty for full
    /// builds, which emit no reload signals.
    pub scopes: BTreeMap<ArtifactClass, ScopedTasks>,
    /// Changed paths per task for incremental bindings. Planned tasks not
    /// listed here run on their full inputs.
    pub inputs: HashMap<TaskName, Vec<PathBuf>>,
}

impl Trigger {
    pub fn full_build(goal: Goal) -> Self {
        Self {
            goal,
            cause: TriggerCause::FullBuild,
            scopes: BTreeMap::new(),
            inputs: HashMap::new(),
        }
    }

    pub fn batch_id(&self) -> Option<u64> {
        match self.cause {
            TriggerCause::Watch { batch_id } => Some(batch_id),
            TriggerCause::FullBuild => None,
        }
    }

    /// Combine two triggers into one run.
    ///
    /// `self_tasks` and `other_tasks` are the planned task sets of each
    /// side. A task keeps incremental inputs only if every side that plans
    /// it has inputs for it; the inputs are then unioned.
    pub fn merge(
        self,
        other: Trigger,
        self_tasks: &BTreeSet<TaskName>,
        other_tasks: &BTreeSet<TaskName>,
    ) -> Trigger {
        let cause = match (&self.cause, &other.cause) {
            (TriggerCause::Watch { .. }, TriggerCause::Watch { .. }) => other.cause.clone(),
            _ => TriggerCause::FullBuild,
        };

        let mut scopes = self.scopes;
        for (class, scoped) in other.scopes {
            let entry = scopes.entry(class).or_default();
            entry.tasks.extend(scoped.tasks);
            entry.paths.extend(scoped.paths);
        }

        let mut inputs = HashMap::new();
        for task in self_tasks.union(other_tasks) {
            let ours = self.inputs.get(task);
            let theirs = other.inputs.get(task);
            let merged = match (self_tasks.contains(task), other_tasks.contains(task)) {
                (true, true) => match (ours, theirs) {
                    (Some(a), Some(b)) => Some(union_paths(a, b)),
                    _ => None,
                },
                (true, false) => ours.cloned(),
                (false, true) => theirs.cloned(),
                (false, false) => None,
            };
            if let Some(paths) = merged {
                inputs.insert(task.clone(), paths);
            }
        }

        Trigger {
            goal: self.goal.merge(other.goal),
            cause,
            scopes,
            inputs,
        }
    }
}

fn union_paths(a: &[PathBuf], b: &[PathBuf]) -> Vec<PathBuf> {
    let set: BTreeSet<&PathBuf> = a.iter().chain(b).collect();
    set.into_iter().cloned().collect()
}
