// src/dag/run_record.rs

//! Per-run task records and the aggregated run result.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::engine::{TaskName, TriggerCause};
use crate::errors::StageExecutionError;

/// State of one task inside one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Part of the plan, waiting on prerequisites.
    Pending,
    /// Dispatched to the executor.
    Running,
    Succeeded,
    /// The stage function rejected.
    Failed,
    /// Never executed: a prerequisite failed or was skipped, or the run was
    /// cancelled by a fail-fast failure.
    Skipped,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Succeeded | RunState::Failed | RunState::Skipped)
    }
}

/// One execution of a task. Owned and mutated only by the run's scheduler.
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub task: TaskName,
    pub state: RunState,
    pub cause: TriggerCause,
    pub started: Option<Instant>,
    pub finished: Option<Instant>,
    pub error: Option<StageExecutionError>,
}

impl RunRecord {
    pub fn pending(task: TaskName, cause: TriggerCause) -> Self {
        Self {
            task,
            state: RunState::Pending,
            cause,
            started: None,
            finished: None,
            error: None,
        }
    }

    /// Wall-clock time between dispatch and settle, if the task ran.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started, self.finished) {
            (Some(s), Some(f)) => Some(f.duration_since(s)),
            _ => None,
        }
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub succeeded: BTreeSet<TaskName>,
    pub failed: BTreeMap<TaskName, StageExecutionError>,
    pub skipped: BTreeSet<TaskName>,
    /// First failure in completion order.
    pub first_failure: Option<StageExecutionError>,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty()
    }

    /// Whether every one of `tasks` succeeded in this run.
    pub fn all_succeeded<'a>(&self, tasks: impl IntoIterator<Item = &'a TaskName>) -> bool {
        tasks.into_iter().all(|t| self.succeeded.contains(t))
    }

    /// Names that were actually handed to the executor.
    pub fn attempted(&self) -> BTreeSet<TaskName> {
        self.succeeded
            .iter()
            .chain(self.failed.keys())
            .cloned()
            .collect()
    }
}

/// A task the scheduler wants the executor to run now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub name: TaskName,
    /// All tasks of the same run share the same `run_id`.
    pub run_id: u64,
    /// Changed paths for incremental re-runs; `None` runs on full inputs.
    pub inputs: Option<Vec<PathBuf>>,
}
