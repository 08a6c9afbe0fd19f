// src/dag/state_manager.rs

//! Per-run state management for tasks in the scheduler.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::resolver::{ExecutionPlan, PlannedTask};
use crate::dag::run_record::{RunRecord, RunState, ScheduledTask};
use crate::engine::TaskName;

/// Manages per-run state transitions for the tasks of one plan.
pub struct StateManager<'a> {
    plan: &'a ExecutionPlan,
    records: &'a mut HashMap<TaskName, RunRecord>,
    run_id: u64,
}

impl<'a> StateManager<'a> {
    pub fn new(
        plan: &'a ExecutionPlan,
        records: &'a mut HashMap<TaskName, RunRecord>,
        run_id: u64,
    ) -> Self {
        Self {
            plan,
            records,
            run_id,
        }
    }

    pub fn record_mut(&mut self, task: &str) -> Option<&mut RunRecord> {
        self.records.get_mut(task)
    }

    /// Mark the pending dependents of a failed task, and transitively their
    /// dependents, as `Skipped`.
    pub fn mark_dependents_skipped(&mut self, failed_task: &str) -> Vec<TaskName> {
        let plan = self.plan;
        let mut stack: Vec<&str> = plan.dependents_of(failed_task);
        let mut newly_skipped = Vec::new();

        while let Some(name) = stack.pop() {
            let Some(record) = self.records.get_mut(name) else {
                warn!(task = %name, "planned task has no run record");
                continue;
            };
            if record.state != RunState::Pending {
                continue;
            }
            record.state = RunState::Skipped;
            debug!(
                task = %name,
                run_id = self.run_id,
                upstream = %failed_task,
                "skipping task due to upstream failure"
            );
            newly_skipped.push(name.to_string());
            stack.extend(plan.dependents_of(name));
        }

        newly_skipped
    }

    /// Mark every task that has not started yet as `Skipped`.
    pub fn cancel_pending(&mut self) -> Vec<TaskName> {
        let mut cancelled = Vec::new();
        for planned in self.plan.tasks() {
            if let Some(record) = self.records.get_mut(&planned.name) {
                if record.state == RunState::Pending {
                    record.state = RunState::Skipped;
                    cancelled.push(planned.name.clone());
                }
            }
        }
        if !cancelled.is_empty() {
            debug!(run_id = self.run_id, ?cancelled, "cancelled not-yet-started tasks");
        }
        cancelled
    }

    /// Collect tasks that are `Pending` and whose prerequisites succeeded,
    /// mark them as `Running`, and return them as `ScheduledTask`s in plan
    /// order.
    pub fn collect_new_ready_tasks(
        &mut self,
        inputs: &HashMap<TaskName, Vec<PathBuf>>,
    ) -> Vec<ScheduledTask> {
        // Decide first, then mutate to avoid borrowing issues.
        let plan = self.plan;
        let records = &*self.records;
        let candidates: Vec<&PlannedTask> = plan
            .tasks()
            .iter()
            .filter(|t| {
                records
                    .get(&t.name)
                    .is_some_and(|r| r.state == RunState::Pending)
                    && deps_satisfied(records, t)
            })
            .collect();

        let now = Instant::now();
        let mut ready = Vec::with_capacity(candidates.len());

        for planned in candidates {
            if let Some(record) = self.records.get_mut(&planned.name) {
                record.state = RunState::Running;
                record.started = Some(now);

                let task_inputs = inputs.get(&planned.name).cloned();
                info!(
                    task = %planned.name,
                    run_id = self.run_id,
                    incremental = task_inputs.is_some(),
                    "scheduling task"
                );

                ready.push(ScheduledTask {
                    name: planned.name.clone(),
                    run_id: self.run_id,
                    inputs: task_inputs,
                });
            }
        }

        ready
    }

    /// Check if all tasks are in a terminal state.
    pub fn all_tasks_terminal(&self) -> bool {
        self.records.values().all(|r| r.state.is_terminal())
    }
}

/// Whether every in-plan prerequisite of `task` succeeded in this run.
pub(crate) fn deps_satisfied(records: &HashMap<TaskName, RunRecord>, task: &PlannedTask) -> bool {
    task.prerequisites.iter().all(|dep| match records.get(dep) {
        Some(record) => record.state == RunState::Succeeded,
        None => {
            warn!(task = %task.name, dep = %dep, "prerequisite missing from run records");
            false
        }
    })
}
