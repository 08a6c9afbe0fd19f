// src/dag/scheduler.rs

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::dag::resolver::ExecutionPlan;
use crate::dag::run_record::{RunRecord, RunResult, RunState, ScheduledTask};
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::{StateManager, deps_satisfied};
use crate::engine::{TaskName, TaskOutcome, TriggerCause};
use crate::errors::StageExecutionError;
use crate::types::FailurePolicy;

/// Scheduler for a single run: the immutable plan plus mutable run records.
///
/// It is responsible for:
/// - deciding when a planned task is ready (all prerequisites succeeded)
/// - recording success and failure per task
/// - skipping dependents of a failure, or everything not yet started when
///   the run is fail-fast
/// - reporting when the run has settled
#[derive(Debug)]
pub struct Scheduler {
    run_id: u64,
    plan: ExecutionPlan,
    policy: FailurePolicy,
    records: HashMap<TaskName, RunRecord>,
    /// Per-task input overrides for incremental re-runs.
    inputs: HashMap<TaskName, Vec<PathBuf>>,
    first_failure: Option<StageExecutionError>,
    started: bool,
}

impl Scheduler {
    pub fn new(
        run_id: u64,
        plan: ExecutionPlan,
        policy: FailurePolicy,
        cause: TriggerCause,
        inputs: HashMap<TaskName, Vec<PathBuf>>,
    ) -> Self {
        let records = plan
            .tasks()
            .iter()
            .map(|t| (t.name.clone(), RunRecord::pending(t.name.clone(), cause.clone())))
            .collect();

        Self {
            run_id,
            plan,
            policy,
            records,
            inputs,
            first_failure: None,
            started: false,
        }
    }

    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn run_state_of(&self, task: &str) -> Option<RunState> {
        self.records.get(task).map(|r| r.state)
    }

    pub fn record(&self, task: &str) -> Option<&RunRecord> {
        self.records.get(task)
    }

    /// Whether the prerequisites of `task` are satisfied in this run.
    ///
    /// Returns `None` if the task is not part of the plan.
    pub fn deps_satisfied(&self, task: &str) -> Option<bool> {
        let planned = self.plan.get(task)?;
        Some(deps_satisfied(&self.records, planned))
    }

    /// Returns `true` once every planned task is terminal.
    pub fn is_finished(&self) -> bool {
        self.records.values().all(|r| r.state.is_terminal())
    }

    /// Dispatch the first wave of tasks (those without prerequisites).
    pub fn start(&mut self) -> SchedulerStep {
        if self.started {
            warn!(run_id = self.run_id, "run already started; ignoring");
            return SchedulerStep::default();
        }
        self.started = true;

        info!(
            run_id = self.run_id,
            tasks = self.plan.len(),
            policy = ?self.policy,
            "starting run"
        );

        let mut manager = StateManager::new(&self.plan, &mut self.records, self.run_id);
        let newly_scheduled = manager.collect_new_ready_tasks(&self.inputs);
        let run_just_finished = manager.all_tasks_terminal();

        SchedulerStep {
            newly_scheduled,
            run_just_finished,
            ..SchedulerStep::default()
        }
    }

    /// Handle completion of a task with a concrete outcome (production API).
    pub fn handle_completion(&mut self, task: &str, outcome: TaskOutcome) -> Vec<ScheduledTask> {
        self.step_completion(task, outcome).newly_scheduled
    }

    /// Manual-step variant of `handle_completion` that returns a rich
    /// [`SchedulerStep`].
    pub fn step_completion(&mut self, task: &str, outcome: TaskOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        let Some(record) = self.records.get_mut(task) else {
            warn!(task = %task, run_id = self.run_id, "completion for task outside this run; ignoring");
            return step;
        };

        if record.state != RunState::Running {
            warn!(
                task = %task,
                run_id = self.run_id,
                state = ?record.state,
                "completion for task that is not running; ignoring"
            );
            return step;
        }

        record.finished = Some(Instant::now());
        let elapsed = record.elapsed();

        let mut manager = StateManager::new(&self.plan, &mut self.records, self.run_id);

        match outcome {
            TaskOutcome::Success => {
                if let Some(record) = manager.record_mut(task) {
                    record.state = RunState::Succeeded;
                }
                debug!(task = %task, run_id = self.run_id, ?elapsed, "task succeeded");
                step.newly_scheduled = manager.collect_new_ready_tasks(&self.inputs);
            }
            TaskOutcome::Failed(cause) => {
                let error = StageExecutionError::new(task, cause);
                if let Some(record) = manager.record_mut(task) {
                    record.state = RunState::Failed;
                    record.error = Some(error.clone());
                }
                warn!(task = %task, run_id = self.run_id, error = %error.cause, "task failed");
                step.newly_failed.push(task.to_string());

                step.newly_skipped = match self.policy {
                    FailurePolicy::FailFast => manager.cancel_pending(),
                    FailurePolicy::ContinueOnFailure => manager.mark_dependents_skipped(task),
                };

                if self.first_failure.is_none() {
                    self.first_failure = Some(error);
                }
            }
        }

        step.run_just_finished = manager.all_tasks_terminal();
        if step.run_just_finished {
            info!(run_id = self.run_id, "all tasks terminal; run settled");
        }
        step
    }

    /// Snapshot of the run's outcome. Only final once [`is_finished`]
    /// returns `true`.
    ///
    /// [`is_finished`]: Scheduler::is_finished
    pub fn result(&self) -> RunResult {
        let mut result = RunResult {
            first_failure: self.first_failure.clone(),
            ..RunResult::default()
        };

        for record in self.records.values() {
            match record.state {
                RunState::Succeeded => {
                    result.succeeded.insert(record.task.clone());
                }
                RunState::Failed => {
                    let error = record
                        .error
                        .clone()
                        .unwrap_or_else(|| StageExecutionError::new(&record.task, "unknown failure"));
                    result.failed.insert(record.task.clone(), error);
                }
                RunState::Skipped => {
                    result.skipped.insert(record.task.clone());
                }
                RunState::Pending | RunState::Running => {}
            }
        }

        result
    }
}
