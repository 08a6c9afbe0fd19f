// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::dag::{ExecutionPlan, Resolver, RunResult, ScheduledTask, TaskRegistry};
use crate::engine::core::ActiveRuns;
use crate::engine::queue::{QueuedRun, TriggerQueue};
use crate::engine::{RuntimeOptions, TaskName, TaskOutcome, Trigger};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// A run settled; hand it to the completion notifier.
    RunFinished(RunReport),
    /// Request that the process exits (used for `build` when idle).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute (dispatch tasks, report, exit).
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Everything known about a settled run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: u64,
    pub trigger: Trigger,
    pub plan: ExecutionPlan,
    pub result: RunResult,
    pub elapsed: Duration,
}

/// Handle a trigger whose plan still has to be computed.
pub fn handle_trigger(
    registry: &TaskRegistry,
    runs: &mut ActiveRuns,
    queue: &mut TriggerQueue,
    options: &RuntimeOptions,
    trigger: Trigger,
) -> CoreStep {
    match Resolver::new(registry).plan(&trigger.goal) {
        Ok(plan) => handle_plan_submitted(registry, runs, queue, options, trigger, plan),
        Err(err) => {
            error!(goal = ?trigger.goal, error = %err, "could not plan trigger; ignoring");
            finish_step(runs, queue, options, Vec::new())
        }
    }
}

/// Handle a trigger with its plan.
///
/// - If the plan shares no task with any in-flight run, it starts right
///   away as a new run, next to whatever else is running.
/// - Otherwise it is queued (merged with overlapping queued triggers) and
///   starts once the conflicting runs have settled.
pub fn handle_plan_submitted(
    registry: &TaskRegistry,
    runs: &mut ActiveRuns,
    queue: &mut TriggerQueue,
    options: &RuntimeOptions,
    trigger: Trigger,
    plan: ExecutionPlan,
) -> CoreStep {
    if plan.is_empty() {
        debug!(goal = ?trigger.goal, "empty plan; nothing to run");
        return finish_step(runs, queue, options, Vec::new());
    }

    let mut commands = Vec::new();
    let busy = runs.busy_tasks();
    let overlaps_queue = queue.iter().any(|q| q.plan.intersects(&plan.task_names()));

    if plan.intersects(&busy) || overlaps_queue {
        info!(
            batch_id = trigger.batch_id(),
            tasks = ?plan.order(),
            "tasks still running in another run; queueing trigger"
        );
        if let Err(err) = queue.push(QueuedRun { trigger, plan }, &Resolver::new(registry)) {
            error!(error = %err, "could not merge queued trigger; dropping it");
        }
    } else {
        commands.extend(runs.start(trigger, plan, options.failure_policy));
    }

    CoreStep {
        commands,
        keep_running: true,
    }
}

/// Handle a task completion event.
pub fn handle_task_completion(
    runs: &mut ActiveRuns,
    queue: &mut TriggerQueue,
    options: &RuntimeOptions,
    run_id: u64,
    task: TaskName,
    outcome: TaskOutcome,
) -> CoreStep {
    let mut commands = Vec::new();

    let Some(active) = runs.get_mut(run_id) else {
        warn!(task = %task, run_id, "completion for unknown run; ignoring");
        return CoreStep {
            commands,
            keep_running: true,
        };
    };

    let step = active.scheduler.step_completion(&task, outcome);
    if !step.newly_scheduled.is_empty() {
        commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
    }

    if step.run_just_finished {
        if let Some(done) = runs.remove(run_id) {
            let result = done.scheduler.result();
            let elapsed = done.started.elapsed();
            info!(
                run_id,
                succeeded = result.succeeded.len(),
                failed = result.failed.len(),
                skipped = result.skipped.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "DAG run finished"
            );
            commands.push(CoreCommand::RunFinished(RunReport {
                run_id,
                plan: done.scheduler.plan().clone(),
                trigger: done.trigger,
                result,
                elapsed,
            }));
        }
        commands.extend(start_queued_runs(runs, queue, options));
    }

    finish_step(runs, queue, options, commands)
}

/// Start every queued trigger that no longer conflicts with in-flight runs.
fn start_queued_runs(
    runs: &mut ActiveRuns,
    queue: &mut TriggerQueue,
    options: &RuntimeOptions,
) -> Vec<CoreCommand> {
    let mut commands = Vec::new();
    if queue.is_empty() {
        return commands;
    }

    for queued in queue.take_startable(&runs.busy_tasks()) {
        debug!(tasks = ?queued.plan.order(), "starting queued trigger");
        commands.extend(runs.start(queued.trigger, queued.plan, options.failure_policy));
    }
    commands
}

/// In `build` mode, we can exit when no run is active and there are no
/// pending triggers in the queue.
fn finish_step(
    runs: &ActiveRuns,
    queue: &TriggerQueue,
    options: &RuntimeOptions,
    mut commands: Vec<CoreCommand>,
) -> CoreStep {
    let mut keep_running = true;
    if options.exit_when_idle && runs.is_empty() && queue.is_empty() {
        keep_running = false;
        commands.push(CoreCommand::RequestExit);
    }

    CoreStep {
        commands,
        keep_running,
    }
}
