// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - handing finished runs to the completion notifier
//!
//! The core is intended to be extensively unit tested without any Tokio,
//! channels, filesystem, or processes.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use crate::dag::{ExecutionPlan, Scheduler, TaskRegistry};
use crate::engine::event_handlers::{
    CoreCommand, CoreStep, handle_plan_submitted, handle_task_completion, handle_trigger,
};
use crate::engine::queue::TriggerQueue;
use crate::engine::{RuntimeEvent, RuntimeOptions, TaskName, Trigger};
use crate::types::FailurePolicy;

/// A run that has been started and has not settled yet.
#[derive(Debug)]
pub struct ActiveRun {
    pub scheduler: Scheduler,
    pub trigger: Trigger,
    pub started: Instant,
}

/// Every in-flight run, keyed by run id.
#[derive(Debug, Default)]
pub struct ActiveRuns {
    runs: BTreeMap<u64, ActiveRun>,
    /// Monotonically increasing run ID.
    run_counter: u64,
}

impl ActiveRuns {
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn get(&self, run_id: u64) -> Option<&ActiveRun> {
        self.runs.get(&run_id)
    }

    pub fn get_mut(&mut self, run_id: u64) -> Option<&mut ActiveRun> {
        self.runs.get_mut(&run_id)
    }

    pub fn remove(&mut self, run_id: u64) -> Option<ActiveRun> {
        self.runs.remove(&run_id)
    }

    pub fn ids(&self) -> Vec<u64> {
        self.runs.keys().copied().collect()
    }

    /// Union of the planned task sets of every in-flight run.
    pub fn busy_tasks(&self) -> BTreeSet<TaskName> {
        self.runs
            .values()
            .flat_map(|r| r.scheduler.plan().task_names())
            .collect()
    }

    /// Start a new run and return the commands for its first wave.
    pub fn start(
        &mut self,
        trigger: Trigger,
        plan: ExecutionPlan,
        policy: FailurePolicy,
    ) -> Vec<CoreCommand> {
        self.run_counter += 1;
        let run_id = self.run_counter;

        info!(
            run_id,
            batch_id = trigger.batch_id(),
            tasks = ?plan.order(),
            "starting DAG run"
        );

        let mut scheduler = Scheduler::new(
            run_id,
            plan,
            policy,
            trigger.cause.clone(),
            trigger.inputs.clone(),
        );
        let step = scheduler.start();

        let mut commands = Vec::new();
        if !step.newly_scheduled.is_empty() {
            commands.push(CoreCommand::DispatchTasks(step.newly_scheduled));
        }

        self.runs.insert(
            run_id,
            ActiveRun {
                scheduler,
                trigger,
                started: Instant::now(),
            },
        );
        commands
    }
}

/// Pure core runtime state.
///
/// This owns:
/// - the task registry handle
/// - the in-flight runs
/// - the trigger queue
/// - runtime options (e.g. `exit_when_idle`)
///
/// It has **no** channels, no Tokio types, and does not perform any IO.
#[derive(Debug)]
pub struct CoreRuntime {
    registry: Arc<TaskRegistry>,
    runs: ActiveRuns,
    queue: TriggerQueue,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(registry: Arc<TaskRegistry>, options: RuntimeOptions) -> Self {
        Self {
            registry,
            runs: ActiveRuns::default(),
            queue: TriggerQueue::new(),
            options,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
    }

    /// No run in flight (for tests).
    pub fn is_idle(&self) -> bool {
        self.runs.is_empty()
    }

    /// Expose queue emptiness (for tests).
    pub fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queue(&self) -> &TriggerQueue {
        &self.queue
    }

    pub fn runs(&self) -> &ActiveRuns {
        &self.runs
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Triggered(trigger) => handle_trigger(
                &self.registry,
                &mut self.runs,
                &mut self.queue,
                &self.options,
                trigger,
            ),
            RuntimeEvent::PlanSubmitted { trigger, plan } => handle_plan_submitted(
                &self.registry,
                &mut self.runs,
                &mut self.queue,
                &self.options,
                trigger,
                plan,
            ),
            RuntimeEvent::TaskCompleted {
                run_id,
                task,
                outcome,
            } => handle_task_completion(
                &mut self.runs,
                &mut self.queue,
                &self.options,
                run_id,
                task,
                outcome,
            ),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
