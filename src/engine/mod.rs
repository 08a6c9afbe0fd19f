// src/engine/mod.rs

//! Orchestration engine for assetdag.
//!
//! This module ties together:
//! - per-run schedulers for every in-flight run
//! - the trigger queue (triggers whose tasks are still busy in another run)
//! - the main runtime event loop that reacts to:
//!   - build and watch triggers
//!   - task completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`]. [`runner`] wraps both into the one-shot
//! [`TaskRunner`] used by `build`.

use crate::dag::ExecutionPlan;
use crate::types::FailurePolicy;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// Outcome of one task execution, as reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success,
    /// Carries the underlying cause string.
    Failed(String),
}

/// What triggered a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerCause {
    /// `build`, or the initial build of `serve`.
    FullBuild,
    /// A debounced batch of file changes.
    Watch { batch_id: u64 },
}

impl TriggerCause {
    pub fn is_watch(&self) -> bool {
        matches!(self, TriggerCause::Watch { .. })
    }
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// If true, exit the runtime once no run is active and nothing is
    /// queued (used for `build`).
    pub exit_when_idle: bool,
    /// Failure policy applied to every run started by this runtime.
    pub failure_policy: FailurePolicy,
}

impl RuntimeOptions {
    /// One-shot, fail-fast: the full top-level build.
    pub fn build() -> Self {
        Self {
            exit_when_idle: true,
            failure_policy: FailurePolicy::FailFast,
        }
    }

    /// Long-running, failures isolated per dependency chain.
    pub fn watch() -> Self {
        Self {
            exit_when_idle: false,
            failure_policy: FailurePolicy::ContinueOnFailure,
        }
    }
}

/// Events flowing into the runtime from the watch router, executors, etc.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Plan and run the trigger's goal.
    Triggered(Trigger),
    /// Run an already computed plan for the trigger.
    PlanSubmitted { trigger: Trigger, plan: ExecutionPlan },
    /// A task execution settled.
    TaskCompleted {
        run_id: u64,
        task: TaskName,
        outcome: TaskOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod queue;
pub mod runner;
pub mod runtime;
pub mod trigger;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep, RunReport};
pub use queue::TriggerQueue;
pub use runner::TaskRunner;
pub use runtime::Runtime;
pub use trigger::{ScopedTasks, Trigger};
