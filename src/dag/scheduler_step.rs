// src/dag/scheduler_step.rs

//! Step-by-step execution result types for the scheduler.

use crate::dag::run_record::ScheduledTask;
use crate::engine::TaskName;

/// Structured result of a single scheduler "step".
///
/// This is useful for tests that want to manually step a run and make
/// assertions about what changed.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Tasks that became ready to run as a result of this step.
    pub newly_scheduled: Vec<ScheduledTask>,
    /// Tasks newly marked as failed in this step.
    pub newly_failed: Vec<TaskName>,
    /// Tasks newly marked as skipped (dependents of a failure, or every
    /// pending task after a fail-fast failure).
    pub newly_skipped: Vec<TaskName>,
    /// Whether this step settled the run.
    pub run_just_finished: bool,
}
