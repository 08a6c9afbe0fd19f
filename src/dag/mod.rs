// src/dag/mod.rs

//! Task graph: registration, planning and per-run scheduling.
//!
//! - [`registry`] holds the process-wide task registry.
//! - [`resolver`] turns a [`Goal`] into an [`ExecutionPlan`].
//! - [`scheduler`] contains the per-run state machine that decides
//!   which tasks are ready to run, and when dependents can be scheduled.
//! - [`run_record`] provides run records, run results and scheduled task types.
//! - [`scheduler_step`] defines the result type for scheduler steps.
//! - [`state_manager`] manages per-run state transitions.

pub mod registry;
pub mod resolver;
pub mod run_record;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use registry::{Task, TaskDefinition, TaskOptions, TaskRegistry};
pub use resolver::{ExecutionPlan, Goal, PlannedTask, Resolver};
pub use run_record::{RunRecord, RunResult, RunState, ScheduledTask};
pub use scheduler::Scheduler;
pub use scheduler_step::SchedulerStep;
