// src/exec/mod.rs

//! Task execution layer.
//!
//! This module is responsible for actually running the stage steps of
//! scheduled tasks and reporting back to the orchestration runtime via
//! `RuntimeEvent::TaskCompleted`.
//!
//! - [`executor_loop`] owns the main executor loop which spawns task
//!   executions and keeps executions of the same task serialized.
//! - [`task_runner`] runs one task's steps according to its composition mode.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod executor_loop;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use executor_loop::spawn_executor;
