// src/errors.rs

//! Crate-wide error types.
//!
//! Registration and planning errors (`DuplicateTask`, `UnknownDependency`,
//! `UnknownTask`, `CyclicDependency`) are fatal and abort startup.
//! [`StageExecutionError`] is a runtime error that the scheduler recovers
//! from by marking the task failed.

use std::fmt;

use thiserror::Error;

use crate::engine::TaskName;

#[derive(Error, Debug)]
pub enum AssetdagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Task '{0}' is already registered")]
    DuplicateTask(TaskName),

    #[error("Task '{task}' depends on '{dependency}', which is not registered")]
    UnknownDependency { task: TaskName, dependency: TaskName },

    #[error("Task not found: {0}")]
    UnknownTask(TaskName),

    #[error("Cycle detected in task graph: {0}")]
    CyclicDependency(Cycle),

    #[error(transparent)]
    StageExecution(#[from] StageExecutionError),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("File watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// A cycle in the task graph, as a closed path (`a -> b -> a`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cycle(pub Vec<TaskName>);

impl Cycle {
    pub fn tasks(&self) -> &[TaskName] {
        &self.0
    }
}

impl fmt::Display for Cycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(" -> "))
    }
}

/// Failure of a single task's stage function.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("task '{task}' failed: {cause}")]
pub struct StageExecutionError {
    pub task: TaskName,
    pub cause: String,
}

impl StageExecutionError {
    pub fn new(task: impl Into<TaskName>, cause: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            cause: cause.into(),
        }
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AssetdagError>;
