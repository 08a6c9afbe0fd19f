// src/config/validate.rs

use std::sync::Arc;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::{Goal, TaskDefinition, TaskOptions, TaskRegistry};
use crate::errors::{AssetdagError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::stage::stage_from_config;
use crate::types::GoalMode;
use crate::watch::patterns::{WatchDefaults, build_watch_bindings};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AssetdagError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(raw, Arc::new(RealFileSystem))
    }
}

/// Validate a raw config and register its tasks, with stages that use `fs`.
pub fn validate_config(raw: RawConfigFile, fs: Arc<dyn FileSystem>) -> Result<ConfigFile> {
    ensure_has_tasks(&raw)?;
    validate_global_config(&raw)?;

    let registry = Arc::new(build_registry(&raw, fs)?);
    validate_watch_bindings(&raw, &registry)?;
    let build_goal = build_goal(&raw, &registry)?;

    Ok(ConfigFile::new_unchecked(
        raw.config,
        raw.server,
        raw.default,
        raw.watch,
        registry,
        build_goal,
    ))
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(AssetdagError::ConfigError(
            "config must contain at least one [[task]] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.debounce_ms == 0 {
        return Err(AssetdagError::ConfigError(
            "[config].debounce_ms must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.server.port == cfg.server.reload_port {
        return Err(AssetdagError::ConfigError(format!(
            "[server].port and [server].reload_port must differ (both {})",
            cfg.server.port
        )));
    }
    Ok(())
}

/// Duplicates, unknown dependencies and cycles are all rejected by
/// `TaskRegistry::from_definitions`.
fn build_registry(cfg: &RawConfigFile, fs: Arc<dyn FileSystem>) -> Result<TaskRegistry> {
    let mut defs = Vec::with_capacity(cfg.task.len());

    for task in &cfg.task {
        if task.name.trim().is_empty() {
            return Err(AssetdagError::ConfigError(
                "[[task]] entries need a non-empty name".to_string(),
            ));
        }

        let steps = task
            .steps
            .iter()
            .map(|step| stage_from_config(step, Arc::clone(&fs)))
            .collect::<Result<Vec<_>>>()?;

        defs.push(TaskDefinition::new(
            task.name.clone(),
            steps,
            TaskOptions::after(task.depends_on.iter().cloned()).with_mode(task.mode),
        ));
    }

    TaskRegistry::from_definitions(defs)
}

fn validate_watch_bindings(cfg: &RawConfigFile, registry: &TaskRegistry) -> Result<()> {
    for (index, binding) in cfg.watch.iter().enumerate() {
        if binding.tasks.is_empty() {
            return Err(AssetdagError::ConfigError(format!(
                "[[watch]] #{index} ('{}') lists no tasks",
                binding.pattern
            )));
        }
        for task in &binding.tasks {
            registry.lookup(task)?;
        }
    }

    // Compile once so bad globs fail at startup.
    let defaults = WatchDefaults {
        exclude: cfg.default.exclude.clone(),
    };
    build_watch_bindings(&defaults, &cfg.watch)?;
    Ok(())
}

fn build_goal(cfg: &RawConfigFile, registry: &TaskRegistry) -> Result<Goal> {
    let tasks: Vec<String> = match &cfg.build.tasks {
        Some(tasks) if tasks.is_empty() => {
            return Err(AssetdagError::ConfigError(
                "[build].tasks must not be empty; omit it to build every task".to_string(),
            ));
        }
        Some(tasks) => {
            for task in tasks {
                registry.lookup(task)?;
            }
            tasks.clone()
        }
        None => registry.names().map(str::to_string).collect(),
    };

    Ok(match cfg.build.mode {
        GoalMode::Parallel => Goal::parallel(tasks),
        GoalMode::Series => Goal::series(tasks),
    })
}
