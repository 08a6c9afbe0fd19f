use std::sync::Arc;

use assetdag::config::{
    ConfigFile, RawConfigFile, StepConfig, TaskConfig, WatchBindingConfig,
};
use assetdag::dag::{TaskDefinition, TaskOptions, TaskRegistry};
use assetdag::stage::Stage;
use assetdag::types::{ArtifactClass, CompositionMode, GoalMode};

use crate::fake_stage::{FakeStage, InvocationLog};

/// Builder for `TaskRegistry` backed by [`FakeStage`]s.
///
/// Tasks may be added in any order; `build` registers them leaf-first.
pub struct RegistryBuilder {
    log: InvocationLog,
    defs: Vec<TaskDefinition>,
}

impl RegistryBuilder {
    pub fn new(log: &InvocationLog) -> Self {
        Self {
            log: Arc::clone(log),
            defs: Vec::new(),
        }
    }

    /// A task with a single recording step named `"run"`.
    pub fn task(self, name: &str, deps: &[&str]) -> Self {
        let stage = FakeStage::new("run", &self.log).arc();
        self.task_with(name, deps, vec![stage])
    }

    /// A task whose single step fails with `cause`.
    pub fn failing_task(self, name: &str, deps: &[&str], cause: &str) -> Self {
        let stage = FakeStage::new("run", &self.log).failing(cause).arc();
        self.task_with(name, deps, vec![stage])
    }

    pub fn task_with(mut self, name: &str, deps: &[&str], steps: Vec<Arc<dyn Stage>>) -> Self {
        self.defs.push(TaskDefinition::new(
            name,
            steps,
            TaskOptions::after(deps.iter().copied()),
        ));
        self
    }

    pub fn parallel_task_with(mut self, name: &str, deps: &[&str], steps: Vec<Arc<dyn Stage>>) -> Self {
        self.defs.push(TaskDefinition::new(
            name,
            steps,
            TaskOptions::after(deps.iter().copied()).with_mode(CompositionMode::Parallel),
        ));
        self
    }

    pub fn try_build(self) -> assetdag::errors::Result<TaskRegistry> {
        TaskRegistry::from_definitions(self.defs)
    }

    pub fn build(self) -> Arc<TaskRegistry> {
        Arc::new(self.try_build().expect("Failed to build valid registry from builder"))
    }
}

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_task(mut self, task: TaskConfig) -> Self {
        self.config.task.push(task);
        self
    }

    pub fn with_watch(mut self, binding: WatchBindingConfig) -> Self {
        self.config.watch.push(binding);
        self
    }

    pub fn with_global_exclude(mut self, pattern: &str) -> Self {
        self.config.default.exclude.push(pattern.to_string());
        self
    }

    pub fn with_build_goal(mut self, mode: GoalMode, tasks: &[&str]) -> Self {
        self.config.build.mode = mode;
        self.config.build.tasks = Some(tasks.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.config.config.debounce_ms = ms;
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            task: TaskConfig {
                name: name.to_string(),
                mode: CompositionMode::Sequential,
                depends_on: vec![],
                steps: vec![],
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn parallel(mut self) -> Self {
        self.task.mode = CompositionMode::Parallel;
        self
    }

    pub fn command(mut self, cmd: &str) -> Self {
        self.task.steps.push(StepConfig::Command {
            cmd: cmd.to_string(),
            inputs: None,
        });
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// A `[[watch]]` entry with no excludes.
pub fn watch_binding(
    pattern: &str,
    tasks: &[&str],
    scope: Option<ArtifactClass>,
    incremental: bool,
) -> WatchBindingConfig {
    WatchBindingConfig {
        pattern: pattern.to_string(),
        exclude: vec![],
        tasks: tasks.iter().map(|s| s.to_string()).collect(),
        scope,
        incremental,
    }
}
