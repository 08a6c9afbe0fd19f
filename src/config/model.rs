// src/config/model.rs

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::dag::{Goal, TaskRegistry};
use crate::engine::TaskName;
use crate::types::{ArtifactClass, CompositionMode, GoalMode};
use crate::watch::path_utils::normalize_lexically;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// root = "."
/// output = "build"
/// debounce_ms = 50
///
/// [server]
/// port = 3000
///
/// [build]
/// mode = "series"
/// tasks = ["clean", "copy", "style", "views"]
///
/// [[task]]
/// name = "style"
/// steps = [{ kind = "command", cmd = "sass scss/main.scss build/css/style.css" }]
///
/// [[watch]]
/// pattern = "scss/**/*.scss"
/// tasks = ["style"]
/// scope = "style"
/// ```
///
/// All sections are optional and have reasonable defaults; validation
/// (`TryFrom<RawConfigFile> for ConfigFile`) rejects a config without tasks.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub build: BuildSection,

    /// Defaults applied to every `[[watch]]` binding.
    #[serde(default)]
    pub default: DefaultSection,

    /// All `[[task]]` entries, in declaration order.
    #[serde(default)]
    pub task: Vec<TaskConfig>,

    /// All `[[watch]]` entries; order is binding order.
    #[serde(default)]
    pub watch: Vec<WatchBindingConfig>,
}

/// `[config]` section: where sources and artifacts live.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Source root, relative to the config file.
    #[serde(default = "default_root")]
    pub root: String,

    /// Output tree, relative to the source root.
    #[serde(default = "default_output")]
    pub output: String,

    /// Debounce window for watch events, in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_root() -> String {
    ".".to_string()
}

fn default_output() -> String {
    "build".to_string()
}

fn default_debounce_ms() -> u64 {
    50
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            output: default_output(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// `[server]` section: dev server and live-reload transport.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_reload_port")]
    pub reload_port: u16,

    /// Serve with permissive CORS headers.
    #[serde(default)]
    pub cors: bool,
}

fn default_port() -> u16 {
    3000
}

fn default_reload_port() -> u16 {
    35729
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            port: default_port(),
            reload_port: default_reload_port(),
            cors: false,
        }
    }
}

/// `[build]` section: the goal of `assetdag build`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct BuildSection {
    #[serde(default)]
    pub mode: GoalMode,

    /// Goal tasks. `None` means every task.
    #[serde(default)]
    pub tasks: Option<Vec<TaskName>>,
}

/// `[default]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultSection {
    /// Exclude patterns applied to every watch binding.
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// One `[[task]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    pub name: TaskName,

    /// How the task's own steps are composed.
    #[serde(default)]
    pub mode: CompositionMode,

    #[serde(default)]
    pub depends_on: Vec<TaskName>,

    #[serde(default)]
    pub steps: Vec<StepConfig>,
}

/// One built-in stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StepConfig {
    /// Shell command run in the source root.
    Command {
        cmd: String,
        /// Glob substituted for `{inputs}` on full runs.
        #[serde(default)]
        inputs: Option<String>,
    },
    /// Copy files matching `src` into `dest`.
    Copy {
        src: Vec<String>,
        #[serde(default)]
        base: Option<String>,
        #[serde(default)]
        dest: Option<String>,
    },
    /// Remove a directory (default: the output tree).
    Clean {
        #[serde(default)]
        path: Option<String>,
    },
}

/// One `[[watch]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WatchBindingConfig {
    pub pattern: String,

    #[serde(default)]
    pub exclude: Vec<String>,

    pub tasks: Vec<TaskName>,

    /// Artifact class reloaded when the tasks succeed. No scope, no reload.
    #[serde(default)]
    pub scope: Option<ArtifactClass>,

    /// Pass the changed paths to the tasks instead of running them in full.
    #[serde(default)]
    pub incremental: bool,
}

/// Validated configuration.
///
/// Built from [`RawConfigFile`] via `TryFrom`, which also registers every
/// task in a shared [`TaskRegistry`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    config: ConfigSection,
    server: ServerSection,
    default: DefaultSection,
    watch: Vec<WatchBindingConfig>,
    registry: Arc<TaskRegistry>,
    build_goal: Goal,
    /// Directory containing the config file.
    base_dir: PathBuf,
}

impl ConfigFile {
    /// Assemble a config whose parts were already validated.
    pub(crate) fn new_unchecked(
        config: ConfigSection,
        server: ServerSection,
        default: DefaultSection,
        watch: Vec<WatchBindingConfig>,
        registry: Arc<TaskRegistry>,
        build_goal: Goal,
    ) -> Self {
        Self {
            config,
            server,
            default,
            watch,
            registry,
            build_goal,
            base_dir: PathBuf::from("."),
        }
    }

    /// Resolve relative locations against `dir` (the config file's parent).
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    pub fn config_section(&self) -> &ConfigSection {
        &self.config
    }

    pub fn server(&self) -> &ServerSection {
        &self.server
    }

    pub fn default_section(&self) -> &DefaultSection {
        &self.default
    }

    pub fn watch_bindings(&self) -> &[WatchBindingConfig] {
        &self.watch
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Goal of `assetdag build` (and of the initial build of `serve`).
    pub fn build_goal(&self) -> &Goal {
        &self.build_goal
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.config.debounce_ms)
    }

    pub fn project_root(&self) -> PathBuf {
        normalize_lexically(&self.base_dir.join(&self.config.root))
    }

    pub fn output_dir(&self) -> PathBuf {
        normalize_lexically(&self.project_root().join(&self.config.output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [[task]]
            name = "style"
            steps = [{ kind = "command", cmd = "sass a.scss b.css" }]
            "#,
        )
        .unwrap();

        assert_eq!(raw.config.root, ".");
        assert_eq!(raw.config.output, "build");
        assert_eq!(raw.config.debounce_ms, 50);
        assert_eq!(raw.server.port, 3000);
        assert_eq!(raw.server.reload_port, 35729);
        assert!(!raw.server.cors);
        assert_eq!(raw.build.mode, GoalMode::Parallel);
        assert!(raw.build.tasks.is_none());
        assert_eq!(raw.task[0].mode, CompositionMode::Sequential);
        assert_eq!(
            raw.task[0].steps,
            vec![StepConfig::Command {
                cmd: "sass a.scss b.css".into(),
                inputs: None
            }]
        );
    }

    #[test]
    fn step_kinds_and_watch_fields_parse() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [[task]]
            name = "copy"
            mode = "parallel"
            steps = [
              { kind = "copy", src = ["fonts/**/*"], dest = "build/fonts" },
              { kind = "clean", path = "build/tmp" },
            ]

            [[watch]]
            pattern = "views/**/*.pug"
            tasks = ["copy"]
            scope = "markup"
            incremental = true
            "#,
        )
        .unwrap();

        assert_eq!(raw.task[0].mode, CompositionMode::Parallel);
        assert_eq!(
            raw.task[0].steps[0],
            StepConfig::Copy {
                src: vec!["fonts/**/*".into()],
                base: None,
                dest: Some("build/fonts".into())
            }
        );
        assert_eq!(
            raw.task[0].steps[1],
            StepConfig::Clean {
                path: Some("build/tmp".into())
            }
        );
        assert_eq!(raw.watch[0].scope, Some(ArtifactClass::Markup));
        assert!(raw.watch[0].incremental);
    }

    #[test]
    fn unknown_scope_is_a_parse_error() {
        let err = toml::from_str::<RawConfigFile>(
            r#"
            [[watch]]
            pattern = "x"
            tasks = ["a"]
            scope = "fonts"
            "#,
        );
        assert!(err.is_err());
    }
}
