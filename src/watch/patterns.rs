// src/watch/patterns.rs

use std::fmt;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::config::model::{ConfigFile, WatchBindingConfig};
use crate::engine::TaskName;
use crate::errors::Result;
use crate::types::ArtifactClass;

/// Watch configuration shared by every binding (`[default]` in the config).
///
/// ```toml
/// [default]
/// exclude = ["**/*.swp", "**/.#*"]
/// ```
#[derive(Debug, Clone, Default)]
pub struct WatchDefaults {
    pub exclude: Vec<String>,
}

/// A compiled `[[watch]]` entry: glob pattern → tasks to re-run.
///
/// Patterns are relative to the source root; the router passes relative
/// paths (e.g. `"scss/partials/_nav.scss"`) into [`WatchBinding::matches`].
#[derive(Clone)]
pub struct WatchBinding {
    index: usize,
    pattern: String,
    matcher: GlobSet,
    exclude: Option<GlobSet>,
    tasks: Vec<TaskName>,
    scope: Option<ArtifactClass>,
    incremental: bool,
}

impl fmt::Debug for WatchBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchBinding")
            .field("index", &self.index)
            .field("pattern", &self.pattern)
            .field("tasks", &self.tasks)
            .field("scope", &self.scope)
            .field("incremental", &self.incremental)
            .finish_non_exhaustive()
    }
}

impl WatchBinding {
    pub fn new(
        index: usize,
        pattern: &str,
        exclude: &[String],
        tasks: Vec<TaskName>,
        scope: Option<ArtifactClass>,
        incremental: bool,
    ) -> Result<Self> {
        let exclude = if exclude.is_empty() {
            None
        } else {
            Some(build_globset(exclude)?)
        };

        Ok(Self {
            index,
            pattern: pattern.to_string(),
            matcher: build_globset(&[pattern.to_string()])?,
            exclude,
            tasks,
            scope,
            incremental,
        })
    }

    /// Position in the binding table.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Tasks to invoke on match, in configured order.
    pub fn tasks(&self) -> &[TaskName] {
        &self.tasks
    }

    pub fn scope(&self) -> Option<ArtifactClass> {
        self.scope
    }

    /// Whether matched tasks get the changed paths as their inputs.
    pub fn incremental(&self) -> bool {
        self.incremental
    }

    /// Returns true if `rel_path` (relative to the source root) should
    /// trigger this binding.
    pub fn matches(&self, rel_path: &str) -> bool {
        if !self.matcher.is_match(rel_path) {
            return false;
        }
        match &self.exclude {
            Some(exclude) => !exclude.is_match(rel_path),
            None => true,
        }
    }
}

/// Compile the binding table. `[default] exclude` applies to every binding
/// on top of its own excludes.
pub fn build_watch_bindings(
    defaults: &WatchDefaults,
    specs: &[WatchBindingConfig],
) -> Result<Vec<WatchBinding>> {
    specs
        .iter()
        .enumerate()
        .map(|(index, spec)| {
            let mut exclude = spec.exclude.clone();
            exclude.extend(defaults.exclude.iter().cloned());
            WatchBinding::new(
                index,
                &spec.pattern,
                &exclude,
                spec.tasks.clone(),
                spec.scope,
                spec.incremental,
            )
        })
        .collect()
}

/// Convenience: build the compiled binding table directly from a loaded
/// `ConfigFile`.
pub fn build_bindings_from_config(cfg: &ConfigFile) -> Result<Vec<WatchBinding>> {
    let defaults = WatchDefaults {
        exclude: cfg.default_section().exclude.clone(),
    };
    build_watch_bindings(&defaults, cfg.watch_bindings())
}

/// Build a GlobSet from simple string patterns.
pub fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

/// The leading components of `pattern` that contain no glob syntax, e.g.
/// `"fonts"` for `"fonts/**/*.woff2"`. Empty when the very first component
/// is already dynamic.
pub fn static_prefix(pattern: &str) -> String {
    pattern
        .split('/')
        .take_while(|c| !c.contains(['*', '?', '[', '{']))
        .collect::<Vec<_>>()
        .join("/")
}
