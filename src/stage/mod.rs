// src/stage/mod.rs

//! Stage functions: the opaque units of work a task is made of.
//!
//! From the scheduler's point of view a stage is an idempotent async
//! function that reads some sources and writes some artifacts. The crate
//! ships three built-ins, enough to express the usual asset pipeline:
//!
//! - [`command`]: run a shell command (sass, postcss, a bundler, a template
//!   compiler, an image optimiser, ...).
//! - [`copy`]: copy files matching globs into the output tree.
//! - [`clean`]: remove a directory.
//!
//! Library users can implement [`Stage`] directly or wrap a closure in
//! [`FnStage`].

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::collections::BTreeSet;
use std::sync::Arc;

use globset::GlobSet;

use crate::config::model::StepConfig;
use crate::engine::TaskName;
use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem, walk_files};
use crate::watch::patterns::static_prefix;

pub mod clean;
pub mod command;
pub mod copy;

pub use clean::CleanStage;
pub use command::CommandStage;
pub use copy::CopyStage;

/// Future returned by [`Stage::invoke`].
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

/// Project-wide locations every stage resolves its paths against.
#[derive(Debug, Clone)]
pub struct StageEnv {
    /// Source root; commands run with this as their working directory.
    pub root: PathBuf,
    /// Output tree shared by all tasks.
    pub output: PathBuf,
}

impl StageEnv {
    pub fn new(root: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            output: output.into(),
        }
    }

    /// Resolve a config-relative path against the source root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

/// Everything a stage gets to see for one invocation.
#[derive(Debug, Clone)]
pub struct StageContext {
    pub task: TaskName,
    pub env: StageEnv,
    /// Changed source files when the task was re-run by an incremental
    /// watch binding; `None` means "process the full input set".
    pub inputs: Option<Vec<PathBuf>>,
}

impl StageContext {
    pub fn new(task: impl Into<TaskName>, env: StageEnv, inputs: Option<Vec<PathBuf>>) -> Self {
        Self {
            task: task.into(),
            env,
            inputs,
        }
    }

    /// Inputs relative to the source root with forward slashes.
    pub fn relative_inputs(&self) -> Option<Vec<String>> {
        self.inputs.as_ref().map(|paths| {
            paths
                .iter()
                .map(|p| {
                    let rel = p.strip_prefix(&self.env.root).unwrap_or(p);
                    rel.to_string_lossy().replace('\\', "/")
                })
                .collect()
        })
    }
}

/// An asynchronous, idempotent unit of work.
///
/// Implementations must be safe to re-run on the same inputs.
pub trait Stage: Send + Sync + fmt::Debug {
    /// Short human-readable description used in logs and dry-run output.
    fn describe(&self) -> String;

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a>;
}

/// A stage backed by a closure.
pub struct FnStage<F> {
    label: String,
    f: F,
}

impl<F> FnStage<F> {
    pub fn new(label: impl Into<String>, f: F) -> Self {
        Self {
            label: label.into(),
            f,
        }
    }
}

impl<F> fmt::Debug for FnStage<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStage")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(StageContext) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a> {
        Box::pin((self.f)(ctx.clone()))
    }
}

/// Whether `path`, taken relative to `root`, matches `matcher`.
pub(crate) fn matches_relative(matcher: &GlobSet, root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(rel) => matcher.is_match(rel.to_string_lossy().replace('\\', "/")),
        Err(_) => false,
    }
}

/// Files below `root` matching `matcher`, sorted and deduplicated.
///
/// Only the static prefix of each pattern is walked, not the whole root.
pub(crate) fn expand_globs(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &[String],
    matcher: &GlobSet,
) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let start = root.join(static_prefix(pattern));
        if fs.is_file(&start) {
            files.insert(start);
            continue;
        }
        for path in walk_files(fs, &start)? {
            if matches_relative(matcher, root, &path) {
                files.insert(path);
            }
        }
    }
    Ok(files.into_iter().collect())
}

/// Build the stage for one `[[task]]` step from config.
pub fn stage_from_config(step: &StepConfig, fs: Arc<dyn FileSystem>) -> Result<Arc<dyn Stage>> {
    let stage: Arc<dyn Stage> = match step {
        StepConfig::Command { cmd, inputs } => {
            let mut stage = CommandStage::new(cmd.clone()).with_fs(fs);
            if let Some(glob) = inputs {
                stage = stage.with_inputs(glob.clone())?;
            }
            Arc::new(stage)
        }
        StepConfig::Copy { src, base, dest } => Arc::new(CopyStage::new(
            fs,
            src,
            base.clone(),
            dest.clone(),
        )?),
        StepConfig::Clean { path } => Arc::new(CleanStage::new(fs, path.clone())),
    };
    Ok(stage)
}

/// Same as [`stage_from_config`] with the real filesystem.
pub fn default_stage_from_config(step: &StepConfig) -> Result<Arc<dyn Stage>> {
    stage_from_config(step, Arc::new(RealFileSystem))
}
