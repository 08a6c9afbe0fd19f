// src/stage/copy.rs

//! Glob copy into the output tree.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use globset::GlobSet;
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::fs::FileSystem;
use crate::watch::patterns::build_globset;

use super::{Stage, StageContext, StageFuture, expand_globs, matches_relative};

/// Copies files matching `src` (relative to the source root) to `dest`,
/// keeping each file's path relative to `base`.
///
/// `dest` defaults to the output dir, `base` to the source root. On an
/// incremental run only the changed files that match `src` are copied.
#[derive(Clone)]
pub struct CopyStage {
    fs: Arc<dyn FileSystem>,
    patterns: Vec<String>,
    matcher: GlobSet,
    base: Option<PathBuf>,
    dest: Option<PathBuf>,
}

impl fmt::Debug for CopyStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopyStage")
            .field("patterns", &self.patterns)
            .field("base", &self.base)
            .field("dest", &self.dest)
            .finish_non_exhaustive()
    }
}

impl CopyStage {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        patterns: &[String],
        base: Option<String>,
        dest: Option<String>,
    ) -> Result<Self> {
        Ok(Self {
            fs,
            patterns: patterns.to_vec(),
            matcher: build_globset(patterns)?,
            base: base.map(PathBuf::from),
            dest: dest.map(PathBuf::from),
        })
    }

    /// Files to copy for this invocation, sorted and deduplicated.
    fn sources(&self, ctx: &StageContext) -> anyhow::Result<Vec<PathBuf>> {
        let root = &ctx.env.root;

        if let Some(inputs) = &ctx.inputs {
            return Ok(inputs
                .iter()
                .filter(|p| self.fs.is_file(p) && matches_relative(&self.matcher, root, p))
                .cloned()
                .collect());
        }

        Ok(expand_globs(self.fs.as_ref(), root, &self.patterns, &self.matcher)?)
    }

    fn copy_blocking(&self, ctx: &StageContext) -> anyhow::Result<usize> {
        let base = match &self.base {
            Some(b) => ctx.env.resolve(b),
            None => ctx.env.root.clone(),
        };
        let dest = match &self.dest {
            Some(d) => ctx.env.resolve(d),
            None => ctx.env.output.clone(),
        };

        let mut copied = 0;
        for src in self.sources(ctx)? {
            let rel = match src.strip_prefix(&base) {
                Ok(rel) => rel.to_path_buf(),
                Err(_) => {
                    warn!(task = %ctx.task, file = ?src, base = ?base, "file outside copy base; skipping");
                    continue;
                }
            };
            let target = dest.join(rel);
            debug!(task = %ctx.task, from = ?src, to = ?target, "copying");
            self.fs
                .copy_file(&src, &target)
                .with_context(|| format!("copying {:?}", src))?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl Stage for CopyStage {
    fn describe(&self) -> String {
        format!("copy {:?}", self.patterns)
    }

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a> {
        let this = self.clone();
        let owned = ctx.clone();
        Box::pin(async move {
            let copied = tokio::task::spawn_blocking(move || this.copy_blocking(&owned))
                .await
                .context("copy stage panicked")??;
            info!(task = %ctx.task, copied, "copied files");
            Ok(())
        })
    }
}
