// src/stage/clean.rs

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::fs::FileSystem;

use super::{Stage, StageContext, StageFuture};

/// Removes `path` (default: the output dir). A missing path is fine.
#[derive(Clone)]
pub struct CleanStage {
    fs: Arc<dyn FileSystem>,
    path: Option<PathBuf>,
}

impl fmt::Debug for CleanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanStage")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CleanStage {
    pub fn new(fs: Arc<dyn FileSystem>, path: Option<String>) -> Self {
        Self {
            fs,
            path: path.map(PathBuf::from),
        }
    }
}

impl Stage for CleanStage {
    fn describe(&self) -> String {
        match &self.path {
            Some(p) => format!("clean {:?}", p),
            None => "clean <output>".to_string(),
        }
    }

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a> {
        let target = match &self.path {
            Some(p) => ctx.env.resolve(p),
            None => ctx.env.output.clone(),
        };
        let fs = Arc::clone(&self.fs);

        Box::pin(async move {
            let removed = target.clone();
            tokio::task::spawn_blocking(move || fs.remove_dir_all(&removed))
                .await
                .context("clean stage panicked")??;
            info!(task = %ctx.task, path = ?target, "cleaned");
            Ok(())
        })
    }
}
