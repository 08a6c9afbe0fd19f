// src/stage/command.rs

//! Shell command stage.

use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, bail};
use globset::GlobSet;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::errors::Result;
use crate::fs::{FileSystem, RealFileSystem};
use crate::watch::patterns::build_globset;

use super::{Stage, StageContext, StageFuture, expand_globs};

/// Number of stderr lines kept for the failure message.
const STDERR_TAIL: usize = 20;

/// Runs `cmd` through the platform shell in the source root.
///
/// `{inputs}` in the command line expands to the changed files of an
/// incremental re-run or, otherwise, to the files matching the configured
/// `inputs` glob. Either way the paths are relative to the root,
/// shell-quoted and space separated. The same list is exported newline
/// separated as `ASSETDAG_INPUTS`; the output dir is exported as
/// `ASSETDAG_OUTPUT`.
#[derive(Debug, Clone)]
pub struct CommandStage {
    fs: Arc<dyn FileSystem>,
    cmd: String,
    inputs: Option<InputGlob>,
}

#[derive(Debug, Clone)]
struct InputGlob {
    pattern: String,
    matcher: GlobSet,
}

impl CommandStage {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            fs: Arc::new(RealFileSystem),
            cmd: cmd.into(),
            inputs: None,
        }
    }

    /// Filesystem used to expand the input glob.
    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Input glob expanded for `{inputs}` on full runs.
    pub fn with_inputs(mut self, glob: impl Into<String>) -> Result<Self> {
        let pattern = glob.into();
        let matcher = build_globset(std::slice::from_ref(&pattern))?;
        self.inputs = Some(InputGlob { pattern, matcher });
        Ok(self)
    }

    /// Expand the command line for one invocation.
    ///
    /// Returns the command line plus the input list exported to the child.
    pub fn render(&self, ctx: &StageContext) -> anyhow::Result<(String, Vec<String>)> {
        let list = match ctx.relative_inputs() {
            Some(paths) => paths,
            None => match &self.inputs {
                Some(glob) => {
                    let root = &ctx.env.root;
                    let files = expand_globs(
                        self.fs.as_ref(),
                        root,
                        std::slice::from_ref(&glob.pattern),
                        &glob.matcher,
                    )
                    .with_context(|| format!("expanding inputs `{}`", glob.pattern))?;
                    if files.is_empty() {
                        debug!(task = %ctx.task, pattern = %glob.pattern, "input glob matched no files");
                    }
                    files
                        .iter()
                        .map(|p| {
                            let rel = p.strip_prefix(root).unwrap_or(p);
                            rel.to_string_lossy().replace('\\', "/")
                        })
                        .collect()
                }
                None => Vec::new(),
            },
        };

        let quoted: Vec<String> = list.iter().map(|p| shell_quote(p)).collect();
        Ok((self.cmd.replace("{inputs}", &quoted.join(" ")), list))
    }
}

impl Stage for CommandStage {
    fn describe(&self) -> String {
        format!("command `{}`", self.cmd)
    }

    fn invoke<'a>(&'a self, ctx: &'a StageContext) -> StageFuture<'a> {
        Box::pin(async move {
            let this = self.clone();
            let owned = ctx.clone();
            let (line, inputs) = tokio::task::spawn_blocking(move || this.render(&owned))
                .await
                .context("expanding command inputs panicked")??;

            info!(task = %ctx.task, cmd = %line, "starting stage command");

            let mut cmd = shell_command(&line);
            cmd.current_dir(&ctx.env.root)
                .env("ASSETDAG_INPUTS", inputs.join("\n"))
                .env("ASSETDAG_OUTPUT", &ctx.env.output)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);

            let mut child = cmd
                .spawn()
                .with_context(|| format!("spawning `{line}` for task '{}'", ctx.task))?;

            if let Some(stdout) = child.stdout.take() {
                let task = ctx.task.clone();
                tokio::spawn(async move {
                    let mut lines = BufReader::new(stdout).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        info!(task = %task, "{}", line);
                    }
                });
            }

            // Keep only the tail of stderr for the error message.
            let stderr_tail = child.stderr.take().map(|stderr| {
                let task = ctx.task.clone();
                tokio::spawn(async move {
                    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
                    let mut lines = BufReader::new(stderr).lines();
                    while let Ok(Some(line)) = lines.next_line().await {
                        debug!(task = %task, "stderr: {}", line);
                        if tail.len() == STDERR_TAIL {
                            tail.pop_front();
                        }
                        tail.push_back(line);
                    }
                    tail.into_iter().collect::<Vec<_>>()
                })
            });

            let status = child
                .wait()
                .await
                .with_context(|| format!("waiting for `{line}` of task '{}'", ctx.task))?;

            let tail = match stderr_tail {
                Some(handle) => handle.await.unwrap_or_default(),
                None => Vec::new(),
            };

            if !status.success() {
                let code = status.code().unwrap_or(-1);
                if tail.is_empty() {
                    bail!("`{line}` exited with code {code}");
                }
                bail!("`{line}` exited with code {code}:\n{}", tail.join("\n"));
            }

            debug!(task = %ctx.task, cmd = %line, "stage command finished");
            Ok(())
        })
    }
}

fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(line);
        c
    }
}

fn shell_quote(s: &str) -> String {
    if cfg!(windows) {
        format!("\"{}\"", s.replace('"', "\\\""))
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::stage::StageEnv;

    fn ctx(inputs: Option<Vec<PathBuf>>) -> StageContext {
        StageContext::new("views", StageEnv::new("/site", "/site/build"), inputs)
    }

    fn views() -> Arc<MockFileSystem> {
        let fs = MockFileSystem::new();
        fs.add_file("/site/views/index.pug", "h1 home");
        fs.add_file("/site/views/about.pug", "h1 about");
        fs.add_file("/site/views/partials/nav.pug", "nav");
        Arc::new(fs)
    }

    fn quoted(path: &str) -> String {
        if cfg!(windows) {
            format!("\"{path}\"")
        } else {
            format!("'{path}'")
        }
    }

    #[test]
    fn full_run_substitutes_files_matching_configured_glob() {
        let stage = CommandStage::new("pug {inputs} -o build")
            .with_fs(views())
            .with_inputs("views/*.pug")
            .unwrap();
        let (line, list) = stage.render(&ctx(None)).unwrap();

        assert_eq!(
            line,
            format!("pug {} {} -o build", quoted("views/about.pug"), quoted("views/index.pug"))
        );
        assert_eq!(list, vec!["views/about.pug".to_string(), "views/index.pug".to_string()]);
    }

    #[test]
    fn full_run_with_no_matches_substitutes_nothing() {
        let stage = CommandStage::new("imagemin {inputs}")
            .with_fs(views())
            .with_inputs("img/**/*.png")
            .unwrap();
        let (line, list) = stage.render(&ctx(None)).unwrap();
        assert_eq!(line, "imagemin ");
        assert!(list.is_empty());
    }

    #[test]
    fn incremental_run_substitutes_changed_paths() {
        let stage = CommandStage::new("pug {inputs} -o build")
            .with_fs(views())
            .with_inputs("views/*.pug")
            .unwrap();
        let inputs = vec![PathBuf::from("/site/views/index.pug")];
        let (line, list) = stage.render(&ctx(Some(inputs))).unwrap();

        assert_eq!(line, format!("pug {} -o build", quoted("views/index.pug")));
        assert_eq!(list, vec!["views/index.pug".to_string()]);
    }

    #[test]
    fn command_without_placeholder_is_unchanged() {
        let stage = CommandStage::new("sass scss/main.scss build/css/style.css");
        let (line, list) = stage.render(&ctx(None)).unwrap();
        assert_eq!(line, "sass scss/main.scss build/css/style.css");
        assert!(list.is_empty());
    }

    #[test]
    fn invalid_input_glob_is_rejected() {
        assert!(CommandStage::new("true").with_inputs("img/{a,b").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nested_brace_glob_is_expanded_before_the_shell() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("img/a")).unwrap();
        std::fs::write(dir.path().join("img/a/x.jpg"), "x").unwrap();
        std::fs::write(dir.path().join("img/y.png"), "y").unwrap();
        std::fs::write(dir.path().join("img/notes.txt"), "skip").unwrap();

        let env = StageEnv::new(dir.path(), dir.path().join("build"));
        let ctx = StageContext::new("images", env, None);
        let stage = CommandStage::new(
            "printf '%s\\n' {inputs} > args.txt; printf '%s' \"$ASSETDAG_INPUTS\" > env.txt",
        )
        .with_inputs("img/**/*.{jpg,png}")
        .unwrap();

        stage.invoke(&ctx).await.unwrap();

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert_eq!(args, "img/a/x.jpg\nimg/y.png\n");
        let env = std::fs::read_to_string(dir.path().join("env.txt")).unwrap();
        assert_eq!(env, "img/a/x.jpg\nimg/y.png");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_reports_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let env = StageEnv::new(dir.path(), dir.path().join("build"));
        let ctx = StageContext::new("style", env, None);

        let stage = CommandStage::new("echo broken import >&2; exit 3");
        let err = stage.invoke(&ctx).await.unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("exited with code 3"), "{msg}");
        assert!(msg.contains("broken import"), "{msg}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_runs_in_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let env = StageEnv::new(dir.path(), dir.path().join("build"));
        let ctx = StageContext::new("marker", env, None);

        let stage = CommandStage::new("touch marker.txt");
        stage.invoke(&ctx).await.unwrap();
        assert!(dir.path().join("marker.txt").exists());
    }
}
