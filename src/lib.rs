// src/lib.rs

pub mod cli;
pub mod completion;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod server;
pub mod stage;
pub mod types;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::completion::{CompletionNotifier, LogSink, ReloadSink};
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::dag::Resolver;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, TaskRunner, Trigger};
use crate::exec::RealExecutorBackend;
use crate::server::DevServer;
use crate::stage::StageEnv;
use crate::types::FailurePolicy;
use crate::watch::{WatchRouter, build_bindings_from_config, run_router, spawn_watcher};

/// High-level entry point used by `main.rs`.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(PathBuf::from(&args.config))?;

    match args.command {
        Command::Build { dry_run: true } => print_dry_run(&cfg),
        Command::Build { dry_run: false } => run_build(&cfg).await,
        Command::Serve {
            no_server,
            skip_initial_build,
        } => run_serve(&cfg, no_server, skip_initial_build).await,
    }
}

/// Stage environment with the source root canonicalized, so paths reported
/// by the watcher can be made relative to it.
fn stage_env(cfg: &ConfigFile) -> StageEnv {
    let root = cfg.project_root();
    let root = root.canonicalize().unwrap_or(root);
    let output = root.join(&cfg.config_section().output);
    StageEnv::new(root, output)
}

/// `assetdag build`: run the build goal once, fail-fast.
pub async fn run_build(cfg: &ConfigFile) -> Result<()> {
    let runner = TaskRunner::new(Arc::clone(cfg.registry()), stage_env(cfg));
    let result = runner.run(cfg.build_goal(), FailurePolicy::FailFast).await?;

    if let Some(failure) = &result.first_failure {
        if !result.skipped.is_empty() {
            warn!(skipped = ?result.skipped, "tasks not run after failure");
        }
        bail!("task '{}' failed: {}", failure.task, failure.cause);
    }

    info!(tasks = result.succeeded.len(), "build finished");
    Ok(())
}

/// `assetdag serve`: optional initial build, then watch + rebuild + reload
/// until Ctrl-C.
pub async fn run_serve(cfg: &ConfigFile, no_server: bool, skip_initial_build: bool) -> Result<()> {
    let registry = Arc::clone(cfg.registry());
    let env = stage_env(cfg);

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let executor = RealExecutorBackend::new(Arc::clone(&registry), env.clone(), rt_tx.clone());

    let dev_server = if no_server {
        None
    } else {
        Some(DevServer::start(cfg)?)
    };
    let sink: Arc<dyn ReloadSink> = match &dev_server {
        Some(server) => server.sink(),
        None => Arc::new(LogSink),
    };

    // Watcher → router → runtime.
    let bindings = build_bindings_from_config(cfg)?;
    let (raw_tx, raw_rx) = mpsc::unbounded_channel();
    let watcher = spawn_watcher(&env.root, raw_tx)?;
    let router = WatchRouter::new(watcher.root(), &env.output, bindings);
    tokio::spawn(run_router(router, cfg.debounce(), raw_rx, rt_tx.clone()));

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }

    if skip_initial_build {
        info!("skipping initial build");
    } else {
        rt_tx
            .send(RuntimeEvent::Triggered(Trigger::full_build(cfg.build_goal().clone())))
            .await?;
    }

    let core = CoreRuntime::new(registry, RuntimeOptions::watch());
    let runtime = Runtime::new(core, rt_rx, executor).with_notifier(CompletionNotifier::new(sink));
    runtime.run().await?;

    drop(watcher);
    drop(dev_server);
    Ok(())
}

/// Dry-run output: the resolved build plan, task steps and watch bindings.
pub fn print_dry_run(cfg: &ConfigFile) -> Result<()> {
    let registry = cfg.registry();
    let plan = Resolver::new(registry).plan(cfg.build_goal())?;

    println!("assetdag dry-run");
    println!("  root   = {}", cfg.project_root().display());
    println!("  output = {}", cfg.output_dir().display());
    println!("  goal   = {:?}", cfg.build_goal());
    println!();

    println!("plan ({} tasks):", plan.len());
    for (level, tasks) in plan.levels().iter().enumerate() {
        println!("  level {level}: {}", tasks.join(", "));
    }
    println!();

    println!("tasks:");
    for name in plan.order() {
        let task = registry.lookup(name)?;
        println!("  - {name} ({:?})", task.mode());
        if !task.dependencies().is_empty() {
            println!("      depends_on: {:?}", task.dependencies());
        }
        for step in task.steps() {
            println!("      step: {}", step.describe());
        }
    }

    if !cfg.watch_bindings().is_empty() {
        println!();
        println!("watch:");
        for binding in cfg.watch_bindings() {
            let scope = binding.scope.map(|s| s.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "  - {} -> {:?} (scope: {scope}{})",
                binding.pattern,
                binding.tasks,
                if binding.incremental { ", incremental" } else { "" }
            );
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
