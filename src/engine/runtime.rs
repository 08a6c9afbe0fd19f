// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::completion::CompletionNotifier;
use crate::dag::ScheduledTask;
use crate::errors::Result;
use crate::exec::ExecutorBackend;

use super::core::CoreRuntime;
use super::{CoreCommand, RunReport, RuntimeEvent};

/// Drives the core runtime in response to `RuntimeEvent`s, delegates
/// actual task execution to an `ExecutorBackend` and hands settled runs to
/// the completion notifier.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
    notifier: Option<CompletionNotifier>,
    /// Reports kept for the caller in `exit_when_idle` mode.
    reports: Vec<RunReport>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("notifier", &self.notifier)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
            notifier: None,
            reports: Vec::new(),
        }
    }

    pub fn with_notifier(mut self, notifier: CompletionNotifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Main event loop.
    ///
    /// - Consumes `RuntimeEvent`s from `event_rx`.
    /// - Feeds them into the core runtime.
    /// - Executes commands returned by the core (spawn tasks, report, exit).
    ///
    /// Returns the reports of every settled run when the runtime was built
    /// with `exit_when_idle`; long-running runtimes return an empty list.
    pub async fn run(mut self) -> Result<Vec<RunReport>> {
        info!("assetdag runtime started");

        loop {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            // Feed the event into the pure core and get commands back.
            let step = self.core.step(event);

            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        if !self.core.is_idle() {
            warn!(
                active_runs = self.core.runs().len(),
                "runtime stopping with runs still in flight"
            );
        }

        info!("runtime exiting");
        Ok(self.reports)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::RunFinished(report) => {
                self.finish_run(report);
            }
            CoreCommand::RequestExit => {
                // keep_running is already false in this case; just log it.
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    fn finish_run(&mut self, report: RunReport) {
        if let Some(failure) = &report.result.first_failure {
            error!(
                run_id = report.run_id,
                batch_id = report.trigger.batch_id(),
                task = %failure.task,
                cause = %failure.cause,
                "run failed"
            );
        } else if !report.result.is_success() {
            warn!(
                run_id = report.run_id,
                skipped = ?report.result.skipped,
                "run finished with skipped tasks"
            );
        }

        if let Some(notifier) = &self.notifier {
            notifier.notify(&report);
        }

        if self.core.options().exit_when_idle {
            self.reports.push(report);
        }
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let names: Vec<_> = tasks.iter().map(|t| t.name.as_str()).collect();
        let run_ids: Vec<_> = tasks.iter().map(|t| t.run_id).collect();
        debug!(?names, ?run_ids, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}
