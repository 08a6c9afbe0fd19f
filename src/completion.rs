// src/completion.rs

//! Completion notifier: turns settled watch runs into reload signals.
//!
//! A signal is only emitted for an artifact class whose goal tasks all
//! succeeded, so a browser never reloads onto output that failed to
//! regenerate.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::RunReport;
use crate::types::ArtifactClass;

/// Signal forwarded to the dev server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReloadSignal {
    pub scope: ArtifactClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Destination for reload signals.
pub trait ReloadSink: Send + Sync {
    fn send(&self, signal: ReloadSignal);
}

impl ReloadSink for mpsc::UnboundedSender<ReloadSignal> {
    fn send(&self, signal: ReloadSignal) {
        if mpsc::UnboundedSender::send(self, signal).is_err() {
            debug!("reload receiver dropped");
        }
    }
}

/// Sink that only logs, used with `--no-server`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl ReloadSink for LogSink {
    fn send(&self, signal: ReloadSignal) {
        info!(scope = %signal.scope, path = ?signal.path, "reload");
    }
}

#[derive(Clone)]
pub struct CompletionNotifier {
    sink: Arc<dyn ReloadSink>,
}

impl fmt::Debug for CompletionNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionNotifier").finish_non_exhaustive()
    }
}

impl CompletionNotifier {
    pub fn new(sink: Arc<dyn ReloadSink>) -> Self {
        Self { sink }
    }

    /// Signals a report deserves, one per artifact class of its trigger.
    pub fn signals_for(report: &RunReport) -> Vec<ReloadSignal> {
        let mut signals = Vec::new();

        for (class, scoped) in &report.trigger.scopes {
            let failed: Vec<&str> = scoped
                .tasks
                .iter()
                .filter(|t| report.result.failed.contains_key(*t))
                .map(|t| t.as_str())
                .collect();
            let not_succeeded: Vec<&str> = scoped
                .tasks
                .iter()
                .filter(|t| !report.result.succeeded.contains(*t))
                .map(|t| t.as_str())
                .collect();

            if !not_succeeded.is_empty() {
                warn!(
                    run_id = report.run_id,
                    scope = %class,
                    ?failed,
                    unfinished = ?not_succeeded,
                    "withholding reload signal"
                );
                continue;
            }

            let path = match scoped.paths.len() {
                1 => scoped
                    .paths
                    .iter()
                    .next()
                    .map(|p| p.to_string_lossy().replace('\\', "/")),
                _ => None,
            };
            signals.push(ReloadSignal {
                scope: *class,
                path,
            });
        }

        signals
    }

    /// Emit the signals for a settled run.
    pub fn notify(&self, report: &RunReport) {
        for signal in Self::signals_for(report) {
            debug!(run_id = report.run_id, scope = %signal.scope, "emitting reload signal");
            self.sink.send(signal);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::path::PathBuf;
    use std::time::Duration;

    use super::*;
    use crate::dag::{ExecutionPlan, Goal, RunResult};
    use crate::engine::{ScopedTasks, Trigger, TriggerCause};
    use crate::errors::StageExecutionError;

    fn report(scopes: BTreeMap<ArtifactClass, ScopedTasks>, result: RunResult) -> RunReport {
        RunReport {
            run_id: 1,
            trigger: Trigger {
                goal: Goal::parallel(["style", "views"]),
                cause: TriggerCause::Watch { batch_id: 1 },
                scopes,
                inputs: HashMap::new(),
            },
            plan: ExecutionPlan::default(),
            result,
            elapsed: Duration::from_millis(10),
        }
    }

    fn scoped(tasks: &[&str], paths: &[&str]) -> ScopedTasks {
        ScopedTasks {
            tasks: tasks.iter().map(|s| s.to_string()).collect(),
            paths: paths.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn one_signal_per_successful_class() {
        let scopes = BTreeMap::from([
            (ArtifactClass::Style, scoped(&["style"], &["scss/main.scss"])),
            (ArtifactClass::Markup, scoped(&["views"], &["views/a.pug", "views/b.pug"])),
        ]);
        let mut result = RunResult::default();
        result.succeeded.insert("style".into());
        result.succeeded.insert("views".into());

        let signals = CompletionNotifier::signals_for(&report(scopes, result));
        assert_eq!(
            signals,
            vec![
                ReloadSignal {
                    scope: ArtifactClass::Style,
                    path: Some("scss/main.scss".into()),
                },
                ReloadSignal {
                    scope: ArtifactClass::Markup,
                    path: None,
                },
            ]
        );
    }

    #[test]
    fn failed_class_is_withheld_others_still_fire() {
        let scopes = BTreeMap::from([
            (ArtifactClass::Style, scoped(&["style"], &[])),
            (ArtifactClass::Markup, scoped(&["views"], &[])),
        ]);
        let mut result = RunResult::default();
        result.succeeded.insert("views".into());
        result
            .failed
            .insert("style".into(), StageExecutionError::new("style", "sass error"));

        let signals = CompletionNotifier::signals_for(&report(scopes, result));
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].scope, ArtifactClass::Markup);
    }

    #[test]
    fn signal_serializes_without_missing_path() {
        let json = serde_json::to_string(&ReloadSignal {
            scope: ArtifactClass::Style,
            path: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"scope":"style"}"#);
    }

    #[tokio::test]
    async fn notify_sends_to_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let notifier = CompletionNotifier::new(Arc::new(tx));

        let scopes = BTreeMap::from([(ArtifactClass::Style, scoped(&["style"], &[]))]);
        let mut result = RunResult::default();
        result.succeeded.insert("style".into());
        notifier.notify(&report(scopes, result));

        assert_eq!(rx.recv().await.unwrap().scope, ArtifactClass::Style);
        assert!(rx.try_recv().is_err());
    }
}
