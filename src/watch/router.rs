// src/watch/router.rs

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::dag::Goal;
use crate::engine::{RuntimeEvent, ScopedTasks, TaskName, Trigger, TriggerCause};
use crate::types::ArtifactClass;
use crate::watch::debounce::{Debouncer, EventBatch};
use crate::watch::path_utils::{is_within, relative_str, resolve_path};
use crate::watch::patterns::WatchBinding;
use crate::watch::{ChangeKind, RawEvent};

/// Maps changed paths to bindings and batches to triggers.
#[derive(Debug)]
pub struct WatchRouter {
    root: PathBuf,
    output: PathBuf,
    bindings: Vec<WatchBinding>,
}

impl WatchRouter {
    pub fn new(root: impl Into<PathBuf>, output: impl Into<PathBuf>, bindings: Vec<WatchBinding>) -> Self {
        Self {
            root: resolve_path(&root.into()),
            output: resolve_path(&output.into()),
            bindings,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bindings(&self) -> &[WatchBinding] {
        &self.bindings
    }

    /// Relative path and matching binding indices for `path`, or `None` if
    /// the path matches nothing. Paths inside the output tree never match.
    pub fn classify(&self, path: &Path) -> Option<(String, BTreeSet<usize>)> {
        if is_within(path, &self.output) {
            return None;
        }

        let rel = relative_str(&self.root, path)?;
        if rel.is_empty() {
            return None;
        }

        let matched: BTreeSet<usize> = self
            .bindings
            .iter()
            .filter(|b| b.matches(&rel))
            .map(|b| b.index())
            .collect();

        if matched.is_empty() {
            None
        } else {
            Some((rel, matched))
        }
    }

    /// Build the trigger for a closed batch.
    pub fn route(&self, batch: &EventBatch) -> Option<Trigger> {
        let present = batch.bindings();
        let selected: Vec<&WatchBinding> = self
            .bindings
            .iter()
            .filter(|b| present.contains(&b.index()))
            .collect();

        let mut goal_tasks: Vec<TaskName> = Vec::new();
        for binding in &selected {
            for task in binding.tasks() {
                if !goal_tasks.contains(task) {
                    goal_tasks.push(task.clone());
                }
            }
        }
        if goal_tasks.is_empty() {
            return None;
        }

        let mut scopes: BTreeMap<ArtifactClass, ScopedTasks> = BTreeMap::new();
        for change in batch.changes.values() {
            for binding in selected.iter().filter(|b| change.bindings.contains(&b.index())) {
                if let Some(class) = binding.scope() {
                    let scoped = scopes.entry(class).or_default();
                    scoped.tasks.extend(binding.tasks().iter().cloned());
                    scoped.paths.insert(PathBuf::from(&change.relative));
                }
            }
        }

        let mut inputs: HashMap<TaskName, Vec<PathBuf>> = HashMap::new();
        for task in &goal_tasks {
            let selecting: Vec<&WatchBinding> = selected
                .iter()
                .copied()
                .filter(|b| b.tasks().contains(task))
                .collect();
            if !selecting.iter().all(|b| b.incremental()) {
                continue;
            }

            let paths: Vec<PathBuf> = batch
                .changes
                .iter()
                .filter(|(_, c)| c.kind != ChangeKind::Removed)
                .filter(|(_, c)| selecting.iter().any(|b| c.bindings.contains(&b.index())))
                .map(|(p, _)| p.clone())
                .collect();

            // Only removals: fall back to a full run of the task.
            if !paths.is_empty() {
                inputs.insert(task.clone(), paths);
            }
        }

        Some(Trigger {
            goal: Goal::parallel(goal_tasks),
            cause: TriggerCause::Watch {
                batch_id: batch.batch_id,
            },
            scopes,
            inputs,
        })
    }
}

/// Router loop: raw events in, one `RuntimeEvent::Triggered` per closed
/// debounce window out.
///
/// Returns when the raw event channel closes (after flushing an open
/// window) or when the runtime stops listening.
pub async fn run_router(
    router: WatchRouter,
    window: Duration,
    mut raw_rx: mpsc::UnboundedReceiver<RawEvent>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let mut debouncer = Debouncer::new(window);
    info!(bindings = router.bindings().len(), window_ms = window.as_millis() as u64, "watch router started");

    loop {
        let deadline = debouncer.deadline();

        tokio::select! {
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if !dispatch(&router, &mut debouncer, &runtime_tx).await {
                    break;
                }
            }
            event = raw_rx.recv() => match event {
                Some(event) => match router.classify(&event.path) {
                    Some((rel, bindings)) => {
                        trace!(path = %rel, ?bindings, kind = ?event.kind, "matched change");
                        debouncer.record(event.path, rel, event.kind, bindings, Instant::now());
                    }
                    None => trace!(path = ?event.path, "ignoring change"),
                },
                None => {
                    dispatch(&router, &mut debouncer, &runtime_tx).await;
                    break;
                }
            },
        }
    }

    debug!("watch router finished");
}

/// Close the current window and submit its trigger. Returns false once the
/// runtime has gone away.
async fn dispatch(
    router: &WatchRouter,
    debouncer: &mut Debouncer,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) -> bool {
    let Some(batch) = debouncer.take_batch() else {
        return true;
    };
    let Some(trigger) = router.route(&batch) else {
        return true;
    };

    info!(
        batch_id = batch.batch_id,
        paths = batch.len(),
        goal = ?trigger.goal,
        "changes detected"
    );

    runtime_tx.send(RuntimeEvent::Triggered(trigger)).await.is_ok()
}
