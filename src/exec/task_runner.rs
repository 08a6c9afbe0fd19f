// src/exec/task_runner.rs

//! Individual task execution.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::dag::{ScheduledTask, Task, TaskRegistry};
use crate::engine::{RuntimeEvent, TaskOutcome};
use crate::stage::{StageContext, StageEnv};
use crate::types::CompositionMode;

/// Run all steps of a scheduled task and emit its `TaskCompleted` event.
///
/// A stage error never escapes: it becomes `TaskOutcome::Failed` carrying
/// the error chain as the cause.
pub async fn run_task(
    task: ScheduledTask,
    registry: Arc<TaskRegistry>,
    env: StageEnv,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) {
    let started = Instant::now();

    let outcome = match registry.get(&task.name) {
        Some(registered) => {
            let ctx = StageContext::new(task.name.clone(), env, task.inputs.clone());
            match run_steps(registered, ctx).await {
                Ok(()) => TaskOutcome::Success,
                Err(err) => TaskOutcome::Failed(format!("{err:#}")),
            }
        }
        None => TaskOutcome::Failed(format!("task '{}' is not registered", task.name)),
    };

    let elapsed_ms = started.elapsed().as_millis() as u64;
    match &outcome {
        TaskOutcome::Success => info!(
            task = %task.name,
            run_id = task.run_id,
            elapsed_ms,
            "task finished"
        ),
        TaskOutcome::Failed(cause) => error!(
            task = %task.name,
            run_id = task.run_id,
            elapsed_ms,
            cause = %cause,
            "task failed"
        ),
    }

    if runtime_tx
        .send(RuntimeEvent::TaskCompleted {
            run_id: task.run_id,
            task: task.name.clone(),
            outcome,
        })
        .await
        .is_err()
    {
        debug!(task = %task.name, "runtime gone; dropping completion");
    }
}

/// Run a task's steps according to its composition mode.
pub async fn run_steps(task: &Task, ctx: StageContext) -> Result<()> {
    match task.mode() {
        CompositionMode::Sequential => {
            for (idx, step) in task.steps().iter().enumerate() {
                debug!(task = %ctx.task, step = idx, stage = %step.describe(), "running step");
                step.invoke(&ctx).await?;
            }
            Ok(())
        }
        CompositionMode::Parallel => {
            let ctx = Arc::new(ctx);
            let mut set = JoinSet::new();
            for step in task.steps() {
                let step = Arc::clone(step);
                let ctx = Arc::clone(&ctx);
                set.spawn(async move { step.invoke(&ctx).await });
            }

            // Record the first failure but let the other steps finish.
            let mut first_error = None;
            while let Some(joined) = set.join_next().await {
                let result = joined.map_err(|e| anyhow!("stage panicked: {e}")).and_then(|r| r);
                if let Err(err) = result {
                    if first_error.is_none() {
                        first_error = Some(err);
                    } else {
                        debug!(task = %ctx.task, error = %err, "additional step failure");
                    }
                }
            }

            match first_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::dag::TaskOptions;
    use crate::stage::{FnStage, Stage};

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, label: &'static str, fail: bool) -> Arc<dyn Stage> {
        let log = Arc::clone(log);
        Arc::new(FnStage::new(label, move |_ctx: StageContext| {
            let log = Arc::clone(&log);
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                log.lock().unwrap().push(label);
                if fail {
                    Err(anyhow!("{label} broke"))
                } else {
                    Ok(())
                }
            }
        }))
    }

    fn registry(mode: CompositionMode, steps: Vec<Arc<dyn Stage>>) -> TaskRegistry {
        let mut reg = TaskRegistry::new();
        reg.register("style", steps, TaskOptions::default().with_mode(mode))
            .unwrap();
        reg
    }

    fn ctx() -> StageContext {
        StageContext::new("style", StageEnv::new("/site", "/site/build"), None)
    }

    #[tokio::test]
    async fn sequential_failure_aborts_later_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(
            CompositionMode::Sequential,
            vec![
                recorder(&log, "sass", false),
                recorder(&log, "postcss", true),
                recorder(&log, "minify", false),
            ],
        );

        let err = run_steps(reg.lookup("style").unwrap(), ctx()).await.unwrap_err();
        assert!(err.to_string().contains("postcss broke"));
        assert_eq!(*log.lock().unwrap(), vec!["sass", "postcss"]);
    }

    #[tokio::test]
    async fn parallel_failure_lets_other_steps_finish() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = registry(
            CompositionMode::Parallel,
            vec![
                recorder(&log, "images", true),
                recorder(&log, "webp", false),
                recorder(&log, "sprite", false),
            ],
        );

        let err = run_steps(reg.lookup("style").unwrap(), ctx()).await.unwrap_err();
        assert!(err.to_string().contains("images broke"));

        let mut ran = log.lock().unwrap().clone();
        ran.sort();
        assert_eq!(ran, vec!["images", "sprite", "webp"]);
    }

    #[tokio::test]
    async fn completion_event_carries_cause() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let reg = Arc::new(registry(
            CompositionMode::Sequential,
            vec![recorder(&log, "sass", true)],
        ));
        let (tx, mut rx) = mpsc::channel(4);

        let task = ScheduledTask {
            name: "style".into(),
            run_id: 3,
            inputs: None,
        };
        run_task(task, reg, StageEnv::new("/site", "/site/build"), tx).await;

        match rx.recv().await.unwrap() {
            RuntimeEvent::TaskCompleted { run_id, task, outcome } => {
                assert_eq!(run_id, 3);
                assert_eq!(task, "style");
                assert_eq!(outcome, TaskOutcome::Failed("sass broke".into()));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
