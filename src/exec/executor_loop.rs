// src/exec/executor_loop.rs

//! Main executor loop that manages running task executions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dag::{ScheduledTask, TaskRegistry};
use crate::engine::{RuntimeEvent, TaskName};
use crate::exec::task_runner::run_task;
use crate::stage::StageEnv;

/// Spawn the background executor loop.
///
/// The returned `mpsc::Sender<ScheduledTask>` is what `RealExecutorBackend`
/// uses to dispatch work. Each scheduled task is executed in its own Tokio
/// task, and **per task name there is never more than one execution at the
/// same time**: if a task is dispatched while a previous execution of the
/// same task is still running, the new one waits for it to finish.
pub fn spawn_executor(
    registry: Arc<TaskRegistry>,
    env: StageEnv,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> mpsc::Sender<ScheduledTask> {
    let (tx, mut rx) = mpsc::channel::<ScheduledTask>(64);

    tokio::spawn(async move {
        info!("executor loop started");

        // At most one live handle per task name.
        let mut active: HashMap<TaskName, JoinHandle<()>> = HashMap::new();

        while let Some(task) = rx.recv().await {
            active.retain(|_, handle| !handle.is_finished());
            handle_scheduled_task(task, &mut active, &registry, &env, &runtime_tx);
        }

        info!("executor loop finished (channel closed)");
    });

    tx
}

/// Handle a newly scheduled task.
fn handle_scheduled_task(
    task: ScheduledTask,
    active: &mut HashMap<TaskName, JoinHandle<()>>,
    registry: &Arc<TaskRegistry>,
    env: &StageEnv,
    runtime_tx: &mpsc::Sender<RuntimeEvent>,
) {
    let name = task.name.clone();
    let previous = active.remove(&name);

    if previous.is_some() {
        debug!(
            task = %name,
            run_id = task.run_id,
            "previous execution still running; queueing behind it"
        );
    }

    let registry = Arc::clone(registry);
    let env = env.clone();
    let rt_tx = runtime_tx.clone();
    let spawn_name = name.clone();

    let handle = tokio::spawn(async move {
        if let Some(previous) = previous {
            if let Err(err) = previous.await {
                warn!(task = %spawn_name, error = %err, "previous execution of task ended abnormally");
            }
        }
        run_task(task, registry, env, rt_tx).await;
        debug!(task = %spawn_name, "task runner future finished");
    });

    active.insert(name, handle);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::dag::TaskOptions;
    use crate::engine::TaskOutcome;
    use crate::stage::{FnStage, StageContext};

    #[tokio::test]
    async fn panicked_execution_does_not_block_the_next_one() {
        let calls = Arc::new(AtomicUsize::new(0));
        let stage_calls = Arc::clone(&calls);
        let stage = FnStage::new("flaky", move |_ctx: StageContext| {
            let call = stage_calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if call == 0 {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    panic!("stage blew up");
                }
                Ok::<(), anyhow::Error>(())
            }
        });

        let mut registry = TaskRegistry::new();
        registry
            .register("style", vec![Arc::new(stage)], TaskOptions::default())
            .unwrap();

        let (rt_tx, mut rt_rx) = mpsc::channel(8);
        let exec_tx = spawn_executor(
            Arc::new(registry),
            StageEnv::new("/site", "/site/build"),
            rt_tx,
        );

        for run_id in [1, 2] {
            exec_tx
                .send(ScheduledTask {
                    name: "style".into(),
                    run_id,
                    inputs: None,
                })
                .await
                .unwrap();
        }

        let event = tokio::time::timeout(Duration::from_secs(5), rt_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            RuntimeEvent::TaskCompleted { run_id, task, outcome } => {
                assert_eq!(run_id, 2);
                assert_eq!(task, "style");
                assert_eq!(outcome, TaskOutcome::Success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
