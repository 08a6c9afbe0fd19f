// src/engine/runner.rs

//! One-shot task runner: resolve a goal, run it to completion, return the
//! result. Used by `assetdag build` and by library callers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::dag::{ExecutionPlan, Goal, Resolver, RunResult, TaskRegistry};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, Trigger};
use crate::errors::Result;
use crate::exec::{ExecutorBackend, RealExecutorBackend};
use crate::stage::StageEnv;
use crate::types::FailurePolicy;

#[derive(Debug, Clone)]
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    env: StageEnv,
}

impl TaskRunner {
    pub fn new(registry: Arc<TaskRegistry>, env: StageEnv) -> Self {
        Self { registry, env }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Resolve `goal` against the registry. Planning errors (unknown task,
    /// cycle) are returned before anything runs.
    pub fn plan(&self, goal: &Goal) -> Result<ExecutionPlan> {
        Resolver::new(&self.registry).plan(goal)
    }

    /// Run `goal` with the registered stages.
    pub async fn run(&self, goal: &Goal, policy: FailurePolicy) -> Result<RunResult> {
        let registry = Arc::clone(&self.registry);
        let env = self.env.clone();
        self.run_with(goal, policy, move |tx| RealExecutorBackend::new(registry, env, tx))
            .await
    }

    /// Run `goal` with the executor built by `make_executor`, which gets the
    /// sender its completions must go to.
    pub async fn run_with<E, F>(&self, goal: &Goal, policy: FailurePolicy, make_executor: F) -> Result<RunResult>
    where
        E: ExecutorBackend,
        F: FnOnce(mpsc::Sender<RuntimeEvent>) -> E,
    {
        let plan = self.plan(goal)?;
        if plan.is_empty() {
            return Ok(RunResult::default());
        }
        debug!(tasks = ?plan.order(), ?policy, "running plan");

        let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
        let executor = make_executor(tx.clone());

        let options = RuntimeOptions {
            exit_when_idle: true,
            failure_policy: policy,
        };
        let core = CoreRuntime::new(Arc::clone(&self.registry), options);

        tx.send(RuntimeEvent::PlanSubmitted {
            trigger: Trigger::full_build(goal.clone()),
            plan,
        })
        .await
        .map_err(crate::errors::Error::from)?;
        drop(tx);

        let reports = Runtime::new(core, rx, executor).run().await?;

        Ok(reports
            .into_iter()
            .next()
            .map(|report| report.result)
            .unwrap_or_default())
    }
}
