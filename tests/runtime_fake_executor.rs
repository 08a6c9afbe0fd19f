// tests/runtime_fake_executor.rs

use std::collections::{BTreeMap, HashMap};
use std::error::Error;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;

use assetdag::completion::{CompletionNotifier, ReloadSignal};
use assetdag::dag::{Goal, TaskRegistry};
use assetdag::engine::{
    CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions, ScopedTasks, TaskOutcome, Trigger,
    TriggerCause,
};
use assetdag::types::{ArtifactClass, FailurePolicy};
use assetdag_test_utils::builders::RegistryBuilder;
use assetdag_test_utils::fake_executor::{ControllableExecutor, FakeExecutor};
use assetdag_test_utils::fake_stage::new_log;
use assetdag_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

/// `style` and `copy` are independent; `views` needs `copy`.
fn site_registry() -> Arc<TaskRegistry> {
    RegistryBuilder::new(&new_log())
        .task("style", &[])
        .task("copy", &[])
        .task("views", &["copy"])
        .build()
}

fn watch_trigger(tasks: &[&str], batch_id: u64, scope: Option<ArtifactClass>) -> Trigger {
    let mut scopes = BTreeMap::new();
    if let Some(class) = scope {
        scopes.insert(
            class,
            ScopedTasks {
                tasks: tasks.iter().map(|s| s.to_string()).collect(),
                paths: [PathBuf::from("scss/main.scss")].into(),
            },
        );
    }
    Trigger {
        goal: Goal::parallel(tasks.iter().copied()),
        cause: TriggerCause::Watch { batch_id },
        scopes,
        inputs: HashMap::new(),
    }
}

#[tokio::test]
async fn full_build_runs_dependencies_first() -> TestResult {
    init_tracing();

    let registry = site_registry();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone());

    rt_tx
        .send(RuntimeEvent::Triggered(Trigger::full_build(Goal::parallel(["views"]))))
        .await?;

    let core = CoreRuntime::new(registry, RuntimeOptions::build());
    let reports = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    assert_eq!(*executed.lock().unwrap(), vec!["copy", "views"]);
    assert_eq!(reports.len(), 1);
    assert!(reports[0].result.is_success());
    Ok(())
}

#[tokio::test]
async fn fail_fast_skips_dependent_and_attempts_nothing_else() -> TestResult {
    init_tracing();

    let registry = RegistryBuilder::new(&new_log())
        .task("a", &[])
        .task("b", &["a"])
        .build();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone()).failing(["a"]);

    rt_tx
        .send(RuntimeEvent::Triggered(Trigger::full_build(Goal::all(&registry))))
        .await?;

    let core = CoreRuntime::new(registry, RuntimeOptions::build());
    let reports = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    let result = &reports[0].result;
    assert!(!result.is_success());
    assert!(result.failed.contains_key("a"));
    assert!(result.skipped.contains("b"));
    assert_eq!(result.first_failure.as_ref().map(|f| f.task.as_str()), Some("a"));
    assert_eq!(*executed.lock().unwrap(), vec!["a"]);
    Ok(())
}

#[tokio::test]
async fn fail_fast_lets_running_task_finish_and_dispatches_nothing_else() -> TestResult {
    init_tracing();

    // Two chains: a -> b and c -> d.
    let registry = RegistryBuilder::new(&new_log())
        .task("a", &[])
        .task("b", &["a"])
        .task("c", &[])
        .task("d", &["c"])
        .build();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, mut dispatched) = ControllableExecutor::new();

    rt_tx
        .send(RuntimeEvent::Triggered(Trigger::full_build(Goal::all(&registry))))
        .await?;

    let core = CoreRuntime::new(registry, RuntimeOptions::build());
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    let mut wave = vec![
        with_timeout(dispatched.recv()).await.unwrap(),
        with_timeout(dispatched.recv()).await.unwrap(),
    ];
    wave.sort_by(|x, y| x.name.cmp(&y.name));
    assert_eq!(wave[0].name, "a");
    assert_eq!(wave[1].name, "c");

    // `a` fails while `c` is still running.
    rt_tx
        .send(RuntimeEvent::TaskCompleted {
            run_id: wave[0].run_id,
            task: "a".into(),
            outcome: TaskOutcome::Failed("a rejected".into()),
        })
        .await?;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(dispatched.try_recv().is_err(), "nothing may start after the failure");
    assert!(!runtime.is_finished(), "run must wait for the running task");

    rt_tx
        .send(RuntimeEvent::TaskCompleted {
            run_id: wave[1].run_id,
            task: "c".into(),
            outcome: TaskOutcome::Success,
        })
        .await?;

    let reports = with_timeout(runtime).await??;
    let result = &reports[0].result;
    assert!(result.failed.contains_key("a"));
    assert!(result.succeeded.contains("c"));
    assert!(result.skipped.contains("b"));
    assert!(result.skipped.contains("d"));
    assert_eq!(result.first_failure.as_ref().map(|f| f.task.as_str()), Some("a"));
    assert!(dispatched.try_recv().is_err(), "d must never be dispatched");
    Ok(())
}

#[tokio::test]
async fn continue_on_failure_keeps_unrelated_branches_running() -> TestResult {
    init_tracing();

    let registry = site_registry();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let executed = Arc::new(Mutex::new(Vec::new()));
    let executor = FakeExecutor::new(rt_tx.clone(), executed.clone()).failing(["copy"]);

    rt_tx
        .send(RuntimeEvent::Triggered(Trigger::full_build(Goal::all(&registry))))
        .await?;

    let options = RuntimeOptions {
        exit_when_idle: true,
        failure_policy: FailurePolicy::ContinueOnFailure,
    };
    let core = CoreRuntime::new(registry, options);
    let reports = with_timeout(Runtime::new(core, rt_rx, executor).run()).await?;

    let result = &reports[0].result;
    assert!(result.succeeded.contains("style"));
    assert!(result.failed.contains_key("copy"));
    assert!(result.skipped.contains("views"));
    Ok(())
}

#[tokio::test]
async fn independent_tasks_succeed_whatever_the_completion_order() -> TestResult {
    init_tracing();

    for reverse in [false, true] {
        let registry = site_registry();
        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
        let (executor, mut dispatched) = ControllableExecutor::new();

        rt_tx
            .send(RuntimeEvent::Triggered(Trigger::full_build(Goal::parallel(["style", "copy"]))))
            .await?;

        let core = CoreRuntime::new(registry, RuntimeOptions::build());
        let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

        let mut wave = vec![
            with_timeout(dispatched.recv()).await.unwrap(),
            with_timeout(dispatched.recv()).await.unwrap(),
        ];
        if reverse {
            wave.reverse();
        }
        for task in wave {
            rt_tx
                .send(RuntimeEvent::TaskCompleted {
                    run_id: task.run_id,
                    task: task.name,
                    outcome: TaskOutcome::Success,
                })
                .await?;
        }

        let reports = with_timeout(runtime).await??;
        let result = &reports[0].result;
        assert_eq!(result.succeeded.len(), 2);
        assert!(result.is_success());
    }
    Ok(())
}

#[tokio::test]
async fn change_during_run_queues_exactly_one_rerun_after_it_settles() -> TestResult {
    init_tracing();

    let registry = site_registry();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, mut dispatched) = ControllableExecutor::new();
    let executed = Arc::new(Mutex::new(Vec::<(u64, String)>::new()));

    let options = RuntimeOptions {
        exit_when_idle: true,
        failure_policy: FailurePolicy::ContinueOnFailure,
    };
    let core = CoreRuntime::new(registry, options);
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    rt_tx
        .send(RuntimeEvent::Triggered(watch_trigger(&["style"], 1, None)))
        .await?;
    let first = with_timeout(dispatched.recv()).await.unwrap();
    executed.lock().unwrap().push((first.run_id, first.name.clone()));

    // Two more changes arrive while `style` is still running.
    rt_tx
        .send(RuntimeEvent::Triggered(watch_trigger(&["style"], 2, None)))
        .await?;
    rt_tx
        .send(RuntimeEvent::Triggered(watch_trigger(&["style"], 3, None)))
        .await?;

    // Nothing new may be dispatched until the first run settles.
    tokio::task::yield_now().await;
    assert!(dispatched.try_recv().is_err());

    rt_tx
        .send(RuntimeEvent::TaskCompleted {
            run_id: first.run_id,
            task: first.name.clone(),
            outcome: TaskOutcome::Success,
        })
        .await?;

    let second = with_timeout(dispatched.recv()).await.unwrap();
    executed.lock().unwrap().push((second.run_id, second.name.clone()));
    assert_eq!(second.name, "style");
    assert_ne!(second.run_id, first.run_id);

    rt_tx
        .send(RuntimeEvent::TaskCompleted {
            run_id: second.run_id,
            task: second.name.clone(),
            outcome: TaskOutcome::Success,
        })
        .await?;

    let reports = with_timeout(runtime).await??;
    assert_eq!(reports.len(), 2);
    assert_eq!(reports[1].trigger.batch_id(), Some(3));
    assert_eq!(executed.lock().unwrap().len(), 2);
    assert!(dispatched.try_recv().is_err());
    Ok(())
}

#[tokio::test]
async fn disjoint_runs_proceed_concurrently() -> TestResult {
    init_tracing();

    let registry = site_registry();
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
    let (executor, mut dispatched) = ControllableExecutor::new();

    let core = CoreRuntime::new(registry, RuntimeOptions::build());
    let runtime = tokio::spawn(Runtime::new(core, rt_rx, executor).run());

    rt_tx
        .send(RuntimeEvent::Triggered(watch_trigger(&["style"], 1, None)))
        .await?;
    rt_tx
        .send(RuntimeEvent::Triggered(watch_trigger(&["copy"], 2, None)))
        .await?;

    let a = with_timeout(dispatched.recv()).await.unwrap();
    let b = with_timeout(dispatched.recv()).await.unwrap();
    assert_ne!(a.run_id, b.run_id);

    for task in [b, a] {
        rt_tx
            .send(RuntimeEvent::TaskCompleted {
                run_id: task.run_id,
                task: task.name,
                outcome: TaskOutcome::Success,
            })
            .await?;
    }

    let reports = with_timeout(runtime).await??;
    assert_eq!(reports.len(), 2);
    Ok(())
}

#[tokio::test]
async fn style_run_emits_one_style_signal_and_failed_run_none() -> TestResult {
    init_tracing();

    for fail in [false, true] {
        let registry = site_registry();
        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(16);
        let executed = Arc::new(Mutex::new(Vec::new()));
        let mut executor = FakeExecutor::new(rt_tx.clone(), executed.clone());
        if fail {
            executor = executor.failing(["style"]);
        }
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<ReloadSignal>();

        rt_tx
            .send(RuntimeEvent::Triggered(watch_trigger(
                &["style"],
                1,
                Some(ArtifactClass::Style),
            )))
            .await?;

        let options = RuntimeOptions {
            exit_when_idle: true,
            failure_policy: FailurePolicy::ContinueOnFailure,
        };
        let core = CoreRuntime::new(registry, options);
        let runtime = Runtime::new(core, rt_rx, executor)
            .with_notifier(CompletionNotifier::new(Arc::new(signal_tx)));
        let reports = with_timeout(runtime.run()).await?;

        let result = &reports[0].result;
        if fail {
            assert!(result.failed.contains_key("style"));
            assert!(signal_rx.try_recv().is_err());
        } else {
            assert!(result.succeeded.contains("style"));
            let signal = signal_rx.try_recv()?;
            assert_eq!(signal.scope, ArtifactClass::Style);
            assert_eq!(signal.path.as_deref(), Some("scss/main.scss"));
            assert!(signal_rx.try_recv().is_err());
        }
    }
    Ok(())
}
