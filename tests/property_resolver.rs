// tests/property_resolver.rs

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use proptest::prelude::*;

use assetdag::dag::{Goal, Resolver, Scheduler, TaskRegistry};
use assetdag::engine::{TaskOutcome, TriggerCause};
use assetdag::types::FailurePolicy;
use assetdag_test_utils::builders::RegistryBuilder;
use assetdag_test_utils::fake_stage::new_log;

// Acyclic by construction: task N may only depend on tasks 0..N-1.
fn dag_strategy(max_tasks: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..num_tasks),
            num_tasks,
        )
        .prop_map(|raw| {
            raw.into_iter()
                .enumerate()
                .map(|(i, deps)| {
                    let mut valid: Vec<usize> = if i == 0 {
                        vec![]
                    } else {
                        deps.into_iter().map(|d| d % i).collect()
                    };
                    valid.sort_unstable();
                    valid.dedup();
                    valid
                })
                .collect()
        })
    })
}

fn registry(deps: &[Vec<usize>], reversed: bool) -> Arc<TaskRegistry> {
    let names: Vec<String> = (0..deps.len()).map(|i| format!("task_{i}")).collect();
    let log = new_log();
    let mut builder = RegistryBuilder::new(&log);

    let mut indices: Vec<usize> = (0..deps.len()).collect();
    if reversed {
        indices.reverse();
    }
    for i in indices {
        let dep_names: Vec<&str> = deps[i].iter().map(|&d| names[d].as_str()).collect();
        builder = builder.task(&names[i], &dep_names);
    }
    builder.build()
}

fn transitive_deps(deps: &[Vec<usize>], i: usize, out: &mut HashSet<usize>) {
    for &d in &deps[i] {
        if out.insert(d) {
            transitive_deps(deps, d, out);
        }
    }
}

proptest! {
    #[test]
    fn plan_orders_every_task_after_its_transitive_dependencies(
        deps in dag_strategy(12),
        reversed in any::<bool>(),
        goal_picks in proptest::collection::vec(any::<usize>(), 1..4),
    ) {
        let registry = registry(&deps, reversed);
        let goal_tasks: Vec<String> = goal_picks
            .iter()
            .map(|p| format!("task_{}", p % deps.len()))
            .collect();

        let plan = Resolver::new(&registry).plan(&Goal::parallel(goal_tasks.clone())).unwrap();
        let position: HashMap<&str, usize> = plan
            .order()
            .into_iter()
            .enumerate()
            .map(|(i, n)| (n, i))
            .collect();

        // Exactly the goal's dependency closure is planned.
        let mut closure = HashSet::new();
        for g in &goal_picks {
            let i = g % deps.len();
            closure.insert(i);
            transitive_deps(&deps, i, &mut closure);
        }
        prop_assert_eq!(plan.len(), closure.len());

        for &i in &closure {
            let name = format!("task_{i}");
            let mut all = HashSet::new();
            transitive_deps(&deps, i, &mut all);
            for d in all {
                let dep = format!("task_{d}");
                prop_assert!(position[dep.as_str()] < position[name.as_str()]);
            }
        }

        // Same input, same plan.
        let again = Resolver::new(&registry).plan(&Goal::parallel(goal_tasks)).unwrap();
        prop_assert_eq!(plan, again);
    }

    #[test]
    fn scheduler_always_terminates_and_accounts_for_every_task(
        deps in dag_strategy(10),
        failing in proptest::collection::vec(any::<usize>(), 0..4),
        fail_fast in any::<bool>(),
    ) {
        let registry = registry(&deps, false);
        let plan = Resolver::new(&registry).plan(&Goal::all(&registry)).unwrap();
        let total = plan.len();
        let failing: HashSet<String> = failing
            .iter()
            .map(|f| format!("task_{}", f % deps.len()))
            .collect();
        let policy = if fail_fast {
            FailurePolicy::FailFast
        } else {
            FailurePolicy::ContinueOnFailure
        };

        let mut scheduler = Scheduler::new(1, plan, policy, TriggerCause::FullBuild, HashMap::new());
        let mut executing: Vec<String> = scheduler
            .start()
            .newly_scheduled
            .into_iter()
            .map(|t| t.name)
            .collect();

        let mut steps = 0;
        while let Some(task) = executing.pop() {
            steps += 1;
            prop_assert!(steps <= total, "a task was dispatched twice");
            let outcome = if failing.contains(&task) {
                TaskOutcome::Failed("boom".into())
            } else {
                TaskOutcome::Success
            };
            let step = scheduler.step_completion(&task, outcome);
            executing.extend(step.newly_scheduled.into_iter().map(|t| t.name));
        }

        prop_assert!(scheduler.is_finished());
        let result = scheduler.result();
        prop_assert_eq!(
            result.succeeded.len() + result.failed.len() + result.skipped.len(),
            total
        );
        prop_assert_eq!(result.failed.is_empty(), result.first_failure.is_none());
        for task in result.failed.keys() {
            prop_assert!(failing.contains(task));
        }
    }
}
