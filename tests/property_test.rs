//! Property tests over randomly generated step graphs.

use bidsflow::cohort::PairKey;
use bidsflow::config::FlowConfig;
use bidsflow::runner::{DependencyGraph, Orchestrator, PassOptions};
use bidsflow::sanity::{CompletionMarker, SanityContext};
use bidsflow::scheduler::{BackoffPolicy, InMemoryScheduler, SchedulerJobState};
use bidsflow::script::Invocation;
use bidsflow::state::{RunStateStore, SlotKey, WorkItemState};
use bidsflow::steps::StepCatalog;
use chrono::Utc;
use proptest::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;

/// Prerequisites per step; step `i` only depends on steps `< i`.
fn dag_strategy() -> impl Strategy<Value = Vec<Vec<usize>>> {
    (1usize..7).prop_flat_map(|n| {
        prop::collection::vec(prop::bool::ANY, n * n).prop_map(move |bits| {
            (0..n)
                .map(|i| (0..i).filter(|j| bits[i * n + j]).collect())
                .collect()
        })
    })
}

fn name(i: usize) -> String {
    format!("s{}", i)
}

fn config_yaml(dag: &[Vec<usize>]) -> String {
    let mut yaml = String::from("steps:\n");
    for (i, deps) in dag.iter().enumerate() {
        let deps: Vec<String> = deps.iter().map(|d| name(*d)).collect();
        yaml.push_str(&format!(
            "  {}:\n    command: run ${{output}}\n    depends_on: [{}]\n",
            name(i),
            deps.join(", ")
        ));
    }
    yaml
}

fn produce(ctx: &SanityContext<'_>, step: &str, pair: &PairKey) {
    let def = ctx.catalog.get(step).unwrap();
    let out = ctx.output_dir(def, pair).unwrap();
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("done"), "ok").unwrap();
    CompletionMarker {
        step: step.to_string(),
        version: def.version.clone(),
        subject: pair.subject.clone(),
        session: pair.session.clone(),
        job_id: None,
        attempt: None,
        finished_at: Utc::now(),
    }
    .write(&ctx.layout.marker(pair, step))
    .unwrap();
}

/// Drive passes until nothing is in flight; `outcome` decides each job.
fn drive(
    dag: &[Vec<usize>],
    pairs: &[PairKey],
    mut outcome: impl FnMut(&PairKey, &str) -> bool,
    mut on_pass: impl FnMut(&RunStateStore, &bidsflow::runner::PassReport, &StepCatalog),
) -> (TempDir, BTreeMap<SlotKey, WorkItemState>) {
    let temp = TempDir::new().unwrap();
    let mut config: FlowConfig = serde_yaml::from_str(&config_yaml(dag)).unwrap();
    config.paths.input_dir = temp.path().join("bids");
    config.paths.derivatives = temp.path().join("derivatives");
    let catalog = StepCatalog::from_config(&config).unwrap();
    let ctx = SanityContext::new(&catalog, &config.paths);
    let orch = Orchestrator::new(&config, &catalog);
    let mut store = RunStateStore::open(&config.paths.state_dir(), false).unwrap();
    let mut scheduler = InMemoryScheduler::new();
    let opts = PassOptions {
        backoff: Some(BackoffPolicy::immediate()),
        ..PassOptions::new(pairs.to_vec(), Invocation::new("bidsflow"))
    };

    for _ in 0..=dag.len() + 1 {
        let report = orch.run_pass(&mut store, &mut scheduler, &opts).unwrap();
        on_pass(&store, &report, &catalog);
        if report.settled() {
            break;
        }
        for s in &report.submitted {
            let pair = s.id.pair();
            if outcome(&pair, &s.id.step) {
                produce(&ctx, &s.id.step, &pair);
                scheduler.set_state(&s.job, SchedulerJobState::Succeeded);
            } else {
                scheduler.set_state(&s.job, SchedulerJobState::Failed { exit_code: Some(1) });
            }
        }
    }

    let states = store
        .current_items()
        .map(|i| (SlotKey::new(i.id.pair(), &i.id.step), i.state))
        .collect();
    (temp, states)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Topological order puts every prerequisite first.
    #[test]
    fn topological_order_respects_edges(dag in dag_strategy()) {
        let mut builder = DependencyGraph::builder();
        for (i, deps) in dag.iter().enumerate() {
            builder = builder.add_step(name(i), deps.iter().map(|d| name(*d)).collect());
        }
        let graph = builder.build().unwrap();
        let order = graph.topological_order().unwrap();
        prop_assert_eq!(order.len(), dag.len());
        let position: BTreeMap<&String, usize> = order.iter().enumerate().map(|(i, s)| (s, i)).collect();
        for (i, deps) in dag.iter().enumerate() {
            for d in deps {
                prop_assert!(position[&name(*d)] < position[&name(i)]);
            }
        }
        prop_assert!(graph.find_cycle().is_none());
    }

    /// Closing any path back on itself is rejected.
    #[test]
    fn back_edge_is_rejected(dag in dag_strategy()) {
        let last = dag.len() - 1;
        let mut builder = DependencyGraph::builder();
        for (i, deps) in dag.iter().enumerate() {
            let mut deps: Vec<String> = deps.iter().map(|d| name(*d)).collect();
            if i == 0 {
                deps.push(name(last));
            }
            if i == last && i != 0 && !deps.contains(&name(0)) {
                deps.push(name(0));
            }
            builder = builder.add_step(name(i), deps);
        }
        let rejected = builder
            .build()
            .and_then(|g| g.topological_order().map(|_| ()))
            .is_err();
        prop_assert!(rejected);
    }

    /// Submission happens only after every prerequisite of the same pair succeeded.
    #[test]
    fn submitted_only_after_prerequisites_succeed(
        dag in dag_strategy(),
        coin in prop::collection::vec(prop::bool::weighted(0.8), 64),
    ) {
        let pairs = [PairKey::new("01", "01"), PairKey::new("02", "01")];
        let mut toss = coin.into_iter().cycle();
        let mut violations = Vec::new();
        drive(
            &dag,
            &pairs,
            |_, _| toss.next().unwrap_or(true),
            |store, report, catalog| {
                for s in &report.submitted {
                    for p in catalog.prerequisites(&s.id.step) {
                        let slot = SlotKey::new(s.id.pair(), p);
                        let state = store.current(&slot).map(|i| i.state);
                        if state != Some(WorkItemState::Succeeded) {
                            violations.push(format!("{} submitted while {} is {:?}", s.id, slot, state));
                        }
                    }
                }
            },
        );
        prop_assert!(violations.is_empty(), "{:?}", violations);
    }

    /// A failing pair never holds back a healthy one.
    #[test]
    fn failures_stay_within_their_pair(
        dag in dag_strategy(),
        coin in prop::collection::vec(prop::bool::ANY, 64),
    ) {
        let healthy = PairKey::new("01", "01");
        let flaky = PairKey::new("02", "01");
        let mut toss = coin.into_iter().cycle();
        let (_temp, states) = drive(
            &dag,
            &[healthy.clone(), flaky.clone()],
            |pair, _| pair == &healthy || toss.next().unwrap_or(false),
            |_, _, _| {},
        );
        for i in 0..dag.len() {
            prop_assert_eq!(
                states.get(&SlotKey::new(healthy.clone(), &name(i))),
                Some(&WorkItemState::Succeeded)
            );
        }
        // in the flaky pair, anything not succeeded traces back to a failure
        for i in 0..dag.len() {
            let slot = SlotKey::new(flaky.clone(), &name(i));
            if states.get(&slot) == Some(&WorkItemState::Pending) {
                let blocked = dag[i].iter().any(|d| {
                    states.get(&SlotKey::new(flaky.clone(), &name(*d))) != Some(&WorkItemState::Succeeded)
                });
                prop_assert!(blocked, "{} pending with all prerequisites succeeded", slot);
            }
        }
    }
}
