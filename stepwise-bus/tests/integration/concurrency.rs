// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Script, collecting_bus, run_script, shape};
use pretty_assertions::assert_eq;
use std::{
    collections::HashMap,
    sync::{Arc, Barrier},
    thread,
};
use stepwise_bus::BusConfig;
use stepwise_model::ResultState;

const THREADS: usize = 10;
const TESTS_PER_THREAD: usize = 3;

// Each thread runs a different mix so that cross-talk would show up as wrong
// step counts or results.
fn script_for(thread_index: usize, test_index: usize) -> Vec<Script> {
    let mut script: Vec<_> = (0..=test_index).map(|_| Script::Pass("step")).collect();
    if thread_index % 2 == 1 {
        script.push(Script::Group(
            "checks",
            vec![Script::Pass("check a"), Script::Fail("check b")],
        ));
    }
    script.push(Script::Pass("teardown"));
    script
}

// (top-level steps, leaf steps)
fn expected_step_counts(thread_index: usize, test_index: usize) -> (usize, usize) {
    let (groups, grouped_leaves) = if thread_index % 2 == 1 { (1, 2) } else { (0, 0) };
    let plain = test_index + 1 + 1;
    (plain + groups, plain + grouped_leaves)
}

#[test]
fn threads_do_not_interfere() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|thread_index| {
            let bus = Arc::clone(&bus);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for test_index in 0..TESTS_PER_THREAD {
                    let method_name = format!("t{thread_index}_{test_index}");
                    run_script(&bus, &method_name, &script_for(thread_index, test_index));
                }
                (thread_index, thread::current().id())
            })
        })
        .collect();
    let thread_ids: HashMap<_, _> = handles
        .into_iter()
        .map(|handle| handle.join().expect("test thread panicked"))
        .collect();

    assert_eq!(collector.len(), THREADS * TESTS_PER_THREAD);
    assert_eq!(bus.in_flight(), 0);
    for (thread_index, thread_id) in thread_ids {
        let outcomes = collector.outcomes_for(thread_id);
        assert_eq!(outcomes.len(), TESTS_PER_THREAD, "thread {thread_index}");
        for (test_index, outcome) in outcomes.iter().enumerate() {
            assert_eq!(
                outcome.method_name(),
                format!("t{thread_index}_{test_index}")
            );
            assert_eq!(
                (outcome.step_count(), outcome.counts().total),
                expected_step_counts(thread_index, test_index),
                "{}",
                outcome.method_name()
            );
            let expected_result = if thread_index % 2 == 1 {
                ResultState::Failure
            } else {
                ResultState::Success
            };
            assert_eq!(outcome.result(), expected_result, "{}", outcome.method_name());
        }
    }
}

#[test]
fn concurrent_run_matches_sequential_run() {
    let (sequential_bus, sequential) = collecting_bus(BusConfig::default());
    for thread_index in 0..THREADS {
        for test_index in 0..TESTS_PER_THREAD {
            let method_name = format!("t{thread_index}_{test_index}");
            run_script(
                &sequential_bus,
                &method_name,
                &script_for(thread_index, test_index),
            );
        }
    }

    let (concurrent_bus, concurrent) = collecting_bus(BusConfig::default());
    thread::scope(|scope| {
        for thread_index in 0..THREADS {
            let bus = &concurrent_bus;
            scope.spawn(move || {
                for test_index in 0..TESTS_PER_THREAD {
                    let method_name = format!("t{thread_index}_{test_index}");
                    run_script(bus, &method_name, &script_for(thread_index, test_index));
                }
            });
        }
    });

    let by_name = |collector: &stepwise_bus::OutcomeCollector| {
        let mut shapes: Vec<_> = collector
            .all_outcomes()
            .into_values()
            .flatten()
            .map(|outcome| {
                let steps: Vec<_> = outcome.steps().iter().map(shape).collect();
                (outcome.method_name().to_owned(), outcome.result(), steps)
            })
            .collect();
        shapes.sort_by(|a, b| a.0.cmp(&b.0));
        shapes
    };
    assert_eq!(by_name(&concurrent), by_name(&sequential));
}
