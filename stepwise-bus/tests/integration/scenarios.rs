// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Script, collecting_bus, run_script, shape};
use pretty_assertions::assert_eq;
use stepwise_bus::{BusConfig, ThreadState};
use stepwise_model::{ResultState, StepCounts, TestOutcome};

#[test]
fn one_passing_step() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    run_script(&bus, "m1", &[Script::Pass("s1")]);

    let outcomes = collector.outcomes_for_current_thread();
    assert_eq!(outcomes.len(), 1);
    let outcome = &outcomes[0];
    assert_eq!(outcome.method_name(), "m1");
    assert_eq!(outcome.title(), "M1");
    assert_eq!(outcome.test_case(), Some("integration::Scripted"));
    assert_eq!(outcome.step_count(), 1);
    assert_eq!(outcome.result(), ResultState::Success);
    assert_eq!(bus.current_state(), ThreadState::Idle);
}

#[test]
fn failed_step_skips_the_next_one() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    run_script(
        &bus,
        "m1",
        &[Script::Fail("s1"), Script::Pass("s2"), Script::Pass("s3")],
    );

    let outcome = &collector.outcomes_for_current_thread()[0];
    let results: Vec<_> = outcome.steps().iter().map(|step| step.result).collect();
    assert_eq!(
        results,
        [
            ResultState::Failure,
            ResultState::Skipped,
            ResultState::Skipped
        ]
    );
    assert_eq!(outcome.result(), ResultState::Failure);
    assert_eq!(
        outcome.steps()[0]
            .failure
            .as_ref()
            .map(|failure| failure.message.as_str()),
        Some("s1 failed")
    );
    assert_eq!(
        outcome.counts(),
        StepCounts {
            total: 3,
            failure: 1,
            skipped: 2,
            ..StepCounts::default()
        }
    );
}

#[test]
fn nested_groups_roll_up() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    run_script(
        &bus,
        "checkout",
        &[
            Script::Group(
                "add items",
                vec![Script::Pass("add apples"), Script::Pass("add pears")],
            ),
            Script::Group(
                "pay",
                vec![Script::Pass("enter card"), Script::Fail("confirm")],
            ),
            Script::Pass("receipt"),
        ],
    );

    let outcome = &collector.outcomes_for_current_thread()[0];
    let shapes: Vec<_> = outcome.steps().iter().map(shape).collect();
    assert_eq!(
        shapes,
        [
            (
                "add items".to_owned(),
                ResultState::Success,
                vec![
                    ("add apples".to_owned(), ResultState::Success),
                    ("add pears".to_owned(), ResultState::Success),
                ]
            ),
            (
                "pay".to_owned(),
                ResultState::Failure,
                vec![
                    ("enter card".to_owned(), ResultState::Success),
                    ("confirm".to_owned(), ResultState::Failure),
                ]
            ),
            ("receipt".to_owned(), ResultState::Skipped, vec![]),
        ]
    );
    assert_eq!(outcome.step_count(), 3);
    // Leaf counts skip the groups themselves.
    assert_eq!(outcome.counts().total, 5);
    assert_eq!(outcome.result(), ResultState::Failure);
}

#[test]
fn outcome_survives_json_round_trip() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    run_script(
        &bus,
        "round_trip",
        &[
            Script::Group("setup", vec![Script::Pass("connect")]),
            Script::Fail("query"),
        ],
    );

    let outcome = &collector.outcomes_for_current_thread()[0];
    let json = outcome.to_json_string().expect("outcome serializes");
    let decoded = TestOutcome::from_json_str(&json).expect("outcome deserializes");

    assert_eq!(decoded.method_name(), outcome.method_name());
    assert_eq!(decoded.test_case(), outcome.test_case());
    assert_eq!(decoded.duration_ms(), outcome.duration_ms());
    assert_eq!(decoded.result(), outcome.result());
    assert_eq!(decoded.steps(), outcome.steps());
    assert!(decoded.is_finished());
}

#[test]
fn threads_can_run_tests_back_to_back() {
    let (bus, collector) = collecting_bus(BusConfig::default());
    for method_name in ["first", "second", "third"] {
        run_script(&bus, method_name, &[Script::Pass("only")]);
    }

    let names: Vec<_> = collector
        .outcomes_for_current_thread()
        .iter()
        .map(|outcome| outcome.method_name().to_owned())
        .collect();
    assert_eq!(names, ["first", "second", "third"]);
    assert_eq!(bus.in_flight(), 0);
}
