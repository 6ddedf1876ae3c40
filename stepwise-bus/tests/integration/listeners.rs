// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Script, init_logging, run_script};
use camino_tempfile::tempdir;
use pretty_assertions::assert_eq;
use std::{sync::Arc, thread};
use stepwise_bus::{
    BusConfig, ChannelListener, JsonLinesListener, ListenerResult, StepEvent, StepEventBus,
    StepEventKind,
    errors::{BusError, ListenerKind},
};
use stepwise_model::{ResultState, TestOutcome};

#[test]
fn channel_listener_delivers_outcomes_to_another_thread() {
    init_logging();
    let (listener, mut receiver) = ChannelListener::new();
    let mut builder = StepEventBus::builder();
    builder.add_outcome_listener(listener);
    let bus = builder.build();

    let consumer = thread::spawn(move || {
        let mut received = Vec::new();
        // Ends once the bus, and with it the sender, is dropped.
        while let Some(outcome) = receiver.blocking_recv() {
            received.push((outcome.method_name().to_owned(), outcome.result()));
        }
        received
    });

    run_script(&bus, "sent_one", &[Script::Pass("a")]);
    run_script(&bus, "sent_two", &[Script::Fail("b")]);
    drop(bus);

    let received = consumer.join().expect("consumer thread panicked");
    assert_eq!(
        received,
        [
            ("sent_one".to_owned(), ResultState::Success),
            ("sent_two".to_owned(), ResultState::Failure),
        ]
    );
}

#[test]
fn json_lines_listener_records_every_thread() {
    init_logging();
    let dir = tempdir().expect("tempdir created");
    let path = dir.path().join("outcomes.jsonl");
    let mut builder = StepEventBus::builder();
    builder.add_outcome_listener(JsonLinesListener::create(&path).expect("file created"));
    let bus = Arc::new(builder.build());

    thread::scope(|scope| {
        for index in 0..4 {
            let bus = &bus;
            scope.spawn(move || {
                run_script(bus, &format!("writer_{index}"), &[Script::Pass("write")]);
            });
        }
    });

    let contents = std::fs::read_to_string(&path).expect("outcomes file read");
    let mut names: Vec<_> = contents
        .lines()
        .map(|line| {
            let outcome = TestOutcome::from_json_str(line).expect("each line is an outcome");
            assert_eq!(outcome.result(), ResultState::Success);
            outcome.method_name().to_owned()
        })
        .collect();
    names.sort();
    assert_eq!(names, ["writer_0", "writer_1", "writer_2", "writer_3"]);
}

#[test]
fn failing_step_listener_is_reported_but_does_not_lose_the_step() {
    init_logging();
    let mut config = BusConfig::default();
    config.set_fail_fast(false);
    let mut builder = StepEventBus::builder();
    builder
        .set_config(config)
        .add_step_listener(|event: &StepEvent| -> ListenerResult {
            match &event.kind {
                StepEventKind::StepFinished { step, .. }
                    if step.description == "flaky" =>
                {
                    Err("listener rejected step".into())
                }
                _ => Ok(()),
            }
        });
    let bus = builder.build();

    bus.test_started("listener_fails").expect("test started");
    bus.step_started("flaky").expect("step started");
    let error = bus.step_finished().expect_err("listener failure is reported");
    let BusError::Listeners(errors) = error else {
        panic!("expected listener errors, found {error:?}");
    };
    assert!(errors.outcome().is_none(), "no outcome for a step event");
    assert_eq!(errors.failures()[0].kind(), ListenerKind::Step);

    bus.step_started("steady").expect("step started");
    bus.step_finished().expect("step finished");
    let outcome = bus.test_finished(None).expect("test finished");
    let descriptions: Vec<_> = outcome
        .steps()
        .iter()
        .map(|step| step.description.as_str())
        .collect();
    assert_eq!(descriptions, ["flaky", "steady"]);
    assert_eq!(outcome.result(), ResultState::Success);
}
