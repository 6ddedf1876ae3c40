// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use stepwise_bus::{BusConfig, OutcomeCollector, StepEventBus, StepLogListener};
use stepwise_model::{FailureDetail, ResultState, Step};
use tracing_subscriber::filter::LevelFilter;

/// Sends bus logs to the test harness, so they are shown for failing tests.
pub(crate) fn init_logging() {
    // Another test may have installed the subscriber already.
    let _ = tracing_subscriber::fmt()
        .with_max_level(LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Builds a bus that logs every event and collects every outcome.
pub(crate) fn collecting_bus(config: BusConfig) -> (Arc<StepEventBus>, OutcomeCollector) {
    init_logging();
    let collector = OutcomeCollector::new();
    let mut builder = StepEventBus::builder();
    builder
        .set_config(config)
        .add_outcome_listener(collector.clone())
        .add_step_listener(StepLogListener::new());
    (Arc::new(builder.build()), collector)
}

/// A scripted step: either a leaf with a result, or a group of steps.
#[derive(Clone, Debug)]
pub(crate) enum Script {
    Pass(&'static str),
    Fail(&'static str),
    Group(&'static str, Vec<Script>),
}

/// Replays `script` as one test on the calling thread.
pub(crate) fn run_script(bus: &StepEventBus, method_name: &str, script: &[Script]) {
    bus.test_started_for(method_name, Some("integration::Scripted"))
        .expect("test started");
    for step in script {
        replay(bus, step);
    }
    bus.test_finished(None).expect("test finished");
}

fn replay(bus: &StepEventBus, script: &Script) {
    match script {
        Script::Pass(description) => {
            bus.step_started(description).expect("step started");
            bus.step_finished().expect("step finished");
        }
        Script::Fail(description) => {
            bus.step_started(description).expect("step started");
            bus.step_failed(FailureDetail::assertion(format!("{description} failed")))
                .expect("step failed");
        }
        Script::Group(description, children) => {
            bus.step_started(description).expect("group started");
            for child in children {
                replay(bus, child);
            }
            bus.step_finished().expect("group finished");
        }
    }
}

/// The parts of a step that do not depend on timing.
pub(crate) fn shape(step: &Step) -> (String, ResultState, Vec<(String, ResultState)>) {
    (
        step.description.clone(),
        step.result,
        step.children
            .iter()
            .map(|child| (child.description.clone(), child.result))
            .collect(),
    )
}
