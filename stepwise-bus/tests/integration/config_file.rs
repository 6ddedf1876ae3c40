// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::{Script, collecting_bus, run_script};
use camino_tempfile::tempdir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use stepwise_bus::{BusConfig, DefaultConfigWarnings};
use stepwise_model::ResultState;

#[test]
fn config_file_changes_bus_behavior() {
    let dir = tempdir().expect("tempdir created");
    let config_path = dir.path().join("custom.toml");
    std::fs::write(
        &config_path,
        indoc! {r#"
            [bus]
            fail-fast = false
            unfinished-step-result = "IGNORED"
        "#},
    )
    .expect("config written");

    let config = BusConfig::from_sources(
        dir.path(),
        Some(config_path.as_path()),
        &mut DefaultConfigWarnings,
    )
    .expect("config is valid");
    assert!(!config.fail_fast());
    assert_eq!(config.unfinished_step_result(), ResultState::Ignored);
    assert!(config.live_step_events());

    let (bus, collector) = collecting_bus(config);
    run_script(&bus, "no_fail_fast", &[Script::Fail("a"), Script::Pass("b")]);
    bus.test_started("left_open").expect("test started");
    bus.step_started("never finished").expect("step started");
    bus.test_finished(None).expect("test finished");

    let outcomes = collector.outcomes_for_current_thread();
    let results: Vec<_> = outcomes[0].steps().iter().map(|step| step.result).collect();
    assert_eq!(results, [ResultState::Failure, ResultState::Success]);
    assert_eq!(outcomes[1].steps()[0].result, ResultState::Ignored);
}
