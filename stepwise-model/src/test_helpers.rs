// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test helpers for proptest support in model types.

use crate::{FailureDetail, ResultState, Step, Tag, TestOutcome};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use proptest::{collection::vec, option, prelude::*};

/// A start time used by tests that need a known timestamp.
pub(crate) fn fixed_start_time() -> DateTime<FixedOffset> {
    FixedOffset::east_opt(2 * 3600)
        .expect("valid offset")
        .with_ymd_and_hms(2024, 3, 1, 10, 30, 0)
        .single()
        .expect("unambiguous time")
}

/// Strategy for generating arbitrary `DateTime<FixedOffset>` values.
pub(crate) fn arb_datetime_fixed_offset() -> impl Strategy<Value = DateTime<FixedOffset>> {
    // Offsets are whole minutes, since RFC 3339 drops sub-minute offsets.
    (946684800i64..4102444800i64, -720i32..720i32).prop_map(|(secs, offset_minutes)| {
        let offset = FixedOffset::east_opt(offset_minutes * 60).expect("offset within a day");
        Utc.timestamp_opt(secs, 0)
            .single()
            .expect("valid timestamp")
            .with_timezone(&offset)
    })
}

/// Strategy for generating leaf steps.
pub(crate) fn arb_leaf_step() -> impl Strategy<Value = Step> {
    (
        "[a-z][a-z ]{0,20}",
        any::<ResultState>(),
        0u64..100_000,
        option::of(any::<FailureDetail>()),
    )
        .prop_map(|(description, result, duration_ms, failure)| {
            let mut step = match failure {
                Some(failure) => Step::failed(description, failure),
                None => Step::with_result(description, result),
            };
            step.set_duration_ms(duration_ms);
            step
        })
}

/// Strategy for generating step trees up to three levels deep.
pub(crate) fn arb_step() -> impl Strategy<Value = Step> {
    arb_leaf_step().prop_recursive(3, 24, 4, |inner| {
        ("[a-z][a-z ]{0,20}", vec(inner, 1..4))
            .prop_map(|(description, children)| Step::group(description, children))
    })
}

/// Strategy for generating finished outcomes.
pub(crate) fn arb_outcome() -> impl Strategy<Value = TestOutcome> {
    (
        "[a-z][a-z_]{0,24}",
        option::of("[A-Z][a-z \n]{0,20}"),
        option::of(arb_datetime_fixed_offset()),
        vec(any::<Tag>(), 0..4),
        vec("[A-Z]{2,4}-[0-9]{1,3}", 0..3),
        vec(arb_step(), 0..4),
        option::of(any::<ResultState>()),
    )
        .prop_map(
            |(method_name, title, start_time, tags, issues, steps, annotated)| {
                let mut builder = TestOutcome::builder(method_name);
                if let Some(title) = title {
                    builder.set_title(title);
                }
                if let Some(start_time) = start_time {
                    builder.set_start_time(start_time);
                }
                for issue in issues {
                    builder.add_issue(issue);
                }
                builder.add_tags(tags).add_steps(steps);
                let mut outcome = builder.build();
                outcome.finished = true;
                outcome.annotated_result = annotated;
                outcome
            },
        )
}
