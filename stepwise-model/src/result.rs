// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The result lattice used to roll child results up into parent results.

use crate::errors::ResultStateParseError;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, fmt, str::FromStr};

/// The result of a step, a step group or a whole test.
///
/// Results are totally ordered from best to worst:
///
/// `UNDEFINED < SUCCESS < PENDING < IGNORED < SKIPPED < FAILURE < ERROR`
///
/// Merging picks the worst result. `UNDEFINED` is the identity of the merge, so
/// an empty set of results merges to `UNDEFINED`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum ResultState {
    /// No result has been determined yet.
    #[default]
    Undefined,

    /// The step or test passed.
    Success,

    /// The step or test has not been implemented yet.
    Pending,

    /// The step or test was deliberately not run.
    Ignored,

    /// The step or test was not run because an earlier step failed.
    Skipped,

    /// An expected failure, such as a failed assertion.
    Failure,

    /// An unexpected fault while running.
    Error,
}

impl ResultState {
    /// Returns the names of all result states, as used in serialized documents.
    pub fn variants() -> &'static [&'static str] {
        &[
            "UNDEFINED",
            "SUCCESS",
            "PENDING",
            "IGNORED",
            "SKIPPED",
            "FAILURE",
            "ERROR",
        ]
    }

    /// Returns the serialized name of this result.
    pub fn name(self) -> &'static str {
        match self {
            ResultState::Undefined => "UNDEFINED",
            ResultState::Success => "SUCCESS",
            ResultState::Pending => "PENDING",
            ResultState::Ignored => "IGNORED",
            ResultState::Skipped => "SKIPPED",
            ResultState::Failure => "FAILURE",
            ResultState::Error => "ERROR",
        }
    }

    /// Returns true for `FAILURE` and `ERROR`.
    pub fn is_failing(self) -> bool {
        matches!(self, ResultState::Failure | ResultState::Error)
    }

    /// Returns the worse of the two results.
    pub fn merge_with(self, other: ResultState) -> ResultState {
        self.max(other)
    }

    fn severity(self) -> u8 {
        match self {
            ResultState::Undefined => 0,
            ResultState::Success => 1,
            ResultState::Pending => 2,
            ResultState::Ignored => 3,
            ResultState::Skipped => 4,
            ResultState::Failure => 5,
            ResultState::Error => 6,
        }
    }
}

impl Ord for ResultState {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl PartialOrd for ResultState {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ResultState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResultState {
    type Err = ResultStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let state = match s.to_ascii_uppercase().as_str() {
            "UNDEFINED" => ResultState::Undefined,
            "SUCCESS" => ResultState::Success,
            "PENDING" => ResultState::Pending,
            "IGNORED" => ResultState::Ignored,
            "SKIPPED" => ResultState::Skipped,
            "FAILURE" => ResultState::Failure,
            "ERROR" => ResultState::Error,
            _ => return Err(ResultStateParseError::new(s)),
        };
        Ok(state)
    }
}

/// Merges a sequence of results, returning the worst one.
///
/// Returns [`ResultState::Undefined`] for an empty sequence.
pub fn merge(results: impl IntoIterator<Item = ResultState>) -> ResultState {
    results
        .into_iter()
        .fold(ResultState::Undefined, ResultState::merge_with)
}
