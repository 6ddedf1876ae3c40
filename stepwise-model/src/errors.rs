// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while recording, encoding and decoding test outcomes.

use crate::{ResultState, StepHandle};
use thiserror::Error;

/// Step start and finish events did not nest properly.
///
/// This is a programming error in the code driving the step tree: it is not
/// recoverable locally and is propagated to the caller.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[non_exhaustive]
pub enum ProtocolViolation {
    /// A step was finished while no step was open.
    #[error("step {handle} finished, but no step is open")]
    NoOpenStep {
        /// The handle passed in.
        handle: StepHandle,
    },

    /// The innermost open step was requested while no step was open.
    #[error("the current step finished, but no step is open")]
    NoCurrentStep,

    /// A step other than the innermost open step was finished.
    #[error("step {found} finished, but the innermost open step is {expected}")]
    MismatchedStep {
        /// The innermost open step.
        expected: StepHandle,
        /// The handle passed in.
        found: StepHandle,
    },
}

/// A mutation was attempted on a test outcome that has already finished.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("test outcome for `{method_name}` has finished and can no longer be modified")]
pub struct ImmutableRecordError {
    method_name: String,
}

impl ImmutableRecordError {
    pub(crate) fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
        }
    }

    /// Returns the method name of the finished outcome.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }
}

/// A JSON document could not be decoded into a test outcome.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MalformedDocument {
    /// The input was not valid JSON.
    #[error("test outcome document is not valid JSON")]
    Json(#[source] serde_json::Error),

    /// The document is not a JSON object.
    #[error("test outcome document must be a JSON object, found {found}")]
    NotAnObject {
        /// A description of what was found instead.
        found: &'static str,
    },

    /// A required field is absent.
    #[error("test outcome document is missing required field `{field}`")]
    MissingField {
        /// The name of the field.
        field: &'static str,
    },

    /// A field is present but has the wrong shape.
    #[error("test outcome document has an invalid `{field}` field: {reason}")]
    InvalidField {
        /// The name of the field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A structured field could not be deserialized.
    #[error("test outcome document has an invalid `{field}` field")]
    InvalidStructure {
        /// The name of the field.
        field: &'static str,
        /// The underlying error.
        #[source]
        error: serde_json::Error,
    },
}

/// An error that occurs while writing a test outcome document.
///
/// Returned by [`TestOutcome::serialize`](crate::TestOutcome::serialize) and
/// [`TestOutcome::to_json_string`](crate::TestOutcome::to_json_string).
#[derive(Debug, Error)]
#[error("error serializing test outcome")]
pub struct SerializeError {
    #[from]
    inner: serde_json::Error,
}

/// Error returned while parsing a [`ResultState`] from a string.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error(
    "unrecognized result: {input}\n(known values: {})",
    ResultState::variants().join(", "),
)]
pub struct ResultStateParseError {
    input: String,
}

impl ResultStateParseError {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }
}
