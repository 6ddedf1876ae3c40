// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Record, aggregate and persist the outcomes of test runs made of nested steps.
//!
//! The main types are:
//!
//! * [`ResultState`]: the result of a step or a test, with a worst-wins [`merge`].
//! * [`StepTree`]: the steps of a test as they execute, with a cursor for the
//!   currently open step.
//! * [`TestOutcome`]: everything recorded about one test method execution.
//!
//! Outcomes can be written to and read from a JSON document with
//! [`TestOutcome::to_json`] and [`TestOutcome::from_json`].

mod codec;
pub mod errors;
mod helpers;
mod outcome;
mod result;
mod step;
#[cfg(test)]
mod test_helpers;

pub use codec::{ESCAPED_NEW_LINE, escape, unescape};
pub use helpers::humanize;
pub use outcome::*;
pub use result::*;
pub use step::*;
