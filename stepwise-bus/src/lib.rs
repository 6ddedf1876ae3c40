// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! A thread-aware event bus that folds test and step lifecycle events into
//! [`TestOutcome`](stepwise_model::TestOutcome)s.
//!
//! Test runners emit events such as "test started", "step started" and "step
//! failed" from the thread running each test. The [`StepEventBus`] routes each
//! event to the outcome of the test running on the calling thread, so many
//! tests can run in parallel on their own threads. When a test finishes, its
//! outcome is handed to every registered [`OutcomeListener`].
//!
//! Bus settings are read by [`BusConfig::from_sources`].

mod bus;
mod config;
pub mod errors;
mod listener;

pub use bus::*;
pub use crate::config::*;
pub use listener::*;
