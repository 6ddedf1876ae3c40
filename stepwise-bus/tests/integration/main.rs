// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Integration tests for the step event bus.
//!
//! These drive the bus the way an instrumented test framework would: from one or
//! more threads, through the public API only, with listeners observing the
//! results.

mod concurrency;
mod config_file;
mod fixtures;
mod listeners;
mod scenarios;
