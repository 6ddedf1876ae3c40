// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by the step event bus.

use camino::{Utf8Path, Utf8PathBuf};
use config::ConfigError;
use std::{error::Error as StdError, fmt, sync::Arc, thread::ThreadId};
use stepwise_model::{
    TestOutcome,
    errors::{ImmutableRecordError, ProtocolViolation},
};
use thiserror::Error;

/// An error returned by a listener.
pub type ListenerError = Box<dyn StdError + Send + Sync>;

/// An error that occurred while handling a lifecycle event on the bus.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BusError {
    /// A test was started on a thread that is already running a test.
    #[error(
        "test `{method_name}` started on {thread_id:?}, \
         but test `{running}` is still running on that thread"
    )]
    NestedTest {
        /// The thread the event was emitted from.
        thread_id: ThreadId,
        /// The test that was being started.
        method_name: String,
        /// The test already running.
        running: String,
    },

    /// A test event was emitted from a thread that is not running a test.
    #[error("`{event}` called on {thread_id:?}, but no test is running on that thread")]
    NoTestRunning {
        /// The thread the event was emitted from.
        thread_id: ThreadId,
        /// The name of the event.
        event: &'static str,
    },

    /// Step events did not nest properly.
    #[error("step events on {thread_id:?} did not nest properly")]
    Protocol {
        /// The thread the event was emitted from.
        thread_id: ThreadId,
        /// The underlying violation.
        #[source]
        error: ProtocolViolation,
    },

    /// The outcome for the running test has already finished.
    #[error(transparent)]
    Immutable(#[from] ImmutableRecordError),

    /// One or more listeners returned an error.
    #[error(transparent)]
    Listeners(#[from] ListenerErrors),
}

/// The errors returned by listeners while handling one event.
///
/// Every listener is invoked even if an earlier one fails, so there may be
/// several failures.
#[derive(Debug)]
pub struct ListenerErrors {
    outcome: Option<Arc<TestOutcome>>,
    failures: Vec<ListenerFailure>,
}

impl ListenerErrors {
    pub(crate) fn new(outcome: Option<Arc<TestOutcome>>, failures: Vec<ListenerFailure>) -> Self {
        Self { outcome, failures }
    }

    /// Returns the finished outcome, if the failing event was the end of a test.
    ///
    /// The outcome is complete even though some listeners failed to process it.
    pub fn outcome(&self) -> Option<&Arc<TestOutcome>> {
        self.outcome.as_ref()
    }

    /// Returns the failures, in listener registration order.
    pub fn failures(&self) -> &[ListenerFailure] {
        &self.failures
    }
}

impl fmt::Display for ListenerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failures.as_slice() {
            [failure] => write!(f, "{failure}"),
            failures => {
                write!(f, "{} listeners failed:", failures.len())?;
                for failure in failures {
                    write!(f, "\n  - {failure}")?;
                }
                Ok(())
            }
        }
    }
}

impl StdError for ListenerErrors {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self.failures.as_slice() {
            [failure] => Some(failure),
            _ => None,
        }
    }
}

/// A single listener failure.
#[derive(Debug, Error)]
#[error("{kind} listener {index} failed: {error}")]
pub struct ListenerFailure {
    kind: ListenerKind,
    index: usize,
    #[source]
    error: ListenerError,
}

impl ListenerFailure {
    pub(crate) fn new(kind: ListenerKind, index: usize, error: ListenerError) -> Self {
        Self { kind, index, error }
    }

    /// Returns the kind of listener that failed.
    pub fn kind(&self) -> ListenerKind {
        self.kind
    }

    /// Returns the index of the listener, in registration order among listeners
    /// of the same kind.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the error returned by the listener.
    pub fn error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.error
    }
}

/// The kind of a listener.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListenerKind {
    /// An [`OutcomeListener`](crate::OutcomeListener).
    Outcome,

    /// A [`StepListener`](crate::StepListener).
    Step,
}

impl fmt::Display for ListenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerKind::Outcome => write!(f, "outcome"),
            ListenerKind::Step => write!(f, "step"),
        }
    }
}

/// An error that occurred while parsing the bus configuration.
#[derive(Debug, Error)]
#[error("failed to parse stepwise config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file for this error.
    pub fn config_file(&self) -> &Utf8Path {
        &self.config_file
    }

    /// Returns the kind of error.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of a [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// The configuration sources could not be read or merged.
    #[error(transparent)]
    BuildError(Box<ConfigError>),

    /// The merged configuration could not be deserialized.
    #[error(transparent)]
    DeserializeError(Box<serde_path_to_error::Error<ConfigError>>),
}
