// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Listeners notified by the bus, and the built-in listener implementations.
//!
//! Listeners come in two kinds:
//!
//! * [`OutcomeListener`]s receive every finished [`TestOutcome`].
//! * [`StepListener`]s receive [`StepEvent`]s as tests and steps start and
//!   finish.
//!
//! Both kinds are implemented for closures.

use crate::errors::ListenerError;
use camino::{Utf8Path, Utf8PathBuf};
use std::{
    collections::HashMap,
    fs::File,
    io::{BufWriter, Write},
    sync::{Arc, Mutex, PoisonError},
    thread::{self, ThreadId},
};
use stepwise_model::{ResultState, Step, StepHandle, TestOutcome};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::{debug, info, warn};

/// The result returned by a listener.
pub type ListenerResult = Result<(), ListenerError>;

/// A listener notified when a test finishes.
///
/// Called synchronously on the thread that ran the test, after the outcome has
/// been sealed.
pub trait OutcomeListener: Send + Sync {
    /// Called with the finished outcome of a test.
    fn on_test_finished(&self, outcome: &Arc<TestOutcome>) -> ListenerResult;
}

impl<F> OutcomeListener for F
where
    F: Fn(&Arc<TestOutcome>) -> ListenerResult + Send + Sync,
{
    fn on_test_finished(&self, outcome: &Arc<TestOutcome>) -> ListenerResult {
        self(outcome)
    }
}

/// A listener notified as tests and steps start and finish.
pub trait StepListener: Send + Sync {
    /// Called with each event.
    fn on_step_event(&self, event: &StepEvent) -> ListenerResult;
}

impl<F> StepListener for F
where
    F: Fn(&StepEvent) -> ListenerResult + Send + Sync,
{
    fn on_step_event(&self, event: &StepEvent) -> ListenerResult {
        self(event)
    }
}

/// A lifecycle event delivered to [`StepListener`]s.
#[derive(Clone, Debug)]
pub struct StepEvent {
    /// The thread the test runs on.
    pub thread_id: ThreadId,

    /// The name of the test method.
    pub method_name: String,

    /// The kind of event.
    pub kind: StepEventKind,
}

/// The kind of a [`StepEvent`].
#[derive(Clone, Debug)]
pub enum StepEventKind {
    /// A test started.
    TestStarted {
        /// The test case the test belongs to, if known.
        test_case: Option<String>,
    },

    /// A step started.
    StepStarted {
        /// The handle of the new step.
        handle: StepHandle,
        /// What the step does.
        description: String,
        /// The number of open steps, including this one.
        depth: usize,
    },

    /// A step was sealed.
    StepFinished {
        /// The handle of the step.
        handle: StepHandle,
        /// The sealed step.
        step: Step,
        /// The number of open steps, including this one, just before it was
        /// sealed.
        depth: usize,
    },

    /// A test finished.
    TestFinished {
        /// The overall result of the test.
        result: ResultState,
    },
}

/// Collects finished outcomes, grouped by the thread that ran them.
///
/// Clones share the same storage, so one clone can be registered with the bus
/// while another is used to read the outcomes back.
#[derive(Clone, Debug, Default)]
pub struct OutcomeCollector {
    outcomes: Arc<Mutex<HashMap<ThreadId, Vec<Arc<TestOutcome>>>>>,
}

impl OutcomeCollector {
    /// Creates a new, empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the outcomes of tests run on the given thread, in the order they
    /// finished.
    pub fn outcomes_for(&self, thread_id: ThreadId) -> Vec<Arc<TestOutcome>> {
        self.lock().get(&thread_id).cloned().unwrap_or_default()
    }

    /// Returns the outcomes of tests run on the current thread.
    pub fn outcomes_for_current_thread(&self) -> Vec<Arc<TestOutcome>> {
        self.outcomes_for(thread::current().id())
    }

    /// Returns every collected outcome, grouped by thread.
    pub fn all_outcomes(&self) -> HashMap<ThreadId, Vec<Arc<TestOutcome>>> {
        self.lock().clone()
    }

    /// Returns the total number of collected outcomes.
    pub fn len(&self) -> usize {
        self.lock().values().map(Vec::len).sum()
    }

    /// Returns true if no outcomes have been collected.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discards every collected outcome.
    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ThreadId, Vec<Arc<TestOutcome>>>> {
        self.outcomes.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl OutcomeListener for OutcomeCollector {
    fn on_test_finished(&self, outcome: &Arc<TestOutcome>) -> ListenerResult {
        self.lock()
            .entry(thread::current().id())
            .or_default()
            .push(Arc::clone(outcome));
        Ok(())
    }
}

/// Forwards finished outcomes into a tokio channel, for consumption by async
/// code.
#[derive(Clone, Debug)]
pub struct ChannelListener {
    sender: UnboundedSender<Arc<TestOutcome>>,
}

impl ChannelListener {
    /// Creates a new listener, along with the receiving end of its channel.
    pub fn new() -> (Self, UnboundedReceiver<Arc<TestOutcome>>) {
        let (sender, receiver) = unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl OutcomeListener for ChannelListener {
    fn on_test_finished(&self, outcome: &Arc<TestOutcome>) -> ListenerResult {
        self.sender.send(Arc::clone(outcome))?;
        Ok(())
    }
}

/// Writes each finished outcome to a file as a single line of JSON.
#[derive(Debug)]
pub struct JsonLinesListener {
    path: Utf8PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonLinesListener {
    /// Creates the file at `path`, truncating it if it exists.
    pub fn create(path: impl Into<Utf8PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    /// Returns the path of the file being written.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl OutcomeListener for JsonLinesListener {
    fn on_test_finished(&self, outcome: &Arc<TestOutcome>) -> ListenerResult {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        outcome.serialize(&mut *writer)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Logs test and step progress through `tracing`.
///
/// Test boundaries are logged at info level, step boundaries at debug level,
/// and failing steps at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct StepLogListener;

impl StepLogListener {
    /// Creates a new step log listener.
    pub fn new() -> Self {
        Self
    }
}

impl StepListener for StepLogListener {
    fn on_step_event(&self, event: &StepEvent) -> ListenerResult {
        let method_name = &event.method_name;
        match &event.kind {
            StepEventKind::TestStarted { test_case } => match test_case {
                Some(test_case) => info!("{test_case}::{method_name} started"),
                None => info!("{method_name} started"),
            },
            StepEventKind::StepStarted {
                description, depth, ..
            } => {
                debug!("{method_name}: {}{description}", indent(*depth));
            }
            StepEventKind::StepFinished { step, depth, .. } => {
                let indent = indent(*depth);
                let description = &step.description;
                match &step.failure {
                    Some(failure) => warn!(
                        "{method_name}: {indent}{description} {} ({}ms): {}",
                        step.result, step.duration_ms, failure.message
                    ),
                    None => debug!(
                        "{method_name}: {indent}{description} {} ({}ms)",
                        step.result, step.duration_ms
                    ),
                }
            }
            StepEventKind::TestFinished { result } => {
                info!("{method_name} finished: {result}");
            }
        }
        Ok(())
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth.saturating_sub(1))
}
