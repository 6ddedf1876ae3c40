// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The step event bus: routes lifecycle events from test threads to the outcome
//! of the test running on each thread.

use crate::{
    config::BusConfig,
    errors::{BusError, ListenerErrors, ListenerFailure, ListenerKind},
    listener::{OutcomeListener, StepEvent, StepEventKind, StepListener},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
    thread::{self, ThreadId},
};
use stepwise_model::{
    DataTable, FailureDetail, ResultState, Step, StepHandle, StepTree, Story, Tag, TestOutcome,
    errors::ProtocolViolation,
};
use tracing::{debug, warn};

/// The state of the current thread, as seen by the bus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// No test is running on this thread.
    Idle,

    /// A test is running, with no step open.
    TestRunning {
        /// The name of the test method.
        method_name: String,
    },

    /// A test is running, with at least one step open.
    StepRunning {
        /// The name of the test method.
        method_name: String,
        /// The number of open steps.
        depth: usize,
    },

    /// A test has finished and its listeners are being notified.
    ///
    /// A new test may already be started in this state.
    Finished {
        /// The name of the test method.
        method_name: String,
    },
}

/// Builds a [`StepEventBus`].
///
/// Listeners can only be registered here, before the bus is shared between
/// threads.
#[must_use]
pub struct StepEventBusBuilder {
    config: BusConfig,
    outcome_listeners: Vec<Box<dyn OutcomeListener>>,
    step_listeners: Vec<Box<dyn StepListener>>,
}

impl StepEventBusBuilder {
    /// Creates a new builder with the default configuration and no listeners.
    pub fn new() -> Self {
        Self {
            config: BusConfig::default(),
            outcome_listeners: Vec::new(),
            step_listeners: Vec::new(),
        }
    }

    /// Sets the configuration.
    pub fn set_config(&mut self, config: BusConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Adds a listener called with each finished outcome.
    ///
    /// Listeners are called in the order they were added.
    pub fn add_outcome_listener(&mut self, listener: impl OutcomeListener + 'static) -> &mut Self {
        self.outcome_listeners.push(Box::new(listener));
        self
    }

    /// Adds a listener called with step events.
    ///
    /// Listeners are called in the order they were added.
    pub fn add_step_listener(&mut self, listener: impl StepListener + 'static) -> &mut Self {
        self.step_listeners.push(Box::new(listener));
        self
    }

    /// Builds the bus.
    pub fn build(self) -> StepEventBus {
        StepEventBus {
            config: self.config,
            threads: RwLock::new(HashMap::new()),
            outcome_listeners: DebugIgnore(self.outcome_listeners),
            step_listeners: DebugIgnore(self.step_listeners),
        }
    }
}

impl Default for StepEventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}

type Slot = Arc<Mutex<ThreadContext>>;

#[derive(Debug)]
enum ThreadContext {
    Running(TestOutcome),
    // Listeners for this outcome are being notified.
    Finished(Arc<TestOutcome>),
    // Transient, while the running outcome is moved out to be finished.
    Released,
}

/// Folds test and step lifecycle events into [`TestOutcome`]s.
///
/// Every operation applies to the test running on the calling thread, so many
/// threads can each drive their own test through a shared bus. Events from one
/// thread are applied in the order they are emitted.
///
/// Listeners are called synchronously on the emitting thread, after the event
/// has been applied. If a listener fails, the remaining listeners are still
/// called and the failures are returned together as [`BusError::Listeners`].
#[derive(Debug)]
pub struct StepEventBus {
    config: BusConfig,
    // Only the owning thread locks its slot, except for clear and in_flight.
    threads: RwLock<HashMap<ThreadId, Slot>>,
    outcome_listeners: DebugIgnore<Vec<Box<dyn OutcomeListener>>>,
    step_listeners: DebugIgnore<Vec<Box<dyn StepListener>>>,
}

impl StepEventBus {
    /// Returns a builder for a new bus.
    pub fn builder() -> StepEventBusBuilder {
        StepEventBusBuilder::new()
    }

    /// Returns the configuration of this bus.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ---
    // Test lifecycle
    // ---

    /// Starts a test on the calling thread.
    ///
    /// Returns [`BusError::NestedTest`] if a test is already running on this
    /// thread.
    pub fn test_started(&self, method_name: &str) -> Result<(), BusError> {
        self.test_started_for(method_name, None)
    }

    /// Starts a test belonging to the given test case on the calling thread.
    pub fn test_started_for(
        &self,
        method_name: &str,
        test_case: Option<&str>,
    ) -> Result<(), BusError> {
        let thread_id = thread::current().id();
        let outcome = TestOutcome::start(
            method_name,
            test_case.map(str::to_owned),
            Local::now().fixed_offset(),
        );

        {
            let mut threads = self.write_threads();
            if let Some(slot) = threads.get(&thread_id)
                && let ThreadContext::Running(running) = &*lock_slot(slot)
            {
                return Err(BusError::NestedTest {
                    thread_id,
                    method_name: method_name.to_owned(),
                    running: running.method_name().to_owned(),
                });
            }
            threads.insert(
                thread_id,
                Arc::new(Mutex::new(ThreadContext::Running(outcome))),
            );
        }
        debug!("test `{method_name}` started on {thread_id:?}");

        self.notify_step_listeners(
            thread_id,
            method_name,
            StepEventKind::TestStarted {
                test_case: test_case.map(str::to_owned),
            },
        )
    }

    /// Finishes the test running on the calling thread.
    ///
    /// Steps that are still open are sealed with the configured
    /// [`unfinished_step_result`](BusConfig::unfinished_step_result).
    /// `explicit_result`, if given, is the result of the test if it recorded no
    /// steps.
    ///
    /// The thread is free to start a new test once the outcome is sealed.
    /// Listeners are then called with the finished outcome, which is also
    /// returned. If any listener fails, the outcome is available through
    /// [`ListenerErrors::outcome`].
    pub fn test_finished(
        &self,
        explicit_result: Option<ResultState>,
    ) -> Result<Arc<TestOutcome>, BusError> {
        let thread_id = thread::current().id();
        let slot = self.slot(thread_id, "test_finished")?;

        let finished = {
            let mut context = lock_slot(&slot);
            let mut outcome = match std::mem::replace(&mut *context, ThreadContext::Released) {
                ThreadContext::Running(outcome) => outcome,
                other => {
                    *context = other;
                    return Err(no_test_running(thread_id, "test_finished"));
                }
            };

            let unfinished = self.config.unfinished_step_result();
            match outcome.finish_with_unfinished_steps(unfinished, explicit_result) {
                Ok(0) => {}
                Ok(sealed) => warn!(
                    "test `{}` finished with {sealed} open step(s), recorded as {unfinished}",
                    outcome.method_name(),
                ),
                Err(error) => {
                    *context = ThreadContext::Running(outcome);
                    return Err(error.into());
                }
            }

            let finished = Arc::new(outcome);
            *context = ThreadContext::Finished(Arc::clone(&finished));
            finished
        };
        debug!(
            "test `{}` finished on {thread_id:?}: {}",
            finished.method_name(),
            finished.result(),
        );

        let mut failures = self.step_listener_failures(&StepEvent {
            thread_id,
            method_name: finished.method_name().to_owned(),
            kind: StepEventKind::TestFinished {
                result: finished.result(),
            },
        });
        for (index, listener) in self.outcome_listeners.iter().enumerate() {
            if let Err(error) = listener.on_test_finished(&finished) {
                warn!(
                    "outcome listener {index} failed for test `{}`: {error}",
                    finished.method_name()
                );
                failures.push(ListenerFailure::new(ListenerKind::Outcome, index, error));
            }
        }

        self.release(thread_id, &slot);

        if failures.is_empty() {
            Ok(finished)
        } else {
            Err(ListenerErrors::new(Some(finished), failures).into())
        }
    }

    // ---
    // Steps
    // ---

    /// Begins a step under the current step of the test running on the calling
    /// thread.
    ///
    /// If an earlier step of this test failed and fail-fast is enabled, the step
    /// is recorded but will be sealed as skipped.
    pub fn step_started(&self, description: &str) -> Result<StepHandle, BusError> {
        let (thread_id, (method_name, handle, depth)) =
            self.with_running("step_started", |outcome| {
                let method_name = outcome.method_name().to_owned();
                let tree = outcome.steps_mut()?;
                let handle = tree.begin_step(description);
                Ok((method_name, handle, tree.depth()))
            })?;

        if self.config.live_step_events() {
            self.notify_step_listeners(
                thread_id,
                &method_name,
                StepEventKind::StepStarted {
                    handle,
                    description: description.to_owned(),
                    depth,
                },
            )?;
        }
        Ok(handle)
    }

    /// Seals the current step as passed. A step group takes the merged result of
    /// its children.
    pub fn step_finished(&self) -> Result<Step, BusError> {
        self.seal_current("step_finished", |tree, handle, duration_ms| {
            tree.end_step(handle, ResultState::Success, duration_ms)
        })
    }

    /// Seals the current step as failed, recording why.
    pub fn step_failed(&self, failure: FailureDetail) -> Result<Step, BusError> {
        self.seal_current("step_failed", |tree, handle, duration_ms| {
            tree.fail_step(handle, failure, duration_ms)
        })
    }

    /// Seals the current step as ignored.
    pub fn step_ignored(&self) -> Result<Step, BusError> {
        self.seal_current("step_ignored", StepTree::ignore_step)
    }

    /// Seals the current step as pending.
    pub fn step_pending(&self) -> Result<Step, BusError> {
        self.seal_current("step_pending", StepTree::pending_step)
    }

    /// Returns true if a step of the test running on the calling thread has
    /// failed. Returns false if no test is running.
    pub fn a_step_has_failed(&self) -> bool {
        let thread_id = thread::current().id();
        let Ok(slot) = self.slot(thread_id, "a_step_has_failed") else {
            return false;
        };
        match &*lock_slot(&slot) {
            ThreadContext::Running(outcome) => outcome.step_tree().has_failed(),
            ThreadContext::Finished(outcome) => outcome.step_tree().has_failed(),
            ThreadContext::Released => false,
        }
    }

    // ---
    // Outcome metadata
    // ---

    /// Adds tags to the test running on the calling thread.
    pub fn add_tags(&self, tags: impl IntoIterator<Item = Tag>) -> Result<(), BusError> {
        self.with_running("add_tags", |outcome| Ok(outcome.add_tags(tags)?))
            .map(|_| ())
    }

    /// Adds issues to the test running on the calling thread.
    pub fn add_issues(
        &self,
        issues: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), BusError> {
        self.with_running("add_issues", |outcome| Ok(outcome.add_issues(issues)?))
            .map(|_| ())
    }

    /// Sets the qualifier of the test running on the calling thread.
    pub fn set_qualifier(&self, qualifier: &str) -> Result<(), BusError> {
        self.with_running("set_qualifier", |outcome| {
            Ok(outcome.set_qualifier(qualifier)?)
        })
        .map(|_| ())
    }

    /// Records the examples used by the data-driven test running on the calling
    /// thread.
    pub fn use_examples_from(&self, table: &DataTable) -> Result<(), BusError> {
        self.with_running("use_examples_from", |outcome| {
            Ok(outcome.use_examples_from(table)?)
        })
        .map(|_| ())
    }

    /// Sets the user story of the test running on the calling thread.
    pub fn set_user_story(&self, story: &Story) -> Result<(), BusError> {
        self.with_running("set_user_story", |outcome| {
            Ok(outcome.set_user_story(story)?)
        })
        .map(|_| ())
    }

    /// Sets the session ID of the test running on the calling thread.
    pub fn set_session_id(&self, session_id: &str) -> Result<(), BusError> {
        self.with_running("set_session_id", |outcome| {
            Ok(outcome.set_session_id(session_id)?)
        })
        .map(|_| ())
    }

    // ---
    // Registry
    // ---

    /// Returns the state of the calling thread.
    pub fn current_state(&self) -> ThreadState {
        let thread_id = thread::current().id();
        let Ok(slot) = self.slot(thread_id, "current_state") else {
            return ThreadState::Idle;
        };
        match &*lock_slot(&slot) {
            ThreadContext::Running(outcome) => {
                let method_name = outcome.method_name().to_owned();
                match outcome.step_tree().depth() {
                    0 => ThreadState::TestRunning { method_name },
                    depth => ThreadState::StepRunning { method_name, depth },
                }
            }
            ThreadContext::Finished(outcome) => ThreadState::Finished {
                method_name: outcome.method_name().to_owned(),
            },
            ThreadContext::Released => ThreadState::Idle,
        }
    }

    /// Returns the number of threads with a test running.
    pub fn in_flight(&self) -> usize {
        self.read_threads()
            .values()
            .filter(|slot| matches!(&*lock_slot(slot), ThreadContext::Running(_)))
            .count()
    }

    /// Discards the state of every thread, including tests still running.
    ///
    /// Returns the number of running tests that were discarded. Their outcomes
    /// are not delivered to listeners.
    pub fn clear(&self) -> usize {
        let mut threads = self.write_threads();
        let discarded: Vec<String> = threads
            .values()
            .filter_map(|slot| match &*lock_slot(slot) {
                ThreadContext::Running(outcome) => Some(outcome.method_name().to_owned()),
                _ => None,
            })
            .collect();
        threads.clear();

        let discarded_count = discarded.len();
        if discarded_count > 0 {
            warn!(
                "discarded {discarded_count} running test(s): {}",
                discarded.join(", ")
            );
        }
        discarded_count
    }

    // ---
    // Helper methods
    // ---

    fn read_threads(&self) -> RwLockReadGuard<'_, HashMap<ThreadId, Slot>> {
        self.threads.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_threads(&self) -> RwLockWriteGuard<'_, HashMap<ThreadId, Slot>> {
        self.threads.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, thread_id: ThreadId, event: &'static str) -> Result<Slot, BusError> {
        self.read_threads()
            .get(&thread_id)
            .cloned()
            .ok_or_else(|| no_test_running(thread_id, event))
    }

    // Removes the binding for this thread, unless a new test has replaced it.
    fn release(&self, thread_id: ThreadId, slot: &Slot) {
        let mut threads = self.write_threads();
        if threads
            .get(&thread_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            threads.remove(&thread_id);
        }
    }

    // Runs `f` on the outcome of the test running on the calling thread. The slot
    // lock is held only for the duration of `f`.
    fn with_running<T>(
        &self,
        event: &'static str,
        f: impl FnOnce(&mut TestOutcome) -> Result<T, BusError>,
    ) -> Result<(ThreadId, T), BusError> {
        let thread_id = thread::current().id();
        let slot = self.slot(thread_id, event)?;
        let mut context = lock_slot(&slot);
        match &mut *context {
            ThreadContext::Running(outcome) => Ok((thread_id, f(outcome)?)),
            _ => Err(no_test_running(thread_id, event)),
        }
    }

    fn seal_current(
        &self,
        event: &'static str,
        seal: impl FnOnce(&mut StepTree, StepHandle, u64) -> Result<&Step, ProtocolViolation>,
    ) -> Result<Step, BusError> {
        let fail_fast = self.config.fail_fast();
        let (thread_id, (method_name, handle, depth, step)) =
            self.with_running(event, |outcome| {
                let method_name = outcome.method_name().to_owned();
                let thread_id = thread::current().id();
                let protocol = |error| BusError::Protocol { thread_id, error };

                let tree = outcome.steps_mut()?;
                let handle = tree.require_current().map_err(protocol)?;
                let depth = tree.depth();
                let duration_ms = tree.current_elapsed_ms().unwrap_or_default();
                let step = seal(tree, handle, duration_ms).map_err(protocol)?.clone();
                if fail_fast && step.result.is_failing() && !tree.is_skipping() {
                    debug!(
                        "step `{}` of `{method_name}` failed, skipping later steps",
                        step.description
                    );
                    tree.skip_new_steps();
                }
                Ok((method_name, handle, depth, step))
            })?;

        if self.config.live_step_events() {
            self.notify_step_listeners(
                thread_id,
                &method_name,
                StepEventKind::StepFinished {
                    handle,
                    step: step.clone(),
                    depth,
                },
            )?;
        }
        Ok(step)
    }

    fn notify_step_listeners(
        &self,
        thread_id: ThreadId,
        method_name: &str,
        kind: StepEventKind,
    ) -> Result<(), BusError> {
        if self.step_listeners.is_empty() {
            return Ok(());
        }
        let event = StepEvent {
            thread_id,
            method_name: method_name.to_owned(),
            kind,
        };
        let failures = self.step_listener_failures(&event);
        if failures.is_empty() {
            Ok(())
        } else {
            Err(ListenerErrors::new(None, failures).into())
        }
    }

    fn step_listener_failures(&self, event: &StepEvent) -> Vec<ListenerFailure> {
        let mut failures = Vec::new();
        for (index, listener) in self.step_listeners.iter().enumerate() {
            if let Err(error) = listener.on_step_event(event) {
                warn!(
                    "step listener {index} failed for test `{}`: {error}",
                    event.method_name
                );
                failures.push(ListenerFailure::new(ListenerKind::Step, index, error));
            }
        }
        failures
    }
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, ThreadContext> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn no_test_running(thread_id: ThreadId, event: &'static str) -> BusError {
    BusError::NoTestRunning { thread_id, event }
}
