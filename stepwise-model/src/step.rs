// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Steps and the tree of steps recorded for a test.

use crate::{ResultState, errors::ProtocolViolation, merge};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Instant};

/// Whether a failure was expected or unexpected.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum FailureKind {
    /// An expected failure, such as a failed assertion. Recorded as
    /// [`ResultState::Failure`].
    Failure,

    /// An unexpected fault. Recorded as [`ResultState::Error`].
    Error,
}

impl FailureKind {
    /// Returns the result a step failing this way is sealed with.
    pub fn result(self) -> ResultState {
        match self {
            FailureKind::Failure => ResultState::Failure,
            FailureKind::Error => ResultState::Error,
        }
    }
}

/// A serializable description of why a step failed.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct FailureDetail {
    /// Whether the failure was expected (an assertion) or unexpected (a fault).
    pub kind: FailureKind,

    /// The failure message.
    pub message: String,

    /// The classification of the failure, such as the name of an exception type.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,

    /// The stack trace or other location information, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl FailureDetail {
    /// Creates a new failure detail of the given kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            ty: None,
            stack_trace: None,
        }
    }

    /// Creates a detail for a failed assertion.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Failure, message)
    }

    /// Creates a detail for an unexpected fault.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    /// Sets the type.
    pub fn set_type(&mut self, ty: impl Into<String>) -> &mut Self {
        self.ty = Some(ty.into());
        self
    }

    /// Sets the stack trace.
    pub fn set_stack_trace(&mut self, stack_trace: impl Into<String>) -> &mut Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

/// A single recorded unit of test execution, possibly containing sub-steps.
///
/// A step with children is a step group, and its result is derived from the
/// results of its children.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Step {
    /// What this step does.
    pub description: String,

    /// The result of this step.
    pub result: ResultState,

    /// The time taken by this step, in milliseconds.
    #[serde(rename = "duration", default)]
    pub duration_ms: u64,

    /// Sub-steps, in execution order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Step>,

    /// Why this step failed, if it did.
    #[serde(rename = "exception", default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
}

impl Step {
    /// Creates a new step with an undefined result.
    pub fn new(description: impl Into<String>) -> Self {
        Self::with_result(description, ResultState::Undefined)
    }

    /// Creates a new leaf step with the given result.
    pub fn with_result(description: impl Into<String>, result: ResultState) -> Self {
        Self {
            description: description.into(),
            result,
            duration_ms: 0,
            children: Vec::new(),
            failure: None,
        }
    }

    /// Creates a step group out of the given children, deriving its result.
    pub fn group(description: impl Into<String>, children: Vec<Step>) -> Self {
        let mut step = Self::new(description);
        step.children = children;
        step.rederive();
        step
    }

    /// Creates a failed leaf step carrying the given detail.
    pub fn failed(description: impl Into<String>, failure: FailureDetail) -> Self {
        let mut step = Self::with_result(description, failure.kind.result());
        step.failure = Some(failure);
        step
    }

    /// Sets the duration in milliseconds.
    pub fn set_duration_ms(&mut self, duration_ms: u64) -> &mut Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Returns true if this step has sub-steps.
    pub fn is_group(&self) -> bool {
        !self.children.is_empty()
    }

    /// Recomputes this step's result from its children. No-op for leaf steps.
    pub fn rederive(&mut self) {
        if self.is_group() {
            self.result = merge(self.children.iter().map(|child| child.result));
        }
    }

    /// Returns an iterator over the leaf steps under (and including) this step,
    /// depth-first.
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }
}

/// Iterator over leaf steps, returned by [`Step::leaves`] and
/// [`StepTree::leaves`].
#[derive(Clone, Debug)]
pub struct Leaves<'a> {
    stack: Vec<&'a Step>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Step;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(step) = self.stack.pop() {
            if step.children.is_empty() {
                return Some(step);
            }
            self.stack.extend(step.children.iter().rev());
        }
        None
    }
}

/// Identifies an open step in a [`StepTree`].
///
/// Returned by [`StepTree::begin_step`] and passed back in to close the step.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct StepHandle(u64);

impl fmt::Display for StepHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Clone, Debug)]
struct OpenStep {
    handle: StepHandle,
    // Position within the parent's children (or within the roots).
    index: usize,
    started: Instant,
    // Begun while the tree was skipping: sealed as skipped whatever is reported.
    skipped: bool,
}

/// The steps of a test, recorded as they execute.
///
/// The tree keeps a cursor on the innermost open step. New steps are added as
/// children of that step, or as top-level steps if no step is open. Sealing a
/// step re-derives the results of all of its open ancestors.
#[derive(Clone, Debug, Default)]
pub struct StepTree {
    roots: Vec<Step>,
    open: Vec<OpenStep>,
    next_handle: u64,
    skipping: bool,
    failed: bool,
}

impl StepTree {
    /// Creates a new, empty step tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a step tree out of already-sealed top-level steps.
    pub fn from_steps(steps: Vec<Step>) -> Self {
        let failed = steps.iter().any(|step| step.result.is_failing());
        Self {
            roots: steps,
            failed,
            ..Self::default()
        }
    }

    /// Returns the top-level steps.
    pub fn roots(&self) -> &[Step] {
        &self.roots
    }

    /// Consumes the tree, returning the top-level steps.
    pub fn into_steps(self) -> Vec<Step> {
        self.roots
    }

    /// Returns true if no step has been recorded.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Returns the number of open steps.
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Returns the innermost open step, if any.
    pub fn current(&self) -> Option<StepHandle> {
        self.open.last().map(|open| open.handle)
    }

    /// Returns the innermost open step, or an error if no step is open.
    pub fn require_current(&self) -> Result<StepHandle, ProtocolViolation> {
        self.current().ok_or(ProtocolViolation::NoCurrentStep)
    }

    /// Returns the time elapsed since the innermost open step began.
    pub fn current_elapsed_ms(&self) -> Option<u64> {
        self.open
            .last()
            .map(|open| duration_ms(open.started.elapsed()))
    }

    /// Returns the innermost open step, if any.
    pub fn current_step(&self) -> Option<&Step> {
        let (last, parents) = self.open.split_last()?;
        Self::resolve(&self.roots, parents, last.index)
    }

    /// Returns true if a failing result has been sealed in this tree.
    pub fn has_failed(&self) -> bool {
        self.failed
    }

    /// Returns true if newly begun steps are recorded as skipped.
    pub fn is_skipping(&self) -> bool {
        self.skipping
    }

    /// Returns an iterator over all leaf steps, depth-first.
    pub fn leaves(&self) -> impl Iterator<Item = &Step> + '_ {
        self.roots.iter().flat_map(Step::leaves)
    }

    /// Begins a new step under the innermost open step, and makes it the
    /// innermost open step.
    pub fn begin_step(&mut self, description: impl Into<String>) -> StepHandle {
        let handle = StepHandle(self.next_handle);
        self.next_handle += 1;

        let index = self.push_into_cursor(Step::new(description));
        self.open.push(OpenStep {
            handle,
            index,
            started: Instant::now(),
            skipped: self.skipping,
        });
        handle
    }

    /// Appends an already-built step under the innermost open step (or at the top
    /// level if no step is open).
    pub fn record_step(&mut self, step: Step) {
        if step.leaves().any(|leaf| leaf.result.is_failing()) || step.result.is_failing() {
            self.failed = true;
        }
        self.push_into_cursor(step);
        self.rederive_open();
    }

    /// Seals the innermost open step with an explicit result.
    ///
    /// A leaf step takes `result` as is. A step group takes the merge of its
    /// children's results and `result`, so a group that finishes normally is
    /// the merge of its children, and a group whose own body failed is at least
    /// failed.
    ///
    /// Returns an error if `handle` is not the innermost open step.
    pub fn end_step(
        &mut self,
        handle: StepHandle,
        result: ResultState,
        duration_ms: u64,
    ) -> Result<&Step, ProtocolViolation> {
        self.seal(handle, result, None, duration_ms)
    }

    /// Seals the innermost open step as failed, storing the failure detail.
    ///
    /// The step is sealed as [`ResultState::Failure`] or [`ResultState::Error`]
    /// depending on [`FailureDetail::kind`].
    pub fn fail_step(
        &mut self,
        handle: StepHandle,
        failure: FailureDetail,
        duration_ms: u64,
    ) -> Result<&Step, ProtocolViolation> {
        let result = failure.kind.result();
        self.seal(handle, result, Some(failure), duration_ms)
    }

    /// Seals the innermost open step as ignored.
    pub fn ignore_step(
        &mut self,
        handle: StepHandle,
        duration_ms: u64,
    ) -> Result<&Step, ProtocolViolation> {
        self.seal(handle, ResultState::Ignored, None, duration_ms)
    }

    /// Seals the innermost open step as pending.
    pub fn pending_step(
        &mut self,
        handle: StepHandle,
        duration_ms: u64,
    ) -> Result<&Step, ProtocolViolation> {
        self.seal(handle, ResultState::Pending, None, duration_ms)
    }

    /// Seals every open step as skipped, and records every step begun after this
    /// call as skipped.
    pub fn skip_remaining(&mut self) {
        self.skip_new_steps();
        self.seal_unfinished(ResultState::Skipped);
    }

    /// Records every step begun after this call as skipped. Steps that are already
    /// open are sealed as reported.
    pub fn skip_new_steps(&mut self) {
        self.skipping = true;
    }

    /// Seals every open step, innermost first, with the given result.
    ///
    /// Returns the number of steps sealed.
    pub fn seal_unfinished(&mut self, result: ResultState) -> usize {
        let mut sealed = 0;
        while let Some(handle) = self.current() {
            let elapsed = self.current_elapsed_ms().unwrap_or_default();
            // The handle is the innermost open step, so sealing cannot fail.
            if self.seal(handle, result, None, elapsed).is_ok() {
                sealed += 1;
            }
        }
        sealed
    }

    // ---
    // Helper methods
    // ---

    fn seal(
        &mut self,
        handle: StepHandle,
        result: ResultState,
        failure: Option<FailureDetail>,
        duration_ms: u64,
    ) -> Result<&Step, ProtocolViolation> {
        let expected = match self.open.last() {
            Some(open) => open.handle,
            None => return Err(ProtocolViolation::NoOpenStep { handle }),
        };
        if expected != handle {
            return Err(ProtocolViolation::MismatchedStep {
                expected,
                found: handle,
            });
        }
        let Some(open) = self.open.pop() else {
            return Err(ProtocolViolation::NoOpenStep { handle });
        };

        let (result, failure) = if open.skipped {
            (ResultState::Skipped, None)
        } else {
            (result, failure)
        };

        let step = Self::resolve_mut(&mut self.roots, &self.open, open.index)
            .ok_or(ProtocolViolation::NoOpenStep { handle })?;
        step.result = if step.is_group() {
            merge(step.children.iter().map(|child| child.result).chain([result]))
        } else {
            result
        };
        step.duration_ms = duration_ms;
        step.failure = failure;
        if step.result.is_failing() {
            self.failed = true;
        }

        self.rederive_open();

        Self::resolve(&self.roots, &self.open, open.index)
            .ok_or(ProtocolViolation::NoOpenStep { handle })
    }

    fn push_into_cursor(&mut self, step: Step) -> usize {
        match self.open.split_last() {
            Some((last, parents)) => {
                match Self::resolve_mut(&mut self.roots, parents, last.index) {
                    Some(parent) => {
                        parent.children.push(step);
                        parent.children.len() - 1
                    }
                    // The cursor always points at a live step.
                    None => {
                        self.roots.push(step);
                        self.roots.len() - 1
                    }
                }
            }
            None => {
                self.roots.push(step);
                self.roots.len() - 1
            }
        }
    }

    // Re-derives every open step from its children, innermost first.
    fn rederive_open(&mut self) {
        for depth in (0..self.open.len()).rev() {
            let (parents, rest) = self.open.split_at(depth);
            let index = rest[0].index;
            if let Some(step) = Self::resolve_mut(&mut self.roots, parents, index) {
                step.rederive();
            }
        }
    }

    fn resolve<'a>(roots: &'a [Step], parents: &[OpenStep], index: usize) -> Option<&'a Step> {
        let mut siblings = roots;
        for parent in parents {
            siblings = siblings.get(parent.index)?.children.as_slice();
        }
        siblings.get(index)
    }

    fn resolve_mut<'a>(
        roots: &'a mut [Step],
        parents: &[OpenStep],
        index: usize,
    ) -> Option<&'a mut Step> {
        let mut siblings = roots;
        for parent in parents {
            siblings = siblings.get_mut(parent.index)?.children.as_mut_slice();
        }
        siblings.get_mut(index)
    }
}

pub(crate) fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
