// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{
    ResultState, Step, StepTree,
    errors::ImmutableRecordError,
    helpers::humanize,
    merge,
};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use std::{borrow::Cow, collections::BTreeSet};

/// The complete record of one test method's execution.
///
/// An outcome is created when a test starts, accumulates steps, tags and issues
/// while the test runs, and is sealed by [`TestOutcome::finish`]. Once
/// finished, every mutator returns an [`ImmutableRecordError`].
///
/// The overall result is the merge of the top-level step results. If no steps
/// were recorded, the annotated result (the declared result of, for example, a
/// manual test) is used instead.
#[derive(Clone, Debug)]
pub struct TestOutcome {
    pub(crate) method_name: String,
    pub(crate) title: Option<String>,
    pub(crate) test_case: Option<String>,
    pub(crate) start_time: Option<DateTime<FixedOffset>>,
    pub(crate) duration_ms: u64,
    pub(crate) manual: bool,
    pub(crate) session_id: Option<String>,
    pub(crate) qualifier: Option<String>,
    pub(crate) user_story: Option<Story>,
    pub(crate) tags: BTreeSet<Tag>,
    pub(crate) issues: Vec<String>,
    pub(crate) steps: StepTree,
    pub(crate) data_table: Option<DataTable>,
    pub(crate) annotated_result: Option<ResultState>,
    pub(crate) finished: bool,
}

impl TestOutcome {
    /// Creates a new in-flight outcome for the given test method, with no start
    /// time.
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            method_name: method_name.into(),
            title: None,
            test_case: None,
            start_time: None,
            duration_ms: 0,
            manual: false,
            session_id: None,
            qualifier: None,
            user_story: None,
            tags: BTreeSet::new(),
            issues: Vec::new(),
            steps: StepTree::new(),
            data_table: None,
            annotated_result: None,
            finished: false,
        }
    }

    /// Creates a new in-flight outcome for a test that started at `start_time`.
    ///
    /// `test_case` identifies the test case (typically the fully qualified name
    /// of the type or module declaring the test method).
    pub fn start(
        method_name: impl Into<String>,
        test_case: Option<String>,
        start_time: impl Into<DateTime<FixedOffset>>,
    ) -> Self {
        let mut outcome = Self::new(method_name);
        outcome.test_case = test_case;
        outcome.start_time = Some(start_time.into());
        outcome
    }

    /// Returns a builder for an outcome of the given test method.
    pub fn builder(method_name: impl Into<String>) -> TestOutcomeBuilder {
        TestOutcomeBuilder::new(method_name)
    }

    // ---
    // Accessors
    // ---

    /// Returns the name of the test method.
    pub fn method_name(&self) -> &str {
        &self.method_name
    }

    /// Returns the title of the test.
    ///
    /// If no title was set, the title is derived from the method name, for
    /// example `happy_day_scenario` becomes `Happy day scenario`.
    pub fn title(&self) -> Cow<'_, str> {
        match &self.title {
            Some(title) => Cow::Borrowed(title),
            None => Cow::Owned(humanize(&self.method_name)),
        }
    }

    /// Returns the test case identity, if known.
    pub fn test_case(&self) -> Option<&str> {
        self.test_case.as_deref()
    }

    /// Returns the time at which the test started, if known.
    pub fn start_time(&self) -> Option<DateTime<FixedOffset>> {
        self.start_time
    }

    /// Returns the time taken by the test, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// Returns true if this is a manual test, whose result is declared rather than
    /// derived from recorded steps.
    pub fn is_manual(&self) -> bool {
        self.manual
    }

    /// Returns the session ID (for example a browser session), if any.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Returns the qualifier distinguishing data-driven invocations of this test.
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Returns the user story this test belongs to.
    pub fn user_story(&self) -> Option<&Story> {
        self.user_story.as_ref()
    }

    /// Returns the tags on this test.
    pub fn tags(&self) -> &BTreeSet<Tag> {
        &self.tags
    }

    /// Returns the issues associated with this test, in the order they were added.
    pub fn issues(&self) -> &[String] {
        &self.issues
    }

    /// Returns the top-level steps.
    pub fn steps(&self) -> &[Step] {
        self.steps.roots()
    }

    /// Returns the step tree.
    pub fn step_tree(&self) -> &StepTree {
        &self.steps
    }

    /// Returns the examples used by a data-driven test.
    pub fn data_table(&self) -> Option<&DataTable> {
        self.data_table.as_ref()
    }

    /// Returns true if this test ran with a table of examples.
    pub fn is_data_driven(&self) -> bool {
        self.data_table.is_some()
    }

    /// Returns the declared result, if one was set.
    pub fn annotated_result(&self) -> Option<ResultState> {
        self.annotated_result
    }

    /// Returns true once [`finish`](Self::finish) has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns the overall result of this test.
    pub fn result(&self) -> ResultState {
        if self.steps.is_empty() {
            self.annotated_result.unwrap_or_default()
        } else {
            merge(self.steps.roots().iter().map(|step| step.result))
        }
    }

    /// Returns the number of top-level steps.
    pub fn step_count(&self) -> usize {
        self.steps.roots().len()
    }

    /// Returns counts of leaf step results.
    pub fn counts(&self) -> StepCounts {
        self.steps.leaves().map(|step| step.result).collect()
    }

    // ---
    // Mutators
    // ---

    /// Sets an explicit title.
    pub fn set_title(&mut self, title: impl Into<String>) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.title = Some(title.into());
        Ok(())
    }

    /// Appends an already-built step under the currently open step, or at the top
    /// level.
    pub fn record_step(&mut self, step: Step) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.steps.record_step(step);
        Ok(())
    }

    /// Returns the step tree for modification while the test is running.
    pub fn steps_mut(&mut self) -> Result<&mut StepTree, ImmutableRecordError> {
        self.ensure_mutable()?;
        Ok(&mut self.steps)
    }

    /// Adds tags. Tags already present are not duplicated.
    pub fn add_tags(
        &mut self,
        tags: impl IntoIterator<Item = Tag>,
    ) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.tags.extend(tags);
        Ok(())
    }

    /// Adds issues, keeping their order.
    pub fn add_issues(
        &mut self,
        issues: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.issues.extend(issues.into_iter().map(Into::into));
        Ok(())
    }

    /// Sets the qualifier.
    pub fn set_qualifier(
        &mut self,
        qualifier: impl Into<String>,
    ) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.qualifier = Some(qualifier.into());
        Ok(())
    }

    /// Records the examples of a data-driven test. The table is copied.
    pub fn use_examples_from(&mut self, table: &DataTable) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.data_table = Some(table.clone());
        Ok(())
    }

    /// Sets the user story. The story is copied.
    pub fn set_user_story(&mut self, story: &Story) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.user_story = Some(story.clone());
        Ok(())
    }

    /// Sets the session ID. An empty string clears it.
    pub fn set_session_id(
        &mut self,
        session_id: impl Into<String>,
    ) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        self.session_id = Some(session_id.into()).filter(|id| !id.is_empty());
        Ok(())
    }

    /// Seals the outcome.
    ///
    /// `explicit_result`, if given, becomes the annotated result: it is the
    /// overall result only if no steps were recorded. The duration is the time
    /// elapsed since the start time unless `duration_ms` is given.
    pub fn finish(
        &mut self,
        explicit_result: Option<ResultState>,
        duration_ms: Option<u64>,
    ) -> Result<(), ImmutableRecordError> {
        self.ensure_mutable()?;
        if explicit_result.is_some() {
            self.annotated_result = explicit_result;
        }
        self.duration_ms = match (duration_ms, self.start_time) {
            (Some(duration_ms), _) => duration_ms,
            (None, Some(start_time)) => {
                let elapsed = Utc::now().signed_duration_since(start_time);
                u64::try_from(elapsed.num_milliseconds()).unwrap_or(0)
            }
            (None, None) => self.duration_ms,
        };
        self.finished = true;
        Ok(())
    }

    /// Seals every step that is still open with `result`, then finishes the
    /// outcome.
    ///
    /// Returns the number of steps that were still open.
    pub fn finish_with_unfinished_steps(
        &mut self,
        unfinished_result: ResultState,
        explicit_result: Option<ResultState>,
    ) -> Result<usize, ImmutableRecordError> {
        let sealed = self.steps_mut()?.seal_unfinished(unfinished_result);
        self.finish(explicit_result, None)?;
        Ok(sealed)
    }

    // ---
    // Value-returning variants
    // ---

    /// Returns a copy of this outcome with the given qualifier.
    ///
    /// The copy keeps the finished state of this outcome; `self` is not modified.
    pub fn with_qualifier(&self, qualifier: impl Into<String>) -> Self {
        let mut outcome = self.clone();
        outcome.qualifier = Some(qualifier.into());
        outcome
    }

    /// Returns a copy of this outcome marked as a manual test.
    pub fn as_manual_test(&self) -> Self {
        let mut outcome = self.clone();
        outcome.manual = true;
        outcome
    }

    fn ensure_mutable(&self) -> Result<(), ImmutableRecordError> {
        if self.finished {
            Err(ImmutableRecordError::new(&self.method_name))
        } else {
            Ok(())
        }
    }
}

/// Builds a [`TestOutcome`] in one go, for example from a stored document or for
/// a manual test.
///
/// The built outcome is in flight: it can still be modified and must be
/// finished.
#[derive(Clone, Debug)]
#[must_use]
pub struct TestOutcomeBuilder {
    outcome: TestOutcome,
}

impl TestOutcomeBuilder {
    /// Creates a new builder for the given test method.
    pub fn new(method_name: impl Into<String>) -> Self {
        Self {
            outcome: TestOutcome::new(method_name),
        }
    }

    /// Sets the title.
    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.outcome.title = Some(title.into());
        self
    }

    /// Sets the test case identity.
    pub fn set_test_case(&mut self, test_case: impl Into<String>) -> &mut Self {
        self.outcome.test_case = Some(test_case.into());
        self
    }

    /// Sets the start time.
    pub fn set_start_time(&mut self, start_time: impl Into<DateTime<FixedOffset>>) -> &mut Self {
        self.outcome.start_time = Some(start_time.into());
        self
    }

    /// Sets the duration in milliseconds.
    pub fn set_duration_ms(&mut self, duration_ms: u64) -> &mut Self {
        self.outcome.duration_ms = duration_ms;
        self
    }

    /// Marks the test as manual.
    pub fn set_manual(&mut self, manual: bool) -> &mut Self {
        self.outcome.manual = manual;
        self
    }

    /// Sets the session ID. An empty string clears it.
    pub fn set_session_id(&mut self, session_id: impl Into<String>) -> &mut Self {
        self.outcome.session_id = Some(session_id.into()).filter(|id| !id.is_empty());
        self
    }

    /// Sets the qualifier.
    pub fn set_qualifier(&mut self, qualifier: impl Into<String>) -> &mut Self {
        self.outcome.qualifier = Some(qualifier.into());
        self
    }

    /// Sets the user story.
    pub fn set_user_story(&mut self, story: Story) -> &mut Self {
        self.outcome.user_story = Some(story);
        self
    }

    /// Adds a tag.
    pub fn add_tag(&mut self, tag: Tag) -> &mut Self {
        self.outcome.tags.insert(tag);
        self
    }

    /// Adds several tags.
    pub fn add_tags(&mut self, tags: impl IntoIterator<Item = Tag>) -> &mut Self {
        self.outcome.tags.extend(tags);
        self
    }

    /// Adds an issue.
    pub fn add_issue(&mut self, issue: impl Into<String>) -> &mut Self {
        self.outcome.issues.push(issue.into());
        self
    }

    /// Appends a top-level step.
    pub fn add_step(&mut self, step: Step) -> &mut Self {
        self.outcome.steps.record_step(step);
        self
    }

    /// Appends several top-level steps.
    pub fn add_steps(&mut self, steps: impl IntoIterator<Item = Step>) -> &mut Self {
        for step in steps {
            self.add_step(step);
        }
        self
    }

    /// Sets the table of examples.
    pub fn set_data_table(&mut self, table: DataTable) -> &mut Self {
        self.outcome.data_table = Some(table);
        self
    }

    /// Sets the declared result, used when no steps are recorded.
    pub fn set_annotated_result(&mut self, result: ResultState) -> &mut Self {
        self.outcome.annotated_result = Some(result);
        self
    }

    /// Builds the outcome.
    pub fn build(&self) -> TestOutcome {
        self.outcome.clone()
    }
}

/// Counts of leaf step results in a test outcome.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StepCounts {
    /// The total number of leaf steps.
    pub total: usize,
    /// Leaf steps that passed.
    pub success: usize,
    /// Leaf steps that failed.
    pub failure: usize,
    /// Leaf steps that errored.
    pub error: usize,
    /// Leaf steps that were skipped.
    pub skipped: usize,
    /// Leaf steps that were ignored.
    pub ignored: usize,
    /// Leaf steps that are pending.
    pub pending: usize,
}

impl StepCounts {
    /// Adds a result to the counts.
    pub fn add(&mut self, result: ResultState) {
        self.total += 1;
        match result {
            ResultState::Success => self.success += 1,
            ResultState::Failure => self.failure += 1,
            ResultState::Error => self.error += 1,
            ResultState::Skipped => self.skipped += 1,
            ResultState::Ignored => self.ignored += 1,
            ResultState::Pending => self.pending += 1,
            ResultState::Undefined => {}
        }
    }
}

impl FromIterator<ResultState> for StepCounts {
    fn from_iter<I: IntoIterator<Item = ResultState>>(iter: I) -> Self {
        let mut counts = StepCounts::default();
        for result in iter {
            counts.add(result);
        }
        counts
    }
}

/// A tag on a test, such as a feature, a component or a requirement.
///
/// Two tags are equal if both their names and their types are equal.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub struct Tag {
    /// The name of the tag.
    pub name: String,

    /// The type of the tag, for example `feature` or `component`.
    #[serde(rename = "type")]
    pub ty: String,
}

impl Tag {
    /// Creates a new tag.
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: ty.into(),
        }
    }
}

/// A reference to the user story a test belongs to.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Story {
    /// A stable identifier for the story, such as a fully qualified type name.
    pub id: String,

    /// The human-readable name of the story.
    pub name: String,

    /// Where the story lives (a package or directory path), if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Story {
    /// Creates a new story reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            path: None,
        }
    }

    /// Sets the path.
    pub fn set_path(&mut self, path: impl Into<String>) -> &mut Self {
        self.path = Some(path.into());
        self
    }
}

/// The examples a data-driven test ran with.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataTable {
    /// The column headers.
    pub headers: Vec<String>,

    /// The rows, in order.
    #[serde(default)]
    pub rows: Vec<DataTableRow>,
}

impl DataTable {
    /// Creates a new table with the given headers and no rows.
    pub fn new(headers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Adds a row of values, with an undefined result.
    pub fn add_row(&mut self, values: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.rows.push(DataTableRow {
            values: values.into_iter().map(Into::into).collect(),
            result: ResultState::Undefined,
        });
        self
    }

    /// Records the result of the row at `index`. Returns false if there is no such
    /// row.
    pub fn set_row_result(&mut self, index: usize, result: ResultState) -> bool {
        match self.rows.get_mut(index) {
            Some(row) => {
                row.result = result;
                true
            }
            None => false,
        }
    }
}

/// A row of a [`DataTable`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DataTableRow {
    /// The cell values, one per header.
    pub values: Vec<String>,

    /// The result of the test for this row.
    #[serde(default)]
    pub result: ResultState,
}
