// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Encode and decode a [`TestOutcome`] as a JSON document.

use crate::{
    DataTable, ResultState, Step, Story, Tag, TestOutcome,
    errors::{MalformedDocument, SerializeError},
};
use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::io;
use tracing::debug;

/// The sequence newlines are replaced with in titles and qualifiers.
pub const ESCAPED_NEW_LINE: &str = "&#10;";

static TITLE_FIELD: &str = "title";
static NAME_FIELD: &str = "name";
static TEST_CASE_FIELD: &str = "test-case";
static CLASSNAME_FIELD: &str = "classname";
static RESULT_FIELD: &str = "result";
static QUALIFIER_FIELD: &str = "qualifier";
static STEPS_FIELD: &str = "steps";
static SUCCESSFUL_FIELD: &str = "successful";
static FAILURES_FIELD: &str = "failures";
static ERRORS_FIELD: &str = "errors";
static SKIPPED_FIELD: &str = "skipped";
static IGNORED_FIELD: &str = "ignored";
static PENDING_FIELD: &str = "pending";
static DURATION_FIELD: &str = "duration";
static TIMESTAMP_FIELD: &str = "timestamp";
static MANUAL_FIELD: &str = "manual";
static SESSION_ID_FIELD: &str = "session-id";
static USER_STORY_FIELD: &str = "user-story";
static ISSUES_FIELD: &str = "issues";
static TAGS_FIELD: &str = "tags";
static TEST_STEPS_FIELD: &str = "test-steps";
static EXAMPLES_FIELD: &str = "examples";

/// Replaces every newline in `s` with [`ESCAPED_NEW_LINE`].
pub fn escape(s: &str) -> String {
    s.replace('\n', ESCAPED_NEW_LINE)
}

/// Replaces every [`ESCAPED_NEW_LINE`] in `s` with a newline.
pub fn unescape(s: &str) -> String {
    s.replace(ESCAPED_NEW_LINE, "\n")
}

impl TestOutcome {
    /// Encodes this outcome as a JSON document.
    ///
    /// Fields are emitted in a fixed order. Optional fields that are absent are
    /// omitted rather than written as `null`.
    pub fn to_json(&self) -> Result<Value, SerializeError> {
        Ok(Value::Object(serialize_outcome(self)?))
    }

    /// Encodes this outcome as a compact JSON string.
    pub fn to_json_string(&self) -> Result<String, SerializeError> {
        Ok(serde_json::to_string(&self.to_json()?)?)
    }

    /// Writes this outcome as a compact JSON document to the given writer.
    pub fn serialize(&self, writer: impl io::Write) -> Result<(), SerializeError> {
        serde_json::to_writer(writer, &self.to_json()?)?;
        Ok(())
    }

    /// Decodes an outcome from a JSON document.
    ///
    /// The decoded outcome is finished. Fields derived from the step tree (the
    /// counts) are recomputed rather than read back.
    pub fn from_json(document: &Value) -> Result<Self, MalformedDocument> {
        deserialize_outcome(document)
    }

    /// Decodes an outcome from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, MalformedDocument> {
        let document: Value = serde_json::from_str(s).map_err(MalformedDocument::Json)?;
        Self::from_json(&document)
    }

    /// Decodes an outcome from a reader producing a JSON document.
    pub fn deserialize(reader: impl io::Read) -> Result<Self, MalformedDocument> {
        let document: Value = serde_json::from_reader(reader).map_err(MalformedDocument::Json)?;
        Self::from_json(&document)
    }
}

fn serialize_outcome(outcome: &TestOutcome) -> Result<Map<String, Value>, serde_json::Error> {
    // Use the destructuring syntax to ensure that all fields are handled.
    let TestOutcome {
        method_name,
        title: _,
        test_case,
        start_time,
        duration_ms,
        manual,
        session_id,
        qualifier,
        user_story,
        tags,
        issues,
        steps,
        data_table,
        annotated_result: _,
        finished: _,
    } = outcome;

    let counts = outcome.counts();
    let mut obj = Map::new();
    obj.insert(TITLE_FIELD.into(), escape(&outcome.title()).into());
    obj.insert(NAME_FIELD.into(), method_name.as_str().into());
    obj.insert(TEST_CASE_FIELD.into(), serialize_test_case(test_case.as_deref()));
    obj.insert(RESULT_FIELD.into(), outcome.result().name().into());
    if let Some(qualifier) = qualifier {
        obj.insert(QUALIFIER_FIELD.into(), escape(qualifier).into());
    }
    obj.insert(STEPS_FIELD.into(), counts.total.to_string().into());
    obj.insert(SUCCESSFUL_FIELD.into(), counts.success.to_string().into());
    obj.insert(FAILURES_FIELD.into(), counts.failure.to_string().into());
    if counts.error > 0 {
        obj.insert(ERRORS_FIELD.into(), counts.error.to_string().into());
    }
    obj.insert(SKIPPED_FIELD.into(), counts.skipped.to_string().into());
    obj.insert(IGNORED_FIELD.into(), counts.ignored.to_string().into());
    obj.insert(PENDING_FIELD.into(), counts.pending.to_string().into());
    obj.insert(DURATION_FIELD.into(), duration_ms.to_string().into());
    if let Some(start_time) = start_time {
        obj.insert(TIMESTAMP_FIELD.into(), start_time.to_rfc3339().into());
    }
    if *manual {
        obj.insert(MANUAL_FIELD.into(), "true".into());
    }
    if let Some(session_id) = session_id.as_deref().filter(|id| !id.is_empty()) {
        obj.insert(SESSION_ID_FIELD.into(), session_id.into());
    }
    obj.insert(USER_STORY_FIELD.into(), serde_json::to_value(user_story)?);
    obj.insert(ISSUES_FIELD.into(), serde_json::to_value(issues)?);
    obj.insert(TAGS_FIELD.into(), serde_json::to_value(tags)?);
    obj.insert(TEST_STEPS_FIELD.into(), serde_json::to_value(steps.roots())?);
    obj.insert(EXAMPLES_FIELD.into(), serde_json::to_value(data_table)?);

    Ok(obj)
}

fn serialize_test_case(test_case: Option<&str>) -> Value {
    match test_case {
        Some(classname) => {
            let mut obj = Map::new();
            obj.insert(CLASSNAME_FIELD.into(), classname.into());
            Value::Object(obj)
        }
        None => Value::Null,
    }
}

fn deserialize_outcome(document: &Value) -> Result<TestOutcome, MalformedDocument> {
    let obj = document.as_object().ok_or(MalformedDocument::NotAnObject {
        found: value_kind(document),
    })?;

    let name = required_str(obj, NAME_FIELD)?;
    let test_case = read_test_case(obj)?;
    let saved_result = read_result(obj)?;
    let steps: Vec<Step> = read_structure(obj, TEST_STEPS_FIELD)?.ok_or(
        MalformedDocument::MissingField {
            field: TEST_STEPS_FIELD,
        },
    )?;

    let mut builder = TestOutcome::builder(name);
    if let Some(test_case) = test_case {
        builder.set_test_case(test_case);
    }
    match obj.get(TITLE_FIELD) {
        Some(Value::String(title)) => {
            builder.set_title(unescape(title));
        }
        Some(other) => {
            debug!(
                "ignoring non-string `{TITLE_FIELD}` ({}) in outcome for `{name}`",
                value_kind(other)
            );
        }
        None => {}
    }
    match obj.get(QUALIFIER_FIELD) {
        Some(Value::String(qualifier)) => {
            builder.set_qualifier(unescape(qualifier));
        }
        Some(Value::Null) | None => {}
        Some(other) => {
            return Err(MalformedDocument::InvalidField {
                field: QUALIFIER_FIELD,
                reason: format!("expected a string, found {}", value_kind(other)),
            });
        }
    }
    builder.set_duration_ms(read_duration(obj));
    if let Some(start_time) = read_timestamp(obj) {
        builder.set_start_time(start_time);
    }
    builder.set_manual(read_manual(obj));
    match obj.get(SESSION_ID_FIELD) {
        Some(Value::String(session_id)) => {
            builder.set_session_id(session_id.as_str());
        }
        Some(other) => {
            debug!(
                "ignoring non-string `{SESSION_ID_FIELD}` ({}) in outcome for `{name}`",
                value_kind(other)
            );
        }
        None => {}
    }
    if let Some(story) = read_structure::<Option<Story>>(obj, USER_STORY_FIELD)?.flatten() {
        builder.set_user_story(story);
    }
    for issue in read_structure::<Vec<String>>(obj, ISSUES_FIELD)?.unwrap_or_default() {
        builder.add_issue(issue);
    }
    builder.add_tags(read_structure::<Vec<Tag>>(obj, TAGS_FIELD)?.unwrap_or_default());
    if let Some(table) = read_structure::<Option<DataTable>>(obj, EXAMPLES_FIELD)?.flatten() {
        builder.set_data_table(table);
    }

    let has_steps = !steps.is_empty();
    builder.add_steps(steps);
    if !has_steps {
        builder.set_annotated_result(saved_result);
    }

    let mut outcome = builder.build();
    if has_steps && outcome.result() != saved_result {
        debug!(
            "outcome for `{name}` was saved as {saved_result}, \
             but its steps merge to {}",
            outcome.result()
        );
    }
    outcome.finished = true;
    Ok(outcome)
}

fn required_str<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, MalformedDocument> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(MalformedDocument::InvalidField {
            field,
            reason: format!("expected a string, found {}", value_kind(other)),
        }),
        None => Err(MalformedDocument::MissingField { field }),
    }
}

fn read_test_case(obj: &Map<String, Value>) -> Result<Option<String>, MalformedDocument> {
    match obj.get(TEST_CASE_FIELD) {
        Some(Value::Null) => Ok(None),
        Some(Value::Object(test_case)) => match test_case.get(CLASSNAME_FIELD) {
            Some(Value::String(classname)) => Ok(Some(classname.clone())),
            _ => Err(MalformedDocument::InvalidField {
                field: TEST_CASE_FIELD,
                reason: format!("expected a string `{CLASSNAME_FIELD}`"),
            }),
        },
        Some(other) => Err(MalformedDocument::InvalidField {
            field: TEST_CASE_FIELD,
            reason: format!("expected an object or null, found {}", value_kind(other)),
        }),
        None => Err(MalformedDocument::MissingField {
            field: TEST_CASE_FIELD,
        }),
    }
}

fn read_result(obj: &Map<String, Value>) -> Result<ResultState, MalformedDocument> {
    required_str(obj, RESULT_FIELD)?
        .parse::<ResultState>()
        .map_err(|error| MalformedDocument::InvalidField {
            field: RESULT_FIELD,
            reason: error.to_string(),
        })
}

/// Deserializes a structured field, returning `None` if it is absent.
fn read_structure<T: DeserializeOwned>(
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<T>, MalformedDocument> {
    obj.get(field)
        .map(|value| {
            T::deserialize(value)
                .map_err(|error| MalformedDocument::InvalidStructure { field, error })
        })
        .transpose()
}

fn read_duration(obj: &Map<String, Value>) -> u64 {
    let duration = match obj.get(DURATION_FIELD) {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_u64(),
        Some(_) => None,
        None => return 0,
    };
    duration.unwrap_or_else(|| {
        debug!("unreadable `{DURATION_FIELD}` in outcome document, defaulting to 0");
        0
    })
}

fn read_timestamp(obj: &Map<String, Value>) -> Option<DateTime<FixedOffset>> {
    let value = obj.get(TIMESTAMP_FIELD)?;
    let parsed = value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
    if parsed.is_none() {
        debug!("unreadable `{TIMESTAMP_FIELD}` in outcome document: {value}");
    }
    parsed
}

fn read_manual(obj: &Map<String, Value>) -> bool {
    match obj.get(MANUAL_FIELD) {
        Some(Value::Bool(manual)) => *manual,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
