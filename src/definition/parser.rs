//! Definition parser: raw ASL JSON to a typed [`StateMachine`].
//!
//! Parsing happens in two passes. The compile pass builds the tree and
//! fails fast on structural problems (bad JSON, unknown `Type`, malformed
//! paths, templates or choice rules). The validation pass then checks
//! references across the whole tree and reports every problem it finds.

use crate::core::{ErrorName, JsonPath, StateType};
use crate::definition::choice::compile_branch;
use crate::definition::error::{DefinitionIssue, ParseError};
use crate::definition::model::*;
use crate::definition::template::{compile_template, PayloadTemplate};
use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use stillwater::validation::Validation;
use stillwater::NonEmptyVec;

/// Parse a definition from its JSON text.
///
/// # Example
///
/// ```rust
/// use stepwise::definition::parse;
///
/// let machine = parse(r#"{
///     "StartAt": "Hello",
///     "States": {
///         "Hello": {"Type": "Pass", "Result": "world", "End": true}
///     }
/// }"#).unwrap();
///
/// assert_eq!(machine.start_at, "Hello");
/// assert!(machine.state("Hello").is_some());
/// ```
pub fn parse(definition: &str) -> Result<StateMachine, ParseError> {
    let raw: RawMachine = serde_json::from_str(definition)
        .map_err(|e| ParseError::MalformedJson(e.to_string()))?;
    finish(raw)
}

/// Parse a definition that is already a JSON value.
pub fn parse_value(definition: &Value) -> Result<StateMachine, ParseError> {
    let raw = RawMachine::deserialize(definition)
        .map_err(|e| ParseError::MalformedJson(e.to_string()))?;
    finish(raw)
}

fn finish(raw: RawMachine) -> Result<StateMachine, ParseError> {
    let duplicates = duplicate_states(&raw, "StateMachine");
    let machine = compile_machine(raw)?;
    let checks = vec![duplicates, validate_machine(&machine, "StateMachine")];
    match Validation::all_vec(checks).map(|_| ()) {
        Validation::Success(_) => Ok(machine),
        Validation::Failure(issues) => Err(ParseError::Invalid(issues.iter().cloned().collect())),
    }
}

// ── Raw shapes ──────────────────────────────────────────────────────

/// Distinguish an absent field (`None`) from an explicit `null` (`Some(None)`).
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawMachine {
    comment: Option<String>,
    version: Option<String>,
    start_at: String,
    states: RawStates,
    timeout_seconds: Option<u64>,
}

/// The `States` object, keeping track of names declared more than once.
///
/// Only text input can carry repeated keys; a `serde_json::Value` object
/// has already collapsed them.
#[derive(Debug, Default)]
struct RawStates {
    entries: BTreeMap<String, RawState>,
    duplicates: Vec<String>,
}

impl<'de> Deserialize<'de> for RawStates {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StatesVisitor;

        impl<'de> Visitor<'de> for StatesVisitor {
            type Value = RawStates;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of named states")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RawStates, A::Error> {
                let mut states = RawStates::default();
                while let Some((name, state)) = map.next_entry::<String, RawState>()? {
                    if !states.entries.contains_key(&name) {
                        states.entries.insert(name, state);
                    } else if !states.duplicates.contains(&name) {
                        states.duplicates.push(name);
                    }
                }
                Ok(states)
            }
        }

        deserializer.deserialize_map(StatesVisitor)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    #[serde(rename = "Type")]
    kind: String,
    comment: Option<String>,
    next: Option<String>,
    end: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    input_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    output_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    result_path: Option<Option<String>>,
    parameters: Option<Value>,
    result_selector: Option<Value>,
    #[serde(default, deserialize_with = "nullable")]
    result: Option<Option<Value>>,
    resource: Option<String>,
    timeout_seconds: Option<u64>,
    #[serde(default)]
    retry: Vec<RawRetrier>,
    #[serde(default)]
    catch: Vec<RawCatcher>,
    choices: Option<Vec<Value>>,
    default: Option<String>,
    seconds: Option<u64>,
    timestamp: Option<String>,
    seconds_path: Option<String>,
    timestamp_path: Option<String>,
    error: Option<String>,
    cause: Option<String>,
    branches: Option<Vec<RawMachine>>,
    iterator: Option<RawMachine>,
    item_processor: Option<RawMachine>,
    items_path: Option<String>,
    item_selector: Option<Value>,
    max_concurrency: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawRetrier {
    error_equals: Vec<String>,
    interval_seconds: Option<f64>,
    max_attempts: Option<u32>,
    backoff_rate: Option<f64>,
    max_delay_seconds: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawCatcher {
    error_equals: Vec<String>,
    next: String,
    #[serde(default, deserialize_with = "nullable")]
    result_path: Option<Option<String>>,
}

// ── Compile pass ────────────────────────────────────────────────────

fn compile_machine(raw: RawMachine) -> Result<StateMachine, ParseError> {
    let mut states = BTreeMap::new();
    for (name, raw_state) in raw.states.entries {
        let state = compile_state(&name, raw_state)?;
        states.insert(name, state);
    }
    Ok(StateMachine {
        comment: raw.comment,
        version: raw.version,
        start_at: raw.start_at,
        states,
        timeout_seconds: raw.timeout_seconds,
    })
}

fn compile_state(name: &str, mut raw: RawState) -> Result<State, ParseError> {
    let state_type =
        StateType::from_type_field(&raw.kind).ok_or_else(|| ParseError::UnknownStateType {
            state: name.to_string(),
            found: raw.kind.clone(),
        })?;
    check_allowed_fields(name, state_type, &raw)?;

    let kind = match state_type {
        StateType::Task => StateKind::Task(TaskState {
            resource: raw
                .resource
                .take()
                .ok_or_else(|| invalid(name, "Resource", "Task requires a Resource"))?,
            io: data_flow(name, &raw)?,
            timeout_seconds: raw.timeout_seconds,
            retry: retriers(name, &raw.retry)?,
            catch: catchers(name, &raw.catch)?,
            transition: transition(name, &raw)?,
        }),
        StateType::Pass => StateKind::Pass(PassState {
            io: data_flow(name, &raw)?,
            result: raw.result.take().map(|result| result.unwrap_or(Value::Null)),
            transition: transition(name, &raw)?,
        }),
        StateType::Wait => StateKind::Wait(WaitState {
            duration: wait_duration(name, &raw)?,
            io: data_flow(name, &raw)?,
            transition: transition(name, &raw)?,
        }),
        StateType::Choice => {
            let rules = raw
                .choices
                .as_deref()
                .filter(|rules| !rules.is_empty())
                .ok_or_else(|| invalid(name, "Choices", "Choice requires a non-empty Choices array"))?;
            let choices = rules
                .iter()
                .enumerate()
                .map(|(index, rule)| {
                    compile_branch(rule)
                        .map(|(rule, next)| ChoiceBranch { rule, next })
                        .map_err(|reason| ParseError::InvalidChoiceRule {
                            state: name.to_string(),
                            reason: format!("rule {index}: {reason}"),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?;
            StateKind::Choice(ChoiceState {
                choices,
                default: raw.default.take(),
                io: data_flow(name, &raw)?,
            })
        }
        StateType::Succeed => StateKind::Succeed(SucceedState {
            io: data_flow(name, &raw)?,
        }),
        StateType::Fail => StateKind::Fail(FailState {
            error: raw.error.take(),
            cause: raw.cause.take(),
        }),
        StateType::Parallel => {
            let branches = raw
                .branches
                .take()
                .filter(|branches| !branches.is_empty())
                .ok_or_else(|| invalid(name, "Branches", "Parallel requires a non-empty Branches array"))?
                .into_iter()
                .map(compile_machine)
                .collect::<Result<Vec<_>, _>>()?;
            StateKind::Parallel(ParallelState {
                branches,
                io: data_flow(name, &raw)?,
                retry: retriers(name, &raw.retry)?,
                catch: catchers(name, &raw.catch)?,
                transition: transition(name, &raw)?,
            })
        }
        StateType::Map => {
            let iterator = raw
                .item_processor
                .take()
                .or_else(|| raw.iterator.take())
                .ok_or_else(|| invalid(name, "Iterator", "Map requires an Iterator or ItemProcessor"))?;
            let items_path = match raw.items_path.as_deref() {
                Some(path) => compile_path(name, "ItemsPath", path)?,
                None => JsonPath::root(),
            };
            // Legacy Map states use Parameters as the per-item selector.
            let selector = raw.item_selector.take().or_else(|| raw.parameters.take());
            let item_selector = selector
                .map(|value| template(name, "ItemSelector", &value))
                .transpose()?;
            StateKind::Map(MapState {
                iterator: compile_machine(iterator)?,
                items_path,
                item_selector,
                max_concurrency: raw
                    .max_concurrency
                    .map(|n| usize::try_from(n).unwrap_or(usize::MAX))
                    .unwrap_or(0),
                io: data_flow(name, &raw)?,
                retry: retriers(name, &raw.retry)?,
                catch: catchers(name, &raw.catch)?,
                transition: transition(name, &raw)?,
            })
        }
    };

    Ok(State {
        name: name.to_string(),
        comment: raw.comment,
        kind,
    })
}

fn invalid(state: &str, field: &str, reason: &str) -> ParseError {
    ParseError::InvalidField {
        state: state.to_string(),
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn present_fields(raw: &RawState) -> Vec<&'static str> {
    let mut fields = Vec::new();
    let mut mark = |present: bool, field: &'static str| {
        if present {
            fields.push(field);
        }
    };
    mark(raw.next.is_some(), "Next");
    mark(raw.end.is_some(), "End");
    mark(raw.input_path.is_some(), "InputPath");
    mark(raw.output_path.is_some(), "OutputPath");
    mark(raw.result_path.is_some(), "ResultPath");
    mark(raw.parameters.is_some(), "Parameters");
    mark(raw.result_selector.is_some(), "ResultSelector");
    mark(raw.result.is_some(), "Result");
    mark(raw.resource.is_some(), "Resource");
    mark(raw.timeout_seconds.is_some(), "TimeoutSeconds");
    mark(!raw.retry.is_empty(), "Retry");
    mark(!raw.catch.is_empty(), "Catch");
    mark(raw.choices.is_some(), "Choices");
    mark(raw.default.is_some(), "Default");
    mark(raw.seconds.is_some(), "Seconds");
    mark(raw.timestamp.is_some(), "Timestamp");
    mark(raw.seconds_path.is_some(), "SecondsPath");
    mark(raw.timestamp_path.is_some(), "TimestampPath");
    mark(raw.error.is_some(), "Error");
    mark(raw.cause.is_some(), "Cause");
    mark(raw.branches.is_some(), "Branches");
    mark(raw.iterator.is_some(), "Iterator");
    mark(raw.item_processor.is_some(), "ItemProcessor");
    mark(raw.items_path.is_some(), "ItemsPath");
    mark(raw.item_selector.is_some(), "ItemSelector");
    mark(raw.max_concurrency.is_some(), "MaxConcurrency");
    fields
}

fn allowed_fields(state_type: StateType) -> &'static [&'static str] {
    match state_type {
        StateType::Task => &[
            "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters",
            "ResultSelector", "Resource", "TimeoutSeconds", "Retry", "Catch",
        ],
        StateType::Pass => &[
            "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters", "Result",
        ],
        StateType::Wait => &[
            "Next", "End", "InputPath", "OutputPath", "Seconds", "Timestamp", "SecondsPath",
            "TimestampPath",
        ],
        StateType::Choice => &["InputPath", "OutputPath", "Choices", "Default"],
        StateType::Succeed => &["InputPath", "OutputPath"],
        StateType::Fail => &["Error", "Cause"],
        StateType::Parallel => &[
            "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters",
            "ResultSelector", "Retry", "Catch", "Branches",
        ],
        StateType::Map => &[
            "Next", "End", "InputPath", "OutputPath", "ResultPath", "Parameters",
            "ResultSelector", "Retry", "Catch", "Iterator", "ItemProcessor", "ItemsPath",
            "ItemSelector", "MaxConcurrency",
        ],
    }
}

fn check_allowed_fields(name: &str, state_type: StateType, raw: &RawState) -> Result<(), ParseError> {
    let allowed = allowed_fields(state_type);
    match present_fields(raw)
        .into_iter()
        .find(|field| !allowed.contains(field))
    {
        Some(field) => Err(invalid(
            name,
            field,
            &format!("not supported by {} states", state_type.name()),
        )),
        None => Ok(()),
    }
}

fn transition(name: &str, raw: &RawState) -> Result<Transition, ParseError> {
    match (&raw.next, raw.end.unwrap_or(false)) {
        (Some(next), false) => Ok(Transition::Next(next.clone())),
        (None, true) => Ok(Transition::End),
        (Some(_), true) => Err(invalid(name, "Next", "cannot declare both Next and End")),
        (None, false) => Err(invalid(name, "Next", "must declare either Next or End: true")),
    }
}

fn compile_path(state: &str, field: &str, raw: &str) -> Result<JsonPath, ParseError> {
    JsonPath::parse(raw).map_err(|e| ParseError::InvalidPath {
        state: state.to_string(),
        field: field.to_string(),
        reason: e.to_string(),
    })
}

fn payload_path(state: &str, field: &str, raw: &str) -> Result<JsonPath, ParseError> {
    let path = compile_path(state, field, raw)?;
    if path.is_context() {
        return Err(ParseError::InvalidPath {
            state: state.to_string(),
            field: field.to_string(),
            reason: "context paths are not allowed here".to_string(),
        });
    }
    Ok(path)
}

fn path_filter(
    state: &str,
    field: &str,
    value: &Option<Option<String>>,
) -> Result<PathFilter, ParseError> {
    match value {
        None => Ok(PathFilter::default()),
        Some(None) => Ok(PathFilter::Discard),
        Some(Some(raw)) => payload_path(state, field, raw).map(PathFilter::Select),
    }
}

fn result_path(
    state: &str,
    field: &str,
    value: &Option<Option<String>>,
) -> Result<ResultPath, ParseError> {
    match value {
        None => Ok(ResultPath::default()),
        Some(None) => Ok(ResultPath::Discard),
        Some(Some(raw)) => payload_path(state, field, raw).map(ResultPath::Assign),
    }
}

fn template(state: &str, field: &str, value: &Value) -> Result<PayloadTemplate, ParseError> {
    compile_template(value).map_err(|reason| ParseError::InvalidTemplate {
        state: state.to_string(),
        field: field.to_string(),
        reason,
    })
}

fn data_flow(name: &str, raw: &RawState) -> Result<DataFlow, ParseError> {
    Ok(DataFlow {
        input_path: path_filter(name, "InputPath", &raw.input_path)?,
        parameters: raw
            .parameters
            .as_ref()
            .map(|value| template(name, "Parameters", value))
            .transpose()?,
        result_selector: raw
            .result_selector
            .as_ref()
            .map(|value| template(name, "ResultSelector", value))
            .transpose()?,
        result_path: result_path(name, "ResultPath", &raw.result_path)?,
        output_path: path_filter(name, "OutputPath", &raw.output_path)?,
    })
}

fn wait_duration(name: &str, raw: &RawState) -> Result<WaitDuration, ParseError> {
    match (
        raw.seconds,
        raw.timestamp.as_deref(),
        raw.seconds_path.as_deref(),
        raw.timestamp_path.as_deref(),
    ) {
        (Some(seconds), None, None, None) => Ok(WaitDuration::Seconds(seconds)),
        (None, Some(timestamp), None, None) => DateTime::parse_from_rfc3339(timestamp)
            .map(|t| WaitDuration::Timestamp(t.with_timezone(&Utc)))
            .map_err(|e| invalid(name, "Timestamp", &e.to_string())),
        (None, None, Some(path), None) => {
            compile_path(name, "SecondsPath", path).map(WaitDuration::SecondsPath)
        }
        (None, None, None, Some(path)) => {
            compile_path(name, "TimestampPath", path).map(WaitDuration::TimestampPath)
        }
        _ => Err(invalid(
            name,
            "Seconds",
            "exactly one of Seconds, Timestamp, SecondsPath or TimestampPath is required",
        )),
    }
}

fn error_names(name: &str, field: &str, raw: &[String]) -> Result<Vec<ErrorName>, ParseError> {
    if raw.is_empty() {
        return Err(invalid(name, field, "ErrorEquals must not be empty"));
    }
    Ok(raw.iter().map(|error| ErrorName::parse(error)).collect())
}

fn retriers(name: &str, raw: &[RawRetrier]) -> Result<Vec<Retrier>, ParseError> {
    raw.iter()
        .map(|retrier| {
            let backoff_rate = retrier.backoff_rate.unwrap_or(Retrier::DEFAULT_BACKOFF_RATE);
            if !(backoff_rate.is_finite() && backoff_rate >= 1.0) {
                return Err(invalid(name, "Retry", "BackoffRate must be at least 1.0"));
            }
            let interval_seconds = retrier
                .interval_seconds
                .unwrap_or(Retrier::DEFAULT_INTERVAL_SECONDS);
            if !(interval_seconds.is_finite() && interval_seconds >= 0.0) {
                return Err(invalid(name, "Retry", "IntervalSeconds must not be negative"));
            }
            Ok(Retrier {
                error_equals: error_names(name, "Retry", &retrier.error_equals)?,
                interval_seconds,
                max_attempts: retrier.max_attempts.unwrap_or(Retrier::DEFAULT_MAX_ATTEMPTS),
                backoff_rate,
                max_delay_seconds: retrier.max_delay_seconds,
            })
        })
        .collect()
}

fn catchers(name: &str, raw: &[RawCatcher]) -> Result<Vec<Catcher>, ParseError> {
    raw.iter()
        .map(|catcher| {
            Ok(Catcher {
                error_equals: error_names(name, "Catch", &catcher.error_equals)?,
                next: catcher.next.clone(),
                result_path: result_path(name, "Catch.ResultPath", &catcher.result_path)?,
            })
        })
        .collect()
}

// ── Validation pass ─────────────────────────────────────────────────

fn validate_machine(
    machine: &StateMachine,
    scope: &str,
) -> Validation<(), NonEmptyVec<DefinitionIssue>> {
    let mut checks: Vec<Validation<(), NonEmptyVec<DefinitionIssue>>> = Vec::new();

    if machine.states.is_empty() {
        checks.push(Validation::fail(DefinitionIssue::NoStates {
            scope: scope.to_string(),
        }));
    } else if !machine.states.contains_key(&machine.start_at) {
        checks.push(Validation::fail(DefinitionIssue::UnknownStartAt {
            scope: scope.to_string(),
            target: machine.start_at.clone(),
        }));
    }

    for state in machine.states.values() {
        for target in state.targets() {
            if !machine.states.contains_key(target) {
                checks.push(Validation::fail(DefinitionIssue::UnknownTransition {
                    state: state.name.clone(),
                    target: target.to_string(),
                }));
            }
        }

        let retry_lists: Vec<&[ErrorName]> = state
            .retriers()
            .iter()
            .map(|r| r.error_equals.as_slice())
            .collect();
        let catch_lists: Vec<&[ErrorName]> = state
            .catchers()
            .iter()
            .map(|c| c.error_equals.as_slice())
            .collect();
        if misplaced_wildcard(&retry_lists) || misplaced_wildcard(&catch_lists) {
            checks.push(Validation::fail(DefinitionIssue::MisplacedWildcard {
                state: state.name.clone(),
            }));
        }

        for (index, sub_machine) in state.sub_machines().into_iter().enumerate() {
            let sub_scope = format!("{scope}.{}[{index}]", state.name);
            checks.push(validate_machine(sub_machine, &sub_scope));
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

/// Names declared twice in one `States` object, here or in any branch or
/// iterator below it.
fn duplicate_states(raw: &RawMachine, scope: &str) -> Validation<(), NonEmptyVec<DefinitionIssue>> {
    let mut checks: Vec<Validation<(), NonEmptyVec<DefinitionIssue>>> = raw
        .states
        .duplicates
        .iter()
        .map(|name| {
            Validation::fail(DefinitionIssue::DuplicateState {
                scope: scope.to_string(),
                state: name.clone(),
            })
        })
        .collect();

    for (name, state) in &raw.states.entries {
        let sub_machines = state
            .branches
            .iter()
            .flatten()
            .chain(state.iterator.as_ref())
            .chain(state.item_processor.as_ref());
        for (index, sub_machine) in sub_machines.enumerate() {
            checks.push(duplicate_states(sub_machine, &format!("{scope}.{name}[{index}]")));
        }
    }

    Validation::all_vec(checks).map(|_| ())
}

/// `States.ALL` must appear alone, in the last policy entry.
fn misplaced_wildcard(lists: &[&[ErrorName]]) -> bool {
    lists.iter().enumerate().any(|(index, errors)| {
        errors.contains(&ErrorName::All) && (errors.len() > 1 || index + 1 != lists.len())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse_json(value: Value) -> Result<StateMachine, ParseError> {
        parse_value(&value)
    }

    #[test]
    fn parses_every_state_type() {
        let machine = parse_json(json!({
            "Comment": "all types",
            "StartAt": "P",
            "TimeoutSeconds": 30,
            "States": {
                "P": {"Type": "Pass", "Result": {"x": 1}, "ResultPath": "$.p", "Next": "T"},
                "T": {"Type": "Task", "Resource": "mock:echo", "Next": "W"},
                "W": {"Type": "Wait", "Seconds": 1, "Next": "C"},
                "C": {"Type": "Choice", "Choices": [
                    {"Variable": "$.p.x", "NumericEquals": 1, "Next": "Par"}
                ], "Default": "F"},
                "Par": {"Type": "Parallel", "Branches": [
                    {"StartAt": "B", "States": {"B": {"Type": "Succeed"}}}
                ], "Next": "M"},
                "M": {"Type": "Map", "ItemsPath": "$.items", "MaxConcurrency": 2,
                      "Iterator": {"StartAt": "I", "States": {"I": {"Type": "Pass", "End": true}}},
                      "Next": "S"},
                "S": {"Type": "Succeed"},
                "F": {"Type": "Fail", "Error": "Boom", "Cause": "because"}
            }
        }))
        .unwrap();

        assert_eq!(machine.states.len(), 8);
        assert_eq!(machine.timeout_seconds, Some(30));
        assert_eq!(machine.state("T").unwrap().state_type(), StateType::Task);
        match &machine.state("M").unwrap().kind {
            StateKind::Map(map) => {
                assert_eq!(map.max_concurrency, 2);
                assert_eq!(map.items_path.as_str(), "$.items");
            }
            other => panic!("expected Map, got {other:?}"),
        }
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(parse("{not json"), Err(ParseError::MalformedJson(_))));
        assert!(matches!(
            parse(r#"{"States": {}}"#),
            Err(ParseError::MalformedJson(_))
        ));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = parse_json(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Activity", "End": true}}
        }))
        .unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownStateType {
                state: "A".into(),
                found: "Activity".into()
            }
        );
    }

    #[test]
    fn undeclared_references_are_all_reported() {
        let err = parse_json(json!({
            "StartAt": "Missing",
            "States": {
                "A": {"Type": "Pass", "Next": "Nowhere"},
                "C": {"Type": "Choice", "Choices": [
                    {"Variable": "$.v", "StringEquals": "x", "Next": "A"}
                ], "Default": "Gone"}
            }
        }))
        .unwrap_err();

        match err {
            ParseError::Invalid(issues) => {
                assert_eq!(issues.len(), 3);
                assert!(issues.contains(&DefinitionIssue::UnknownStartAt {
                    scope: "StateMachine".into(),
                    target: "Missing".into()
                }));
                assert!(issues.contains(&DefinitionIssue::UnknownTransition {
                    state: "A".into(),
                    target: "Nowhere".into()
                }));
                assert!(issues.contains(&DefinitionIssue::UnknownTransition {
                    state: "C".into(),
                    target: "Gone".into()
                }));
            }
            other => panic!("expected accumulated issues, got {other:?}"),
        }
    }

    #[test]
    fn branch_references_are_scoped_to_the_branch() {
        let err = parse_json(json!({
            "StartAt": "Par",
            "States": {
                "Par": {"Type": "Parallel", "End": true, "Branches": [
                    {"StartAt": "B", "States": {"B": {"Type": "Pass", "Next": "Outer"}}}
                ]},
                "Outer": {"Type": "Succeed"}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::Invalid(ref issues) if issues.len() == 1));
    }

    #[test]
    fn catch_targets_must_exist() {
        let err = parse_json(json!({
            "StartAt": "T",
            "States": {
                "T": {"Type": "Task", "Resource": "r", "End": true,
                      "Catch": [{"ErrorEquals": ["States.ALL"], "Next": "Handler"}]}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::Invalid(_)));
    }

    #[test]
    fn next_and_end_are_mutually_exclusive() {
        let both = parse_json(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass", "Next": "A", "End": true}}
        }));
        assert!(matches!(both, Err(ParseError::InvalidField { .. })));

        let neither = parse_json(json!({
            "StartAt": "A",
            "States": {"A": {"Type": "Pass"}}
        }));
        assert!(matches!(neither, Err(ParseError::InvalidField { .. })));
    }

    #[test]
    fn invalid_choice_rule_is_rejected() {
        let err = parse_json(json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [{"StringEquals": "x", "Next": "D"}]},
                "D": {"Type": "Succeed"}
            }
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidChoiceRule { .. }));
    }

    #[test]
    fn fields_foreign_to_a_type_are_rejected() {
        let err = parse_json(json!({
            "StartAt": "S",
            "States": {"S": {"Type": "Succeed", "ResultPath": "$.x"}}
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { ref field, .. } if field == "ResultPath"));
    }

    #[test]
    fn wildcard_must_be_last_and_alone() {
        let err = parse_json(json!({
            "StartAt": "T",
            "States": {
                "T": {"Type": "Task", "Resource": "r", "End": true, "Retry": [
                    {"ErrorEquals": ["States.ALL"]},
                    {"ErrorEquals": ["Custom"]}
                ]}
            }
        }))
        .unwrap_err();
        match err {
            ParseError::Invalid(issues) => assert_eq!(
                issues,
                vec![DefinitionIssue::MisplacedWildcard { state: "T".into() }]
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_paths_are_distinguished_from_absent() {
        let machine = parse_json(json!({
            "StartAt": "P",
            "States": {"P": {"Type": "Pass", "InputPath": null, "ResultPath": null, "End": true}}
        }))
        .unwrap();
        match &machine.state("P").unwrap().kind {
            StateKind::Pass(pass) => {
                assert_eq!(pass.io.input_path, PathFilter::Discard);
                assert_eq!(pass.io.output_path, PathFilter::default());
                assert_eq!(pass.io.result_path, ResultPath::Discard);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn retry_defaults_are_applied() {
        let machine = parse_json(json!({
            "StartAt": "T",
            "States": {"T": {"Type": "Task", "Resource": "r", "End": true,
                             "Retry": [{"ErrorEquals": ["States.Timeout"]}]}}
        }))
        .unwrap();
        let retrier = &machine.state("T").unwrap().retriers()[0];
        assert_eq!(retrier.max_attempts, 3);
        assert_eq!(retrier.interval_seconds, 1.0);
        assert_eq!(retrier.backoff_rate, 2.0);
    }

    #[test]
    fn wait_requires_exactly_one_duration() {
        let err = parse_json(json!({
            "StartAt": "W",
            "States": {"W": {"Type": "Wait", "Seconds": 1, "SecondsPath": "$.s", "End": true}}
        }))
        .unwrap_err();
        assert!(matches!(err, ParseError::InvalidField { .. }));
    }

    #[test]
    fn parsing_twice_yields_equal_trees() {
        let definition = json!({
            "StartAt": "C",
            "States": {
                "C": {"Type": "Choice", "Choices": [
                    {"Or": [
                        {"Variable": "$.a", "NumericGreaterThan": 3},
                        {"Variable": "$.b", "StringMatches": "log-*"}
                    ], "Next": "S"}
                ], "Default": "S"},
                "S": {"Type": "Succeed"}
            }
        });
        assert_eq!(parse_json(definition.clone()).unwrap(), parse_json(definition).unwrap());
    }

    #[test]
    fn repeated_state_names_are_rejected() {
        let err = parse(
            r#"{
            "StartAt": "A",
            "States": {
                "A": {"Type": "Pass", "Next": "P"},
                "P": {"Type": "Parallel", "End": true, "Branches": [
                    {"StartAt": "X", "States": {
                        "X": {"Type": "Succeed"},
                        "X": {"Type": "Fail", "Error": "Shadowed"}
                    }}
                ]},
                "A": {"Type": "Succeed"}
            }
        }"#,
        )
        .unwrap_err();

        let ParseError::Invalid(issues) = err else {
            panic!("expected validation issues, got {err:?}");
        };
        assert!(issues.contains(&DefinitionIssue::DuplicateState {
            scope: "StateMachine".into(),
            state: "A".into(),
        }));
        assert!(issues.contains(&DefinitionIssue::DuplicateState {
            scope: "StateMachine.P[0]".into(),
            state: "X".into(),
        }));
        assert_eq!(issues.len(), 2);
    }
}
