//! Definition-time errors.

use thiserror::Error;

/// Errors raised while parsing a state machine definition.
///
/// Parsing never evaluates data, so these are never raised while an
/// execution runs.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("Malformed definition: {0}")]
    MalformedJson(String),

    #[error("State '{state}' has unknown Type '{found}'")]
    UnknownStateType { state: String, found: String },

    #[error("State '{state}' has an invalid choice rule: {reason}")]
    InvalidChoiceRule { state: String, reason: String },

    #[error("State '{state}' field '{field}' has an invalid path: {reason}")]
    InvalidPath {
        state: String,
        field: String,
        reason: String,
    },

    #[error("State '{state}' field '{field}' has an invalid template: {reason}")]
    InvalidTemplate {
        state: String,
        field: String,
        reason: String,
    },

    #[error("State '{state}' field '{field}' is invalid: {reason}")]
    InvalidField {
        state: String,
        field: String,
        reason: String,
    },

    #[error("Definition failed validation with {} issue(s): {}", .0.len(), summarize(.0))]
    Invalid(Vec<DefinitionIssue>),
}

/// A reference problem found by the validation pass.
///
/// Validation collects every issue instead of stopping at the first one.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DefinitionIssue {
    #[error("'{scope}' declares no states")]
    NoStates { scope: String },

    #[error("'{scope}' declares state '{state}' more than once")]
    DuplicateState { scope: String, state: String },

    #[error("'{scope}' StartAt '{target}' is not a declared state")]
    UnknownStartAt { scope: String, target: String },

    #[error("State '{state}' references undeclared state '{target}'")]
    UnknownTransition { state: String, target: String },

    #[error("State '{state}' uses States.ALL together with other errors or before the last entry")]
    MisplacedWildcard { state: String },
}

fn summarize(issues: &[DefinitionIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
