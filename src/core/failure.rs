//! Runtime error names and failure values.
//!
//! Failures raised while running a state machine are plain values tagged
//! with an ASL error name, so they can be matched by Retry and Catch
//! policies and written into payloads.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::fmt;

/// ASL error name.
///
/// The predefined `States.*` names are variants; anything else (the `Error`
/// of a Fail state, a custom error from a task) is `Custom`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ErrorName {
    /// `States.ALL` - wildcard, matches every error
    All,
    Timeout,
    /// `States.TaskFailed` - also a wildcard for everything but `States.Timeout`
    TaskFailed,
    Runtime,
    NoChoiceMatched,
    ParameterPathFailure,
    ResultPathMatchFailure,
    IntrinsicFailure,
    BranchFailed,
    Permissions,
    HeartbeatTimeout,
    Custom(String),
}

impl ErrorName {
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => "States.ALL",
            Self::Timeout => "States.Timeout",
            Self::TaskFailed => "States.TaskFailed",
            Self::Runtime => "States.Runtime",
            Self::NoChoiceMatched => "States.NoChoiceMatched",
            Self::ParameterPathFailure => "States.ParameterPathFailure",
            Self::ResultPathMatchFailure => "States.ResultPathMatchFailure",
            Self::IntrinsicFailure => "States.IntrinsicFailure",
            Self::BranchFailed => "States.BranchFailed",
            Self::Permissions => "States.Permissions",
            Self::HeartbeatTimeout => "States.HeartbeatTimeout",
            Self::Custom(name) => name,
        }
    }

    pub fn parse(name: &str) -> Self {
        match name {
            "States.ALL" => Self::All,
            "States.Timeout" => Self::Timeout,
            "States.TaskFailed" => Self::TaskFailed,
            "States.Runtime" => Self::Runtime,
            "States.NoChoiceMatched" => Self::NoChoiceMatched,
            "States.ParameterPathFailure" => Self::ParameterPathFailure,
            "States.ResultPathMatchFailure" => Self::ResultPathMatchFailure,
            "States.IntrinsicFailure" => Self::IntrinsicFailure,
            "States.BranchFailed" => Self::BranchFailed,
            "States.Permissions" => Self::Permissions,
            "States.HeartbeatTimeout" => Self::HeartbeatTimeout,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Whether an `ErrorEquals` entry naming `self` matches `error`.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stepwise::core::ErrorName;
    ///
    /// let custom = ErrorName::Custom("Oops".into());
    /// assert!(ErrorName::All.matches(&custom));
    /// assert!(ErrorName::TaskFailed.matches(&custom));
    /// assert!(!ErrorName::TaskFailed.matches(&ErrorName::Timeout));
    /// assert!(!ErrorName::Runtime.matches(&custom));
    /// ```
    pub fn matches(&self, error: &ErrorName) -> bool {
        match self {
            Self::All => true,
            Self::TaskFailed => *error != Self::Timeout,
            pattern => pattern == error,
        }
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// A runtime failure: an error name plus a human readable cause.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    #[serde(rename = "Error")]
    pub error: ErrorName,
    #[serde(rename = "Cause")]
    pub cause: String,
}

impl Failure {
    pub fn new(error: ErrorName, cause: impl Into<String>) -> Self {
        Self {
            error,
            cause: cause.into(),
        }
    }

    pub fn runtime(cause: impl Into<String>) -> Self {
        Self::new(ErrorName::Runtime, cause)
    }

    /// The `{"Error": ..., "Cause": ...}` object written by a Catch.
    pub fn to_output(&self) -> Value {
        json!({
            "Error": self.error.as_str(),
            "Cause": self.cause,
        })
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.cause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predefined_names_round_trip() {
        for name in [
            "States.ALL",
            "States.Timeout",
            "States.TaskFailed",
            "States.Runtime",
            "States.NoChoiceMatched",
            "States.ParameterPathFailure",
            "States.ResultPathMatchFailure",
            "States.IntrinsicFailure",
            "States.BranchFailed",
            "States.Permissions",
            "States.HeartbeatTimeout",
        ] {
            let parsed = ErrorName::parse(name);
            assert!(!matches!(parsed, ErrorName::Custom(_)), "{name}");
            assert_eq!(parsed.as_str(), name);
        }
    }

    #[test]
    fn unknown_names_are_custom() {
        assert_eq!(
            ErrorName::parse("Payment.Declined"),
            ErrorName::Custom("Payment.Declined".to_string())
        );
    }

    #[test]
    fn exact_names_match_only_themselves() {
        let name = ErrorName::Custom("A".into());
        assert!(name.matches(&ErrorName::Custom("A".into())));
        assert!(!name.matches(&ErrorName::Custom("B".into())));
        assert!(ErrorName::Timeout.matches(&ErrorName::Timeout));
    }

    #[test]
    fn failure_output_shape() {
        let failure = Failure::new(ErrorName::NoChoiceMatched, "no rule matched");
        assert_eq!(
            failure.to_output(),
            json!({"Error": "States.NoChoiceMatched", "Cause": "no rule matched"})
        );
        assert_eq!(
            serde_json::to_value(&failure).unwrap(),
            failure.to_output()
        );
    }
}
