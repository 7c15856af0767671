//! Execution status and state type enumerations.
//!
//! Both are closed sets with pure inspection methods.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of an execution.
///
/// An execution starts `Running` and moves to exactly one final status.
///
/// # Example
///
/// ```rust
/// use stepwise::core::ExecutionStatus;
///
/// assert!(!ExecutionStatus::Running.is_final());
/// assert!(ExecutionStatus::TimedOut.is_final());
/// assert!(ExecutionStatus::TimedOut.is_error());
/// assert!(!ExecutionStatus::Succeeded.is_error());
/// assert_eq!(ExecutionStatus::Aborted.name(), "ABORTED");
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Aborted,
}

impl ExecutionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::TimedOut => "TIMED_OUT",
            Self::Aborted => "ABORTED",
        }
    }

    /// Final statuses never change again.
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Error statuses are the final statuses other than `Succeeded`.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut | Self::Aborted)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The eight ASL state types.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateType {
    Task,
    Pass,
    Wait,
    Choice,
    Succeed,
    Fail,
    Parallel,
    Map,
}

impl StateType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::Pass => "Pass",
            Self::Wait => "Wait",
            Self::Choice => "Choice",
            Self::Succeed => "Succeed",
            Self::Fail => "Fail",
            Self::Parallel => "Parallel",
            Self::Map => "Map",
        }
    }

    /// Parse the `Type` field of a state definition.
    pub fn from_type_field(value: &str) -> Option<Self> {
        Some(match value {
            "Task" => Self::Task,
            "Pass" => Self::Pass,
            "Wait" => Self::Wait,
            "Choice" => Self::Choice,
            "Succeed" => Self::Succeed,
            "Fail" => Self::Fail,
            "Parallel" => Self::Parallel,
            "Map" => Self::Map,
            _ => return None,
        })
    }

    /// Succeed and Fail end the (sub-)machine without a Next/End field.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Fail)
    }
}
