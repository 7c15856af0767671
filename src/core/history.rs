//! Execution event history.
//!
//! Provides append-only tracking of everything an execution does: states
//! entered and exited, task invocations, retries, failures and the terminal
//! outcome.

use crate::core::status::StateType;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

/// Kind of a history event.
///
/// Serializes to the ASL event name, e.g. `TaskStateEntered` or
/// `MapIterationSucceeded`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HistoryEventType {
    ExecutionStarted,
    ExecutionSucceeded,
    ExecutionFailed,
    ExecutionAborted,
    ExecutionTimedOut,
    StateEntered(StateType),
    StateExited(StateType),
    StateRetryScheduled,
    TaskScheduled,
    TaskSucceeded,
    TaskFailed,
    TaskTimedOut,
    ChoiceNoMatch,
    WaitStateAborted,
    ParallelStateStarted,
    ParallelStateSucceeded,
    ParallelStateFailed,
    ParallelStateAborted,
    MapStateStarted,
    MapStateSucceeded,
    MapStateFailed,
    MapStateAborted,
    MapIterationStarted,
    MapIterationSucceeded,
    MapIterationFailed,
    MapIterationAborted,
}

impl HistoryEventType {
    /// Terminal events close the history.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExecutionSucceeded
                | Self::ExecutionFailed
                | Self::ExecutionAborted
                | Self::ExecutionTimedOut
        )
    }
}

impl fmt::Display for HistoryEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StateEntered(kind) => write!(f, "{}StateEntered", kind.name()),
            Self::StateExited(kind) => write!(f, "{}StateExited", kind.name()),
            other => write!(f, "{other:?}"),
        }
    }
}

impl Serialize for HistoryEventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A single recorded event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEvent {
    /// 1-based position in the history
    pub id: u64,
    /// Id of the event recorded immediately before this one
    pub previous_event_id: u64,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// What happened
    #[serde(rename = "type")]
    pub event_type: HistoryEventType,
    /// Event specific details (state name, input, output, error, ...)
    pub detail: Value,
}

/// Ordered, append-only history of execution events.
///
/// Once a terminal event (`ExecutionSucceeded`, `ExecutionFailed`,
/// `ExecutionAborted`, `ExecutionTimedOut`) is recorded the history is
/// sealed and further events are rejected.
///
/// # Example
///
/// ```rust
/// use stepwise::core::{EventHistory, HistoryEventType};
/// use serde_json::json;
///
/// let mut history = EventHistory::new();
/// history.record(HistoryEventType::ExecutionStarted, json!({"input": {}}));
/// history.record(HistoryEventType::ExecutionSucceeded, json!({"output": {}}));
///
/// assert!(history.is_sealed());
/// assert!(history.record(HistoryEventType::TaskScheduled, json!({})).is_none());
/// assert_eq!(history.events().len(), 2);
/// ```
#[derive(Clone, Debug, Default, Serialize)]
pub struct EventHistory {
    events: Vec<HistoryEvent>,
    sealed: bool,
}

impl EventHistory {
    /// Create a new empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, returning its id.
    ///
    /// Returns `None` without recording anything if the history is sealed.
    pub fn record(&mut self, event_type: HistoryEventType, detail: Value) -> Option<u64> {
        if self.sealed {
            return None;
        }
        let id = self.events.len() as u64 + 1;
        self.events.push(HistoryEvent {
            id,
            previous_event_id: id - 1,
            timestamp: Utc::now(),
            event_type,
            detail,
        });
        if event_type.is_terminal() {
            self.sealed = true;
        }
        Some(id)
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Get all events in the order they were recorded.
    pub fn events(&self) -> &[HistoryEvent] {
        &self.events
    }

    /// Names of the states entered, in order.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stepwise::core::{EventHistory, HistoryEventType, StateType};
    /// use serde_json::json;
    ///
    /// let mut history = EventHistory::new();
    /// history.record(HistoryEventType::StateEntered(StateType::Pass), json!({"name": "First"}));
    /// history.record(HistoryEventType::StateExited(StateType::Pass), json!({"name": "First"}));
    /// history.record(HistoryEventType::StateEntered(StateType::Succeed), json!({"name": "Done"}));
    ///
    /// assert_eq!(history.get_path(), vec!["First", "Done"]);
    /// ```
    pub fn get_path(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter(|event| matches!(event.event_type, HistoryEventType::StateEntered(_)))
            .filter_map(|event| event.detail.get("name").and_then(Value::as_str))
            .collect()
    }

    /// Calculate total duration from first to last event.
    ///
    /// Returns `None` if there are no events.
    pub fn duration(&self) -> Option<Duration> {
        if let (Some(first), Some(last)) = (self.events.first(), self.events.last()) {
            last.timestamp
                .signed_duration_since(first.timestamp)
                .to_std()
                .ok()
        } else {
            None
        }
    }

    /// Events of one type, in order.
    pub fn of_type(&self, event_type: HistoryEventType) -> Vec<&HistoryEvent> {
        self.events
            .iter()
            .filter(|event| event.event_type == event_type)
            .collect()
    }
}
