//! Typed, immutable component tree produced by the parser.
//!
//! Cross-state references are kept as state names and resolved through
//! the owning [`StateMachine`], so the tree has no cycles.

use crate::core::{ErrorName, JsonPath, StateType};
use crate::definition::choice::ChoiceRule;
use crate::definition::template::PayloadTemplate;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// A compiled state machine (or a Parallel branch / Map iterator).
#[derive(Clone, Debug, PartialEq)]
pub struct StateMachine {
    pub comment: Option<String>,
    pub version: Option<String>,
    pub start_at: String,
    pub states: BTreeMap<String, State>,
    pub timeout_seconds: Option<u64>,
}

impl StateMachine {
    pub fn state(&self, name: &str) -> Option<&State> {
        self.states.get(name)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }
}

/// One named state.
#[derive(Clone, Debug, PartialEq)]
pub struct State {
    pub name: String,
    pub comment: Option<String>,
    pub kind: StateKind,
}

impl State {
    pub fn state_type(&self) -> StateType {
        match &self.kind {
            StateKind::Task(_) => StateType::Task,
            StateKind::Pass(_) => StateType::Pass,
            StateKind::Wait(_) => StateType::Wait,
            StateKind::Choice(_) => StateType::Choice,
            StateKind::Succeed(_) => StateType::Succeed,
            StateKind::Fail(_) => StateType::Fail,
            StateKind::Parallel(_) => StateType::Parallel,
            StateKind::Map(_) => StateType::Map,
        }
    }

    /// Every state name this state can transition to.
    pub fn targets(&self) -> Vec<&str> {
        let mut targets = Vec::new();
        let transition = match &self.kind {
            StateKind::Task(s) => Some(&s.transition),
            StateKind::Pass(s) => Some(&s.transition),
            StateKind::Wait(s) => Some(&s.transition),
            StateKind::Parallel(s) => Some(&s.transition),
            StateKind::Map(s) => Some(&s.transition),
            StateKind::Choice(_) | StateKind::Succeed(_) | StateKind::Fail(_) => None,
        };
        if let Some(Transition::Next(next)) = transition {
            targets.push(next.as_str());
        }
        if let StateKind::Choice(choice) = &self.kind {
            targets.extend(choice.choices.iter().map(|branch| branch.next.as_str()));
            targets.extend(choice.default.as_deref());
        }
        targets.extend(self.catchers().iter().map(|catcher| catcher.next.as_str()));
        targets
    }

    pub fn retriers(&self) -> &[Retrier] {
        match &self.kind {
            StateKind::Task(s) => &s.retry,
            StateKind::Parallel(s) => &s.retry,
            StateKind::Map(s) => &s.retry,
            _ => &[],
        }
    }

    pub fn catchers(&self) -> &[Catcher] {
        match &self.kind {
            StateKind::Task(s) => &s.catch,
            StateKind::Parallel(s) => &s.catch,
            StateKind::Map(s) => &s.catch,
            _ => &[],
        }
    }

    /// Nested machines: Parallel branches or the Map iterator.
    pub fn sub_machines(&self) -> Vec<&StateMachine> {
        match &self.kind {
            StateKind::Parallel(s) => s.branches.iter().collect(),
            StateKind::Map(s) => vec![&s.iterator],
            _ => Vec::new(),
        }
    }
}

/// Tagged variant over the eight state types.
#[derive(Clone, Debug, PartialEq)]
pub enum StateKind {
    Task(TaskState),
    Pass(PassState),
    Wait(WaitState),
    Choice(ChoiceState),
    Succeed(SucceedState),
    Fail(FailState),
    Parallel(ParallelState),
    Map(MapState),
}

/// Where a non-terminal state goes next.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transition {
    Next(String),
    End,
}

/// `InputPath` / `OutputPath` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathFilter {
    /// Select with a path (absent field = `$`)
    Select(JsonPath),
    /// `null` - the payload becomes `{}`
    Discard,
}

impl Default for PathFilter {
    fn default() -> Self {
        Self::Select(JsonPath::root())
    }
}

/// `ResultPath` value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResultPath {
    /// Write the result at a path (absent field = `$`)
    Assign(JsonPath),
    /// `null` - drop the result and keep the raw input
    Discard,
}

impl Default for ResultPath {
    fn default() -> Self {
        Self::Assign(JsonPath::root())
    }
}

/// The data-flow directives applied around a state's result.
///
/// States that do not support a directive leave it at its default.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataFlow {
    pub input_path: PathFilter,
    pub parameters: Option<PayloadTemplate>,
    pub result_selector: Option<PayloadTemplate>,
    pub result_path: ResultPath,
    pub output_path: PathFilter,
}

/// Retry policy entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Retrier {
    pub error_equals: Vec<ErrorName>,
    pub interval_seconds: f64,
    /// Total attempts this retrier allows, counting the first one
    pub max_attempts: u32,
    pub backoff_rate: f64,
    pub max_delay_seconds: Option<f64>,
}

impl Retrier {
    pub const DEFAULT_INTERVAL_SECONDS: f64 = 1.0;
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF_RATE: f64 = 2.0;

    pub fn matches(&self, error: &ErrorName) -> bool {
        self.error_equals.iter().any(|pattern| pattern.matches(error))
    }

    /// Delay before attempt `attempt` (1-based; attempt 1 has no delay).
    ///
    /// `IntervalSeconds * BackoffRate^(attempt - 2)`, capped by
    /// `MaxDelaySeconds` when present.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stepwise::definition::Retrier;
    /// use stepwise::core::ErrorName;
    /// use std::time::Duration;
    ///
    /// let retrier = Retrier {
    ///     error_equals: vec![ErrorName::All],
    ///     interval_seconds: 1.0,
    ///     max_attempts: 3,
    ///     backoff_rate: 2.0,
    ///     max_delay_seconds: None,
    /// };
    /// assert_eq!(retrier.delay_before(2), Duration::from_secs(1));
    /// assert_eq!(retrier.delay_before(3), Duration::from_secs(2));
    /// ```
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt < 2 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 2).unwrap_or(i32::MAX);
        let mut seconds = self.interval_seconds * self.backoff_rate.powi(exponent);
        if let Some(max) = self.max_delay_seconds {
            seconds = seconds.min(max);
        }
        if seconds.is_nan() || seconds <= 0.0 {
            Duration::ZERO
        } else {
            Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX)
        }
    }
}

/// Catch policy entry.
#[derive(Clone, Debug, PartialEq)]
pub struct Catcher {
    pub error_equals: Vec<ErrorName>,
    pub next: String,
    pub result_path: ResultPath,
}

impl Catcher {
    pub fn matches(&self, error: &ErrorName) -> bool {
        self.error_equals.iter().any(|pattern| pattern.matches(error))
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskState {
    pub resource: String,
    pub io: DataFlow,
    pub timeout_seconds: Option<u64>,
    pub retry: Vec<Retrier>,
    pub catch: Vec<Catcher>,
    pub transition: Transition,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PassState {
    pub io: DataFlow,
    /// Fixed value injected as the state result
    pub result: Option<Value>,
    pub transition: Transition,
}

/// How long a Wait state suspends the execution.
#[derive(Clone, Debug, PartialEq)]
pub enum WaitDuration {
    Seconds(u64),
    Timestamp(DateTime<Utc>),
    SecondsPath(JsonPath),
    TimestampPath(JsonPath),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WaitState {
    pub duration: WaitDuration,
    pub io: DataFlow,
    pub transition: Transition,
}

/// One rule of a Choice state with its target.
#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceBranch {
    pub rule: ChoiceRule,
    pub next: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChoiceState {
    pub choices: Vec<ChoiceBranch>,
    pub default: Option<String>,
    pub io: DataFlow,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SucceedState {
    pub io: DataFlow,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FailState {
    pub error: Option<String>,
    pub cause: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParallelState {
    pub branches: Vec<StateMachine>,
    pub io: DataFlow,
    pub retry: Vec<Retrier>,
    pub catch: Vec<Catcher>,
    pub transition: Transition,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MapState {
    pub iterator: StateMachine,
    pub items_path: JsonPath,
    pub item_selector: Option<PayloadTemplate>,
    /// 0 = unbounded
    pub max_concurrency: usize,
    pub io: DataFlow,
    pub retry: Vec<Retrier>,
    pub catch: Vec<Catcher>,
    pub transition: Transition,
}
