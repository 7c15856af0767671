//! Per-execution evaluation environment.
//!
//! An [`Environment`] carries the live payload, the context object
//! addressed by `$$` paths, and a handle to the execution's event log.
//! The [`OperandStack`] is deliberately not part of it: each rule or
//! intrinsic evaluation creates its own stack and passes it explicitly.

use crate::core::{EventHistory, HistoryEvent, HistoryEventType, JsonPath, PathRoot};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::sync::{Arc, PoisonError, RwLock};

/// Shared, append-only event log of one execution.
///
/// Cloning the handle shares the log, so Parallel branches and Map
/// iterations append to their parent's history.
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    inner: Arc<RwLock<EventHistory>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event; `None` if the history is already sealed.
    pub fn record(&self, event_type: HistoryEventType, detail: Value) -> Option<u64> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(event_type, detail)
    }

    /// Copy of the events recorded so far.
    pub fn events(&self) -> Vec<HistoryEvent> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .events()
            .to_vec()
    }

    /// Run `f` against the history under the read lock.
    pub fn with_history<R>(&self, f: impl FnOnce(&EventHistory) -> R) -> R {
        f(&self.inner.read().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Identity of the execution, exposed through `$$.Execution` and
/// `$$.StateMachine`.
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub execution_id: String,
    pub execution_name: String,
    pub state_machine_id: String,
    pub input: Value,
    pub start_time: DateTime<Utc>,
}

/// Mutable evaluation context of one (sub-)machine run.
#[derive(Clone, Debug)]
pub struct Environment {
    payload: Value,
    context: Value,
    events: EventLog,
}

impl Environment {
    pub fn new(payload: Value, execution: &ExecutionContext, events: EventLog) -> Self {
        let context = json!({
            "Execution": {
                "Id": execution.execution_id,
                "Name": execution.execution_name,
                "Input": execution.input,
                "StartTime": execution.start_time.to_rfc3339_opts(SecondsFormat::Millis, true),
            },
            "StateMachine": {
                "Id": execution.state_machine_id,
            },
            "State": {},
        });
        Self {
            payload,
            context,
            events,
        }
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn set_payload(&mut self, payload: Value) {
        self.payload = payload;
    }

    pub fn take_payload(&mut self) -> Value {
        std::mem::take(&mut self.payload)
    }

    pub fn context(&self) -> &Value {
        &self.context
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    /// Update `$$.State` for a newly entered state.
    pub fn enter_state(&mut self, name: &str) {
        self.context["State"] = json!({
            "Name": name,
            "EnteredTime": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "RetryCount": 0,
        });
    }

    pub fn set_retry_count(&mut self, count: u32) {
        if let Some(state) = self.context.get_mut("State").and_then(Value::as_object_mut) {
            state.insert("RetryCount".to_string(), json!(count));
        }
    }

    /// Environment for a Parallel branch: same context, its own payload.
    pub fn branch(&self, input: Value) -> Self {
        Self {
            payload: input,
            context: self.context.clone(),
            events: self.events.clone(),
        }
    }

    /// Environment for one Map iteration, exposing `$$.Map.Item`.
    pub fn map_item(&self, index: usize, item: &Value, input: Value) -> Self {
        let mut context = self.context.clone();
        if let Some(object) = context.as_object_mut() {
            object.insert(
                "Map".to_string(),
                json!({"Item": {"Index": index, "Value": item}}),
            );
        }
        Self {
            payload: input,
            context,
            events: self.events.clone(),
        }
    }

    /// Resolve a path against the current payload (`$`) or the context (`$$`).
    pub fn resolve(&self, path: &JsonPath) -> Option<&Value> {
        self.lookup(path, &self.payload)
    }

    /// Resolve a path whose `$` root is `input` rather than the payload.
    pub fn lookup<'a>(&'a self, path: &JsonPath, input: &'a Value) -> Option<&'a Value> {
        match path.root_kind() {
            PathRoot::Input => path.select(input),
            PathRoot::Context => path.select(&self.context),
        }
    }
}

/// One slot of the operand stack.
#[derive(Clone, Debug, PartialEq)]
pub enum StackValue {
    /// A path that selected nothing
    Missing,
    Json(Value),
}

/// LIFO operand stack scoped to a single rule or intrinsic evaluation.
///
/// A comparison pushes the resolved variable, the operator pops it and
/// pushes its boolean verdict, and the caller pops the verdict.
///
/// # Example
///
/// ```rust
/// use stepwise::eval::{OperandStack, StackValue};
/// use serde_json::json;
///
/// let mut stack = OperandStack::new();
/// stack.push_value(json!(1));
/// stack.push_missing();
/// assert_eq!(stack.pop(), Some(StackValue::Missing));
/// assert_eq!(stack.pop(), Some(StackValue::Json(json!(1))));
/// assert!(stack.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct OperandStack {
    items: Vec<StackValue>,
}

impl OperandStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_value(&mut self, value: Value) {
        self.items.push(StackValue::Json(value));
    }

    pub fn push_missing(&mut self) {
        self.items.push(StackValue::Missing);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.push_value(Value::Bool(value));
    }

    pub fn pop(&mut self) -> Option<StackValue> {
        self.items.pop()
    }

    /// Pop a verdict; anything but `true` counts as false.
    pub fn pop_bool(&mut self) -> bool {
        matches!(self.items.pop(), Some(StackValue::Json(Value::Bool(true))))
    }

    /// Pop the top `count` values, returned in push order.
    pub fn pop_many(&mut self, count: usize) -> Vec<StackValue> {
        let split = self.items.len().saturating_sub(count);
        self.items.split_off(split)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// An empty JSON object, the payload produced by a `null` InputPath/OutputPath.
pub(crate) fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution() -> ExecutionContext {
        ExecutionContext {
            execution_id: "machine:run-1".into(),
            execution_name: "run-1".into(),
            state_machine_id: "machine".into(),
            input: json!({"seed": 7}),
            start_time: Utc::now(),
        }
    }

    #[test]
    fn resolves_payload_and_context_paths() {
        let env = Environment::new(json!({"a": {"b": 2}}), &execution(), EventLog::new());

        let payload_path = JsonPath::parse("$.a.b").unwrap();
        let context_path = JsonPath::parse("$$.Execution.Name").unwrap();

        assert_eq!(env.resolve(&payload_path), Some(&json!(2)));
        assert_eq!(env.resolve(&context_path), Some(&json!("run-1")));
        assert_eq!(
            env.resolve(&JsonPath::parse("$$.Execution.Input.seed").unwrap()),
            Some(&json!(7))
        );
    }

    #[test]
    fn enter_state_updates_state_context() {
        let mut env = Environment::new(json!({}), &execution(), EventLog::new());
        env.enter_state("Validate");
        env.set_retry_count(2);

        assert_eq!(env.context()["State"]["Name"], json!("Validate"));
        assert_eq!(env.context()["State"]["RetryCount"], json!(2));
    }

    #[test]
    fn map_item_exposes_index_and_value() {
        let env = Environment::new(json!({}), &execution(), EventLog::new());
        let item_env = env.map_item(3, &json!("x"), json!({"y": 1}));

        let index = JsonPath::parse("$$.Map.Item.Index").unwrap();
        let value = JsonPath::parse("$$.Map.Item.Value").unwrap();
        assert_eq!(item_env.resolve(&index), Some(&json!(3)));
        assert_eq!(item_env.resolve(&value), Some(&json!("x")));
        assert_eq!(item_env.payload(), &json!({"y": 1}));
        assert!(env.resolve(&index).is_none());
    }

    #[test]
    fn branches_share_the_event_log() {
        let env = Environment::new(json!({}), &execution(), EventLog::new());
        let branch = env.branch(json!(1));
        branch
            .events()
            .record(HistoryEventType::ExecutionStarted, json!({}));
        assert_eq!(env.events().events().len(), 1);
    }

    #[test]
    fn pop_many_preserves_push_order() {
        let mut stack = OperandStack::new();
        stack.push_value(json!("bottom"));
        stack.push_value(json!(1));
        stack.push_value(json!(2));

        assert_eq!(
            stack.pop_many(2),
            vec![StackValue::Json(json!(1)), StackValue::Json(json!(2))]
        );
        assert_eq!(stack.len(), 1);
    }

    #[test]
    fn pop_bool_treats_non_booleans_as_false() {
        let mut stack = OperandStack::new();
        stack.push_value(json!("true"));
        assert!(!stack.pop_bool());
        stack.push_bool(true);
        assert!(stack.pop_bool());
        assert!(!stack.pop_bool());
    }
}
