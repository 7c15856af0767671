//! The interpreter service: definition registry plus execution registry.
//!
//! Each started execution is advanced by one spawned driver task holding
//! that execution's advancement lock. Status and history reads never take
//! the lock, so callers can poll while the driver runs.

use crate::core::{
    ErrorName, EventHistory, ExecutionStatus, Failure, HistoryEvent, HistoryEventType, StateType,
};
use crate::definition::{DefinitionCache, DefinitionRef, StateKind, StateMachine};
use crate::eval::{Environment, EventLog, ExecutionContext};
use crate::execution::config::InterpreterConfig;
use crate::execution::driver::{run_from, run_machine, Halt, Run, Runtime, Signals, SuspendPoint};
use crate::execution::error::{ExecutionError, SnapshotError};
use crate::execution::snapshot::Snapshot;
use crate::execution::task::ResourceRegistry;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tracing::{info, warn};

/// Returned by `start_execution`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedExecution {
    pub execution_id: String,
    pub start_date: DateTime<Utc>,
}

/// Public view of an execution.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionDescription {
    pub execution_id: String,
    pub name: String,
    pub definition: DefinitionRef,
    pub status: ExecutionStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub cause: Option<String>,
    pub start_date: DateTime<Utc>,
    pub stop_date: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct ExecutionRecord {
    id: String,
    definition: DefinitionRef,
    info: RwLock<ExecutionDescription>,
    events: EventLog,
    abort: watch::Sender<bool>,
    status: watch::Sender<ExecutionStatus>,
    snapshot: Arc<RwLock<Option<Snapshot>>>,
    /// Held by the driver for as long as it advances this execution.
    advance: Mutex<()>,
}

impl ExecutionRecord {
    fn describe(&self) -> ExecutionDescription {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn current_status(&self) -> ExecutionStatus {
        self.info
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
    }

    /// Move a RUNNING execution to a final status and record the terminal
    /// event. Returns false if it had already left RUNNING.
    fn complete(
        &self,
        status: ExecutionStatus,
        output: Option<Value>,
        failure: Option<&Failure>,
        event: HistoryEventType,
        detail: Value,
    ) -> bool {
        {
            let mut info = self.info.write().unwrap_or_else(PoisonError::into_inner);
            if info.status != ExecutionStatus::Running {
                return false;
            }
            self.events.record(event, detail);
            info.status = status;
            info.output = output;
            if let Some(failure) = failure {
                let error = failure.error.as_str();
                info.error = (!error.is_empty()).then(|| error.to_string());
                info.cause = (!failure.cause.is_empty()).then(|| failure.cause.clone());
            }
            info.stop_date = Some(Utc::now());
        }
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
        self.status.send_replace(status);
        true
    }

    fn time_out(&self) -> bool {
        let failure = Failure::new(ErrorName::Timeout, "Execution exceeded its TimeoutSeconds");
        self.complete(
            ExecutionStatus::TimedOut,
            None,
            Some(&failure),
            HistoryEventType::ExecutionTimedOut,
            json!({"error": failure.error, "cause": failure.cause}),
        )
    }

    fn finish(&self, result: Result<Value, Halt>) {
        let completed = match result {
            Ok(output) => self.complete(
                ExecutionStatus::Succeeded,
                Some(output.clone()),
                None,
                HistoryEventType::ExecutionSucceeded,
                json!({"output": output}),
            ),
            Err(Halt::Failed(failure)) => self.complete(
                ExecutionStatus::Failed,
                None,
                Some(&failure),
                HistoryEventType::ExecutionFailed,
                json!({"error": failure.error, "cause": failure.cause}),
            ),
            Err(Halt::TimedOut) => self.time_out(),
            Err(Halt::Aborted) | Err(Halt::Cancelled) => self.complete(
                ExecutionStatus::Aborted,
                None,
                None,
                HistoryEventType::ExecutionAborted,
                json!({}),
            ),
        };
        if completed {
            info!(execution = %self.id, status = %self.current_status(), "execution finished");
        }
    }
}

struct Inner {
    runtime: Arc<Runtime>,
    definitions: DefinitionCache,
    executions: RwLock<HashMap<String, Arc<ExecutionRecord>>>,
}

/// Runs Amazon States Language state machines.
///
/// Cloning is cheap and shares all registries. Starting or resuming an
/// execution spawns onto the current Tokio runtime.
///
/// # Example
///
/// ```rust
/// use stepwise::core::ExecutionStatus;
/// use stepwise::definition::DefinitionRef;
/// use stepwise::execution::Interpreter;
/// use serde_json::json;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let interpreter = Interpreter::new();
/// interpreter.resources().register_fn("greet", |input| {
///     Ok(json!(format!("hello {}", input["who"].as_str().unwrap_or("?"))))
/// });
///
/// let hello = DefinitionRef::new("hello", 1);
/// interpreter.register_definition(&hello, r#"{
///     "StartAt": "Greet",
///     "States": {"Greet": {"Type": "Task", "Resource": "greet", "End": true}}
/// }"#).unwrap();
///
/// let started = interpreter
///     .start_execution(&hello, Some("first"), json!({"who": "ada"}))
///     .unwrap();
/// let done = interpreter.wait_for_completion(&started.execution_id).await.unwrap();
///
/// assert_eq!(done.status, ExecutionStatus::Succeeded);
/// assert_eq!(done.output, Some(json!("hello ada")));
/// # }
/// ```
#[derive(Clone)]
pub struct Interpreter {
    inner: Arc<Inner>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("config", &self.inner.runtime.config)
            .field("definitions", &self.inner.definitions.len())
            .finish()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime: Arc::new(Runtime {
                    resources: ResourceRegistry::new(),
                    config,
                }),
                definitions: DefinitionCache::new(),
                executions: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.inner.runtime.config
    }

    /// Registry of Task resources; handlers may be added at any time.
    pub fn resources(&self) -> &ResourceRegistry {
        &self.inner.runtime.resources
    }

    /// Parse and cache a definition revision.
    ///
    /// Registering an already cached key returns the cached tree without
    /// parsing `definition` again.
    pub fn register_definition(
        &self,
        key: &DefinitionRef,
        definition: &str,
    ) -> Result<Arc<StateMachine>, ExecutionError> {
        let machine = self.inner.definitions.get_or_parse(key, definition)?;
        info!(definition = %key, states = machine.states.len(), "definition registered");
        Ok(machine)
    }

    pub fn definition(&self, key: &DefinitionRef) -> Option<Arc<StateMachine>> {
        self.inner.definitions.get(key)
    }

    /// Start a new execution. `name` defaults to a random UUID and must be
    /// unique per definition id. Names may not be empty or contain `:`.
    pub fn start_execution(
        &self,
        key: &DefinitionRef,
        name: Option<&str>,
        input: Value,
    ) -> Result<StartedExecution, ExecutionError> {
        let machine = self
            .inner
            .definitions
            .get(key)
            .ok_or_else(|| ExecutionError::DefinitionNotFound(key.clone()))?;
        if let Some(name) = name {
            if name.is_empty() || name.contains(':') {
                return Err(ExecutionError::InvalidName(name.to_string()));
            }
        }
        let name = name.map_or_else(|| uuid::Uuid::new_v4().to_string(), str::to_string);
        let execution = ExecutionContext {
            execution_id: execution_id(key, &name),
            execution_name: name,
            state_machine_id: key.to_string(),
            input,
            start_time: Utc::now(),
        };

        let record = self.insert_record(key, &execution)?;
        record.events.record(
            HistoryEventType::ExecutionStarted,
            json!({"input": execution.input, "definition": key}),
        );
        info!(execution = %record.id, definition = %key, "execution started");

        let env = Environment::new(execution.input.clone(), &execution, record.events.clone());
        let deadline = machine
            .timeout()
            .and_then(|timeout| Instant::now().checked_add(timeout));
        let run = self.top_level_run(&record, execution.clone(), deadline);
        if let Some(deadline) = deadline {
            enforce_deadline(record.clone(), deadline);
        }
        tokio::spawn(async move {
            let _advancing = record.advance.lock().await;
            let result = run_machine(&machine, env, &run).await;
            record.finish(result);
        });

        Ok(StartedExecution {
            execution_id: execution.execution_id,
            start_date: execution.start_time,
        })
    }

    /// Continue an execution from a snapshot taken while it waited.
    ///
    /// The definition revision named by the snapshot must be registered.
    /// The new history starts with an `ExecutionStarted` event marking the
    /// resume point.
    pub fn resume_execution(&self, snapshot: Snapshot) -> Result<StartedExecution, ExecutionError> {
        let machine = self
            .inner
            .definitions
            .get(&snapshot.definition)
            .ok_or_else(|| ExecutionError::DefinitionNotFound(snapshot.definition.clone()))?;
        validate_snapshot(&machine, &snapshot)?;

        let execution = ExecutionContext {
            execution_id: snapshot.execution_id.clone(),
            execution_name: snapshot.execution_name.clone(),
            state_machine_id: snapshot.definition.to_string(),
            input: snapshot.input.clone(),
            start_time: snapshot.started_at,
        };
        let record = self.insert_record(&snapshot.definition, &execution)?;
        record.events.record(
            HistoryEventType::ExecutionStarted,
            json!({
                "input": execution.input,
                "definition": snapshot.definition,
                "resumedFrom": {"state": snapshot.state, "resumeAt": snapshot.resume_at},
            }),
        );
        info!(execution = %record.id, state = %snapshot.state, "execution resumed");

        let now = Utc::now();
        let deadline = machine.timeout().and_then(|timeout| {
            let elapsed = (now - snapshot.started_at).to_std().unwrap_or_default();
            Instant::now().checked_add(timeout.saturating_sub(elapsed))
        });
        let run = self.top_level_run(&record, execution.clone(), deadline);
        if let Some(deadline) = deadline {
            enforce_deadline(record.clone(), deadline);
        }
        *record.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());

        let remaining = snapshot.remaining(now);
        let mut env = Environment::new(snapshot.payload.clone(), &execution, record.events.clone());
        env.enter_state(&snapshot.state);
        tokio::spawn(async move {
            let _advancing = record.advance.lock().await;
            let result = match run.signals.pause(remaining).await {
                Err(halt) => Err(halt),
                Ok(()) => {
                    *record.snapshot.write().unwrap_or_else(PoisonError::into_inner) = None;
                    env.events().record(
                        HistoryEventType::StateExited(StateType::Wait),
                        json!({"name": snapshot.state, "output": snapshot.payload}),
                    );
                    match snapshot.next {
                        Some(next) => run_from(&machine, next, env, &run).await,
                        None => Ok(snapshot.payload),
                    }
                }
            };
            record.finish(result);
        });

        Ok(StartedExecution {
            execution_id: execution.execution_id,
            start_date: execution.start_time,
        })
    }

    pub fn describe_execution(&self, id: &str) -> Result<ExecutionDescription, ExecutionError> {
        Ok(self.record(id)?.describe())
    }

    /// Events recorded so far, oldest first.
    pub fn get_execution_history(&self, id: &str) -> Result<Vec<HistoryEvent>, ExecutionError> {
        Ok(self.record(id)?.events.events())
    }

    /// Run `f` against the live history without copying it.
    pub fn with_history<R>(
        &self,
        id: &str,
        f: impl FnOnce(&EventHistory) -> R,
    ) -> Result<R, ExecutionError> {
        Ok(self.record(id)?.events.with_history(f))
    }

    /// Snapshot of an execution currently suspended in a top-level Wait.
    pub fn snapshot(&self, id: &str) -> Result<Option<Snapshot>, ExecutionError> {
        let record = self.record(id)?;
        let snapshot = record
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Ok(snapshot)
    }

    /// Abort a running execution.
    ///
    /// The status becomes ABORTED immediately and the history is sealed
    /// with `ExecutionAborted`. An in-flight Task is not interrupted; its
    /// outcome is discarded.
    pub fn stop_execution(
        &self,
        id: &str,
        error: Option<&str>,
        cause: Option<&str>,
    ) -> Result<ExecutionDescription, ExecutionError> {
        let record = self.record(id)?;
        let failure = Failure::new(
            ErrorName::parse(error.unwrap_or_default()),
            cause.unwrap_or_default(),
        );
        let stopped = record.complete(
            ExecutionStatus::Aborted,
            None,
            Some(&failure),
            HistoryEventType::ExecutionAborted,
            json!({"error": error, "cause": cause}),
        );
        if !stopped {
            return Err(ExecutionError::NotRunning {
                id: id.to_string(),
                status: record.current_status(),
            });
        }
        record.abort.send_replace(true);
        warn!(execution = %id, "execution stopped");
        Ok(record.describe())
    }

    /// Resolve once the execution reaches a final status.
    pub async fn wait_for_completion(&self, id: &str) -> Result<ExecutionDescription, ExecutionError> {
        let record = self.record(id)?;
        let mut status = record.status.subscribe();
        // The sender lives in the record, so the channel cannot close here.
        let _ = status.wait_for(ExecutionStatus::is_final).await;
        Ok(record.describe())
    }

    /// Ids of all known executions, sorted.
    pub fn list_executions(&self) -> Vec<String> {
        let executions = self
            .inner
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = executions.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn record(&self, id: &str) -> Result<Arc<ExecutionRecord>, ExecutionError> {
        self.inner
            .executions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| ExecutionError::ExecutionNotFound(id.to_string()))
    }

    fn insert_record(
        &self,
        key: &DefinitionRef,
        execution: &ExecutionContext,
    ) -> Result<Arc<ExecutionRecord>, ExecutionError> {
        let mut executions = self
            .inner
            .executions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if executions.contains_key(&execution.execution_id) {
            return Err(ExecutionError::ExecutionAlreadyExists {
                definition: key.clone(),
                name: execution.execution_name.clone(),
            });
        }
        let record = Arc::new(ExecutionRecord {
            id: execution.execution_id.clone(),
            definition: key.clone(),
            info: RwLock::new(ExecutionDescription {
                execution_id: execution.execution_id.clone(),
                name: execution.execution_name.clone(),
                definition: key.clone(),
                status: ExecutionStatus::Running,
                input: execution.input.clone(),
                output: None,
                error: None,
                cause: None,
                start_date: execution.start_time,
                stop_date: None,
            }),
            events: EventLog::new(),
            abort: watch::channel(false).0,
            status: watch::channel(ExecutionStatus::Running).0,
            snapshot: Arc::new(RwLock::new(None)),
            advance: Mutex::new(()),
        });
        executions.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    fn top_level_run(
        &self,
        record: &ExecutionRecord,
        execution: ExecutionContext,
        deadline: Option<Instant>,
    ) -> Run {
        Run {
            execution_id: Arc::from(record.id.as_str()),
            runtime: self.inner.runtime.clone(),
            signals: Signals::new(record.abort.subscribe(), deadline),
            suspend: Some(Arc::new(SuspendPoint {
                slot: record.snapshot.clone(),
                definition: record.definition.clone(),
                execution,
            })),
        }
    }
}

/// Time the execution out at `deadline` even if a Task is still in flight.
/// The driver is told to stop; whatever the Task returns is discarded.
fn enforce_deadline(record: Arc<ExecutionRecord>, deadline: Instant) {
    let mut status = record.status.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => {
                if record.time_out() {
                    warn!(execution = %record.id, "execution timed out");
                    record.abort.send_replace(true);
                }
            }
            _ = status.wait_for(ExecutionStatus::is_final) => {}
        }
    });
}

/// Execution ids are unique per definition id, across revisions. Names
/// never contain `:`, so the id splits unambiguously.
fn execution_id(key: &DefinitionRef, name: &str) -> String {
    format!("{}:{}", key.id, name)
}

fn validate_snapshot(machine: &StateMachine, snapshot: &Snapshot) -> Result<(), SnapshotError> {
    match machine.state(&snapshot.state).map(|state| &state.kind) {
        Some(StateKind::Wait(_)) => {}
        Some(_) => {
            return Err(SnapshotError::ValidationFailed(format!(
                "state '{}' is not a Wait state",
                snapshot.state
            )))
        }
        None => {
            return Err(SnapshotError::ValidationFailed(format!(
                "state '{}' is not declared",
                snapshot.state
            )))
        }
    }
    if let Some(next) = &snapshot.next {
        if machine.state(next).is_none() {
            return Err(SnapshotError::ValidationFailed(format!(
                "next state '{next}' is not declared"
            )));
        }
    }
    Ok(())
}
