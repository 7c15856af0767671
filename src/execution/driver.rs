//! The execution driver.
//!
//! [`run_machine`] advances one (sub-)machine state by state: enter the
//! state, run it, record the transition, follow `Next` until a state ends
//! the machine or a halt propagates. Task, Parallel and Map states run
//! inside a Retry/Catch loop.
//!
//! Parallel branches and Map iterations are driven concurrently inside the
//! parent's task and always joined before the parent continues. The first
//! unrecovered failure raises a shared cancellation flag; siblings observe
//! it at their next state boundary, or wake from a Wait or retry backoff,
//! and stop. An in-flight Task is never interrupted.

use crate::core::{ErrorName, Failure, HistoryEventType};
use crate::definition::{
    ChoiceState, DefinitionRef, FailState, MapState, ParallelState, PassState, State, StateKind,
    StateMachine, SucceedState, TaskState, Transition, WaitDuration, WaitState,
};
use crate::eval::{
    apply_result_path, evaluate_rule, finish_output, prepare_input, render_template, Environment,
    ExecutionContext, OperandStack,
};
use crate::execution::config::{InterpreterConfig, UnknownResourcePolicy};
use crate::execution::snapshot::{Snapshot, SNAPSHOT_VERSION};
use crate::execution::task::ResourceRegistry;
use chrono::{DateTime, Utc};
use futures::future::{join_all, select_all, BoxFuture};
use futures::stream::{self, StreamExt};
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Stand-in wake time for delays too large to represent.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Why a machine stopped without producing an output.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Halt {
    /// An unrecovered runtime failure
    Failed(Failure),
    /// The execution was stopped
    Aborted,
    /// The execution deadline passed
    TimedOut,
    /// A sibling branch or iteration failed
    Cancelled,
}

/// Where a state sends the machine.
enum Flow {
    Next(String),
    End,
}

/// Shared services every execution uses.
#[derive(Debug)]
pub(crate) struct Runtime {
    pub resources: ResourceRegistry,
    pub config: InterpreterConfig,
}

/// Stop conditions observed at state boundaries and during sleeps.
#[derive(Clone, Debug)]
pub(crate) struct Signals {
    abort: watch::Receiver<bool>,
    deadline: Option<Instant>,
    /// One flag per enclosing Parallel or Map.
    cancel: Vec<watch::Receiver<bool>>,
}

impl Signals {
    pub fn new(abort: watch::Receiver<bool>, deadline: Option<Instant>) -> Self {
        Self {
            abort,
            deadline,
            cancel: Vec::new(),
        }
    }

    fn check(&self) -> Result<(), Halt> {
        if *self.abort.borrow() {
            return Err(Halt::Aborted);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(Halt::TimedOut);
        }
        if self.cancel.iter().any(|flag| *flag.borrow()) {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    fn with_cancel(&self, flag: watch::Receiver<bool>) -> Self {
        let mut child = self.clone();
        child.cancel.push(flag);
        child
    }

    /// Resolves once any enclosing fan-out has been cancelled.
    async fn cancelled(&self) {
        if self.cancel.is_empty() {
            return std::future::pending().await;
        }
        let flags = self.cancel.iter().cloned().map(|mut flag| {
            async move {
                // A closed channel never fires.
                if flag.wait_for(|cancelled| *cancelled).await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
            .boxed()
        });
        select_all(flags).await;
    }

    /// Sleep for `delay`, waking early on abort, on sibling cancellation
    /// or at the deadline.
    pub(crate) async fn pause(&self, delay: Duration) -> Result<(), Halt> {
        let now = Instant::now();
        let mut wake = now.checked_add(delay).unwrap_or_else(|| now + FAR_FUTURE);
        if let Some(deadline) = self.deadline {
            wake = wake.min(deadline);
        }
        let mut abort = self.abort.clone();
        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            Ok(_) = abort.wait_for(|aborted| *aborted) => {}
            _ = self.cancelled() => {}
        }
        self.check()
    }
}

/// Where a top-level Wait publishes its snapshot.
#[derive(Debug)]
pub(crate) struct SuspendPoint {
    pub slot: Arc<RwLock<Option<Snapshot>>>,
    pub definition: DefinitionRef,
    pub execution: ExecutionContext,
}

impl SuspendPoint {
    fn publish(&self, state: &str, payload: &Value, next: Option<&str>, resume_at: DateTime<Utc>) {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            execution_id: self.execution.execution_id.clone(),
            execution_name: self.execution.execution_name.clone(),
            definition: self.definition.clone(),
            input: self.execution.input.clone(),
            started_at: self.execution.start_time,
            state: state.to_string(),
            payload: payload.clone(),
            next: next.map(str::to_string),
            resume_at,
            taken_at: Utc::now(),
        };
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = Some(snapshot);
    }

    fn clear(&self) {
        *self.slot.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Everything a running (sub-)machine needs besides its environment.
#[derive(Clone, Debug)]
pub(crate) struct Run {
    pub execution_id: Arc<str>,
    pub runtime: Arc<Runtime>,
    pub signals: Signals,
    /// Only the top-level machine can be suspended.
    pub suspend: Option<Arc<SuspendPoint>>,
}

impl Run {
    fn child(&self, cancel: watch::Receiver<bool>) -> Self {
        Self {
            execution_id: self.execution_id.clone(),
            runtime: self.runtime.clone(),
            signals: self.signals.with_cancel(cancel),
            suspend: None,
        }
    }

    fn config(&self) -> &InterpreterConfig {
        &self.runtime.config
    }
}

/// Run `machine` from its `StartAt` state.
pub(crate) fn run_machine<'a>(
    machine: &'a StateMachine,
    env: Environment,
    run: &'a Run,
) -> BoxFuture<'a, Result<Value, Halt>> {
    run_from(machine, machine.start_at.clone(), env, run)
}

/// Run `machine` starting at state `start`.
pub(crate) fn run_from<'a>(
    machine: &'a StateMachine,
    start: String,
    mut env: Environment,
    run: &'a Run,
) -> BoxFuture<'a, Result<Value, Halt>> {
    async move {
        let mut current = start;
        loop {
            run.signals.check()?;
            let state = machine.state(&current).ok_or_else(|| {
                Halt::Failed(Failure::runtime(format!("State '{current}' is not declared")))
            })?;
            let state_type = state.state_type();

            env.enter_state(&state.name);
            env.events().record(
                HistoryEventType::StateEntered(state_type),
                json!({"name": state.name, "input": env.payload()}),
            );
            debug!(execution = %run.execution_id, state = %state.name, kind = state_type.name(), "entered state");

            let flow = execute_state(state, &mut env, run).await?;

            env.events().record(
                HistoryEventType::StateExited(state_type),
                json!({"name": state.name, "output": env.payload()}),
            );
            match flow {
                Flow::Next(next) => current = next,
                Flow::End => return Ok(env.take_payload()),
            }
        }
    }
    .boxed()
}

async fn execute_state(state: &State, env: &mut Environment, run: &Run) -> Result<Flow, Halt> {
    match &state.kind {
        StateKind::Pass(pass) => run_pass(pass, env),
        StateKind::Choice(choice) => run_choice(state, choice, env),
        StateKind::Succeed(succeed) => run_succeed(succeed, env),
        StateKind::Fail(fail) => Err(Halt::Failed(fail_failure(fail))),
        StateKind::Wait(wait) => run_wait(state, wait, env, run).await,
        StateKind::Task(task) => recover(state, env, run, &task.transition).await,
        StateKind::Parallel(parallel) => recover(state, env, run, &parallel.transition).await,
        StateKind::Map(map) => recover(state, env, run, &map.transition).await,
    }
}

fn flow_of(transition: &Transition) -> Flow {
    match transition {
        Transition::Next(next) => Flow::Next(next.clone()),
        Transition::End => Flow::End,
    }
}

fn run_pass(pass: &PassState, env: &mut Environment) -> Result<Flow, Halt> {
    let raw = env.payload().clone();
    let effective = prepare_input(&pass.io, env, &raw).map_err(Halt::Failed)?;
    let result = pass.result.clone().unwrap_or(effective);
    let output = finish_output(&pass.io, env, &raw, result).map_err(Halt::Failed)?;
    env.set_payload(output);
    Ok(flow_of(&pass.transition))
}

fn run_choice(state: &State, choice: &ChoiceState, env: &mut Environment) -> Result<Flow, Halt> {
    let raw = env.take_payload();
    let effective = prepare_input(&choice.io, env, &raw).map_err(Halt::Failed)?;
    env.set_payload(effective.clone());

    let mut stack = OperandStack::new();
    let matched = choice
        .choices
        .iter()
        .find(|branch| evaluate_rule(&branch.rule, env, &mut stack))
        .map(|branch| branch.next.clone());

    let next = match matched.or_else(|| choice.default.clone()) {
        Some(next) => next,
        None => {
            env.events()
                .record(HistoryEventType::ChoiceNoMatch, json!({"name": state.name}));
            return Err(Halt::Failed(Failure::new(
                ErrorName::NoChoiceMatched,
                format!("No Choice rule matched and no Default is set in state '{}'", state.name),
            )));
        }
    };
    trace!(state = %state.name, next = %next, "choice resolved");
    let output = finish_output(&choice.io, env, &raw, effective).map_err(Halt::Failed)?;
    env.set_payload(output);
    Ok(Flow::Next(next))
}

fn run_succeed(succeed: &SucceedState, env: &mut Environment) -> Result<Flow, Halt> {
    let raw = env.payload().clone();
    let effective = prepare_input(&succeed.io, env, &raw).map_err(Halt::Failed)?;
    let output = finish_output(&succeed.io, env, &raw, effective).map_err(Halt::Failed)?;
    env.set_payload(output);
    Ok(Flow::End)
}

fn fail_failure(fail: &FailState) -> Failure {
    Failure::new(
        ErrorName::parse(fail.error.as_deref().unwrap_or_default()),
        fail.cause.clone().unwrap_or_default(),
    )
}

async fn run_wait(
    state: &State,
    wait: &WaitState,
    env: &mut Environment,
    run: &Run,
) -> Result<Flow, Halt> {
    let raw = env.payload().clone();
    let effective = prepare_input(&wait.io, env, &raw).map_err(Halt::Failed)?;
    let delay = run.config().scale(wait_delay(&wait.duration, env, &effective)?);
    let output = finish_output(&wait.io, env, &raw, effective).map_err(Halt::Failed)?;

    let next = match &wait.transition {
        Transition::Next(next) => Some(next.as_str()),
        Transition::End => None,
    };
    if let Some(suspend) = &run.suspend {
        let resume_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        suspend.publish(&state.name, &output, next, resume_at);
    }
    debug!(execution = %run.execution_id, state = %state.name, ?delay, "waiting");

    let paused = run.signals.pause(delay).await;
    if let Some(suspend) = &run.suspend {
        suspend.clear();
    }
    if let Err(halt) = paused {
        env.events()
            .record(HistoryEventType::WaitStateAborted, json!({"name": state.name}));
        return Err(halt);
    }

    env.set_payload(output);
    Ok(flow_of(&wait.transition))
}

fn wait_delay(duration: &WaitDuration, env: &Environment, input: &Value) -> Result<Duration, Halt> {
    let until = |timestamp: DateTime<Utc>| (timestamp - Utc::now()).to_std().unwrap_or_default();
    match duration {
        WaitDuration::Seconds(seconds) => Ok(Duration::from_secs(*seconds)),
        WaitDuration::Timestamp(timestamp) => Ok(until(*timestamp)),
        WaitDuration::SecondsPath(path) => {
            let seconds = env
                .lookup(path, input)
                .and_then(Value::as_f64)
                .filter(|s| s.is_finite() && *s >= 0.0)
                .ok_or_else(|| {
                    Halt::Failed(Failure::runtime(format!(
                        "SecondsPath '{path}' must select a non-negative number"
                    )))
                })?;
            Ok(Duration::try_from_secs_f64(seconds).unwrap_or(FAR_FUTURE))
        }
        WaitDuration::TimestampPath(path) => {
            let timestamp = env
                .lookup(path, input)
                .and_then(Value::as_str)
                .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
                .ok_or_else(|| {
                    Halt::Failed(Failure::runtime(format!(
                        "TimestampPath '{path}' must select an RFC 3339 timestamp"
                    )))
                })?;
            Ok(until(timestamp.with_timezone(&Utc)))
        }
    }
}

/// Run a Task, Parallel or Map state under its Retry and Catch policies.
async fn recover(
    state: &State,
    env: &mut Environment,
    run: &Run,
    transition: &Transition,
) -> Result<Flow, Halt> {
    let raw = env.payload().clone();
    let retriers = state.retriers();
    let mut failures_per_retrier = vec![0u32; retriers.len()];
    let mut retries = 0u32;

    let failure = loop {
        let failure = match attempt(state, env, run, &raw).await {
            Ok(output) => {
                env.set_payload(output);
                return Ok(flow_of(transition));
            }
            Err(Halt::Failed(failure)) => failure,
            Err(halt) => return Err(halt),
        };

        let Some(index) = retriers.iter().position(|r| r.matches(&failure.error)) else {
            break failure;
        };
        let retrier = &retriers[index];
        failures_per_retrier[index] += 1;
        let attempts = failures_per_retrier[index];
        if attempts >= retrier.max_attempts {
            break failure;
        }

        let delay = run.config().scale(retrier.delay_before(attempts + 1));
        env.events().record(
            HistoryEventType::StateRetryScheduled,
            json!({
                "name": state.name,
                "error": failure.error,
                "cause": failure.cause,
                "attempt": attempts + 1,
                "delaySeconds": delay.as_secs_f64(),
            }),
        );
        info!(
            execution = %run.execution_id,
            state = %state.name,
            error = %failure.error,
            attempt = attempts + 1,
            ?delay,
            "retry scheduled"
        );
        run.signals.pause(delay).await?;
        retries += 1;
        env.set_retry_count(retries);
    };

    match state.catchers().iter().find(|c| c.matches(&failure.error)) {
        Some(catcher) => {
            let output = apply_result_path(&catcher.result_path, &raw, failure.to_output())
                .map_err(Halt::Failed)?;
            info!(
                execution = %run.execution_id,
                state = %state.name,
                error = %failure.error,
                next = %catcher.next,
                "failure caught"
            );
            env.set_payload(output);
            Ok(Flow::Next(catcher.next.clone()))
        }
        None => Err(Halt::Failed(failure)),
    }
}

async fn attempt(state: &State, env: &Environment, run: &Run, raw: &Value) -> Result<Value, Halt> {
    match &state.kind {
        StateKind::Task(task) => attempt_task(state, task, env, run, raw).await,
        StateKind::Parallel(parallel) => attempt_parallel(state, parallel, env, run, raw).await,
        StateKind::Map(map) => attempt_map(state, map, env, run, raw).await,
        _ => Err(Halt::Failed(Failure::runtime(format!(
            "State '{}' does not support Retry or Catch",
            state.name
        )))),
    }
}

async fn attempt_task(
    state: &State,
    task: &TaskState,
    env: &Environment,
    run: &Run,
    raw: &Value,
) -> Result<Value, Halt> {
    let effective = prepare_input(&task.io, env, raw).map_err(Halt::Failed)?;
    env.events().record(
        HistoryEventType::TaskScheduled,
        json!({"name": state.name, "resource": task.resource, "input": effective}),
    );

    let handler = run.runtime.resources.get(&task.resource);
    let invocation = async {
        match &handler {
            Some(handler) => handler.invoke(effective.clone()).await,
            None => match run.config().unknown_resource() {
                UnknownResourcePolicy::Echo => Ok(effective.clone()),
                UnknownResourcePolicy::Fail => Err(Failure::new(
                    ErrorName::TaskFailed,
                    format!("No handler is registered for resource '{}'", task.resource),
                )),
            },
        }
    };

    let result = match task.timeout_seconds {
        Some(seconds) => match tokio::time::timeout(Duration::from_secs(seconds), invocation).await {
            Ok(result) => result,
            Err(_) => {
                env.events().record(
                    HistoryEventType::TaskTimedOut,
                    json!({"name": state.name, "resource": task.resource}),
                );
                warn!(execution = %run.execution_id, state = %state.name, seconds, "task timed out");
                return Err(Halt::Failed(Failure::new(
                    ErrorName::Timeout,
                    format!("Task did not complete within {seconds} second(s)"),
                )));
            }
        },
        None => invocation.await,
    };

    match result {
        Ok(output) => {
            env.events().record(
                HistoryEventType::TaskSucceeded,
                json!({"name": state.name, "resource": task.resource, "output": output}),
            );
            finish_output(&task.io, env, raw, output).map_err(Halt::Failed)
        }
        Err(failure) => {
            env.events().record(
                HistoryEventType::TaskFailed,
                json!({
                    "name": state.name,
                    "resource": task.resource,
                    "error": failure.error,
                    "cause": failure.cause,
                }),
            );
            debug!(execution = %run.execution_id, state = %state.name, error = %failure.error, "task failed");
            Err(Halt::Failed(failure))
        }
    }
}

async fn attempt_parallel(
    state: &State,
    parallel: &ParallelState,
    env: &Environment,
    run: &Run,
    raw: &Value,
) -> Result<Value, Halt> {
    let effective = prepare_input(&parallel.io, env, raw).map_err(Halt::Failed)?;
    env.events().record(
        HistoryEventType::ParallelStateStarted,
        json!({"name": state.name, "branches": parallel.branches.len()}),
    );

    let (cancel, cancelled) = watch::channel(false);
    let child = run.child(cancelled);
    let (child, cancel, effective) = (&child, &cancel, &effective);
    let branches = parallel.branches.iter().map(move |branch| {
        let branch_env = env.branch(effective.clone());
        async move {
            let result = run_machine(branch, branch_env, child).await;
            if matches!(result, Err(Halt::Failed(_))) {
                debug!(state = %state.name, "branch failed, cancelling siblings");
                cancel.send_replace(true);
            }
            result
        }
    });
    let results = join_all(branches).await;

    match collect(results) {
        Ok(outputs) => {
            env.events().record(
                HistoryEventType::ParallelStateSucceeded,
                json!({"name": state.name}),
            );
            finish_output(&parallel.io, env, raw, Value::Array(outputs)).map_err(Halt::Failed)
        }
        Err(Halt::Failed(failure)) => {
            env.events().record(
                HistoryEventType::ParallelStateFailed,
                json!({"name": state.name, "error": failure.error, "cause": failure.cause}),
            );
            Err(Halt::Failed(failure))
        }
        Err(halt) => {
            env.events().record(
                HistoryEventType::ParallelStateAborted,
                json!({"name": state.name}),
            );
            Err(halt)
        }
    }
}

async fn attempt_map(
    state: &State,
    map: &MapState,
    env: &Environment,
    run: &Run,
    raw: &Value,
) -> Result<Value, Halt> {
    let effective = prepare_input(&map.io, env, raw).map_err(Halt::Failed)?;
    let items = match env.lookup(&map.items_path, &effective) {
        Some(Value::Array(items)) => items.clone(),
        Some(_) => {
            return Err(Halt::Failed(Failure::runtime(format!(
                "ItemsPath '{}' must select an array",
                map.items_path
            ))))
        }
        None => {
            return Err(Halt::Failed(Failure::runtime(format!(
                "ItemsPath '{}' selected nothing",
                map.items_path
            ))))
        }
    };
    env.events().record(
        HistoryEventType::MapStateStarted,
        json!({"name": state.name, "length": items.len()}),
    );

    let pool = run.config().map_pool_size(map.max_concurrency, items.len());
    let (cancel, cancelled) = watch::channel(false);
    let child = run.child(cancelled);
    let (child, cancel, effective) = (&child, &cancel, &effective);
    let iterations = items.iter().enumerate().map(move |(index, item)| {
        async move {
            let result = run_iteration(state, map, env, child, effective, index, item).await;
            let event = match &result {
                Ok(_) => HistoryEventType::MapIterationSucceeded,
                Err(Halt::Failed(_)) => {
                    debug!(state = %state.name, index, "iteration failed, cancelling siblings");
                    cancel.send_replace(true);
                    HistoryEventType::MapIterationFailed
                }
                Err(_) => HistoryEventType::MapIterationAborted,
            };
            env.events()
                .record(event, json!({"name": state.name, "index": index}));
            (index, result)
        }
    }).collect::<Vec<_>>();
    // Free slots go to the next item as soon as any iteration finishes.
    let mut results: Vec<(usize, Result<Value, Halt>)> =
        stream::iter(iterations).buffer_unordered(pool).collect().await;
    results.sort_by_key(|(index, _)| *index);

    match collect(results.into_iter().map(|(_, result)| result).collect()) {
        Ok(outputs) => {
            env.events()
                .record(HistoryEventType::MapStateSucceeded, json!({"name": state.name}));
            finish_output(&map.io, env, raw, Value::Array(outputs)).map_err(Halt::Failed)
        }
        Err(Halt::Failed(failure)) => {
            env.events().record(
                HistoryEventType::MapStateFailed,
                json!({"name": state.name, "error": failure.error, "cause": failure.cause}),
            );
            Err(Halt::Failed(failure))
        }
        Err(halt) => {
            env.events()
                .record(HistoryEventType::MapStateAborted, json!({"name": state.name}));
            Err(halt)
        }
    }
}

async fn run_iteration(
    state: &State,
    map: &MapState,
    env: &Environment,
    run: &Run,
    effective: &Value,
    index: usize,
    item: &Value,
) -> Result<Value, Halt> {
    run.signals.check()?;
    let scope = env.map_item(index, item, Value::Null);
    let input = match &map.item_selector {
        Some(selector) => render_template(selector, &scope, effective).map_err(Halt::Failed)?,
        None => item.clone(),
    };
    env.events().record(
        HistoryEventType::MapIterationStarted,
        json!({"name": state.name, "index": index}),
    );
    let iteration_env = env.map_item(index, item, input);
    run_machine(&map.iterator, iteration_env, run).await
}

/// Join policy: abort and timeout win over failures, failures over
/// cancellations. Among failures the first in declaration order wins.
fn collect(results: Vec<Result<Value, Halt>>) -> Result<Vec<Value>, Halt> {
    let mut outputs = Vec::with_capacity(results.len());
    let mut halt: Option<Halt> = None;
    for result in results {
        match result {
            Ok(output) => outputs.push(output),
            Err(next) => {
                let replace = match (&halt, &next) {
                    (None, _) => true,
                    (Some(Halt::Aborted), _) => false,
                    (_, Halt::Aborted) => true,
                    (Some(Halt::TimedOut), _) => false,
                    (_, Halt::TimedOut) => true,
                    (Some(Halt::Failed(_)), _) => false,
                    (_, Halt::Failed(_)) => true,
                    _ => false,
                };
                if replace {
                    halt = Some(next);
                }
            }
        }
    }
    match halt {
        Some(halt) => Err(halt),
        None => Ok(outputs),
    }
}
