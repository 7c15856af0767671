//! Input/output processing around a state's work.
//!
//! ```text
//! raw input -> InputPath -> Parameters -> (work) -> ResultSelector
//!           -> ResultPath (merged into raw input) -> OutputPath -> output
//! ```

use crate::core::{ErrorName, Failure, JsonPath};
use crate::definition::{DataFlow, PathFilter, PayloadTemplate, ResultPath};
use crate::eval::environment::{empty_object, Environment};
use crate::eval::intrinsic::evaluate_intrinsic;
use serde_json::{Map, Value};

/// Apply `InputPath` then `Parameters` to the raw state input.
pub fn prepare_input(io: &DataFlow, env: &Environment, raw_input: &Value) -> Result<Value, Failure> {
    let selected = filter(&io.input_path, raw_input, "InputPath")?;
    match &io.parameters {
        Some(template) => render_template(template, env, &selected),
        None => Ok(selected),
    }
}

/// Apply `ResultSelector`, `ResultPath` then `OutputPath` to a result.
pub fn finish_output(
    io: &DataFlow,
    env: &Environment,
    raw_input: &Value,
    result: Value,
) -> Result<Value, Failure> {
    let result = match &io.result_selector {
        Some(template) => render_template(template, env, &result)?,
        None => result,
    };
    let merged = apply_result_path(&io.result_path, raw_input, result)?;
    filter(&io.output_path, &merged, "OutputPath")
}

/// `InputPath` / `OutputPath` selection. A path that selects nothing is a
/// `States.Runtime` failure.
pub fn filter(filter: &PathFilter, payload: &Value, field: &str) -> Result<Value, Failure> {
    match filter {
        PathFilter::Discard => Ok(empty_object()),
        PathFilter::Select(path) if path.is_root() => Ok(payload.clone()),
        PathFilter::Select(path) => path.select(payload).cloned().ok_or_else(|| {
            Failure::runtime(format!(
                "Invalid {field} '{path}': the path selected nothing in the state payload"
            ))
        }),
    }
}

/// Merge `result` into `raw_input` according to `ResultPath`.
pub fn apply_result_path(
    result_path: &ResultPath,
    raw_input: &Value,
    result: Value,
) -> Result<Value, Failure> {
    match result_path {
        ResultPath::Discard => Ok(raw_input.clone()),
        ResultPath::Assign(path) if path.is_root() => Ok(result),
        ResultPath::Assign(path) => {
            let mut merged = raw_input.clone();
            path.assign(&mut merged, result)
                .map_err(|e| Failure::new(ErrorName::ResultPathMatchFailure, e.to_string()))?;
            Ok(merged)
        }
    }
}

/// Render a payload template; `$` paths resolve against `input`.
pub fn render_template(
    template: &PayloadTemplate,
    env: &Environment,
    input: &Value,
) -> Result<Value, Failure> {
    match template {
        PayloadTemplate::Literal(value) => Ok(value.clone()),
        PayloadTemplate::Path(path) => select_required(path, env, input),
        PayloadTemplate::Intrinsic(call) => evaluate_intrinsic(call, env, input),
        PayloadTemplate::Object(fields) => {
            let mut object = Map::with_capacity(fields.len());
            for (key, field) in fields {
                object.insert(key.clone(), render_template(field, env, input)?);
            }
            Ok(Value::Object(object))
        }
        PayloadTemplate::Array(items) => items
            .iter()
            .map(|item| render_template(item, env, input))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
    }
}

fn select_required(path: &JsonPath, env: &Environment, input: &Value) -> Result<Value, Failure> {
    env.lookup(path, input).cloned().ok_or_else(|| {
        Failure::new(
            ErrorName::ParameterPathFailure,
            format!("The JSONPath '{path}' could not be found in the input"),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::template::compile_template;
    use crate::eval::environment::{EventLog, ExecutionContext};
    use chrono::Utc;
    use serde_json::json;

    fn env() -> Environment {
        let execution = ExecutionContext {
            execution_id: "m:e".into(),
            execution_name: "e".into(),
            state_machine_id: "m".into(),
            input: json!({}),
            start_time: Utc::now(),
        };
        Environment::new(json!({}), &execution, EventLog::new())
    }

    fn path(raw: &str) -> JsonPath {
        JsonPath::parse(raw).unwrap()
    }

    #[test]
    fn default_flow_passes_result_through() {
        let io = DataFlow::default();
        let input = json!({"a": 1});
        assert_eq!(prepare_input(&io, &env(), &input).unwrap(), input);
        assert_eq!(
            finish_output(&io, &env(), &input, json!("done")).unwrap(),
            json!("done")
        );
    }

    #[test]
    fn full_pipeline() {
        let io = DataFlow {
            input_path: PathFilter::Select(path("$.order")),
            parameters: Some(compile_template(&json!({"id.$": "$.id", "kind": "lookup"})).unwrap()),
            result_selector: Some(compile_template(&json!({"total.$": "$.amount"})).unwrap()),
            result_path: ResultPath::Assign(path("$.order.summary")),
            output_path: PathFilter::Select(path("$.order")),
        };
        let raw = json!({"order": {"id": 9}, "noise": true});

        let effective = prepare_input(&io, &env(), &raw).unwrap();
        assert_eq!(effective, json!({"id": 9, "kind": "lookup"}));

        let output = finish_output(&io, &env(), &raw, json!({"amount": 12, "x": 0})).unwrap();
        assert_eq!(output, json!({"id": 9, "summary": {"total": 12}}));
    }

    #[test]
    fn null_paths() {
        let io = DataFlow {
            input_path: PathFilter::Discard,
            result_path: ResultPath::Discard,
            output_path: PathFilter::Select(JsonPath::root()),
            ..DataFlow::default()
        };
        let raw = json!({"keep": 1});
        assert_eq!(prepare_input(&io, &env(), &raw).unwrap(), json!({}));
        assert_eq!(finish_output(&io, &env(), &raw, json!(5)).unwrap(), raw);

        let discard_output = DataFlow {
            output_path: PathFilter::Discard,
            ..DataFlow::default()
        };
        assert_eq!(
            finish_output(&discard_output, &env(), &raw, json!(5)).unwrap(),
            json!({})
        );
    }

    #[test]
    fn missing_input_path_is_runtime_failure() {
        let io = DataFlow {
            input_path: PathFilter::Select(path("$.absent")),
            ..DataFlow::default()
        };
        let err = prepare_input(&io, &env(), &json!({})).unwrap_err();
        assert_eq!(err.error, ErrorName::Runtime);
    }

    #[test]
    fn missing_parameter_path_is_parameter_path_failure() {
        let io = DataFlow {
            parameters: Some(compile_template(&json!({"x.$": "$.absent"})).unwrap()),
            ..DataFlow::default()
        };
        let err = prepare_input(&io, &env(), &json!({})).unwrap_err();
        assert_eq!(err.error, ErrorName::ParameterPathFailure);
    }

    #[test]
    fn result_path_through_scalar_fails() {
        let err = apply_result_path(
            &ResultPath::Assign(path("$.a.b")),
            &json!({"a": 1}),
            json!(2),
        )
        .unwrap_err();
        assert_eq!(err.error, ErrorName::ResultPathMatchFailure);
    }

    #[test]
    fn templates_read_context_object() {
        let template = compile_template(&json!({"name.$": "$$.Execution.Name"})).unwrap();
        assert_eq!(
            render_template(&template, &env(), &json!({})).unwrap(),
            json!({"name": "e"})
        );
    }
}
