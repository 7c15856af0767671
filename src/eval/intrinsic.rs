//! Intrinsic function evaluation.
//!
//! Arguments are pushed onto the operand stack left to right (nested
//! calls are evaluated in place), then the function pops its arity and
//! pushes its result.

use crate::core::{ErrorName, Failure};
use crate::definition::{IntrinsicArg, IntrinsicCall, IntrinsicFunction};
use crate::eval::environment::{Environment, OperandStack, StackValue};
use serde_json::Value;

/// Evaluate an intrinsic call; `$` paths resolve against `input`.
pub fn evaluate_intrinsic(
    call: &IntrinsicCall,
    env: &Environment,
    input: &Value,
) -> Result<Value, Failure> {
    let mut stack = OperandStack::new();
    push_call(call, env, input, &mut stack)?;
    match stack.pop() {
        Some(StackValue::Json(value)) => Ok(value),
        _ => Err(intrinsic_failure(call.function, "produced no value")),
    }
}

fn push_call(
    call: &IntrinsicCall,
    env: &Environment,
    input: &Value,
    stack: &mut OperandStack,
) -> Result<(), Failure> {
    for arg in &call.args {
        match arg {
            IntrinsicArg::Literal(value) => stack.push_value(value.clone()),
            IntrinsicArg::Path(path) => match env.lookup(path, input) {
                Some(value) => stack.push_value(value.clone()),
                None => {
                    return Err(intrinsic_failure(
                        call.function,
                        format!("path '{path}' selected nothing"),
                    ))
                }
            },
            IntrinsicArg::Call(inner) => push_call(inner, env, input, stack)?,
        }
    }

    let args = stack
        .pop_many(call.args.len())
        .into_iter()
        .map(|slot| match slot {
            StackValue::Json(value) => value,
            StackValue::Missing => Value::Null,
        })
        .collect();
    stack.push_value(apply(call.function, args)?);
    Ok(())
}

fn apply(function: IntrinsicFunction, args: Vec<Value>) -> Result<Value, Failure> {
    function
        .check_arity(args.len())
        .map_err(|reason| intrinsic_failure(function, reason))?;
    match function {
        IntrinsicFunction::Format => format(args),
        IntrinsicFunction::StringToJson => {
            let text = string_arg(function, &args, 0)?;
            serde_json::from_str(text)
                .map_err(|e| intrinsic_failure(function, format!("invalid JSON text: {e}")))
        }
        IntrinsicFunction::JsonToString => serde_json::to_string(&args[0])
            .map(Value::String)
            .map_err(|e| intrinsic_failure(function, e.to_string())),
        IntrinsicFunction::Array => Ok(Value::Array(args)),
        IntrinsicFunction::ArrayLength => {
            let items = array_arg(function, &args, 0)?;
            Ok(Value::from(items.len()))
        }
        IntrinsicFunction::ArrayGetItem => {
            let items = array_arg(function, &args, 0)?;
            let index = args[1]
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .ok_or_else(|| intrinsic_failure(function, "index must be a non-negative integer"))?;
            items.get(index).cloned().ok_or_else(|| {
                intrinsic_failure(
                    function,
                    format!("index {index} out of bounds (len {})", items.len()),
                )
            })
        }
        IntrinsicFunction::ArrayContains => {
            let items = array_arg(function, &args, 0)?;
            Ok(Value::Bool(items.contains(&args[1])))
        }
        IntrinsicFunction::MathAdd => math_add(&args[0], &args[1]),
        IntrinsicFunction::Uuid => Ok(Value::String(uuid::Uuid::new_v4().to_string())),
    }
}

/// `States.Format`: `{}` placeholders filled left to right. `\{` and `\}`
/// are literal braces.
fn format(args: Vec<Value>) -> Result<Value, Failure> {
    let function = IntrinsicFunction::Format;
    let mut args = args.into_iter();
    let template = match args.next() {
        Some(Value::String(template)) => template,
        _ => return Err(intrinsic_failure(function, "first argument must be a string")),
    };

    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if matches!(chars.peek(), Some('{' | '}')) => {
                out.extend(chars.next());
            }
            '{' if chars.peek() == Some(&'}') => {
                chars.next();
                let value = args
                    .next()
                    .ok_or_else(|| intrinsic_failure(function, "more placeholders than arguments"))?;
                match value {
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                }
            }
            other => out.push(other),
        }
    }
    if args.next().is_some() {
        return Err(intrinsic_failure(function, "more arguments than placeholders"));
    }
    Ok(Value::String(out))
}

fn math_add(a: &Value, b: &Value) -> Result<Value, Failure> {
    let function = IntrinsicFunction::MathAdd;
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x
            .checked_add(y)
            .map(Value::from)
            .ok_or_else(|| intrinsic_failure(function, "integer overflow"));
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok(Value::from(x + y)),
        _ => Err(intrinsic_failure(function, "arguments must be numbers")),
    }
}

fn string_arg(function: IntrinsicFunction, args: &[Value], index: usize) -> Result<&str, Failure> {
    args[index]
        .as_str()
        .ok_or_else(|| intrinsic_failure(function, format!("argument {} must be a string", index + 1)))
}

fn array_arg(
    function: IntrinsicFunction,
    args: &[Value],
    index: usize,
) -> Result<&Vec<Value>, Failure> {
    args[index]
        .as_array()
        .ok_or_else(|| intrinsic_failure(function, format!("argument {} must be an array", index + 1)))
}

fn intrinsic_failure(function: IntrinsicFunction, reason: impl std::fmt::Display) -> Failure {
    Failure::new(
        ErrorName::IntrinsicFailure,
        format!("{}: {reason}", function.name()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::template::parse_intrinsic;
    use crate::eval::environment::{EventLog, ExecutionContext};
    use chrono::Utc;
    use serde_json::json;

    fn eval(expression: &str, input: Value) -> Result<Value, Failure> {
        let execution = ExecutionContext {
            execution_id: "m:exec".into(),
            execution_name: "exec".into(),
            state_machine_id: "m".into(),
            input: input.clone(),
            start_time: Utc::now(),
        };
        let env = Environment::new(input.clone(), &execution, EventLog::new());
        evaluate_intrinsic(&parse_intrinsic(expression).unwrap(), &env, &input)
    }

    #[test]
    fn format_fills_placeholders() {
        let out = eval(
            "States.Format('{} ordered {} items', $.who, $.count)",
            json!({"who": "ana", "count": 3}),
        )
        .unwrap();
        assert_eq!(out, json!("ana ordered 3 items"));
    }

    #[test]
    fn format_keeps_escaped_braces() {
        let out = eval("States.Format('\\{{}\\}', 'x')", json!({})).unwrap();
        assert_eq!(out, json!("{x}"));
    }

    #[test]
    fn format_argument_count_must_match() {
        let err = eval("States.Format('{} {}', 'x')", json!({})).unwrap_err();
        assert_eq!(err.error, ErrorName::IntrinsicFailure);
    }

    #[test]
    fn json_string_conversions() {
        assert_eq!(
            eval("States.StringToJson($.s)", json!({"s": "{\"a\":[1]}"})).unwrap(),
            json!({"a": [1]})
        );
        assert_eq!(
            eval("States.JsonToString($.o)", json!({"o": {"k": true}})).unwrap(),
            json!("{\"k\":true}")
        );
        assert!(eval("States.StringToJson('{')", json!({})).is_err());
    }

    #[test]
    fn array_functions() {
        let input = json!({"xs": [10, 20, 30]});
        assert_eq!(eval("States.ArrayLength($.xs)", input.clone()).unwrap(), json!(3));
        assert_eq!(eval("States.ArrayGetItem($.xs, 1)", input.clone()).unwrap(), json!(20));
        assert_eq!(eval("States.ArrayContains($.xs, 30)", input.clone()).unwrap(), json!(true));
        assert_eq!(eval("States.Array(1, 'a', $.xs)", input.clone()).unwrap(), json!([1, "a", [10, 20, 30]]));
        assert!(eval("States.ArrayGetItem($.xs, 7)", input).is_err());
    }

    #[test]
    fn nested_calls_evaluate_inner_first() {
        let out = eval(
            "States.MathAdd(States.ArrayLength($.xs), 1)",
            json!({"xs": [1, 2]}),
        )
        .unwrap();
        assert_eq!(out, json!(3));
    }

    #[test]
    fn math_add_rejects_non_numbers() {
        let err = eval("States.MathAdd('a', 1)", json!({})).unwrap_err();
        assert_eq!(err.error, ErrorName::IntrinsicFailure);
    }

    #[test]
    fn context_paths_are_allowed() {
        assert_eq!(
            eval("States.Format('run {}', $$.Execution.Name)", json!({})).unwrap(),
            json!("run exec")
        );
    }

    #[test]
    fn uuid_is_fresh() {
        let a = eval("States.UUID()", json!({})).unwrap();
        let b = eval("States.UUID()", json!({})).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().map(str::len), Some(36));
    }

    #[test]
    fn missing_path_argument_fails() {
        let err = eval("States.ArrayLength($.nope)", json!({})).unwrap_err();
        assert_eq!(err.error, ErrorName::IntrinsicFailure);
    }
}
