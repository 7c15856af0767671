//! Choice rule evaluation.
//!
//! A comparison pushes the value selected by its `Variable` onto the
//! operand stack (or a missing marker), then the operator pops it and
//! pushes its verdict. Logical rules combine the verdicts of their nested
//! rules. `And` and `Or` short-circuit.
//!
//! Comparisons never fail: a type mismatch, an unparsable timestamp, or a
//! missing variable is simply a non-match. The one exception is
//! `IsPresent`, which is the way to test for a missing variable.

use crate::definition::{ChoiceRule, Comparison, ComparisonOperator, Operand};
use crate::eval::environment::{Environment, OperandStack, StackValue};
use chrono::{DateTime, FixedOffset};
use serde_json::Value;
use std::cmp::Ordering;

/// Evaluate `rule` against the environment's payload.
///
/// # Example
///
/// ```rust
/// use stepwise::definition::parse;
/// use stepwise::definition::StateKind;
/// use stepwise::eval::{evaluate_rule, Environment, EventLog, ExecutionContext, OperandStack};
/// use serde_json::json;
///
/// let machine = parse(r#"{
///     "StartAt": "C",
///     "States": {
///         "C": {"Type": "Choice", "Choices": [
///             {"Variable": "$.n", "NumericGreaterThan": 10, "Next": "Big"}
///         ], "Default": "Big"},
///         "Big": {"Type": "Succeed"}
///     }
/// }"#).unwrap();
/// let StateKind::Choice(choice) = &machine.state("C").unwrap().kind else { unreachable!() };
///
/// let execution = ExecutionContext {
///     execution_id: "m:1".into(),
///     execution_name: "1".into(),
///     state_machine_id: "m".into(),
///     input: json!({}),
///     start_time: chrono::Utc::now(),
/// };
/// let env = Environment::new(json!({"n": 42}), &execution, EventLog::new());
/// let mut stack = OperandStack::new();
/// assert!(evaluate_rule(&choice.choices[0].rule, &env, &mut stack));
/// assert!(stack.is_empty());
/// ```
pub fn evaluate_rule(rule: &ChoiceRule, env: &Environment, stack: &mut OperandStack) -> bool {
    push_rule(rule, env, stack);
    stack.pop_bool()
}

fn push_rule(rule: &ChoiceRule, env: &Environment, stack: &mut OperandStack) {
    match rule {
        ChoiceRule::And(rules) => {
            let mut verdict = true;
            for nested in rules {
                push_rule(nested, env, stack);
                if !stack.pop_bool() {
                    verdict = false;
                    break;
                }
            }
            stack.push_bool(verdict);
        }
        ChoiceRule::Or(rules) => {
            let mut verdict = false;
            for nested in rules {
                push_rule(nested, env, stack);
                if stack.pop_bool() {
                    verdict = true;
                    break;
                }
            }
            stack.push_bool(verdict);
        }
        ChoiceRule::Not(inner) => {
            push_rule(inner, env, stack);
            let verdict = stack.pop_bool();
            stack.push_bool(!verdict);
        }
        ChoiceRule::Compare(comparison) => push_comparison(comparison, env, stack),
    }
}

fn push_comparison(comparison: &Comparison, env: &Environment, stack: &mut OperandStack) {
    match env.resolve(&comparison.variable) {
        Some(value) => stack.push_value(value.clone()),
        None => stack.push_missing(),
    }
    let operand = match &comparison.operand {
        Operand::Literal(value) => Some(value),
        Operand::Path(path) => env.resolve(path),
    };
    apply_operator(comparison.operator, operand, stack);
}

/// Pop the subject, compare it against `operand`, push the verdict.
pub fn apply_operator(
    operator: ComparisonOperator,
    operand: Option<&Value>,
    stack: &mut OperandStack,
) {
    let subject = stack.pop().unwrap_or(StackValue::Missing);
    stack.push_bool(compare(operator, &subject, operand));
}

/// Compare a subject against an operand. Total: never fails.
pub fn compare(operator: ComparisonOperator, subject: &StackValue, operand: Option<&Value>) -> bool {
    use ComparisonOperator::*;

    let Some(operand) = operand else {
        return false;
    };
    let value = match subject {
        StackValue::Json(value) => value,
        StackValue::Missing => {
            return operator == IsPresent && operand.as_bool() == Some(false);
        }
    };

    match operator {
        StringEquals => strings(value, operand).is_some_and(|(a, b)| a == b),
        StringLessThan => ordering(strings(value, operand)).is_some_and(Ordering::is_lt),
        StringLessThanEquals => ordering(strings(value, operand)).is_some_and(Ordering::is_le),
        StringGreaterThan => ordering(strings(value, operand)).is_some_and(Ordering::is_gt),
        StringGreaterThanEquals => ordering(strings(value, operand)).is_some_and(Ordering::is_ge),
        StringMatches => strings(value, operand).is_some_and(|(text, pattern)| wildcard_match(pattern, text)),

        NumericEquals => numbers(value, operand).is_some_and(|(a, b)| a == b),
        NumericLessThan => numbers(value, operand).is_some_and(|(a, b)| a < b),
        NumericLessThanEquals => numbers(value, operand).is_some_and(|(a, b)| a <= b),
        NumericGreaterThan => numbers(value, operand).is_some_and(|(a, b)| a > b),
        NumericGreaterThanEquals => numbers(value, operand).is_some_and(|(a, b)| a >= b),

        BooleanEquals => matches!((value.as_bool(), operand.as_bool()), (Some(a), Some(b)) if a == b),

        TimestampEquals => timestamps(value, operand).is_some_and(|(a, b)| a == b),
        TimestampLessThan => timestamps(value, operand).is_some_and(|(a, b)| a < b),
        TimestampLessThanEquals => timestamps(value, operand).is_some_and(|(a, b)| a <= b),
        TimestampGreaterThan => timestamps(value, operand).is_some_and(|(a, b)| a > b),
        TimestampGreaterThanEquals => timestamps(value, operand).is_some_and(|(a, b)| a >= b),

        IsNull => type_test(value.is_null(), operand),
        IsPresent => type_test(true, operand),
        IsNumeric => type_test(value.is_number(), operand),
        IsString => type_test(value.is_string(), operand),
        IsBoolean => type_test(value.is_boolean(), operand),
        IsTimestamp => type_test(value.as_str().and_then(parse_timestamp).is_some(), operand),
    }
}

fn strings<'a>(value: &'a Value, operand: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((value.as_str()?, operand.as_str()?))
}

fn ordering(pair: Option<(&str, &str)>) -> Option<Ordering> {
    pair.map(|(a, b)| a.cmp(b))
}

fn numbers(value: &Value, operand: &Value) -> Option<(f64, f64)> {
    Some((value.as_f64()?, operand.as_f64()?))
}

fn timestamps(
    value: &Value,
    operand: &Value,
) -> Option<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    Some((
        parse_timestamp(value.as_str()?)?,
        parse_timestamp(operand.as_str()?)?,
    ))
}

fn parse_timestamp(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok()
}

fn type_test(actual: bool, operand: &Value) -> bool {
    operand.as_bool().is_some_and(|expected| expected == actual)
}

#[derive(Debug, PartialEq)]
enum PatternToken {
    Char(char),
    Star,
}

fn tokenize(pattern: &str) -> Vec<PatternToken> {
    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(escaped) => tokens.push(PatternToken::Char(escaped)),
                None => tokens.push(PatternToken::Char('\\')),
            },
            '*' => tokens.push(PatternToken::Star),
            other => tokens.push(PatternToken::Char(other)),
        }
    }
    tokens
}

/// `StringMatches` semantics: `*` matches any run of characters, `\*`
/// and `\\` match themselves.
pub fn wildcard_match(pattern: &str, text: &str) -> bool {
    let tokens = tokenize(pattern);
    let text: Vec<char> = text.chars().collect();

    let (mut t, mut p) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match tokens.get(p) {
            Some(PatternToken::Star) => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(PatternToken::Char(c)) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    tokens[p..].iter().all(|token| *token == PatternToken::Star)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::JsonPath;
    use crate::eval::environment::{EventLog, ExecutionContext};
    use chrono::Utc;
    use serde_json::json;

    fn env(payload: Value) -> Environment {
        let execution = ExecutionContext {
            execution_id: "m:1".into(),
            execution_name: "1".into(),
            state_machine_id: "m".into(),
            input: payload.clone(),
            start_time: Utc::now(),
        };
        Environment::new(payload, &execution, EventLog::new())
    }

    fn cmp(variable: &str, operator: ComparisonOperator, operand: Value) -> ChoiceRule {
        ChoiceRule::Compare(Comparison {
            variable: JsonPath::parse(variable).unwrap(),
            operator,
            operand: Operand::Literal(operand),
        })
    }

    fn holds(rule: &ChoiceRule, payload: Value) -> bool {
        let mut stack = OperandStack::new();
        let verdict = evaluate_rule(rule, &env(payload), &mut stack);
        assert!(stack.is_empty(), "evaluation must leave the stack empty");
        verdict
    }

    #[test]
    fn string_comparisons() {
        let payload = json!({"s": "beta"});
        assert!(holds(&cmp("$.s", ComparisonOperator::StringEquals, json!("beta")), payload.clone()));
        assert!(holds(&cmp("$.s", ComparisonOperator::StringGreaterThan, json!("alpha")), payload.clone()));
        assert!(holds(&cmp("$.s", ComparisonOperator::StringLessThanEquals, json!("beta")), payload.clone()));
        assert!(!holds(&cmp("$.s", ComparisonOperator::StringLessThan, json!("alpha")), payload));
    }

    #[test]
    fn numeric_comparisons_mix_integers_and_floats() {
        let payload = json!({"n": 3});
        assert!(holds(&cmp("$.n", ComparisonOperator::NumericEquals, json!(3.0)), payload.clone()));
        assert!(holds(&cmp("$.n", ComparisonOperator::NumericLessThan, json!(3.5)), payload.clone()));
        assert!(!holds(&cmp("$.n", ComparisonOperator::NumericGreaterThan, json!(3)), payload));
    }

    #[test]
    fn type_mismatch_is_non_match() {
        let payload = json!({"n": "3"});
        assert!(!holds(&cmp("$.n", ComparisonOperator::NumericEquals, json!(3)), payload.clone()));
        assert!(!holds(&cmp("$.n", ComparisonOperator::BooleanEquals, json!(true)), payload));
    }

    #[test]
    fn missing_variable_is_non_match_except_is_present() {
        let payload = json!({});
        assert!(!holds(&cmp("$.x", ComparisonOperator::StringEquals, json!("a")), payload.clone()));
        assert!(!holds(&cmp("$.x", ComparisonOperator::IsNull, json!(false)), payload.clone()));
        assert!(!holds(&cmp("$.x", ComparisonOperator::IsPresent, json!(true)), payload.clone()));
        assert!(holds(&cmp("$.x", ComparisonOperator::IsPresent, json!(false)), payload));
    }

    #[test]
    fn timestamps_compare_by_instant() {
        let payload = json!({"t": "2024-01-01T10:00:00+02:00"});
        assert!(holds(
            &cmp("$.t", ComparisonOperator::TimestampEquals, json!("2024-01-01T08:00:00Z")),
            payload.clone()
        ));
        assert!(holds(
            &cmp("$.t", ComparisonOperator::TimestampLessThan, json!("2024-01-01T09:00:00Z")),
            payload.clone()
        ));
        assert!(!holds(
            &cmp("$.t", ComparisonOperator::TimestampEquals, json!("not a time")),
            payload
        ));
    }

    #[test]
    fn type_tests() {
        let payload = json!({"a": null, "b": 1, "c": "2024-01-01T00:00:00Z", "d": false});
        assert!(holds(&cmp("$.a", ComparisonOperator::IsNull, json!(true)), payload.clone()));
        assert!(holds(&cmp("$.b", ComparisonOperator::IsNumeric, json!(true)), payload.clone()));
        assert!(holds(&cmp("$.b", ComparisonOperator::IsString, json!(false)), payload.clone()));
        assert!(holds(&cmp("$.c", ComparisonOperator::IsTimestamp, json!(true)), payload.clone()));
        assert!(holds(&cmp("$.d", ComparisonOperator::IsBoolean, json!(true)), payload));
    }

    #[test]
    fn logical_combinators() {
        let payload = json!({"n": 5, "s": "x"});
        let in_range = ChoiceRule::And(vec![
            cmp("$.n", ComparisonOperator::NumericGreaterThanEquals, json!(1)),
            cmp("$.n", ComparisonOperator::NumericLessThan, json!(10)),
        ]);
        assert!(holds(&in_range, payload.clone()));

        let either = ChoiceRule::Or(vec![
            cmp("$.s", ComparisonOperator::StringEquals, json!("y")),
            cmp("$.missing", ComparisonOperator::IsPresent, json!(false)),
        ]);
        assert!(holds(&either, payload.clone()));

        let negated = ChoiceRule::Not(Box::new(in_range));
        assert!(!holds(&negated, payload));
    }

    #[test]
    fn path_operands_resolve_against_input() {
        let rule = ChoiceRule::Compare(Comparison {
            variable: JsonPath::parse("$.a").unwrap(),
            operator: ComparisonOperator::NumericLessThan,
            operand: Operand::Path(JsonPath::parse("$.b").unwrap()),
        });
        assert!(holds(&rule, json!({"a": 1, "b": 2})));
        assert!(!holds(&rule, json!({"a": 1})));
    }

    #[test]
    fn wildcard_patterns() {
        assert!(wildcard_match("log-*.txt", "log-2024.txt"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("a*b*c", "aXXbYYc"));
        assert!(!wildcard_match("a*b", "acd"));
        assert!(wildcard_match("literal\\*", "literal*"));
        assert!(!wildcard_match("literal\\*", "literalX"));
    }
}
