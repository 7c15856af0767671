//! Choice rule trees.
//!
//! A rule is either a comparison of the value at `Variable` against an
//! operand, or a logical combination (`And`, `Or`, `Not`) of nested rules.
//! Rules are compiled and type-checked once at parse time.

use crate::core::JsonPath;
use chrono::DateTime;
use serde_json::{Map, Value};

/// A compiled choice rule.
#[derive(Clone, Debug, PartialEq)]
pub enum ChoiceRule {
    And(Vec<ChoiceRule>),
    Or(Vec<ChoiceRule>),
    Not(Box<ChoiceRule>),
    Compare(Comparison),
}

/// `Variable` + operator + operand.
#[derive(Clone, Debug, PartialEq)]
pub struct Comparison {
    pub variable: JsonPath,
    pub operator: ComparisonOperator,
    pub operand: Operand,
}

/// Right hand side of a comparison.
#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    /// Literal from the definition
    Literal(Value),
    /// `...Path` operators: value selected from the input at runtime
    Path(JsonPath),
}

/// The closed set of comparison operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ComparisonOperator {
    StringEquals,
    StringLessThan,
    StringLessThanEquals,
    StringGreaterThan,
    StringGreaterThanEquals,
    StringMatches,
    NumericEquals,
    NumericLessThan,
    NumericLessThanEquals,
    NumericGreaterThan,
    NumericGreaterThanEquals,
    BooleanEquals,
    TimestampEquals,
    TimestampLessThan,
    TimestampLessThanEquals,
    TimestampGreaterThan,
    TimestampGreaterThanEquals,
    IsNull,
    IsPresent,
    IsNumeric,
    IsString,
    IsBoolean,
    IsTimestamp,
}

/// Type a literal operand must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperandKind {
    String,
    Number,
    Boolean,
    Timestamp,
}

impl ComparisonOperator {
    pub const ALL: [ComparisonOperator; 23] = [
        Self::StringEquals,
        Self::StringLessThan,
        Self::StringLessThanEquals,
        Self::StringGreaterThan,
        Self::StringGreaterThanEquals,
        Self::StringMatches,
        Self::NumericEquals,
        Self::NumericLessThan,
        Self::NumericLessThanEquals,
        Self::NumericGreaterThan,
        Self::NumericGreaterThanEquals,
        Self::BooleanEquals,
        Self::TimestampEquals,
        Self::TimestampLessThan,
        Self::TimestampLessThanEquals,
        Self::TimestampGreaterThan,
        Self::TimestampGreaterThanEquals,
        Self::IsNull,
        Self::IsPresent,
        Self::IsNumeric,
        Self::IsString,
        Self::IsBoolean,
        Self::IsTimestamp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::StringEquals => "StringEquals",
            Self::StringLessThan => "StringLessThan",
            Self::StringLessThanEquals => "StringLessThanEquals",
            Self::StringGreaterThan => "StringGreaterThan",
            Self::StringGreaterThanEquals => "StringGreaterThanEquals",
            Self::StringMatches => "StringMatches",
            Self::NumericEquals => "NumericEquals",
            Self::NumericLessThan => "NumericLessThan",
            Self::NumericLessThanEquals => "NumericLessThanEquals",
            Self::NumericGreaterThan => "NumericGreaterThan",
            Self::NumericGreaterThanEquals => "NumericGreaterThanEquals",
            Self::BooleanEquals => "BooleanEquals",
            Self::TimestampEquals => "TimestampEquals",
            Self::TimestampLessThan => "TimestampLessThan",
            Self::TimestampLessThanEquals => "TimestampLessThanEquals",
            Self::TimestampGreaterThan => "TimestampGreaterThan",
            Self::TimestampGreaterThanEquals => "TimestampGreaterThanEquals",
            Self::IsNull => "IsNull",
            Self::IsPresent => "IsPresent",
            Self::IsNumeric => "IsNumeric",
            Self::IsString => "IsString",
            Self::IsBoolean => "IsBoolean",
            Self::IsTimestamp => "IsTimestamp",
        }
    }

    /// Resolve a rule key such as `NumericLessThan` or `StringEqualsPath`.
    ///
    /// Returns the operator and whether the operand is a path.
    pub fn from_key(key: &str) -> Option<(Self, bool)> {
        if let Some(op) = Self::ALL.iter().find(|op| op.name() == key) {
            return Some((*op, false));
        }
        let base = key.strip_suffix("Path")?;
        Self::ALL
            .iter()
            .find(|op| op.name() == base && op.accepts_path_operand())
            .map(|op| (*op, true))
    }

    /// Type the literal operand must have.
    pub fn operand_kind(&self) -> OperandKind {
        match self {
            Self::StringEquals
            | Self::StringLessThan
            | Self::StringLessThanEquals
            | Self::StringGreaterThan
            | Self::StringGreaterThanEquals
            | Self::StringMatches => OperandKind::String,
            Self::NumericEquals
            | Self::NumericLessThan
            | Self::NumericLessThanEquals
            | Self::NumericGreaterThan
            | Self::NumericGreaterThanEquals => OperandKind::Number,
            Self::TimestampEquals
            | Self::TimestampLessThan
            | Self::TimestampLessThanEquals
            | Self::TimestampGreaterThan
            | Self::TimestampGreaterThanEquals => OperandKind::Timestamp,
            Self::BooleanEquals
            | Self::IsNull
            | Self::IsPresent
            | Self::IsNumeric
            | Self::IsString
            | Self::IsBoolean
            | Self::IsTimestamp => OperandKind::Boolean,
        }
    }

    /// Type predicates and `StringMatches` have no `...Path` form.
    pub fn accepts_path_operand(&self) -> bool {
        !matches!(
            self,
            Self::StringMatches
                | Self::IsNull
                | Self::IsPresent
                | Self::IsNumeric
                | Self::IsString
                | Self::IsBoolean
                | Self::IsTimestamp
        )
    }
}

/// Compile one top-level rule of a `Choices` array.
///
/// Returns the rule and its `Next` target.
pub(crate) fn compile_branch(value: &Value) -> Result<(ChoiceRule, String), String> {
    let object = value
        .as_object()
        .ok_or_else(|| "choice rule must be an object".to_string())?;
    let next = object
        .get("Next")
        .and_then(Value::as_str)
        .ok_or_else(|| "top-level choice rule requires a string 'Next'".to_string())?;
    let rule = compile_rule(object)?;
    Ok((rule, next.to_string()))
}

fn compile_nested(value: &Value) -> Result<ChoiceRule, String> {
    let object = value
        .as_object()
        .ok_or_else(|| "nested choice rule must be an object".to_string())?;
    if object.contains_key("Next") {
        return Err("nested choice rules must not declare 'Next'".to_string());
    }
    compile_rule(object)
}

fn compile_rule(object: &Map<String, Value>) -> Result<ChoiceRule, String> {
    let operators: Vec<&String> = object
        .keys()
        .filter(|key| !matches!(key.as_str(), "Variable" | "Next" | "Comment"))
        .collect();

    let key = match operators.as_slice() {
        [key] => key.as_str(),
        [] => return Err("choice rule has no operator".to_string()),
        _ => {
            return Err(format!(
                "choice rule has more than one operator: {}",
                operators
                    .iter()
                    .map(|k| k.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        }
    };
    let operand = &object[key];

    match key {
        "And" | "Or" => {
            let rules = operand
                .as_array()
                .filter(|rules| !rules.is_empty())
                .ok_or_else(|| format!("'{key}' requires a non-empty array of rules"))?
                .iter()
                .map(compile_nested)
                .collect::<Result<Vec<_>, _>>()?;
            if object.contains_key("Variable") {
                return Err(format!("'{key}' must not declare 'Variable'"));
            }
            Ok(if key == "And" {
                ChoiceRule::And(rules)
            } else {
                ChoiceRule::Or(rules)
            })
        }
        "Not" => {
            if object.contains_key("Variable") {
                return Err("'Not' must not declare 'Variable'".to_string());
            }
            Ok(ChoiceRule::Not(Box::new(compile_nested(operand)?)))
        }
        _ => {
            let (operator, is_path) = ComparisonOperator::from_key(key)
                .ok_or_else(|| format!("unknown comparison operator '{key}'"))?;
            let variable = object
                .get("Variable")
                .ok_or_else(|| format!("'{key}' requires 'Variable'"))?
                .as_str()
                .ok_or_else(|| "'Variable' must be a string".to_string())?;
            let variable = JsonPath::parse(variable).map_err(|e| e.to_string())?;
            let operand = if is_path {
                let path = operand
                    .as_str()
                    .ok_or_else(|| format!("'{key}' requires a path string"))?;
                Operand::Path(JsonPath::parse(path).map_err(|e| e.to_string())?)
            } else {
                check_literal(operator, operand)?;
                Operand::Literal(operand.clone())
            };
            Ok(ChoiceRule::Compare(Comparison {
                variable,
                operator,
                operand,
            }))
        }
    }
}

fn check_literal(operator: ComparisonOperator, operand: &Value) -> Result<(), String> {
    let ok = match operator.operand_kind() {
        OperandKind::String => operand.is_string(),
        OperandKind::Number => operand.is_number(),
        OperandKind::Boolean => operand.is_boolean(),
        OperandKind::Timestamp => operand
            .as_str()
            .is_some_and(|s| DateTime::parse_from_rfc3339(s).is_ok()),
    };
    if ok {
        Ok(())
    } else {
        Err(format!(
            "'{}' requires a {:?} operand, found {}",
            operator.name(),
            operator.operand_kind(),
            operand
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn compiles_simple_comparison() {
        let (rule, next) = compile_branch(&json!({
            "Variable": "$.status",
            "StringEquals": "ready",
            "Next": "Go"
        }))
        .unwrap();

        assert_eq!(next, "Go");
        assert_eq!(
            rule,
            ChoiceRule::Compare(Comparison {
                variable: JsonPath::parse("$.status").unwrap(),
                operator: ComparisonOperator::StringEquals,
                operand: Operand::Literal(json!("ready")),
            })
        );
    }

    #[test]
    fn compiles_path_operand_variant() {
        let (rule, _) = compile_branch(&json!({
            "Variable": "$.a",
            "NumericLessThanPath": "$.b",
            "Next": "X"
        }))
        .unwrap();

        match rule {
            ChoiceRule::Compare(c) => {
                assert_eq!(c.operator, ComparisonOperator::NumericLessThan);
                assert_eq!(c.operand, Operand::Path(JsonPath::parse("$.b").unwrap()));
            }
            other => panic!("expected comparison, got {other:?}"),
        }
    }

    #[test]
    fn compiles_nested_logic() {
        let (rule, _) = compile_branch(&json!({
            "And": [
                {"Variable": "$.a", "IsPresent": true},
                {"Not": {"Variable": "$.a", "IsNull": true}}
            ],
            "Next": "X"
        }))
        .unwrap();

        match rule {
            ChoiceRule::And(rules) => {
                assert_eq!(rules.len(), 2);
                assert!(matches!(rules[1], ChoiceRule::Not(_)));
            }
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_variable() {
        let err = compile_branch(&json!({"StringEquals": "x", "Next": "X"})).unwrap_err();
        assert!(err.contains("Variable"));
    }

    #[test]
    fn rejects_missing_operand() {
        let err = compile_branch(&json!({"Variable": "$.x", "Next": "X"})).unwrap_err();
        assert!(err.contains("no operator"));
    }

    #[test]
    fn rejects_mistyped_literal() {
        assert!(compile_branch(&json!({
            "Variable": "$.x", "NumericEquals": "5", "Next": "X"
        }))
        .is_err());
        assert!(compile_branch(&json!({
            "Variable": "$.x", "TimestampEquals": "yesterday", "Next": "X"
        }))
        .is_err());
    }

    #[test]
    fn rejects_next_inside_nested_rule() {
        assert!(compile_branch(&json!({
            "Not": {"Variable": "$.x", "IsNull": true, "Next": "Y"},
            "Next": "X"
        }))
        .is_err());
    }

    #[test]
    fn rejects_path_form_of_type_predicates() {
        assert_eq!(ComparisonOperator::from_key("IsNullPath"), None);
        assert_eq!(ComparisonOperator::from_key("StringMatchesPath"), None);
        assert_eq!(
            ComparisonOperator::from_key("TimestampEqualsPath"),
            Some((ComparisonOperator::TimestampEquals, true))
        );
    }
}
