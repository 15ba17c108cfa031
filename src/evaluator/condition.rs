use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{Segment, VariablePool};
use crate::model::EdgeCondition;

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsEmpty,
    IsNotEmpty,
    Exists,
    NotExists,
}

/// Evaluate one condition against the pool. The `field` dot path is looked
/// up first; `exists`/`not_exists` act on the lookup itself.
pub fn evaluate_condition(cond: &EdgeCondition, pool: &VariablePool) -> bool {
    let actual = pool.get(&cond.field);
    match cond.operator {
        ConditionOperator::Exists => return actual.is_some(),
        ConditionOperator::NotExists => return actual.is_none(),
        _ => {}
    }
    let actual = actual.unwrap_or(Segment::None);
    evaluate_operator(cond.operator, &actual, &cond.value)
}

/// All conditions must pass; an empty list always passes.
pub fn all_conditions_pass(conditions: &[EdgeCondition], pool: &VariablePool) -> bool {
    conditions.iter().all(|c| evaluate_condition(c, pool))
}

/// Evaluate an operator against a resolved value.
pub fn evaluate_operator(op: ConditionOperator, actual: &Segment, expected: &Value) -> bool {
    match op {
        ConditionOperator::Equals => eval_equals(actual, expected),
        ConditionOperator::NotEquals => !eval_equals(actual, expected),
        ConditionOperator::GreaterThan => eval_numeric(actual, expected, |a, b| a > b),
        ConditionOperator::LessThan => eval_numeric(actual, expected, |a, b| a < b),
        ConditionOperator::GreaterOrEqual => eval_numeric(actual, expected, |a, b| a >= b),
        ConditionOperator::LessOrEqual => eval_numeric(actual, expected, |a, b| a <= b),
        ConditionOperator::Contains => eval_contains(actual, expected),
        ConditionOperator::NotContains => !eval_contains(actual, expected),
        ConditionOperator::StartsWith => actual
            .to_display_string()
            .starts_with(&value_to_string(expected)),
        ConditionOperator::EndsWith => actual
            .to_display_string()
            .ends_with(&value_to_string(expected)),
        ConditionOperator::In => eval_in(actual, expected),
        ConditionOperator::NotIn => !eval_in(actual, expected),
        ConditionOperator::IsEmpty => actual.is_empty(),
        ConditionOperator::IsNotEmpty => !actual.is_empty(),
        // exists/not_exists are resolved before lookup; against a resolved
        // value they degrade to a null check.
        ConditionOperator::Exists => !actual.is_none(),
        ConditionOperator::NotExists => actual.is_none(),
    }
}

fn value_to_string(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn value_to_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn eval_equals(actual: &Segment, expected: &Value) -> bool {
    // Numbers compare numerically so 42 == "42" and 1 == 1.0.
    if let (Some(a), Some(b)) = (actual.as_f64(), value_to_f64(expected)) {
        return (a - b).abs() < f64::EPSILON;
    }
    if let (Some(a), Value::Bool(b)) = (actual.as_bool(), expected) {
        return a == *b;
    }
    match (actual, expected) {
        (Segment::None, Value::Null) => true,
        _ => actual.to_display_string() == value_to_string(expected),
    }
}

fn eval_numeric(actual: &Segment, expected: &Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (actual.as_f64(), value_to_f64(expected)) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

fn eval_contains(actual: &Segment, expected: &Value) -> bool {
    let e = value_to_string(expected);
    match actual {
        Segment::String(s) => s.contains(&e),
        Segment::Array(arr) => arr.iter().any(|s| s.to_display_string() == e),
        Segment::Object(map) => map.contains_key(&e),
        _ => false,
    }
}

fn eval_in(actual: &Segment, expected: &Value) -> bool {
    let actual_str = actual.to_display_string();
    match expected {
        Value::Array(arr) => arr.iter().any(|v| value_to_string(v) == actual_str),
        Value::String(s) => s.contains(&actual_str),
        _ => false,
    }
}
