use std::cmp::Ordering;

use fancy_regex::Regex;
use moka::sync::Cache;
use once_cell::sync::Lazy;
use serde_json::Value;

use crate::conditions::condition_models::{
    Clause, Comparison, Condition, ConditionValue, ElemMatch, Operator,
};
use crate::errors::EvalWarning;
use crate::values::{
    is_truthy, json_equals, loose_compare, strict_equals, to_f64_representation,
    to_string_representation, type_name,
};
use crate::version::padded_version_string;

const REGEX_CACHE_CAPACITY: u64 = 1_000;

// Patterns that fail to compile are cached as `None`.
static REGEX_CACHE: Lazy<Cache<String, Option<Regex>>> =
    Lazy::new(|| Cache::new(REGEX_CACHE_CAPACITY));

static NULL: Value = Value::Null;

pub(crate) fn cached_regex(pattern: &str) -> Option<Regex> {
    REGEX_CACHE.get_with(pattern.to_string(), || Regex::new(pattern).ok())
}

/// Resolves a dot-separated path into `target`; missing segments resolve to `null`.
pub fn get_path<'a>(target: &'a Value, path: &str) -> &'a Value {
    let mut current = target;
    for segment in path.split('.') {
        let next = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => current = value,
            None => return &NULL,
        }
    }
    current
}

/// Evaluates `condition` against `target`, discarding diagnostics.
pub fn eval_condition(target: &Value, condition: &Condition) -> bool {
    let mut warnings = Vec::new();
    eval_condition_collecting(target, condition, &mut warnings)
}

/// Evaluates `condition` against `target`. Malformed clauses evaluate to `false` and push an
/// [`EvalWarning`] instead of aborting the evaluation.
pub fn eval_condition_collecting(
    target: &Value,
    condition: &Condition,
    warnings: &mut Vec<EvalWarning>,
) -> bool {
    condition
        .clauses()
        .iter()
        .all(|clause| eval_clause(target, clause, warnings))
}

fn eval_clause(target: &Value, clause: &Clause, warnings: &mut Vec<EvalWarning>) -> bool {
    match clause {
        Clause::Or(conditions) => eval_or(target, conditions, warnings),
        Clause::Nor(conditions) => !eval_or(target, conditions, warnings),
        Clause::And(conditions) => conditions
            .iter()
            .all(|condition| eval_condition_collecting(target, condition, warnings)),
        Clause::Not(condition) => !eval_condition_collecting(target, condition, warnings),
        Clause::Field { path, expected } => {
            eval_condition_value_collecting(expected, get_path(target, path), warnings)
        }
        Clause::Malformed(reason) => {
            tracing::debug!(reason = %reason, "Malformed condition clause");
            warnings.push(EvalWarning::MalformedCondition(reason.clone()));
            false
        }
    }
}

fn eval_or(target: &Value, conditions: &[Condition], warnings: &mut Vec<EvalWarning>) -> bool {
    if conditions.is_empty() {
        return true;
    }
    conditions
        .iter()
        .any(|condition| eval_condition_collecting(target, condition, warnings))
}

pub fn eval_condition_value(expected: &ConditionValue, actual: &Value) -> bool {
    let mut warnings = Vec::new();
    eval_condition_value_collecting(expected, actual, &mut warnings)
}

pub fn eval_condition_value_collecting(
    expected: &ConditionValue,
    actual: &Value,
    warnings: &mut Vec<EvalWarning>,
) -> bool {
    match expected {
        ConditionValue::Literal(Value::String(s)) => to_string_representation(actual) == *s,
        ConditionValue::Literal(Value::Number(n)) => {
            to_f64_representation(actual).is_some_and(|f| Some(f) == n.as_f64())
        }
        ConditionValue::Literal(Value::Bool(b)) => is_truthy(actual) == *b,
        ConditionValue::Literal(Value::Null) => actual.is_null(),
        ConditionValue::Literal(other) => json_equals(actual, other),
        ConditionValue::Operators(operators) => operators
            .iter()
            .all(|operator| eval_operator(operator, actual, warnings)),
    }
}

fn compare(comparison: Comparison, ordering: Option<Ordering>) -> bool {
    let Some(ordering) = ordering else {
        return false;
    };
    match comparison {
        Comparison::Eq => ordering == Ordering::Equal,
        Comparison::Ne => ordering != Ordering::Equal,
        Comparison::Lt => ordering == Ordering::Less,
        Comparison::Lte => ordering != Ordering::Greater,
        Comparison::Gt => ordering == Ordering::Greater,
        Comparison::Gte => ordering != Ordering::Less,
    }
}

fn is_in(actual: &Value, expected: &[Value]) -> bool {
    match actual {
        Value::Array(items) => items
            .iter()
            .any(|item| expected.iter().any(|e| strict_equals(item, e))),
        _ => expected.iter().any(|e| strict_equals(actual, e)),
    }
}

fn eval_operator(operator: &Operator, actual: &Value, warnings: &mut Vec<EvalWarning>) -> bool {
    match operator {
        Operator::Compare(Comparison::Eq, expected) => strict_equals(actual, expected),
        Operator::Compare(Comparison::Ne, expected) => !strict_equals(actual, expected),
        Operator::Compare(comparison, expected) => {
            compare(*comparison, loose_compare(actual, expected))
        }
        Operator::Version(comparison, expected) => {
            let actual = padded_version_string(actual);
            compare(*comparison, Some(actual.as_str().cmp(expected.as_str())))
        }
        Operator::In(expected) => is_in(actual, expected),
        Operator::Nin(expected) => !is_in(actual, expected),
        Operator::Exists(true) => !actual.is_null(),
        Operator::Exists(false) => actual.is_null(),
        Operator::Size(expected) => match actual {
            Value::Array(items) => {
                eval_condition_value_collecting(expected, &Value::from(items.len()), warnings)
            }
            _ => false,
        },
        Operator::ElemMatch(expected) => match actual {
            Value::Array(items) => items.iter().any(|item| match expected {
                ElemMatch::Value(value) => eval_condition_value_collecting(value, item, warnings),
                ElemMatch::Condition(condition) => {
                    eval_condition_collecting(item, condition, warnings)
                }
            }),
            _ => false,
        },
        Operator::All(expected) => match actual {
            Value::Array(items) => expected.iter().all(|condition| {
                items
                    .iter()
                    .any(|item| eval_condition_value_collecting(condition, item, warnings))
            }),
            _ => false,
        },
        Operator::Not(expected) => !eval_condition_value_collecting(expected, actual, warnings),
        Operator::Regex(pattern) => match cached_regex(pattern) {
            Some(regex) => regex
                .is_match(&to_string_representation(actual))
                .unwrap_or(false),
            None => {
                tracing::debug!(pattern = %pattern, "Invalid regex in condition");
                warnings.push(EvalWarning::InvalidRegex(pattern.clone()));
                false
            }
        },
        Operator::Type(expected) => type_name(actual) == expected.as_str(),
        Operator::Malformed(reason) => {
            tracing::debug!(reason = %reason, "Malformed condition operator");
            warnings.push(EvalWarning::MalformedCondition(reason.clone()));
            false
        }
        Operator::Unknown(op) => {
            tracing::debug!(operator = %op, "Unknown condition operator");
            warnings.push(EvalWarning::UnknownOperator(op.clone()));
            false
        }
    }
}
