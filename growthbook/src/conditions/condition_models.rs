use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::values::to_string_representation;
use crate::version::padded_version_string;

/// A parsed targeting condition.
///
/// Conditions arrive as MongoDB-style JSON documents. They are parsed once, when the rule set
/// is deserialized, into a tree that the evaluator walks without further inspection of the
/// raw JSON. Parsing never fails: anything that cannot be understood becomes a
/// [`Clause::Malformed`] or [`Operator::Malformed`] node that evaluates to `false`.
///
/// The raw document is kept so that the condition serializes back to exactly what was
/// received.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(from = "Value", into = "Value")]
pub struct Condition {
    clauses: Vec<Clause>,
    source: Value,
}

/// One key of a condition document. All clauses of a condition must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Or(Vec<Condition>),
    Nor(Vec<Condition>),
    And(Vec<Condition>),
    Not(Box<Condition>),
    Field {
        path: String,
        expected: ConditionValue,
    },
    Malformed(String),
}

/// What an attribute path is matched against.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    /// Scalars, arrays, and objects with at least one key that isn't an operator.
    Literal(Value),
    /// An object whose keys are all operators; every operator must hold.
    Operators(Vec<Operator>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ElemMatch {
    /// `{"$elemMatch": {"$gt": 5}}`: each element is matched as a value.
    Value(Box<ConditionValue>),
    /// `{"$elemMatch": {"name": "x"}}`: each element is matched as a document.
    Condition(Box<Condition>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operator {
    Compare(Comparison, Value),
    /// Semantic version comparison; the operand is stored already padded.
    Version(Comparison, String),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Size(Box<ConditionValue>),
    ElemMatch(ElemMatch),
    All(Vec<ConditionValue>),
    Not(Box<ConditionValue>),
    Regex(String),
    Type(String),
    Malformed(String),
    Unknown(String),
}

impl Condition {
    pub fn clauses(&self) -> &[Clause] {
        &self.clauses
    }

    pub fn source(&self) -> &Value {
        &self.source
    }
}

impl From<Value> for Condition {
    fn from(source: Value) -> Self {
        let clauses = match &source {
            Value::Object(map) => map.iter().map(|(key, value)| parse_clause(key, value)).collect(),
            other => vec![Clause::Malformed(format!(
                "condition must be an object, got {other}"
            ))],
        };
        Condition { clauses, source }
    }
}

impl From<Condition> for Value {
    fn from(condition: Condition) -> Self {
        condition.source
    }
}

fn parse_condition_list(key: &str, value: &Value) -> Result<Vec<Condition>, String> {
    match value {
        Value::Array(items) => Ok(items.iter().cloned().map(Condition::from).collect()),
        other => Err(format!("{key} expects an array, got {other}")),
    }
}

fn parse_clause(key: &str, value: &Value) -> Clause {
    let parsed = match key {
        "$or" => parse_condition_list(key, value).map(Clause::Or),
        "$nor" => parse_condition_list(key, value).map(Clause::Nor),
        "$and" => parse_condition_list(key, value).map(Clause::And),
        "$not" => match value {
            Value::Object(_) => Ok(Clause::Not(Box::new(Condition::from(value.clone())))),
            other => Err(format!("$not expects an object, got {other}")),
        },
        path => Ok(Clause::Field {
            path: path.to_string(),
            expected: ConditionValue::from(value),
        }),
    };
    parsed.unwrap_or_else(Clause::Malformed)
}

pub fn is_operator_object(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|key| key.starts_with('$'))
}

impl From<&Value> for ConditionValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Object(map) if is_operator_object(map) => ConditionValue::Operators(
                map.iter()
                    .map(|(op, operand)| parse_operator(op, operand))
                    .collect(),
            ),
            other => ConditionValue::Literal(other.clone()),
        }
    }
}

fn parse_value_list(op: &str, operand: &Value) -> Result<Vec<Value>, String> {
    match operand {
        Value::Array(items) => Ok(items.clone()),
        other => Err(format!("{op} expects an array, got {other}")),
    }
}

fn parse_operator(op: &str, operand: &Value) -> Operator {
    let comparison = |cmp| Operator::Compare(cmp, operand.clone());
    let version = |cmp| Operator::Version(cmp, padded_version_string(operand));

    let parsed = match op {
        "$eq" => Ok(comparison(Comparison::Eq)),
        "$ne" => Ok(comparison(Comparison::Ne)),
        "$lt" => Ok(comparison(Comparison::Lt)),
        "$lte" => Ok(comparison(Comparison::Lte)),
        "$gt" => Ok(comparison(Comparison::Gt)),
        "$gte" => Ok(comparison(Comparison::Gte)),
        "$veq" => Ok(version(Comparison::Eq)),
        "$vne" => Ok(version(Comparison::Ne)),
        "$vlt" => Ok(version(Comparison::Lt)),
        "$vlte" => Ok(version(Comparison::Lte)),
        "$vgt" => Ok(version(Comparison::Gt)),
        "$vgte" => Ok(version(Comparison::Gte)),
        "$in" => parse_value_list(op, operand).map(Operator::In),
        "$nin" => parse_value_list(op, operand).map(Operator::Nin),
        "$exists" => Ok(Operator::Exists(crate::values::is_truthy(operand))),
        "$size" => Ok(Operator::Size(Box::new(ConditionValue::from(operand)))),
        "$elemMatch" => Ok(Operator::ElemMatch(match operand {
            Value::Object(map) if is_operator_object(map) => {
                ElemMatch::Value(Box::new(ConditionValue::from(operand)))
            }
            _ => ElemMatch::Condition(Box::new(Condition::from(operand.clone()))),
        })),
        "$all" => parse_value_list(op, operand)
            .map(|items| Operator::All(items.iter().map(ConditionValue::from).collect())),
        "$not" => Ok(Operator::Not(Box::new(ConditionValue::from(operand)))),
        "$regex" => Ok(Operator::Regex(to_string_representation(operand))),
        "$type" => match operand {
            Value::String(type_name) => Ok(Operator::Type(type_name.clone())),
            other => Err(format!("$type expects a string, got {other}")),
        },
        unknown => Ok(Operator::Unknown(unknown.to_string())),
    };
    parsed.unwrap_or_else(Operator::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parses_field_literal() {
        let condition = Condition::from(json!({"plan": "pro"}));
        assert_eq!(
            condition.clauses(),
            &[Clause::Field {
                path: "plan".to_string(),
                expected: ConditionValue::Literal(json!("pro")),
            }]
        );
    }

    #[test]
    fn test_parses_operator_object() {
        let condition = Condition::from(json!({"age": {"$gte": 18, "$lt": 65}}));
        let Clause::Field { expected, .. } = &condition.clauses()[0] else {
            panic!("expected a field clause");
        };
        let ConditionValue::Operators(ops) = expected else {
            panic!("expected operators");
        };
        assert_eq!(ops.len(), 2);
        assert!(ops.contains(&Operator::Compare(Comparison::Gte, json!(18))));
        assert!(ops.contains(&Operator::Compare(Comparison::Lt, json!(65))));
    }

    #[test]
    fn test_mixed_object_is_a_literal() {
        let value = ConditionValue::from(&json!({"$gt": 1, "plain": 2}));
        assert!(matches!(value, ConditionValue::Literal(_)));

        let value = ConditionValue::from(&json!({}));
        assert!(matches!(value, ConditionValue::Literal(_)));
    }

    #[test]
    fn test_parses_logical_combinators() {
        let condition = Condition::from(json!({
            "$or": [{"a": 1}, {"b": 2}],
            "$not": {"c": 3},
        }));
        assert_eq!(condition.clauses().len(), 2);
        assert!(condition
            .clauses()
            .iter()
            .any(|c| matches!(c, Clause::Or(items) if items.len() == 2)));
        assert!(condition
            .clauses()
            .iter()
            .any(|c| matches!(c, Clause::Not(_))));
    }

    #[test]
    fn test_malformed_shapes_are_kept_as_nodes() {
        let condition = Condition::from(json!({"$or": {"a": 1}}));
        assert!(matches!(condition.clauses()[0], Clause::Malformed(_)));

        let condition = Condition::from(json!(["not", "an", "object"]));
        assert!(matches!(condition.clauses()[0], Clause::Malformed(_)));

        let value = ConditionValue::from(&json!({"$in": "nope"}));
        assert_eq!(
            value,
            ConditionValue::Operators(vec![Operator::Malformed(
                "$in expects an array, got \"nope\"".to_string()
            )])
        );

        let value = ConditionValue::from(&json!({"$bogus": 1}));
        assert_eq!(
            value,
            ConditionValue::Operators(vec![Operator::Unknown("$bogus".to_string())])
        );
    }

    #[test]
    fn test_version_operand_is_padded_at_parse_time() {
        let value = ConditionValue::from(&json!({"$vgt": "2.9"}));
        assert_eq!(
            value,
            ConditionValue::Operators(vec![Operator::Version(
                Comparison::Gt,
                "    2-    9".to_string()
            )])
        );
    }

    #[test]
    fn test_round_trips_source_document() {
        let source = json!({"country": {"$in": ["US", "CA"]}, "$or": [{"beta": true}]});
        let condition: Condition = serde_json::from_value(source.clone()).expect("parses");
        assert_eq!(serde_json::to_value(&condition).expect("serializes"), source);
    }
}
