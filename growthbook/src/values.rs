use std::cmp::Ordering;

use serde_json::Value;

/// Rule sets are authored against JavaScript semantics, so attribute values are coerced the
/// way a browser SDK would coerce them before they are compared, hashed or tested for
/// truthiness.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    if n.fract() == 0.0 {
        return format!("{n:.0}");
    }
    n.to_string()
}

pub fn to_string_representation(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) => number_to_string(f),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_string_representation(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Numeric coercion; `None` stands in for `NaN`.
pub fn to_f64_representation(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Null => 0.0,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                0.0
            } else {
                trimmed.parse::<f64>().ok().filter(|f| f.is_finite())?
            }
        }
        Value::Array(items) => match items.as_slice() {
            [] => 0.0,
            [single] => to_f64_representation(&Value::String(to_string_representation(single)))?,
            _ => return None,
        },
        Value::Object(_) => return None,
    };
    Some(n)
}

/// Strict (`===`) equality. Arrays and objects are never strictly equal to anything.
pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        _ => false,
    }
}

/// Structural equality where `1` and `1.0` are the same number.
pub fn json_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| json_equals(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, l)| y.get(k).is_some_and(|r| json_equals(l, r)))
        }
        _ => a == b,
    }
}

/// Relational comparison with JavaScript's `<`/`>` rules: two strings compare by code
/// units, anything else compares numerically. `None` when either side is not a number.
pub fn loose_compare(a: &Value, b: &Value) -> Option<Ordering> {
    let to_primitive = |v: &Value| match v {
        Value::Array(_) | Value::Object(_) => Value::String(to_string_representation(v)),
        other => other.clone(),
    };
    match (to_primitive(a), to_primitive(b)) {
        (Value::String(x), Value::String(y)) => Some(x.encode_utf16().cmp(y.encode_utf16())),
        (x, y) => {
            let lhs = to_f64_representation(&x)?;
            let rhs = to_f64_representation(&y)?;
            lhs.partial_cmp(&rhs)
        }
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
