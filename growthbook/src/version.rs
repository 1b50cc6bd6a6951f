use serde_json::Value;

use crate::values::to_string_representation;

/// Normalizes a version-like value so that plain string comparison orders versions correctly.
///
/// Numeric segments are left-padded to five characters (`"2.9"` becomes `"    2-    9"`,
/// which sorts before `"    2-   10"`). A leading `v` and any `+build` suffix are dropped, and
/// a bare `major.minor.patch` gets a trailing `~` so it sorts after its own pre-releases
/// (`1.0.0-beta` < `1.0.0`).
pub fn padded_version_string(input: &Value) -> String {
    let raw = match input {
        Value::String(s) if !s.is_empty() => s.clone(),
        Value::Number(_) => to_string_representation(input),
        _ => "0".to_string(),
    };

    let trimmed = raw.strip_prefix('v').unwrap_or(&raw);
    let trimmed = match trimmed.find('+') {
        Some(idx) => &trimmed[..idx],
        None => trimmed,
    };

    let mut parts: Vec<&str> = trimmed.split(['-', '.']).collect();
    if parts.len() == 3 {
        parts.push("~");
    }

    parts
        .iter()
        .map(|part| {
            if !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()) {
                format!("{part:>5}")
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}
