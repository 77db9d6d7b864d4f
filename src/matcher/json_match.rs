//! Structural JSON comparison with JSON-Unit placeholder support.
//!
//! Two modes: exact, which requires object key-set equality and array
//! length plus order, and contains, where the expected document only needs
//! to be embedded in the actual one. Placeholder strings of the form
//! `${json-unit.*}` in the expected document match by JSON type instead of
//! by value, in either mode.

use serde_json::Value;

const PLACEHOLDER_PREFIX: &str = "${json-unit.";

/// Comparison mode for [`json_matches`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonCompareMode {
    /// Deep equality: object key sets agree, arrays agree in length and
    /// order.
    Exact,
    /// Containment: every expected key/value is present in the actual
    /// document; arrays match element-wise by containment.
    Contains,
}

/// Compare an actual JSON document against an expected one.
pub fn json_matches(expected: &Value, actual: &Value, mode: JsonCompareMode) -> bool {
    if let Some(verdict) = placeholder_matches(expected, actual) {
        return verdict;
    }

    match (expected, actual) {
        (Value::Object(exp), Value::Object(act)) => {
            let keys_ok = match mode {
                JsonCompareMode::Exact => exp.len() == act.len(),
                JsonCompareMode::Contains => true,
            };
            keys_ok
                && exp.iter().all(|(key, exp_val)| {
                    act.get(key)
                        .is_some_and(|act_val| json_matches(exp_val, act_val, mode))
                })
        }
        (Value::Array(exp), Value::Array(act)) => match mode {
            JsonCompareMode::Exact => {
                exp.len() == act.len()
                    && exp
                        .iter()
                        .zip(act.iter())
                        .all(|(e, a)| json_matches(e, a, mode))
            }
            JsonCompareMode::Contains => exp
                .iter()
                .all(|e| act.iter().any(|a| json_matches(e, a, mode))),
        },
        _ => expected == actual,
    }
}

/// Evaluate a JSON-Unit placeholder, if the expected value is one.
fn placeholder_matches(expected: &Value, actual: &Value) -> Option<bool> {
    let text = expected.as_str()?;
    let name = text
        .strip_prefix(PLACEHOLDER_PREFIX)
        .and_then(|rest| rest.strip_suffix('}'))?;

    match name {
        "ignore" => Some(true),
        "any-string" => Some(actual.is_string()),
        "any-number" => Some(actual.is_number()),
        "any-boolean" => Some(actual.is_boolean()),
        "any-object" => Some(actual.is_object()),
        "any-array" => Some(actual.is_array()),
        // Unknown placeholders fall back to literal comparison.
        _ => None,
    }
}
