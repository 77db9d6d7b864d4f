//! Body matching: string, JSON, JSONPath, XPath, and regex variants.
//!
//! Configurations compile once at admission into [`BodyMatch`]; evaluation
//! is total. Malformed actual input (invalid JSON, invalid XML) is a
//! non-match, never an error.

use super::json_match::{json_matches, JsonCompareMode};
use super::string_match::StringMatch;
use crate::expectation::{BodySpec, MatchType, ValidationError};
use serde_json::Value;
use sxd_xpath::Factory;

/// Compiled body matcher.
#[derive(Debug, Clone)]
pub struct BodyMatch {
    kind: BodyMatchKind,
    not: bool,
}

#[derive(Debug, Clone)]
enum BodyMatchKind {
    String(String),
    Json {
        expected: Value,
        mode: JsonCompareMode,
    },
    JsonPath(String),
    XPath(String),
    Regex(StringMatch),
}

impl BodyMatch {
    /// Compile a body spec, validating any embedded expressions.
    pub fn compile(spec: &BodySpec) -> Result<Self, ValidationError> {
        let (kind, not) = match spec {
            BodySpec::String { value, not } => (BodyMatchKind::String(value.clone()), *not),
            BodySpec::Json {
                value,
                match_type,
                not,
            } => {
                let mode = match match_type {
                    Some(MatchType::OnlyMatchingFields) => JsonCompareMode::Contains,
                    _ => JsonCompareMode::Exact,
                };
                (
                    BodyMatchKind::Json {
                        expected: value.clone(),
                        mode,
                    },
                    *not,
                )
            }
            BodySpec::Jsonpath { value, not } => {
                parse_json_path(value).ok_or_else(|| ValidationError::JsonPath(value.clone()))?;
                (BodyMatchKind::JsonPath(value.clone()), *not)
            }
            BodySpec::Xpath { value, not } => {
                // sxd XPath objects are not Sync, so only the expression is
                // retained; validity is checked once here.
                match Factory::new().build(value) {
                    Ok(Some(_)) => {}
                    _ => return Err(ValidationError::XPath(value.clone())),
                }
                (BodyMatchKind::XPath(value.clone()), *not)
            }
            BodySpec::Regex { value, not } => (
                BodyMatchKind::Regex(StringMatch::compile_regex(value).map_err(|source| {
                    ValidationError::Regex {
                        field: "body",
                        source,
                    }
                })?),
                *not,
            ),
        };
        Ok(BodyMatch { kind, not })
    }

    pub fn matches(&self, body: &[u8]) -> bool {
        let result = match &self.kind {
            BodyMatchKind::String(expected) => expected.as_bytes() == body,
            BodyMatchKind::Json { expected, mode } => match serde_json::from_slice::<Value>(body) {
                Ok(actual) => json_matches(expected, &actual, *mode),
                Err(_) => false,
            },
            BodyMatchKind::JsonPath(expr) => match serde_json::from_slice::<Value>(body) {
                Ok(actual) => !json_path_select(&actual, expr).is_empty(),
                Err(_) => false,
            },
            BodyMatchKind::XPath(expr) => std::str::from_utf8(body)
                .is_ok_and(|text| xpath_selects(text, expr)),
            BodyMatchKind::Regex(re) => {
                std::str::from_utf8(body).is_ok_and(|text| re.matches(text))
            }
        };
        if self.not {
            !result
        } else {
            result
        }
    }
}

// ============================================================================
// JSONPath
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum PathStep {
    Key(String),
    Index(usize),
    AnyIndex,
    /// `..name` recursive descent to every matching key.
    Descendant(String),
}

/// Parse a JSONPath expression into steps. Returns `None` on syntax the
/// engine does not understand, which the admission gate reports as invalid.
fn parse_json_path(path: &str) -> Option<Vec<PathStep>> {
    let mut rest = path.strip_prefix('$').unwrap_or(path);
    let mut steps = Vec::new();

    while !rest.is_empty() {
        if let Some(after) = rest.strip_prefix("..") {
            let end = after
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after.len());
            if end == 0 {
                return None;
            }
            steps.push(PathStep::Descendant(after[..end].to_string()));
            rest = &after[end..];
        } else if let Some(after) = rest.strip_prefix('[') {
            let close = after.find(']')?;
            let selector = &after[..close];
            if selector == "*" {
                steps.push(PathStep::AnyIndex);
            } else {
                steps.push(PathStep::Index(selector.parse().ok()?));
            }
            rest = &after[close + 1..];
        } else {
            let after = rest.strip_prefix('.').unwrap_or(rest);
            if after.is_empty() {
                return None;
            }
            let end = after
                .find(|c| c == '.' || c == '[')
                .unwrap_or(after.len());
            if end == 0 {
                return None;
            }
            steps.push(PathStep::Key(after[..end].to_string()));
            rest = &after[end..];
        }
    }

    Some(steps)
}

/// Evaluate a JSONPath expression, returning every selected value.
pub fn json_path_select<'a>(root: &'a Value, path: &str) -> Vec<&'a Value> {
    let Some(steps) = parse_json_path(path) else {
        return Vec::new();
    };

    let mut current = vec![root];
    for step in &steps {
        let mut next = Vec::new();
        for value in current {
            match step {
                PathStep::Key(key) => {
                    if let Some(v) = value.as_object().and_then(|o| o.get(key)) {
                        next.push(v);
                    }
                }
                PathStep::Index(i) => {
                    if let Some(v) = value.as_array().and_then(|a| a.get(*i)) {
                        next.push(v);
                    }
                }
                PathStep::AnyIndex => {
                    if let Some(arr) = value.as_array() {
                        next.extend(arr.iter());
                    }
                }
                PathStep::Descendant(key) => collect_descendants(value, key, &mut next),
            }
        }
        if next.is_empty() {
            return Vec::new();
        }
        current = next;
    }
    current
}

fn collect_descendants<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if k == key {
                    out.push(v);
                }
                collect_descendants(v, key, out);
            }
        }
        Value::Array(arr) => {
            for v in arr {
                collect_descendants(v, key, out);
            }
        }
        _ => {}
    }
}

// ============================================================================
// XPath
// ============================================================================

/// Evaluate an XPath expression against an XML body; parse errors are
/// silent non-matches.
fn xpath_selects(body: &str, expr: &str) -> bool {
    let Ok(package) = sxd_document::parser::parse(body) else {
        return false;
    };
    let document = package.as_document();

    match sxd_xpath::evaluate_xpath(&document, expr) {
        Ok(sxd_xpath::Value::Nodeset(nodes)) => nodes.size() > 0,
        Ok(sxd_xpath::Value::Boolean(b)) => b,
        Ok(sxd_xpath::Value::Number(n)) => !n.is_nan(),
        Ok(sxd_xpath::Value::String(s)) => !s.is_empty(),
        Err(_) => false,
    }
}
