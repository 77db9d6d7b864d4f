//! Multi-valued field matching for headers and query parameters.
//!
//! Expected values use set semantics: every expected key must be present
//! and every expected value for a key must be matched by some actual value
//! (string comparison first, regex second). Under `STRICT` the expected and
//! actual key sets must also agree; for headers, a fixed whitelist of
//! standard headers is exempt unless the expectation asserts on one
//! explicitly, in which case it counts toward the agreement.

use super::string_match::ValueMatch;
use crate::expectation::{FieldMap, Spec};

/// Standard headers ignored by `STRICT` key-set agreement.
pub const STANDARD_HEADER_WHITELIST: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "user-agent",
    "accept",
    "accept-encoding",
    "content-type",
];

/// Compiled matcher over a name→values multimap.
#[derive(Debug, Clone)]
pub struct FieldsMatch {
    entries: Vec<FieldEntry>,
    not: bool,
    /// Header matching lowercases names on both sides.
    case_insensitive_names: bool,
}

#[derive(Debug, Clone)]
struct FieldEntry {
    name: String,
    values: Vec<ValueMatch>,
}

impl FieldsMatch {
    pub fn compile(spec: &Spec<FieldMap>, case_insensitive_names: bool) -> Self {
        let entries = spec
            .value()
            .iter()
            .map(|(name, expected)| FieldEntry {
                name: if case_insensitive_names {
                    name.to_lowercase()
                } else {
                    name.clone()
                },
                values: expected.as_slice().iter().map(|v| ValueMatch::compile(v)).collect(),
            })
            .collect();
        FieldsMatch {
            entries,
            not: spec.not(),
            case_insensitive_names,
        }
    }

    /// Match against the request's multimap.
    ///
    /// `actual` yields `(name, values)` pairs; header names are expected to
    /// be pre-lowercased by the framing layer. `strict` enforces key-set
    /// agreement; `whitelist` names keys exempt from it.
    pub fn matches<'a, I>(&self, actual: I, strict: bool, whitelist: &[&str]) -> bool
    where
        I: Iterator<Item = (&'a str, &'a [String])> + Clone,
    {
        let result = self.matches_inner(actual, strict, whitelist);
        if self.not {
            !result
        } else {
            result
        }
    }

    fn matches_inner<'a, I>(&self, actual: I, strict: bool, whitelist: &[&str]) -> bool
    where
        I: Iterator<Item = (&'a str, &'a [String])> + Clone,
    {
        for entry in &self.entries {
            let values = actual
                .clone()
                .filter(|(name, _)| self.name_eq(entry.name.as_str(), name))
                .flat_map(|(_, vs)| vs.iter());
            let found: Vec<&String> = values.collect();
            if found.is_empty() {
                return false;
            }
            for expected in &entry.values {
                if !found.iter().any(|v| expected.matches(v)) {
                    return false;
                }
            }
        }

        if strict {
            // An explicitly asserted key loses its whitelist exemption.
            for (name, _) in actual {
                if self.entries.iter().any(|e| self.name_eq(&e.name, name)) {
                    continue;
                }
                if whitelist.iter().any(|w| self.name_eq(w, name)) {
                    continue;
                }
                return false;
            }
        }

        true
    }

    fn name_eq(&self, expected: &str, actual: &str) -> bool {
        if self.case_insensitive_names {
            expected.eq_ignore_ascii_case(actual)
        } else {
            expected == actual
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// `STRICT` check for a field the expectation leaves unspecified: the
/// request-side set must be empty modulo the whitelist.
pub fn unspecified_is_empty<'a, I>(actual: I, whitelist: &[&str]) -> bool
where
    I: Iterator<Item = &'a str>,
{
    for name in actual {
        if !whitelist.iter().any(|w| w.eq_ignore_ascii_case(name)) {
            return false;
        }
    }
    true
}
