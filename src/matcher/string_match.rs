//! Core string predicates: literal, regex, and wildcard matching.
//!
//! Patterns compile once at admission; matching is a pure function that
//! never fails. A pattern that does not compile is rejected by the
//! admission gate, so it can never reach the hot path.

use regex::Regex;
use std::sync::Arc;

/// A compiled string predicate.
#[derive(Debug, Clone)]
pub enum StringMatch {
    /// Byte-equal comparison.
    Literal(String),
    /// Containment regex over the full actual string.
    Regex(Arc<Regex>),
    /// Glob pattern, anchored at both ends with each `*` matching anything.
    Wildcard(Arc<Regex>),
}

impl StringMatch {
    /// Compile a path-style pattern: `/regex/` form, `*`-glob, or literal.
    pub fn compile_path(pattern: &str) -> Result<Self, regex::Error> {
        if let Some(inner) = regex_literal(pattern) {
            return Ok(StringMatch::Regex(Arc::new(Regex::new(inner)?)));
        }
        if pattern.contains('*') {
            return Ok(StringMatch::Wildcard(Arc::new(Regex::new(
                &wildcard_to_regex(pattern),
            )?)));
        }
        Ok(StringMatch::Literal(pattern.to_string()))
    }

    /// Compile a containment regex.
    pub fn compile_regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(StringMatch::Regex(Arc::new(Regex::new(pattern)?)))
    }

    pub fn matches(&self, actual: &str) -> bool {
        match self {
            StringMatch::Literal(expected) => expected == actual,
            StringMatch::Regex(re) => re.is_match(actual),
            StringMatch::Wildcard(re) => re.is_match(actual),
        }
    }

    /// The literal value, when this is a plain literal.
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            StringMatch::Literal(v) => Some(v),
            _ => None,
        }
    }
}

/// A header/query value predicate: exact string first, then the expected
/// value reinterpreted as a containment regex. A value that does not
/// compile as a regex simply never matches through the regex arm.
#[derive(Debug, Clone)]
pub struct ValueMatch {
    literal: String,
    regex: Option<Arc<Regex>>,
}

impl ValueMatch {
    pub fn compile(expected: &str) -> Self {
        ValueMatch {
            literal: expected.to_string(),
            regex: Regex::new(expected).ok().map(Arc::new),
        }
    }

    pub fn matches(&self, actual: &str) -> bool {
        if self.literal == actual {
            return true;
        }
        self.regex.as_ref().is_some_and(|re| re.is_match(actual))
    }
}

/// Recognise the `/regex/` path form and return the inner pattern.
///
/// Slash-delimited patterns are ambiguous with trailing-slash literal
/// paths, so the form only counts as a regex when the inner part carries
/// at least one regex metacharacter. `"/api/"` stays a literal.
fn regex_literal(pattern: &str) -> Option<&str> {
    if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
        let inner = &pattern[1..pattern.len() - 1];
        if !inner.is_empty() && has_regex_metachars(inner) {
            return Some(inner);
        }
    }
    None
}

/// Convert a `*`-glob to an anchored regex, escaping everything else.
pub fn wildcard_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for (i, part) in pattern.split('*').enumerate() {
        if i > 0 {
            out.push_str(".*");
        }
        out.push_str(&regex::escape(part));
    }
    out.push('$');
    out
}

/// True when the pattern contains regex metacharacters outside the glob
/// star, which disqualifies it from literal path indexing.
pub fn has_regex_metachars(pattern: &str) -> bool {
    pattern
        .chars()
        .any(|c| matches!(c, '.' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_path_is_byte_equal() {
        let m = StringMatch::compile_path("/api/users").unwrap();
        assert!(m.matches("/api/users"));
        assert!(!m.matches("/api/users/42"));
        assert!(!m.matches("/API/users"));
    }

    #[test]
    fn wildcard_path_anchored_both_ends() {
        let m = StringMatch::compile_path("/api/users/*").unwrap();
        assert!(m.matches("/api/users/42"));
        assert!(m.matches("/api/users/"));
        assert!(!m.matches("/other/42"));
        assert!(!m.matches("/prefix/api/users/42"));
    }

    #[test]
    fn leading_star_wildcard() {
        let m = StringMatch::compile_path("*/health").unwrap();
        assert!(m.matches("/internal/health"));
        assert!(m.matches("/health"));
        assert!(!m.matches("/healthz"));
        assert_eq!(wildcard_to_regex("*abc"), "^.*abc$");
    }

    #[test]
    fn multi_star_wildcard() {
        let m = StringMatch::compile_path("/api/*/orders/*").unwrap();
        assert!(m.matches("/api/v1/orders/17"));
        assert!(m.matches("/api/a/b/orders/x/y"));
        assert!(!m.matches("/api/v1/users/17"));
    }

    #[test]
    fn regex_path_form() {
        let m = StringMatch::compile_path(r"/api\/v\d+\/users/").unwrap();
        assert!(matches!(m, StringMatch::Regex(_)));
        assert!(m.matches("/api/v2/users"));
        assert!(!m.matches("/api/users"));
    }

    #[test]
    fn trailing_slash_path_stays_literal() {
        let m = StringMatch::compile_path("/api/").unwrap();
        assert!(matches!(m, StringMatch::Literal(_)));
        assert!(m.matches("/api/"));
        assert!(!m.matches("/api"));
    }

    #[test]
    fn bare_slash_is_literal() {
        let m = StringMatch::compile_path("/").unwrap();
        assert!(matches!(m, StringMatch::Literal(_)));
        assert!(m.matches("/"));
    }

    #[test]
    fn regex_is_containment() {
        let m = StringMatch::compile_regex(r"\d{3}").unwrap();
        assert!(m.matches("order 123 shipped"));
        assert!(!m.matches("no digits"));
    }

    #[test]
    fn wildcard_escapes_metachars() {
        let m = StringMatch::compile_path("/files/*.json").unwrap();
        assert!(m.matches("/files/a.json"));
        assert!(!m.matches("/files/ajson"));
    }

    #[test]
    fn value_match_string_then_regex() {
        let m = ValueMatch::compile("exact");
        assert!(m.matches("exact"));
        // "exact" as a regex also matches by containment.
        assert!(m.matches("inexact"));

        let m = ValueMatch::compile(r"v\d+");
        assert!(m.matches("v12"));
        assert!(!m.matches("vx"));

        // Uncompilable regex still matches its literal form.
        let m = ValueMatch::compile("a(b");
        assert!(m.matches("a(b"));
        assert!(!m.matches("ab"));
    }

    #[test]
    fn metachar_detection() {
        assert!(!has_regex_metachars("/api/users"));
        assert!(has_regex_metachars("/api/v1.0/users"));
        assert!(has_regex_metachars("/api/(users|items)"));
    }
}
