//! Compiled whole-request matcher.
//!
//! Field matchers are compiled once at admission; evaluation against a
//! [`RequestRecord`] is pure and non-suspending. `STRICT` match type
//! additionally requires unspecified field sets on the request to be empty
//! (headers modulo the standard-header whitelist).

use super::body_match::BodyMatch;
use super::field_match::{unspecified_is_empty, FieldsMatch, STANDARD_HEADER_WHITELIST};
use super::string_match::StringMatch;
use crate::expectation::{MatchType, RequestMatcher, ValidationError};
use crate::request::RequestRecord;

/// Compiled predicate for a whole request.
#[derive(Debug, Clone)]
pub struct CompiledRequestMatcher {
    method: Option<MethodMatch>,
    path: Option<PathMatch>,
    query: Option<FieldsMatch>,
    headers: Option<FieldsMatch>,
    body: Option<BodyMatch>,
    match_type: MatchType,
}

#[derive(Debug, Clone)]
struct MethodMatch {
    value: String,
    not: bool,
}

#[derive(Debug, Clone)]
struct PathMatch {
    matcher: StringMatch,
    not: bool,
}

impl CompiledRequestMatcher {
    pub fn compile(spec: &RequestMatcher) -> Result<Self, ValidationError> {
        let method = spec.method.as_ref().map(|m| MethodMatch {
            value: m.value().clone(),
            not: m.not(),
        });

        let path = spec
            .path
            .as_ref()
            .map(|p| {
                Ok::<_, ValidationError>(PathMatch {
                    matcher: StringMatch::compile_path(p.value()).map_err(|source| {
                        ValidationError::Regex {
                            field: "path",
                            source,
                        }
                    })?,
                    not: p.not(),
                })
            })
            .transpose()?;

        let query = spec
            .query_string_parameters
            .as_ref()
            .map(|q| FieldsMatch::compile(q, false));

        let headers = spec.headers.as_ref().map(|h| FieldsMatch::compile(h, true));

        let body = spec.body.as_ref().map(BodyMatch::compile).transpose()?;

        Ok(CompiledRequestMatcher {
            method,
            path,
            query,
            headers,
            body,
            match_type: spec.match_type(),
        })
    }

    pub fn matches(&self, req: &RequestRecord) -> bool {
        let strict = self.match_type == MatchType::Strict;

        if let Some(method) = &self.method {
            if (method.value == req.method) == method.not {
                return false;
            }
        }

        if let Some(path) = &self.path {
            // The query is stripped before path matching; regex paths see
            // the bare path only.
            if path.matcher.matches(&req.path) == path.not {
                return false;
            }
        }

        let query_entries = req.query_entries();
        match &self.query {
            Some(fields) => {
                let iter = query_entries
                    .iter()
                    .map(|(name, values)| (name.as_str(), values.as_slice()));
                if !fields.matches(iter, strict, &[]) {
                    return false;
                }
            }
            None => {
                if strict && !req.query.is_empty() {
                    return false;
                }
            }
        }

        match &self.headers {
            Some(fields) => {
                let iter = req
                    .headers
                    .iter()
                    .map(|(name, values)| (name.as_str(), values.as_slice()));
                if !fields.matches(iter, strict, STANDARD_HEADER_WHITELIST) {
                    return false;
                }
            }
            None => {
                if strict
                    && !unspecified_is_empty(
                        req.headers.keys().map(String::as_str),
                        STANDARD_HEADER_WHITELIST,
                    )
                {
                    return false;
                }
            }
        }

        match &self.body {
            Some(body) => {
                if !body.matches(&req.body) {
                    return false;
                }
            }
            None => {
                if strict && !req.body.is_empty() {
                    return false;
                }
            }
        }

        true
    }

    /// The literal method this matcher fixes, when index-eligible.
    pub fn indexable_method(&self) -> Option<&str> {
        self.method
            .as_ref()
            .filter(|m| !m.not)
            .map(|m| m.value.as_str())
    }

    /// The literal path this matcher fixes, when index-eligible.
    pub fn indexable_path(&self) -> Option<&str> {
        self.path
            .as_ref()
            .filter(|p| !p.not)
            .and_then(|p| p.matcher.as_literal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn compile(spec: serde_json::Value) -> CompiledRequestMatcher {
        let spec: RequestMatcher = serde_json::from_value(spec).unwrap();
        CompiledRequestMatcher::compile(&spec).unwrap()
    }

    fn request(method: &str, path: &str) -> RequestRecord {
        RequestRecord {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn method_and_path() {
        let m = compile(json!({"method": "GET", "path": "/api/users"}));
        assert!(m.matches(&request("GET", "/api/users")));
        assert!(!m.matches(&request("POST", "/api/users")));
        assert!(!m.matches(&request("GET", "/api/items")));
    }

    #[test]
    fn inverted_method() {
        let m = compile(json!({"method": {"value": "DELETE", "not": true}}));
        assert!(m.matches(&request("GET", "/x")));
        assert!(!m.matches(&request("DELETE", "/x")));
    }

    #[test]
    fn wildcard_path() {
        let m = compile(json!({"path": "/api/users/*"}));
        assert!(m.matches(&request("GET", "/api/users/42")));
        assert!(!m.matches(&request("GET", "/other/42")));
    }

    #[test]
    fn inverted_path() {
        let m = compile(json!({"path": {"value": "/internal/*", "not": true}}));
        assert!(m.matches(&request("GET", "/api/users")));
        assert!(!m.matches(&request("GET", "/internal/admin")));
    }

    #[test]
    fn query_parameters() {
        let m = compile(json!({"queryStringParameters": {"page": "1", "tag": ["a", "b"]}}));
        let mut req = request("GET", "/list");
        req.query = crate::request::parse_query("page=1&tag=b&tag=a&other=x");
        assert!(m.matches(&req));

        req.query = crate::request::parse_query("page=1&tag=a");
        assert!(!m.matches(&req));
    }

    #[test]
    fn headers_case_insensitive() {
        let m = compile(json!({"headers": {"X-Api-Key": "secret"}}));
        let mut req = request("GET", "/x");
        req.headers
            .insert("x-api-key".to_string(), vec!["secret".to_string()]);
        assert!(m.matches(&req));
    }

    #[test]
    fn body_matcher_wired_through() {
        let m = compile(json!({"body": {"type": "json", "value": {"name": "Alice", "age": 30}}}));
        let mut req = request("POST", "/api/users");
        req.body = Bytes::from_static(br#"{"name": "Alice", "age": 30}"#);
        assert!(m.matches(&req));

        req.body = Bytes::from_static(br#"{"name": "Alice"}"#);
        assert!(!m.matches(&req));
    }

    #[test]
    fn strict_rejects_unspecified_query() {
        let m = compile(json!({"path": "/x", "matchType": "STRICT"}));
        let mut req = request("GET", "/x");
        assert!(m.matches(&req));

        req.query = crate::request::parse_query("a=1");
        assert!(!m.matches(&req));
    }

    #[test]
    fn strict_allows_whitelisted_headers() {
        let m = compile(json!({"path": "/x", "matchType": "STRICT"}));
        let mut req = request("GET", "/x");
        req.headers
            .insert("host".to_string(), vec!["localhost".to_string()]);
        req.headers
            .insert("user-agent".to_string(), vec!["curl".to_string()]);
        assert!(m.matches(&req));

        req.headers
            .insert("x-custom".to_string(), vec!["1".to_string()]);
        assert!(!m.matches(&req));
    }

    #[test]
    fn strict_rejects_unspecified_body() {
        let m = compile(json!({"path": "/x", "matchType": "STRICT"}));
        let mut req = request("POST", "/x");
        req.body = Bytes::from_static(b"payload");
        assert!(!m.matches(&req));
    }

    #[test]
    fn index_eligibility_accessors() {
        let m = compile(json!({"method": "GET", "path": "/api/users"}));
        assert_eq!(m.indexable_method(), Some("GET"));
        assert_eq!(m.indexable_path(), Some("/api/users"));

        let m = compile(json!({"method": {"value": "GET", "not": true}, "path": "/api/*"}));
        assert_eq!(m.indexable_method(), None);
        assert_eq!(m.indexable_path(), None);
    }

    #[test]
    fn empty_matcher_matches_everything() {
        let m = compile(json!({}));
        assert!(m.matches(&request("GET", "/anything")));
    }
}
