//! Type definitions for expectations and their wire format.
//!
//! An expectation pairs a request matcher with exactly one action, a canned
//! response or an upstream forward. The JSON wire format accepts several
//! polymorphic shapes (a field may be a bare string or a `{value, not}`
//! object); those are normalised here into tagged variants at the serde
//! layer so the rest of the engine never sees the duck-typed forms.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// A matcher field that is either a bare value or a value with flags.
///
/// `"GET"` and `{"value": "GET", "not": true}` both deserialize into this
/// type; the flagged form inverts the match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Spec<T> {
    Plain(T),
    Flagged {
        value: T,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
}

impl<T> Spec<T> {
    pub fn value(&self) -> &T {
        match self {
            Spec::Plain(v) => v,
            Spec::Flagged { value, .. } => value,
        }
    }

    pub fn not(&self) -> bool {
        match self {
            Spec::Plain(_) => false,
            Spec::Flagged { not, .. } => *not,
        }
    }
}

/// A single value or a list of values, as accepted for header and query
/// parameter expectations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn as_slice(&self) -> &[String] {
        match self {
            OneOrMany::One(v) => std::slice::from_ref(v),
            OneOrMany::Many(vs) => vs,
        }
    }

    /// First element, for contexts that emit a single value.
    pub fn first(&self) -> Option<&str> {
        self.as_slice().first().map(String::as_str)
    }
}

/// Map of field names to expected values, used for headers and query
/// parameters.
pub type FieldMap = BTreeMap<String, OneOrMany>;

/// How unspecified request fields are treated during matching.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum MatchType {
    /// Unspecified field sets on the request must be empty (headers modulo
    /// the standard-header whitelist).
    #[serde(rename = "STRICT")]
    Strict,
    /// Only the fields the expectation specifies are examined.
    #[default]
    #[serde(rename = "ONLY_MATCHING_FIELDS")]
    OnlyMatchingFields,
}

/// Body matcher variants, tagged on `type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BodySpec {
    /// Byte-equal comparison against the raw body.
    #[serde(alias = "STRING")]
    String {
        value: String,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
    /// Structural JSON comparison, exact by default; `ONLY_MATCHING_FIELDS`
    /// selects containment. Honours `${json-unit.*}` placeholders.
    #[serde(alias = "JSON")]
    Json {
        value: serde_json::Value,
        #[serde(
            rename = "matchType",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        match_type: Option<MatchType>,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
    /// Matches when the expression selects anything in the JSON body.
    #[serde(alias = "JSONPATH", alias = "JSON_PATH")]
    Jsonpath {
        value: String,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
    /// Matches when the expression selects anything in the XML body.
    #[serde(alias = "XPATH")]
    Xpath {
        value: String,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
    /// Containment regex over the body text.
    #[serde(alias = "REGEX")]
    Regex {
        value: String,
        #[serde(default, skip_serializing_if = "is_false")]
        not: bool,
    },
}

/// The predicate portion of an expectation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<Spec<String>>,
    /// Literal path, `*`-glob, or `/regex/` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Spec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_string_parameters: Option<Spec<FieldMap>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Spec<FieldMap>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
}

impl RequestMatcher {
    pub fn match_type(&self) -> MatchType {
        self.match_type.unwrap_or_default()
    }
}

/// Delay accepted on responses and forwards: bare milliseconds or a
/// `{timeUnit, value}` object. Unknown units are read as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Delay {
    Millis(u64),
    Unit {
        #[serde(rename = "timeUnit")]
        time_unit: String,
        value: u64,
    },
}

impl Delay {
    pub fn to_duration(&self) -> Duration {
        match self {
            Delay::Millis(ms) => Duration::from_millis(*ms),
            Delay::Unit { time_unit, value } => match time_unit.to_uppercase().as_str() {
                "SECONDS" => Duration::from_secs(*value),
                "MINUTES" => Duration::from_secs(*value * 60),
                _ => Duration::from_millis(*value),
            },
        }
    }
}

/// How a canned response body is interpreted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Body is UTF-8 text or a JSON document (default).
    #[default]
    Text,
    /// Body is base64-encoded binary data.
    Binary,
}

fn is_text_mode(mode: &ResponseMode) -> bool {
    *mode == ResponseMode::Text
}

/// Pre-declared reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CannedResponse {
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: FieldMap,
    /// Strings pass through as-is; objects and arrays are serialised as
    /// JSON on the wire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "is_text_mode")]
    pub mode: ResponseMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

pub(crate) fn default_status_code() -> u16 {
    200
}

/// Upstream scheme for forwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    #[serde(rename = "HTTP")]
    Http,
    #[serde(rename = "HTTPS")]
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Scheme::Http => 80,
            Scheme::Https => 443,
        }
    }
}

/// Proxy action: relay the request to a named upstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Forward {
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default)]
    pub scheme: Scheme,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<Delay>,
}

/// A declarative rule pairing a request matcher with a response or forward
/// action. The central entity of the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Expectation {
    /// Process-wide unique id; assigned by the server when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Higher wins; ties break on id string comparison, descending.
    #[serde(default)]
    pub priority: i64,
    pub http_request: RequestMatcher,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_response: Option<CannedResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_forward: Option<Forward>,
}

impl Expectation {
    /// The assigned id. Only valid after admission, which guarantees it.
    pub fn id(&self) -> &str {
        self.id.as_deref().unwrap_or("")
    }

    pub fn is_forward(&self) -> bool {
        self.http_forward.is_some()
    }
}

/// Rejection reasons from the admission gate.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("exactly one of httpResponse or httpForward must be set")]
    ActionCount,
    #[error("invalid regex in {field}: {source}")]
    Regex {
        field: &'static str,
        source: regex::Error,
    },
    #[error("invalid JSONPath expression: {0}")]
    JsonPath(String),
    #[error("invalid XPath expression: {0}")]
    XPath(String),
    #[error("statusCode {0} is not a valid HTTP status")]
    StatusCode(u16),
    #[error("forward host must not be empty")]
    EmptyForwardHost,
}

fn is_false(b: &bool) -> bool {
    !*b
}
