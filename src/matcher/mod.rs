//! Pure request-matching predicates.
//!
//! Matchers are total functions: malformed input (bad regex, invalid JSON
//! or XML) is reported as non-match, never as an engine failure. Patterns
//! that fail to compile are rejected up front by the admission gate.
//!
//! # Module Structure
//!
//! - `string_match` - literal, regex, and wildcard string predicates
//! - `json_match` - structural JSON comparison with JSON-Unit placeholders
//! - `body_match` - body variants (string, json, jsonpath, xpath, regex)
//! - `field_match` - header and query multimap matching
//! - `request` - whole-request compiled matcher

mod body_match;
mod field_match;
mod json_match;
mod request;
mod string_match;

pub use body_match::{json_path_select, BodyMatch};
pub use field_match::{FieldsMatch, STANDARD_HEADER_WHITELIST};
pub use json_match::{json_matches, JsonCompareMode};
pub use request::CompiledRequestMatcher;
pub use string_match::{wildcard_to_regex, StringMatch, ValueMatch};
