//! Expectation data model and admission gate.

mod types;
mod validate;

pub use types::{
    BodySpec, CannedResponse, Delay, Expectation, FieldMap, Forward, MatchType, OneOrMany,
    RequestMatcher, ResponseMode, Scheme, Spec, ValidationError,
};
pub use validate::{admit, AdmittedExpectation};
