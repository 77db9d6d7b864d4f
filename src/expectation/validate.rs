//! Admission gate for expectation documents.
//!
//! Validation and compilation are one step: a document is admitted exactly
//! when every embedded pattern compiles and the action shape is legal, and
//! the compiled matcher is handed to the store so the hot path never
//! re-parses anything.

use super::types::{Expectation, ValidationError};
use crate::matcher::CompiledRequestMatcher;
use uuid::Uuid;

/// An expectation that passed the admission gate, with its id assigned and
/// its matcher compiled.
#[derive(Debug, Clone)]
pub struct AdmittedExpectation {
    pub expectation: Expectation,
    pub matcher: CompiledRequestMatcher,
}

impl AdmittedExpectation {
    pub fn id(&self) -> &str {
        self.expectation.id()
    }
}

/// Validate an expectation document and compile its matcher.
///
/// Assigns a fresh UUIDv4 id when the document carries none. The store is
/// never touched on failure.
pub fn admit(mut expectation: Expectation) -> Result<AdmittedExpectation, ValidationError> {
    match (&expectation.http_response, &expectation.http_forward) {
        (Some(_), None) | (None, Some(_)) => {}
        _ => return Err(ValidationError::ActionCount),
    }

    if let Some(response) = &expectation.http_response {
        if hyper::StatusCode::from_u16(response.status_code).is_err() {
            return Err(ValidationError::StatusCode(response.status_code));
        }
    }

    if let Some(forward) = &expectation.http_forward {
        if forward.host.is_empty() {
            return Err(ValidationError::EmptyForwardHost);
        }
    }

    let matcher = CompiledRequestMatcher::compile(&expectation.http_request)?;

    if expectation.id.as_deref().is_none_or(str::is_empty) {
        expectation.id = Some(Uuid::new_v4().to_string());
    }

    Ok(AdmittedExpectation {
        expectation,
        matcher,
    })
}
