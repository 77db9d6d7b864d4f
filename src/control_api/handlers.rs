//! Control-plane endpoint handlers.
//!
//! Shape errors (unparseable or undeserialisable documents) map to 400
//! "incorrect request format"; documents that parse but fail the admission
//! gate map to 406 "invalid expectation".

use super::types::{
    empty_response, error_response, json_response, INCORRECT_FORMAT, INVALID_EXPECTATION,
};
use crate::config::Config;
use crate::expectation::{admit, Expectation};
use crate::store::{ClearFilter, ExpectationStore};
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// PUT /mockserver/expectation: admit one expectation or an array.
pub async fn upsert_expectations(
    store: &Arc<ExpectationStore>,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let parsed: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, INCORRECT_FORMAT, e.to_string());
        }
    };

    let documents = match parsed {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };

    let mut expectations = Vec::with_capacity(documents.len());
    for document in documents {
        match serde_json::from_value::<Expectation>(document) {
            Ok(expectation) => expectations.push(expectation),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, INCORRECT_FORMAT, e.to_string());
            }
        }
    }

    // Validate the whole batch up front so a bad document in an array
    // leaves the store untouched.
    for expectation in &expectations {
        if let Err(e) = admit(expectation.clone()) {
            return error_response(StatusCode::NOT_ACCEPTABLE, INVALID_EXPECTATION, e.to_string());
        }
    }

    let mut admitted = Vec::with_capacity(expectations.len());
    for expectation in expectations {
        match store.upsert(expectation).await {
            Ok(stored) => admitted.push(stored),
            Err(e) => {
                return error_response(
                    StatusCode::NOT_ACCEPTABLE,
                    INVALID_EXPECTATION,
                    e.to_string(),
                );
            }
        }
    }

    info!("admitted {} expectations", admitted.len());
    json_response(StatusCode::CREATED, &admitted)
}

/// GET /mockserver/expectation (and /active).
pub fn list_expectations(store: &Arc<ExpectationStore>) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, &store.list())
}

/// GET /mockserver/expectation/:id.
pub fn get_expectation(store: &Arc<ExpectationStore>, id: &str) -> Response<Full<Bytes>> {
    match store.get(id) {
        Some(expectation) => json_response(StatusCode::OK, &expectation),
        None => error_response(
            StatusCode::NOT_FOUND,
            INCORRECT_FORMAT,
            format!("no expectation with id {id}"),
        ),
    }
}

/// DELETE /mockserver/expectation/:id.
pub async fn delete_expectation(store: &Arc<ExpectationStore>, id: &str) -> Response<Full<Bytes>> {
    if store.delete(id).await {
        empty_response(StatusCode::NO_CONTENT)
    } else {
        error_response(
            StatusCode::BAD_REQUEST,
            INCORRECT_FORMAT,
            format!("no expectation with id {id}"),
        )
    }
}

/// DELETE /mockserver/expectation and PUT /mockserver/reset.
pub async fn clear_all(store: &Arc<ExpectationStore>) -> Response<Full<Bytes>> {
    let removed = store.clear(ClearFilter::All).await;
    info!("cleared {removed} expectations");
    empty_response(StatusCode::NO_CONTENT)
}

/// Body accepted by PUT /mockserver/clear: `{id}`, a request definition
/// (optionally wrapped in `httpRequest`), or nothing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearBody {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    http_request: Option<ClearRequest>,
}

#[derive(Debug, Deserialize)]
struct ClearRequest {
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    path: Option<String>,
}

impl ClearBody {
    fn into_filter(self) -> ClearFilter {
        if let Some(id) = self.id {
            return ClearFilter::ById(id);
        }
        if let Some(request) = self.http_request {
            return ClearFilter::ByRequest {
                method: request.method,
                path: request.path,
            };
        }
        if self.method.is_none() && self.path.is_none() {
            return ClearFilter::All;
        }
        ClearFilter::ByRequest {
            method: self.method,
            path: self.path,
        }
    }
}

/// PUT /mockserver/clear: empty body clears everything; `{id}` delegates
/// to delete; a request definition removes literal method/path matches.
pub async fn clear(store: &Arc<ExpectationStore>, body: Bytes) -> Response<Full<Bytes>> {
    let trimmed = body
        .iter()
        .filter(|b| !b.is_ascii_whitespace())
        .count();
    let filter = if trimmed == 0 {
        ClearFilter::All
    } else {
        match serde_json::from_slice::<ClearBody>(&body) {
            Ok(parsed) => parsed.into_filter(),
            Err(e) => {
                return error_response(StatusCode::BAD_REQUEST, INCORRECT_FORMAT, e.to_string());
            }
        }
    };

    let removed = store.clear(filter).await;
    info!("cleared {removed} expectations");
    empty_response(StatusCode::NO_CONTENT)
}

/// PUT /mockserver/status.
pub fn status(config: &Config) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &serde_json::json!({ "ports": [config.port] }),
    )
}
