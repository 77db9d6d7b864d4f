//! Route dispatch for the `/mockserver` control plane.

use super::handlers;
use super::types::not_found;
use crate::config::Config;
use crate::store::ExpectationStore;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response};
use std::sync::Arc;
use tracing::debug;

/// Path prefix shared by every control-plane endpoint.
pub const CONTROL_PREFIX: &str = "/mockserver";

/// Parsed control-plane route.
#[derive(Debug, PartialEq)]
enum ControlRoute {
    ExpectationCollection,
    ExpectationActive,
    ExpectationById(String),
    Clear,
    Reset,
    Status,
}

impl ControlRoute {
    /// Parse the path segments after `/mockserver`.
    fn parse(segments: &[&str]) -> Option<Self> {
        match segments {
            ["expectation"] => Some(ControlRoute::ExpectationCollection),
            ["expectation", "active"] => Some(ControlRoute::ExpectationActive),
            ["expectation", id] => Some(ControlRoute::ExpectationById((*id).to_string())),
            ["clear"] => Some(ControlRoute::Clear),
            ["reset"] => Some(ControlRoute::Reset),
            ["status"] => Some(ControlRoute::Status),
            _ => None,
        }
    }
}

/// Dispatch a control-plane request. The framing layer has already
/// collected the body and stripped nothing from the path.
pub async fn dispatch(
    method: &Method,
    path: &str,
    body: Bytes,
    store: &Arc<ExpectationStore>,
    config: &Config,
) -> Response<Full<Bytes>> {
    debug!("control plane: {method} {path}");

    let rest = path
        .strip_prefix(CONTROL_PREFIX)
        .unwrap_or(path)
        .trim_matches('/');
    let segments: Vec<&str> = if rest.is_empty() {
        Vec::new()
    } else {
        rest.split('/').collect()
    };

    let Some(route) = ControlRoute::parse(&segments) else {
        return not_found();
    };

    match (method, route) {
        (&Method::PUT, ControlRoute::ExpectationCollection) => {
            handlers::upsert_expectations(store, body).await
        }
        (&Method::GET, ControlRoute::ExpectationCollection)
        | (&Method::GET, ControlRoute::ExpectationActive) => handlers::list_expectations(store),
        (&Method::DELETE, ControlRoute::ExpectationCollection) => {
            handlers::clear_all(store).await
        }
        (&Method::GET, ControlRoute::ExpectationById(id)) => {
            handlers::get_expectation(store, &id)
        }
        (&Method::DELETE, ControlRoute::ExpectationById(id)) => {
            handlers::delete_expectation(store, &id).await
        }
        (&Method::PUT, ControlRoute::Clear) => handlers::clear(store, body).await,
        (&Method::PUT, ControlRoute::Reset) => handlers::clear_all(store).await,
        (&Method::PUT, ControlRoute::Status) => handlers::status(config),
        _ => not_found(),
    }
}
