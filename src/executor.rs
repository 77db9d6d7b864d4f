//! Action execution: realise a matched expectation as an HTTP response.
//!
//! Canned responses are built locally; forwards relay the request to the
//! configured upstream and stream its answer back. Both honour the
//! declared delay before any response bytes are produced.

use crate::expectation::{AdmittedExpectation, CannedResponse, Forward, ResponseMode};
use crate::request::RequestRecord;
use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Hop-by-hop and proxy-hint headers never relayed upstream.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "host",
    "connection",
    "content-length",
    "x-real-ip",
    "proxy-connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Response headers not copied back from the upstream.
const SKIPPED_RESPONSE_HEADERS: &[&str] = &["connection", "transfer-encoding"];

/// Process-wide upstream client. Forwards match the permissive posture of
/// the source ecosystem: TLS certificates are not verified.
static FORWARD_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

fn forward_client(timeout: Duration) -> &'static reqwest::Client {
    FORWARD_CLIENT.get_or_init(|| {
        reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .unwrap_or_default()
    })
}

/// Realise the matched expectation's action.
pub async fn execute(
    admitted: &AdmittedExpectation,
    request: &RequestRecord,
    forward_timeout: Duration,
) -> Response<Full<Bytes>> {
    if let Some(response) = &admitted.expectation.http_response {
        return execute_canned(response).await;
    }
    if let Some(forward) = &admitted.expectation.http_forward {
        return execute_forward(forward, request, forward_timeout).await;
    }
    // Admission guarantees exactly one action; defend anyway.
    warn!(
        "expectation {} has no executable action",
        admitted.id()
    );
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        &serde_json::json!({
            "error": "inconsistent expectation",
            "message": "expectation carries no action"
        }),
    )
}

async fn execute_canned(canned: &CannedResponse) -> Response<Full<Bytes>> {
    if let Some(delay) = &canned.delay {
        tokio::time::sleep(delay.to_duration()).await;
    }

    let status =
        StatusCode::from_u16(canned.status_code).unwrap_or(StatusCode::OK);

    let mut builder = Response::builder().status(status);
    let mut declared_content_type = false;
    for (name, values) in &canned.headers {
        // List-valued headers emit their first element.
        if let Some(value) = values.first() {
            if name.eq_ignore_ascii_case("content-type") {
                declared_content_type = true;
            }
            builder = builder.header(name.as_str(), value);
        }
    }

    let body = match &canned.body {
        None => Bytes::new(),
        Some(serde_json::Value::String(text)) => match canned.mode {
            ResponseMode::Text => Bytes::from(text.clone()),
            ResponseMode::Binary => match base64::engine::general_purpose::STANDARD.decode(text) {
                Ok(bytes) => Bytes::from(bytes),
                Err(e) => {
                    warn!("canned binary body is not valid base64: {e}");
                    Bytes::new()
                }
            },
        },
        Some(value) => {
            if !declared_content_type {
                builder = builder.header("content-type", "application/json");
            }
            Bytes::from(serde_json::to_vec(value).unwrap_or_default())
        }
    };

    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

async fn execute_forward(
    forward: &Forward,
    request: &RequestRecord,
    timeout: Duration,
) -> Response<Full<Bytes>> {
    if let Some(delay) = &forward.delay {
        tokio::time::sleep(delay.to_duration()).await;
    }

    let target_url = build_target_url(forward, request);
    debug!("forwarding {} {} to {target_url}", request.method, request.path);

    let client = forward_client(timeout);
    let method = reqwest::Method::from_bytes(request.method.as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let mut upstream = client.request(method, &target_url);

    for (name, values) in &request.headers {
        if is_hop_by_hop(name) {
            continue;
        }
        for value in values {
            upstream = upstream.header(name.as_str(), value.as_str());
        }
    }
    upstream = upstream.header("host", target_authority(forward));

    if !request.body.is_empty() {
        upstream = upstream.body(request.body.clone());
    }

    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            warn!("upstream request to {target_url} failed: {e}");
            return json_response(
                StatusCode::BAD_GATEWAY,
                &serde_json::json!({
                    "error": "upstream request failed",
                    "message": e.to_string()
                }),
            );
        }
    };

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in response.headers() {
        if SKIPPED_RESPONSE_HEADERS
            .iter()
            .any(|skip| name.as_str().eq_ignore_ascii_case(skip))
        {
            continue;
        }
        builder = builder.header(name, value);
    }

    let body = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("failed to read upstream body from {target_url}: {e}");
            return json_response(
                StatusCode::BAD_GATEWAY,
                &serde_json::json!({
                    "error": "upstream request failed",
                    "message": e.to_string()
                }),
            );
        }
    };

    builder
        .body(Full::new(body))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}

/// `<scheme>://<host>[:port]<path>[?query]`, omitting scheme-default ports
/// and preserving the client's query byte-for-byte when available.
fn build_target_url(forward: &Forward, request: &RequestRecord) -> String {
    let mut url = format!("{}://{}", forward.scheme.as_str(), target_authority(forward));
    url.push_str(&request.path);
    if let Some(query) = request.forward_query() {
        url.push('?');
        url.push_str(&query);
    }
    url
}

fn target_authority(forward: &Forward) -> String {
    match forward.port {
        Some(port) if port != forward.scheme.default_port() => {
            format!("{}:{port}", forward.host)
        }
        _ => forward.host.clone(),
    }
}

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| name.eq_ignore_ascii_case(h))
        || name.to_ascii_lowercase().starts_with("x-forwarded-")
}

fn json_response(status: StatusCode, body: &serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_else(|_| Response::new(Full::new(Bytes::new())))
}
